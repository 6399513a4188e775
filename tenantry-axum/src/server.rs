//! Serving with graceful shutdown and pool teardown.

use std::future::Future;
use std::io;

use axum::Router;
use tenantry_core::{ConnectionPool, TeardownReport, TenantConnection};
use tokio::net::TcpListener;
use tracing::{error, info};

/// Resolve on Ctrl+C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("ctrl-c received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}

/// Serve `router` until `signal` resolves, then close every tenant connection.
///
/// The pool is torn down even when the server fails; the server error is
/// returned after teardown completes.
///
/// ```rust,ignore
/// let listener = TcpListener::bind("0.0.0.0:3000").await?;
/// let report = serve_with_teardown(listener, app, resolver.pool().clone(), shutdown_signal()).await?;
/// ```
pub async fn serve_with_teardown<C, F>(
    listener: TcpListener,
    router: Router,
    pool: ConnectionPool<C>,
    signal: F,
) -> io::Result<TeardownReport>
where
    C: TenantConnection,
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "listening");
    }

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(signal)
        .await;

    if let Err(e) = &served {
        error!(error = %e, "server stopped with error");
    }

    let report = pool.teardown_all().await;
    served.map(|()| report)
}
