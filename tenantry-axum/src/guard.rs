//! Access guard for tenant-scoped routes.

use std::marker::PhantomData;
use std::task::{Context, Poll};

use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use http::Request;
use tenantry_core::{AccessGuard, RequestContext, SchemaRegistrar, TenancyError, TenantConnection};
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::error::TenancyRejection;

/// Layer rejecting requests that lack a resolved tenant and an open connection.
///
/// Apply it to tenant-scoped routers only, inside [`TenantContextLayer`]. With a
/// [`SchemaRegistrar`] attached, the guard also makes sure the tenant's schemas
/// are registered before the handler runs.
///
/// [`TenantContextLayer`]: crate::TenantContextLayer
pub struct AccessGuardLayer<C> {
    registrar: Option<SchemaRegistrar>,
    _connection: PhantomData<fn() -> C>,
}

impl<C> Clone for AccessGuardLayer<C> {
    fn clone(&self) -> Self {
        Self {
            registrar: self.registrar.clone(),
            _connection: PhantomData,
        }
    }
}

impl<C> Default for AccessGuardLayer<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> AccessGuardLayer<C> {
    /// Create a guard without schema registration.
    pub fn new() -> Self {
        Self {
            registrar: None,
            _connection: PhantomData,
        }
    }

    /// Register these schemas on each tenant connection before the handler runs.
    pub fn with_schemas(mut self, registrar: SchemaRegistrar) -> Self {
        self.registrar = Some(registrar);
        self
    }
}

impl<S, C> Layer<S> for AccessGuardLayer<C> {
    type Service = AccessGuardService<S, C>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessGuardService {
            inner,
            registrar: self.registrar.clone(),
            _connection: PhantomData,
        }
    }
}

/// Service produced by [`AccessGuardLayer`].
pub struct AccessGuardService<S, C> {
    inner: S,
    registrar: Option<SchemaRegistrar>,
    _connection: PhantomData<fn() -> C>,
}

impl<S: Clone, C> Clone for AccessGuardService<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            registrar: self.registrar.clone(),
            _connection: PhantomData,
        }
    }
}

impl<S, C, B> Service<Request<B>> for AccessGuardService<S, C>
where
    S: Service<Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    C: TenantConnection,
    B: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let registrar = self.registrar.clone();

        Box::pin(async move {
            let Some(ctx) = request.extensions().get::<RequestContext<C>>().cloned() else {
                warn!(path = %request.uri().path(), "no tenant context on guarded route");
                return Ok(TenancyRejection(TenancyError::Forbidden).into_response());
            };

            let conn = match AccessGuard::require(&ctx) {
                Ok((_, conn)) => conn.clone(),
                Err(e) => {
                    warn!(scope = %ctx.scope(), "tenant context incomplete on guarded route");
                    return Ok(TenancyRejection(e).into_response());
                }
            };

            if let Some(registrar) = registrar {
                match registrar.ensure_all(&conn).await {
                    Ok(0) => {}
                    Ok(added) => debug!(tenant = %conn.tenant_id(), added, "schemas ensured"),
                    Err(e) => {
                        warn!(tenant = %conn.tenant_id(), error = %e, "schema registration failed");
                        return Ok(TenancyRejection(e).into_response());
                    }
                }
            }

            inner.call(request).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::Router;
    use axum::body::Body;
    use axum::routing::get;
    use http::StatusCode;
    use pretty_assertions::assert_eq;
    use tenantry_core::testing::{MockConnection, MockFactory};
    use tenantry_core::{
        ConnectionFactory, IndexDef, PooledConnection, SchemaDef, Tenant, TenantId,
    };
    use tower::ServiceExt;

    async fn tenant_context(factory: &MockFactory) -> RequestContext<MockConnection> {
        let conn = factory.create("gw_db").await.unwrap();
        let handle = Arc::new(PooledConnection::new(TenantId::new("t-gw"), "gw_db", conn));
        RequestContext::tenant(Tenant::new(TenantId::new("t-gw"), "greenwood", "gw_db"), handle)
    }

    fn request(ctx: Option<RequestContext<MockConnection>>) -> Request<Body> {
        let mut request = Request::builder().uri("/students").body(Body::empty()).unwrap();
        if let Some(ctx) = ctx {
            request.extensions_mut().insert(ctx);
        }
        request
    }

    fn app(layer: AccessGuardLayer<MockConnection>) -> Router {
        Router::new()
            .route("/students", get(|| async { "ok" }))
            .layer(layer)
    }

    fn registrar() -> SchemaRegistrar {
        SchemaRegistrar::new([
            SchemaDef::new("Student").index(IndexDef::on("email").unique()),
            SchemaDef::new("Course"),
        ])
    }

    #[tokio::test]
    async fn test_missing_context_forbidden() {
        let response = app(AccessGuardLayer::new()).oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_platform_context_forbidden() {
        let response = app(AccessGuardLayer::new())
            .oneshot(request(Some(RequestContext::platform())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_tenant_context_passes_and_registers_once() {
        let factory = MockFactory::new();
        let ctx = tenant_context(&factory).await;
        let app = app(AccessGuardLayer::new().with_schemas(registrar()));

        for _ in 0..3 {
            let response = app.clone().oneshot(request(Some(ctx.clone()))).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(factory.registration_count(), 2);
    }

    #[tokio::test]
    async fn test_schema_failure_is_server_error() {
        let factory = MockFactory::new().failing_schema("Course");
        let ctx = tenant_context(&factory).await;

        let response = app(AccessGuardLayer::new().with_schemas(registrar()))
            .oneshot(request(Some(ctx)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
