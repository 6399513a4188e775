//! Tenant context middleware.
//!
//! [`TenantContextLayer`] reads the routing header, resolves the tenant and its
//! connection, and attaches a [`RequestContext`] to the request extensions before
//! any handler runs. Any resolution failure short-circuits the request.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use http::{HeaderName, Request};
use tenantry_core::config::{DEFAULT_PLATFORM_SENTINEL, DEFAULT_TENANT_HEADER, is_exempt_path};
use tenantry_core::task_local::with_context;
use tenantry_core::{
    RequestContext, RouteScope, TenancyConfig, TenancyError, TenancyResult, TenantConnection,
    TenantResolver,
};
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::error::TenancyRejection;

#[derive(Debug, Clone)]
struct Settings {
    header: HeaderName,
    platform_sentinel: String,
    exempt_paths: Vec<String>,
}

/// Tower layer attaching the tenant context to each request.
///
/// ```rust,ignore
/// let app = Router::new()
///     .nest("/api", tenant_routes)
///     .route("/health", get(health))
///     .layer(TenantContextLayer::from_config(&config, resolver)?);
/// ```
pub struct TenantContextLayer<C> {
    resolver: TenantResolver<C>,
    settings: Arc<Settings>,
}

impl<C> Clone for TenantContextLayer<C> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
            settings: Arc::clone(&self.settings),
        }
    }
}

impl<C: TenantConnection> TenantContextLayer<C> {
    /// Create a layer with the default header, sentinel and no exempt paths.
    pub fn new(resolver: TenantResolver<C>) -> Self {
        Self {
            resolver,
            settings: Arc::new(Settings {
                header: HeaderName::from_static(DEFAULT_TENANT_HEADER),
                platform_sentinel: DEFAULT_PLATFORM_SENTINEL.to_string(),
                exempt_paths: Vec::new(),
            }),
        }
    }

    /// Create a layer using the header, sentinel and exempt paths of `config`.
    pub fn from_config(config: &TenancyConfig, resolver: TenantResolver<C>) -> TenancyResult<Self> {
        let header = config.tenant_header_name()?;

        Ok(Self {
            resolver,
            settings: Arc::new(Settings {
                header,
                platform_sentinel: config.platform_sentinel.clone(),
                exempt_paths: config.exempt_paths.clone(),
            }),
        })
    }

    /// Skip tenant resolution for these path prefixes.
    pub fn exempt<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::make_mut(&mut self.settings)
            .exempt_paths
            .extend(paths.into_iter().map(Into::into));
        self
    }

    /// The resolver used by this layer.
    pub fn resolver(&self) -> &TenantResolver<C> {
        &self.resolver
    }
}

impl<S, C> Layer<S> for TenantContextLayer<C> {
    type Service = TenantContextService<S, C>;

    fn layer(&self, inner: S) -> Self::Service {
        TenantContextService {
            inner,
            resolver: self.resolver.clone(),
            settings: Arc::clone(&self.settings),
        }
    }
}

/// Service produced by [`TenantContextLayer`].
pub struct TenantContextService<S, C> {
    inner: S,
    resolver: TenantResolver<C>,
    settings: Arc<Settings>,
}

impl<S: Clone, C> Clone for TenantContextService<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            resolver: self.resolver.clone(),
            settings: Arc::clone(&self.settings),
        }
    }
}

impl<S, C, B> Service<Request<B>> for TenantContextService<S, C>
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

    fn call(&mut self, mut request: Request<B>) -> Self::Future {
        // The clone may not be ready; drive the instance that was polled.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let resolver = self.resolver.clone();
        let settings = Arc::clone(&self.settings);

        Box::pin(async move {
            let path = request.uri().path();
            if is_exempt_path(&settings.exempt_paths, path) {
                debug!(path = %path, "tenant resolution skipped for exempt route");
                return inner.call(request).await;
            }

            let header = request
                .headers()
                .get(&settings.header)
                .and_then(|v| v.to_str().ok());

            let scope = match RouteScope::classify(header, &settings.platform_sentinel) {
                Ok(scope) => scope,
                Err(e) => return Ok(reject(e, path)),
            };

            let context = match scope {
                RouteScope::Platform => RequestContext::<C>::platform(),
                RouteScope::Tenant(name) => match resolver.resolve_by_name(&name).await {
                    Ok((tenant, conn)) => RequestContext::tenant(tenant, conn),
                    Err(e) => return Ok(reject(e, request.uri().path())),
                },
            };

            debug!(scope = %context.scope(), "tenant context attached");
            request.extensions_mut().insert(context.clone());
            with_context(context, inner.call(request)).await
        })
    }
}

fn reject(err: TenancyError, path: &str) -> Response {
    warn!(path = %path, code = %err.code(), error = %err, "request rejected by tenant context");
    TenancyRejection(err).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::Body;
    use axum::routing::get;
    use http::StatusCode;
    use pretty_assertions::assert_eq;
    use tenantry_core::task_local::current_tenant;
    use tenantry_core::testing::{MockConnection, MockFactory};
    use tenantry_core::{InMemoryTenantDirectory, Tenant, TenantId, TenantStatus};
    use tower::ServiceExt;

    fn directory() -> Arc<InMemoryTenantDirectory> {
        Arc::new(InMemoryTenantDirectory::with_tenants([
            Tenant::new(TenantId::new("t-gw"), "greenwood", "gw_db"),
            Tenant::new(TenantId::new("t-old"), "oldschool", "old_db")
                .with_status(TenantStatus::Inactive),
        ]))
    }

    fn app(directory: Arc<InMemoryTenantDirectory>, factory: Arc<MockFactory>) -> Router {
        let resolver = TenantResolver::<MockConnection>::new(directory, factory);
        Router::new()
            .route(
                "/students",
                get(|| async {
                    current_tenant()
                        .map(|t| t.name.clone())
                        .unwrap_or_else(|| "platform".to_string())
                }),
            )
            .route("/health", get(|| async { "ok" }))
            .layer(TenantContextLayer::new(resolver).exempt(["/health"]))
    }

    fn request(path: &str, tenant: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(path);
        if let Some(name) = tenant {
            builder = builder.header(DEFAULT_TENANT_HEADER, name);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_tenant_request_resolves_context() {
        let factory = Arc::new(MockFactory::new());
        let app = app(directory(), factory.clone());

        let response = app
            .clone()
            .oneshot(request("/students", Some("greenwood")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "greenwood");

        let response = app
            .oneshot(request("/students", Some("greenwood")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(factory.create_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_header_is_bad_request() {
        let app = app(directory(), Arc::new(MockFactory::new()));
        let response = app.oneshot(request("/students", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_and_inactive_tenants_rejected() {
        let factory = Arc::new(MockFactory::new());
        let app = app(directory(), factory.clone());

        let response = app
            .clone()
            .oneshot(request("/students", Some("unknownschool")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(request("/students", Some("oldschool")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(factory.create_count(), 0);
    }

    #[tokio::test]
    async fn test_platform_sentinel_skips_lookup() {
        let directory = directory();
        let app = app(directory.clone(), Arc::new(MockFactory::new()));

        let response = app
            .oneshot(request("/students", Some("admin")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "platform");
        assert_eq!(directory.lookup_count(), 0);
    }

    #[tokio::test]
    async fn test_exempt_route_passes_without_header() {
        let directory = directory();
        let app = app(directory.clone(), Arc::new(MockFactory::new()));

        let response = app.oneshot(request("/health", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(directory.lookup_count(), 0);
    }

    #[tokio::test]
    async fn test_connection_failure_is_service_unavailable() {
        let factory = Arc::new(MockFactory::new().failing_for("gw_db"));
        let app = app(directory(), factory);

        let response = app
            .oneshot(request("/students", Some("greenwood")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_from_config_rejects_bad_header() {
        let mut config = TenancyConfig::builder()
            .tenant_uri_template("mongodb://localhost:27017/{database}")
            .global_uri("mongodb://localhost:27017")
            .build()
            .unwrap();
        config.tenant_header = "bad header".to_string();

        let resolver = TenantResolver::<MockConnection>::new(
            directory(),
            Arc::new(MockFactory::new()),
        );
        assert!(TenantContextLayer::from_config(&config, resolver).is_err());
    }
}
