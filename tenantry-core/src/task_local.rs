//! Task-local request context.
//!
//! The request middleware runs each tenant-scoped request inside
//! [`with_context`], so code deep in the call stack can reach the current
//! tenant without threading the context through every signature.
//!
//! ```rust,ignore
//! use tenantry_core::task_local::{current_context, current_tenant};
//!
//! async fn audit() {
//!     if let Some(tenant) = current_tenant() {
//!         tracing::info!(tenant = %tenant.name, "audited");
//!     }
//! }
//! ```

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use crate::context::{RequestContext, RouteScope};
use crate::tenant::Tenant;

#[derive(Clone)]
struct ScopedContext {
    scope: RouteScope,
    tenant: Option<Arc<Tenant>>,
    // `RequestContext<C>` for whatever connection type the middleware serves.
    context: Arc<dyn Any + Send + Sync>,
}

tokio::task_local! {
    static REQUEST_CONTEXT: ScopedContext;
}

/// Run `f` with `ctx` as the current request context.
pub async fn with_context<C, F, T>(ctx: RequestContext<C>, f: F) -> T
where
    C: Send + Sync + 'static,
    F: Future<Output = T>,
{
    let scoped = ScopedContext {
        scope: ctx.scope().clone(),
        tenant: ctx.tenant_record().cloned(),
        context: Arc::new(ctx),
    };
    REQUEST_CONTEXT.scope(scoped, f).await
}

/// The current request context, if one is set for connection type `C`.
pub fn current_context<C: Send + Sync + 'static>() -> Option<RequestContext<C>> {
    REQUEST_CONTEXT
        .try_with(|scoped| scoped.context.downcast_ref::<RequestContext<C>>().cloned())
        .ok()
        .flatten()
}

/// The current tenant, if the request is tenant-scoped.
#[inline]
pub fn current_tenant() -> Option<Arc<Tenant>> {
    REQUEST_CONTEXT
        .try_with(|scoped| scoped.tenant.clone())
        .ok()
        .flatten()
}

/// The current route scope.
#[inline]
pub fn current_scope() -> Option<RouteScope> {
    REQUEST_CONTEXT.try_with(|scoped| scoped.scope.clone()).ok()
}

/// Check if a request context is active.
#[inline]
pub fn has_context() -> bool {
    REQUEST_CONTEXT.try_with(|_| ()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::ConnectionFactory;
    use crate::pool::PooledConnection;
    use crate::tenant::TenantId;
    use crate::testing::{MockConnection, MockFactory};

    #[tokio::test]
    async fn test_context_visible_inside_scope_only() {
        assert!(!has_context());

        let conn = MockFactory::new().create("gw_db").await.unwrap();
        let handle = Arc::new(PooledConnection::new(TenantId::new("t-gw"), "gw_db", conn));
        let tenant = Tenant::new(TenantId::new("t-gw"), "greenwood", "gw_db");

        with_context(RequestContext::tenant(tenant, handle), async {
            assert!(has_context());
            assert_eq!(current_tenant().unwrap().name, "greenwood");
            assert_eq!(
                current_scope(),
                Some(RouteScope::Tenant("greenwood".into()))
            );

            let ctx = current_context::<MockConnection>().unwrap();
            assert_eq!(ctx.connection().unwrap().database(), "gw_db");

            // Wrong connection type yields nothing.
            assert!(current_context::<String>().is_none());
        })
        .await;

        assert!(current_tenant().is_none());
    }

    #[tokio::test]
    async fn test_platform_context_has_no_tenant() {
        with_context(RequestContext::<MockConnection>::platform(), async {
            assert!(current_tenant().is_none());
            assert_eq!(current_scope(), Some(RouteScope::Platform));
        })
        .await;
    }
}
