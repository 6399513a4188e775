//! Request-scoped tenant context and the access guard.

use std::fmt;
use std::sync::Arc;

use crate::error::{TenancyError, TenancyResult};
use crate::factory::TenantConnection;
use crate::pool::ConnectionHandle;
use crate::tenant::Tenant;

/// How a request is routed, decided once from the routing header.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RouteScope {
    /// Platform-only route; no tenant is resolved.
    Platform,
    /// Tenant-scoped route for the named tenant.
    Tenant(String),
}

impl RouteScope {
    /// Classify a routing header value.
    ///
    /// A missing or blank header is [`TenancyError::TenantNameMissing`]. The
    /// `platform_sentinel` value selects [`RouteScope::Platform`].
    pub fn classify(header: Option<&str>, platform_sentinel: &str) -> TenancyResult<Self> {
        match header.map(str::trim) {
            None | Some("") => Err(TenancyError::TenantNameMissing),
            Some(value) if value == platform_sentinel => Ok(Self::Platform),
            Some(value) => Ok(Self::Tenant(value.to_string())),
        }
    }

    /// Check if this is a platform route.
    pub fn is_platform(&self) -> bool {
        matches!(self, Self::Platform)
    }

    /// The tenant name for tenant routes.
    pub fn tenant_name(&self) -> Option<&str> {
        match self {
            Self::Platform => None,
            Self::Tenant(name) => Some(name),
        }
    }
}

impl fmt::Display for RouteScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Platform => write!(f, "platform"),
            Self::Tenant(name) => write!(f, "tenant:{}", name),
        }
    }
}

/// Authorization fields set by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// Authenticated user id.
    pub user_id: String,
    /// Role of the user within the tenant.
    pub role: String,
}

impl AuthContext {
    /// Create an auth context.
    pub fn new(user_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: role.into(),
        }
    }

    /// Check the user's role.
    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }
}

/// Everything downstream handlers need to know about the current request.
pub struct RequestContext<C> {
    scope: RouteScope,
    tenant: Option<Arc<Tenant>>,
    connection: Option<ConnectionHandle<C>>,
    auth: Option<AuthContext>,
}

impl<C> Clone for RequestContext<C> {
    fn clone(&self) -> Self {
        Self {
            scope: self.scope.clone(),
            tenant: self.tenant.clone(),
            connection: self.connection.clone(),
            auth: self.auth.clone(),
        }
    }
}

impl<C> fmt::Debug for RequestContext<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("scope", &self.scope)
            .field("tenant", &self.tenant.as_ref().map(|t| &t.name))
            .field("connected", &self.connection.is_some())
            .field("auth", &self.auth)
            .finish()
    }
}

impl<C> RequestContext<C> {
    /// Context for a platform route.
    pub fn platform() -> Self {
        Self {
            scope: RouteScope::Platform,
            tenant: None,
            connection: None,
            auth: None,
        }
    }

    /// Context for a resolved tenant.
    pub fn tenant(tenant: impl Into<Arc<Tenant>>, connection: ConnectionHandle<C>) -> Self {
        let tenant = tenant.into();
        Self {
            scope: RouteScope::Tenant(tenant.name.clone()),
            tenant: Some(tenant),
            connection: Some(connection),
            auth: None,
        }
    }

    /// Attach authorization fields.
    pub fn with_auth(mut self, auth: AuthContext) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Replace the authorization fields.
    pub fn set_auth(&mut self, auth: AuthContext) {
        self.auth = Some(auth);
    }

    /// The route scope.
    pub fn scope(&self) -> &RouteScope {
        &self.scope
    }

    /// The resolved tenant.
    pub fn tenant_record(&self) -> Option<&Arc<Tenant>> {
        self.tenant.as_ref()
    }

    /// The tenant connection.
    pub fn connection(&self) -> Option<&ConnectionHandle<C>> {
        self.connection.as_ref()
    }

    /// Authorization fields, if authenticated.
    pub fn auth(&self) -> Option<&AuthContext> {
        self.auth.as_ref()
    }
}

/// Independent presence check for tenant-scoped routes.
///
/// Middleware may be misordered or skipped; the guard verifies the context
/// actually carries a tenant and an open connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessGuard;

impl AccessGuard {
    /// Check that both tenant and an open connection are present.
    pub fn check<C: TenantConnection>(ctx: &RequestContext<C>) -> bool {
        ctx.tenant.is_some() && ctx.connection.as_ref().is_some_and(|c| c.is_open())
    }

    /// Like [`check`](Self::check), returning the tenant and connection.
    pub fn require<C: TenantConnection>(
        ctx: &RequestContext<C>,
    ) -> TenancyResult<(&Arc<Tenant>, &ConnectionHandle<C>)> {
        match (&ctx.tenant, &ctx.connection) {
            (Some(tenant), Some(conn)) if conn.is_open() => Ok((tenant, conn)),
            _ => Err(TenancyError::Forbidden),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::ConnectionFactory;
    use crate::pool::PooledConnection;
    use crate::tenant::TenantId;
    use crate::testing::{MockConnection, MockFactory};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_classify_header() {
        assert_eq!(
            RouteScope::classify(Some("admin"), "admin").unwrap(),
            RouteScope::Platform
        );
        assert_eq!(
            RouteScope::classify(Some(" greenwood "), "admin").unwrap(),
            RouteScope::Tenant("greenwood".into())
        );
        assert_eq!(
            RouteScope::classify(None, "admin").unwrap_err(),
            TenancyError::TenantNameMissing
        );
        assert_eq!(
            RouteScope::classify(Some(""), "admin").unwrap_err(),
            TenancyError::TenantNameMissing
        );
    }

    #[test]
    fn test_custom_sentinel() {
        let scope = RouteScope::classify(Some("admin"), "platform").unwrap();
        assert_eq!(scope.tenant_name(), Some("admin"));
        assert!(RouteScope::classify(Some("platform"), "platform").unwrap().is_platform());
    }

    #[test]
    fn test_guard_rejects_platform_context() {
        let ctx = RequestContext::<MockConnection>::platform();
        assert!(!AccessGuard::check(&ctx));
        assert_eq!(AccessGuard::require(&ctx).unwrap_err(), TenancyError::Forbidden);
    }

    #[tokio::test]
    async fn test_guard_requires_open_connection() {
        let factory = MockFactory::new();
        let conn = Arc::new(PooledConnection::new(
            TenantId::new("t-gw"),
            "gw_db",
            factory.create("gw_db").await.unwrap(),
        ));
        let tenant = Tenant::new(TenantId::new("t-gw"), "greenwood", "gw_db");
        let ctx = RequestContext::tenant(tenant, Arc::clone(&conn))
            .with_auth(AuthContext::new("u1", "accountant"));

        assert!(AccessGuard::check(&ctx));
        assert_eq!(ctx.scope(), &RouteScope::Tenant("greenwood".into()));
        assert!(ctx.auth().unwrap().has_role("accountant"));

        conn.close().await.unwrap();
        assert!(!AccessGuard::check(&ctx));
    }
}
