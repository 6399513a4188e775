//! Handler extractors for the tenant context.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use http::request::Parts;
use tenantry_core::{
    AccessGuard, ConnectionHandle, RequestContext, TenancyError, Tenant, TenantConnection,
};

use crate::error::TenancyRejection;

/// The request context attached by [`TenantContextLayer`].
///
/// Works on platform and tenant routes alike. Rejects with 403 when the layer
/// did not run for this request.
///
/// [`TenantContextLayer`]: crate::TenantContextLayer
#[derive(Debug, Clone)]
pub struct Tenancy<C>(pub RequestContext<C>);

impl<S, C> FromRequestParts<S> for Tenancy<C>
where
    S: Send + Sync,
    C: TenantConnection,
{
    type Rejection = TenancyRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext<C>>()
            .cloned()
            .map(Tenancy)
            .ok_or(TenancyRejection(TenancyError::Forbidden))
    }
}

/// The resolved tenant and its connection.
///
/// ```rust,ignore
/// async fn list_students(TenantDb { tenant, conn }: TenantDb<MongoConnection>) -> Json<Vec<Student>> {
///     let students = conn.collection::<Student>("students");
///     // ...
/// }
/// ```
pub struct TenantDb<C> {
    /// The tenant record.
    pub tenant: Arc<Tenant>,
    /// The tenant's pooled connection.
    pub conn: ConnectionHandle<C>,
}

impl<S, C> FromRequestParts<S> for TenantDb<C>
where
    S: Send + Sync,
    C: TenantConnection,
{
    type Rejection = TenancyRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ctx = parts
            .extensions
            .get::<RequestContext<C>>()
            .ok_or(TenancyRejection(TenancyError::Forbidden))?;

        let (tenant, conn) = AccessGuard::require(ctx)?;
        Ok(TenantDb {
            tenant: Arc::clone(tenant),
            conn: Arc::clone(conn),
        })
    }
}
