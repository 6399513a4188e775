//! # tenantry-core
//!
//! Tenant-to-connection resolution for multi-tenant backends where every tenant
//! owns a private logical database.
//!
//! Given a tenant identifier, the [`TenantResolver`] finds the tenant in the
//! [`TenantDirectory`], checks that it is active, and returns a live connection
//! from the [`ConnectionPool`], creating it through a [`ConnectionFactory`] on
//! first use. Concurrent first requests for the same tenant share a single
//! creation, so each tenant has at most one open connection.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tenantry_core::prelude::*;
//!
//! let config = TenancyConfig::from_env()?;
//! let resolver = TenantResolver::from_config(&config, directory, factory);
//!
//! let (tenant, conn) = resolver.resolve_by_name("greenwood").await?;
//! SchemaRegistrar::new([SchemaDef::new("students")]).ensure_all(&conn).await?;
//!
//! // At shutdown
//! resolver.pool().teardown_all().await;
//! ```
//!
//! ## Modules
//!
//! - [`directory`] - tenant records and their storage
//! - [`factory`] - URI templates and connection creation
//! - [`pool`] - single-flight connection cache
//! - [`resolver`] - lookup, status check and get-or-create
//! - [`context`] - route scope, request context, access guard
//! - [`schema`] - idempotent schema registration
//! - [`manager`] - tenant lifecycle administration

#![deny(missing_docs)]

pub mod config;
pub mod context;
pub mod directory;
pub mod error;
pub mod factory;
pub mod logging;
pub mod manager;
pub mod pool;
pub mod resolver;
pub mod schema;
pub mod task_local;
pub mod tenant;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{EnvSource, MapEnvSource, StdEnvSource, TenancyConfig, TenancyConfigBuilder};
pub use context::{AccessGuard, AuthContext, RequestContext, RouteScope};
pub use directory::{InMemoryTenantDirectory, TenantDirectory};
pub use error::{ErrorCode, TenancyError, TenancyResult};
pub use factory::{ConnectionFactory, DATABASE_PLACEHOLDER, TenantConnection, UriTemplate};
pub use manager::{NewTenant, NoOpProvisioner, TenantManager, TenantProvisioner, TenantUpdate};
pub use pool::{
    ConnectionHandle, ConnectionPool, ConnectionState, PoolStats, PooledConnection,
    TeardownReport,
};
pub use resolver::TenantResolver;
pub use schema::{IndexDef, IndexOrder, SchemaDef, SchemaRegistrar};
pub use tenant::{Tenant, TenantId, TenantQuotas, TenantStatus};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::config::TenancyConfig;
    pub use crate::context::{AccessGuard, AuthContext, RequestContext, RouteScope};
    pub use crate::directory::TenantDirectory;
    pub use crate::error::{TenancyError, TenancyResult};
    pub use crate::factory::{ConnectionFactory, TenantConnection, UriTemplate};
    pub use crate::manager::{NewTenant, TenantManager};
    pub use crate::pool::{ConnectionHandle, ConnectionPool};
    pub use crate::resolver::TenantResolver;
    pub use crate::schema::{IndexDef, SchemaDef, SchemaRegistrar};
    pub use crate::tenant::{Tenant, TenantId, TenantStatus};
}
