//! # tenantry-axum
//!
//! Axum integration for Tenantry.
//!
//! - [`TenantContextLayer`] resolves the tenant named by the routing header and
//!   attaches a [`RequestContext`](tenantry_core::RequestContext) before handlers run
//! - [`AccessGuardLayer`] rejects tenant routes that reached a handler without a
//!   tenant and an open connection, and registers schemas on first use
//! - [`TenantDb`] and [`Tenancy`] extract the context in handlers
//! - [`serve_with_teardown`] closes every tenant connection on shutdown
//!
//! ## Example
//!
//! ```rust,ignore
//! use axum::{Router, routing::get};
//! use tenantry_axum::prelude::*;
//!
//! let tenant_routes = Router::new()
//!     .route("/students", get(list_students))
//!     .layer(AccessGuardLayer::<MongoConnection>::new().with_schemas(registrar));
//!
//! let app = Router::new()
//!     .nest("/api", tenant_routes)
//!     .route("/health", get(|| async { "ok" }))
//!     .layer(TenantContextLayer::from_config(&config, resolver.clone())?);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! serve_with_teardown(listener, app, resolver.pool().clone(), shutdown_signal()).await?;
//! ```

#![deny(missing_docs)]

pub mod error;
pub mod extract;
pub mod guard;
pub mod layer;
pub mod server;

pub use error::{TenancyRejection, status_for};
pub use extract::{Tenancy, TenantDb};
pub use guard::{AccessGuardLayer, AccessGuardService};
pub use layer::{TenantContextLayer, TenantContextService};
pub use server::{serve_with_teardown, shutdown_signal};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::error::TenancyRejection;
    pub use crate::extract::{Tenancy, TenantDb};
    pub use crate::guard::AccessGuardLayer;
    pub use crate::layer::TenantContextLayer;
    pub use crate::server::{serve_with_teardown, shutdown_signal};
    pub use tenantry_core::prelude::*;
}
