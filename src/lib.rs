//! # Tenantry
//!
//! Per-tenant database connections for multi-tenant backends.
//!
//! Every tenant owns a private logical database. A request names its tenant in a
//! routing header; Tenantry looks the tenant up in a directory, checks that it is
//! active, and hands the request a live connection to the tenant's database,
//! opening it on first use and reusing it afterwards.
//!
//! Tenantry provides:
//! - A connection pool with single-flight creation, so concurrent first requests
//!   for a tenant open one connection
//! - Fail-closed request middleware and an access guard for tenant routes
//! - Idempotent per-connection schema registration
//! - A MongoDB backend for the directory and tenant connections
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use axum::{Router, routing::get};
//! use tenantry::prelude::*;
//! use tenantry::mongodb::{MongoConfig, MongoConnection, MongoConnectionFactory, MongoTenantDirectory};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     tenantry::logging::init();
//!
//!     let config = TenancyConfig::from_env()?;
//!     let mongo = MongoConfig::default();
//!     let directory = MongoTenantDirectory::connect(&config, &mongo).await?;
//!     let factory = MongoConnectionFactory::from_config(&config, mongo)?;
//!     let resolver = TenantResolver::from_config(&config, Arc::new(directory), Arc::new(factory));
//!
//!     let api = Router::new()
//!         .route("/students", get(list_students))
//!         .layer(AccessGuardLayer::<MongoConnection>::new());
//!
//!     let app = Router::new()
//!         .nest("/api", api)
//!         .layer(TenantContextLayer::from_config(&config, resolver.clone())?);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     serve_with_teardown(listener, app, resolver.pool().clone(), shutdown_signal()).await?;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use tenantry_core::*;

/// Axum middleware, guard and extractors.
#[cfg(feature = "axum")]
#[cfg_attr(docsrs, doc(cfg(feature = "axum")))]
pub mod axum {
    pub use tenantry_axum::*;
}

/// MongoDB directory and connection backend.
#[cfg(feature = "mongodb")]
#[cfg_attr(docsrs, doc(cfg(feature = "mongodb")))]
pub mod mongodb {
    pub use tenantry_mongodb::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    #[cfg(feature = "axum")]
    pub use tenantry_axum::prelude::*;
    #[cfg(not(feature = "axum"))]
    pub use tenantry_core::prelude::*;
}
