//! # tenantry-mongodb
//!
//! MongoDB backend for Tenantry: one driver client per tenant database, and the
//! tenant directory stored in a global database.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tenantry_core::{TenancyConfig, TenantResolver};
//! use tenantry_mongodb::{MongoConfig, MongoConnectionFactory, MongoTenantDirectory};
//!
//! let tenancy = TenancyConfig::from_env()?;
//! let mongo = MongoConfig::builder().max_pool_size(5).build()?;
//!
//! let directory = MongoTenantDirectory::connect(&tenancy, &mongo).await?;
//! let factory = MongoConnectionFactory::from_config(&tenancy, mongo)?;
//!
//! let resolver = TenantResolver::from_config(&tenancy, Arc::new(directory), Arc::new(factory));
//! ```

pub mod config;
pub mod connection;
pub mod directory;
pub mod error;
pub mod factory;

pub use bson::{Bson, Document, doc};
pub use config::{MongoConfig, MongoConfigBuilder, ReadPreference};
pub use connection::MongoConnection;
pub use directory::{MongoTenantDirectory, TENANTS_COLLECTION};
pub use error::{MongoError, MongoResult};
pub use factory::MongoConnectionFactory;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::{MongoConfig, MongoConfigBuilder};
    pub use crate::connection::MongoConnection;
    pub use crate::directory::MongoTenantDirectory;
    pub use crate::error::{MongoError, MongoResult};
    pub use crate::factory::MongoConnectionFactory;
    pub use bson::{Document, doc};
}
