//! Opens tenant connections from a URI template.

use async_trait::async_trait;
use mongodb::Client;
use tenantry_core::factory::redact;
use tenantry_core::{ConnectionFactory, TenancyConfig, TenancyResult, UriTemplate};
use tracing::{debug, info};

use crate::config::MongoConfig;
use crate::connection::MongoConnection;
use crate::error::MongoError;

/// Creates one MongoDB client per tenant database.
///
/// ```rust,ignore
/// let factory = MongoConnectionFactory::new(
///     UriTemplate::parse("mongodb://db:27017/{database}?authSource=admin")?,
///     MongoConfig::default(),
/// );
/// let conn = factory.create("gw_db").await?;
/// ```
#[derive(Debug, Clone)]
pub struct MongoConnectionFactory {
    template: UriTemplate,
    config: MongoConfig,
}

impl MongoConnectionFactory {
    /// Create a factory.
    pub fn new(template: UriTemplate, config: MongoConfig) -> Self {
        Self { template, config }
    }

    /// Create a factory from validated tenancy configuration.
    pub fn from_config(tenancy: &TenancyConfig, config: MongoConfig) -> TenancyResult<Self> {
        Ok(Self::new(tenancy.validate()?, config))
    }

    /// The URI template.
    pub fn template(&self) -> &UriTemplate {
        &self.template
    }

    async fn open(&self, logical_db: &str, uri: &str) -> Result<MongoConnection, MongoError> {
        let options = self.config.client_options(uri).await?;
        let client = Client::with_options(options)
            .map_err(|e| MongoError::connection(format!("failed to create client: {}", e)))?;
        let conn = MongoConnection::new(client, logical_db);

        if self.config.verify_on_connect {
            // Clients connect lazily; ping so an unreachable server fails here.
            if let Err(e) = conn.ping().await {
                conn.client().clone().shutdown().await;
                return Err(e);
            }
        }

        Ok(conn)
    }
}

#[async_trait]
impl ConnectionFactory<MongoConnection> for MongoConnectionFactory {
    async fn create(&self, logical_db: &str) -> TenancyResult<MongoConnection> {
        let uri = self.template.expand(logical_db)?;
        debug!(database = %logical_db, uri = %redact(&uri), "opening tenant client");

        let conn = self
            .open(logical_db, &uri)
            .await
            .map_err(MongoError::into_connection_error)?;

        info!(database = %logical_db, "tenant client connected");
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> MongoConnectionFactory {
        MongoConnectionFactory::new(
            UriTemplate::parse("mongodb://localhost:27017/{database}").unwrap(),
            MongoConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_invalid_database_id_is_connection_error() {
        let err = factory().create("a/b").await.unwrap_err();
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_from_config_validates_template() {
        let tenancy = TenancyConfig {
            tenant_uri_template: "mongodb://localhost:27017/{database}".into(),
            global_uri: "mongodb://localhost:27017".into(),
            global_database: "tenantry".into(),
            tenant_header: "x-tenant-name".into(),
            platform_sentinel: "admin".into(),
            exempt_paths: vec![],
            lookup_timeout_ms: 0,
            connect_timeout_ms: 0,
        };
        let factory = MongoConnectionFactory::from_config(&tenancy, MongoConfig::default()).unwrap();
        assert_eq!(factory.template().as_str(), "mongodb://localhost:27017/{database}");

        let broken = TenancyConfig {
            tenant_uri_template: "mongodb://localhost:27017/shared".into(),
            ..tenancy
        };
        assert!(MongoConnectionFactory::from_config(&broken, MongoConfig::default()).is_err());
    }
}
