//! Driver options applied to every MongoDB client Tenantry opens.
//!
//! Each tenant gets its own `Client`, each with its own driver pool, so the pool
//! sizes here are per tenant.

use std::time::Duration;

use mongodb::options::{ClientOptions, SelectionCriteria};

use crate::error::{MongoError, MongoResult};

/// MongoDB read preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPreference {
    /// Read from primary only.
    #[default]
    Primary,
    /// Read from primary preferred, fallback to secondary.
    PrimaryPreferred,
    /// Read from secondary only.
    Secondary,
    /// Read from secondary preferred, fallback to primary.
    SecondaryPreferred,
    /// Read from nearest member.
    Nearest,
}

impl ReadPreference {
    fn to_criteria(self) -> SelectionCriteria {
        use mongodb::options::ReadPreference as Driver;

        let options = Default::default();
        SelectionCriteria::ReadPreference(match self {
            Self::Primary => Driver::Primary,
            Self::PrimaryPreferred => Driver::PrimaryPreferred { options },
            Self::Secondary => Driver::Secondary { options },
            Self::SecondaryPreferred => Driver::SecondaryPreferred { options },
            Self::Nearest => Driver::Nearest { options },
        })
    }
}

/// Client options shared by tenant and directory connections.
#[derive(Debug, Clone, PartialEq)]
pub struct MongoConfig {
    /// Application name (shown in server logs).
    pub app_name: Option<String>,
    /// Minimum driver pool size per client.
    pub min_pool_size: Option<u32>,
    /// Maximum driver pool size per client.
    pub max_pool_size: Option<u32>,
    /// Maximum idle time for pooled sockets.
    pub max_idle_time: Option<Duration>,
    /// Socket connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Server selection timeout.
    pub server_selection_timeout: Option<Duration>,
    /// Read preference.
    pub read_preference: Option<ReadPreference>,
    /// Retry writes.
    pub retry_writes: Option<bool>,
    /// Retry reads.
    pub retry_reads: Option<bool>,
    /// Direct connection (bypass replica set discovery).
    pub direct_connection: Option<bool>,
    /// Ping the server before handing out a new client.
    pub verify_on_connect: bool,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            app_name: Some("tenantry".to_string()),
            min_pool_size: None,
            max_pool_size: Some(10),
            max_idle_time: Some(Duration::from_secs(300)),
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            read_preference: Some(ReadPreference::Primary),
            retry_writes: Some(true),
            retry_reads: Some(true),
            direct_connection: None,
            verify_on_connect: true,
        }
    }
}

impl MongoConfig {
    /// Create a builder.
    pub fn builder() -> MongoConfigBuilder {
        MongoConfigBuilder::default()
    }

    /// Parse `uri` and apply these options on top.
    pub async fn client_options(&self, uri: &str) -> MongoResult<ClientOptions> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| MongoError::config(format!("failed to parse URI: {}", e)))?;
        self.apply(&mut options);
        Ok(options)
    }

    /// Overwrite the options this configuration sets.
    pub fn apply(&self, options: &mut ClientOptions) {
        if let Some(ref app_name) = self.app_name {
            options.app_name = Some(app_name.clone());
        }
        if self.min_pool_size.is_some() {
            options.min_pool_size = self.min_pool_size;
        }
        if self.max_pool_size.is_some() {
            options.max_pool_size = self.max_pool_size;
        }
        if self.max_idle_time.is_some() {
            options.max_idle_time = self.max_idle_time;
        }
        if self.connect_timeout.is_some() {
            options.connect_timeout = self.connect_timeout;
        }
        if self.server_selection_timeout.is_some() {
            options.server_selection_timeout = self.server_selection_timeout;
        }
        if let Some(pref) = self.read_preference {
            options.selection_criteria = Some(pref.to_criteria());
        }
        if self.retry_writes.is_some() {
            options.retry_writes = self.retry_writes;
        }
        if self.retry_reads.is_some() {
            options.retry_reads = self.retry_reads;
        }
        if self.direct_connection.is_some() {
            options.direct_connection = self.direct_connection;
        }
    }
}

/// Builder for [`MongoConfig`].
#[derive(Debug, Default)]
pub struct MongoConfigBuilder {
    config: MongoConfig,
}

impl MongoConfigBuilder {
    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.config.app_name = Some(name.into());
        self
    }

    /// Set the minimum pool size.
    pub fn min_pool_size(mut self, size: u32) -> Self {
        self.config.min_pool_size = Some(size);
        self
    }

    /// Set the maximum pool size.
    pub fn max_pool_size(mut self, size: u32) -> Self {
        self.config.max_pool_size = Some(size);
        self
    }

    /// Set the maximum idle time.
    pub fn max_idle_time(mut self, duration: Duration) -> Self {
        self.config.max_idle_time = Some(duration);
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.config.connect_timeout = Some(duration);
        self
    }

    /// Set the server selection timeout.
    pub fn server_selection_timeout(mut self, duration: Duration) -> Self {
        self.config.server_selection_timeout = Some(duration);
        self
    }

    /// Set the read preference.
    pub fn read_preference(mut self, pref: ReadPreference) -> Self {
        self.config.read_preference = Some(pref);
        self
    }

    /// Enable or disable retry writes.
    pub fn retry_writes(mut self, enabled: bool) -> Self {
        self.config.retry_writes = Some(enabled);
        self
    }

    /// Enable or disable retry reads.
    pub fn retry_reads(mut self, enabled: bool) -> Self {
        self.config.retry_reads = Some(enabled);
        self
    }

    /// Enable direct connection.
    pub fn direct_connection(mut self, enabled: bool) -> Self {
        self.config.direct_connection = Some(enabled);
        self
    }

    /// Ping new clients before use.
    pub fn verify_on_connect(mut self, enabled: bool) -> Self {
        self.config.verify_on_connect = enabled;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> MongoResult<MongoConfig> {
        if let (Some(min), Some(max)) = (self.config.min_pool_size, self.config.max_pool_size) {
            if min > max {
                return Err(MongoError::config(format!(
                    "min_pool_size ({}) exceeds max_pool_size ({})",
                    min, max
                )));
            }
        }
        if self.config.max_pool_size == Some(0) {
            return Err(MongoError::config("max_pool_size must be positive"));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builder() {
        let config = MongoConfig::builder()
            .app_name("school-api")
            .max_pool_size(4)
            .connect_timeout(Duration::from_secs(2))
            .build()
            .unwrap();

        assert_eq!(config.app_name.as_deref(), Some("school-api"));
        assert_eq!(config.max_pool_size, Some(4));
        assert!(config.verify_on_connect);
    }

    #[test]
    fn test_builder_rejects_inverted_pool_bounds() {
        let result = MongoConfig::builder()
            .min_pool_size(8)
            .max_pool_size(2)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_client_options_apply_overrides() {
        let config = MongoConfig::builder()
            .max_pool_size(3)
            .direct_connection(true)
            .build()
            .unwrap();

        let options = tokio_test::block_on(
            config.client_options("mongodb://localhost:27017/gw_db?maxPoolSize=50"),
        )
        .unwrap();

        assert_eq!(options.max_pool_size, Some(3));
        assert_eq!(options.direct_connection, Some(true));
        assert_eq!(options.app_name.as_deref(), Some("tenantry"));
        assert_eq!(options.default_database.as_deref(), Some("gw_db"));
    }

    #[test]
    fn test_client_options_rejects_bad_uri() {
        let err = tokio_test::block_on(MongoConfig::default().client_options("http://nope"))
            .unwrap_err();
        assert!(matches!(err, MongoError::Config(_)));
    }
}
