//! Tenancy configuration.
//!
//! Configuration can be loaded from a TOML document, from environment variables,
//! or assembled with [`TenancyConfigBuilder`]. Whatever the source,
//! [`TenancyConfig::validate`] runs once at startup and rejects a malformed URI
//! template before any request is served.
//!
//! # Environment Variables
//!
//! - `TENANTRY_TENANT_URI_TEMPLATE` - tenant URI template (required)
//! - `TENANTRY_GLOBAL_URI` - URI of the global database (required)
//! - `TENANTRY_GLOBAL_DATABASE` - global database name (default: `tenantry`)
//! - `TENANTRY_TENANT_HEADER` - routing header (default: `x-tenant-name`)
//! - `TENANTRY_PLATFORM_SENTINEL` - header value for platform routes (default: `admin`)
//! - `TENANTRY_EXEMPT_PATHS` - comma separated path prefixes skipping tenant resolution
//! - `TENANTRY_LOOKUP_TIMEOUT_MS` - directory lookup timeout, `0` disables
//! - `TENANTRY_CONNECT_TIMEOUT_MS` - connection creation timeout, `0` disables

use std::collections::HashMap;
use std::time::Duration;

use http::HeaderName;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{TenancyError, TenancyResult};
use crate::factory::{UriTemplate, redact};

/// Default routing header.
pub const DEFAULT_TENANT_HEADER: &str = "x-tenant-name";

/// Default header value addressing platform routes.
pub const DEFAULT_PLATFORM_SENTINEL: &str = "admin";

/// Default global database name.
pub const DEFAULT_GLOBAL_DATABASE: &str = "tenantry";

const DEFAULT_LOOKUP_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Source for environment variables.
pub trait EnvSource: Send + Sync {
    /// Get an environment variable value.
    fn get(&self, name: &str) -> Option<String>;
}

/// Default environment source using std::env.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdEnvSource;

impl EnvSource for StdEnvSource {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Environment source backed by a HashMap.
#[derive(Debug, Clone, Default)]
pub struct MapEnvSource {
    vars: HashMap<String, String>,
}

impl MapEnvSource {
    /// Create a new map-based environment source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }
}

impl EnvSource for MapEnvSource {
    fn get(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

fn default_global_database() -> String {
    DEFAULT_GLOBAL_DATABASE.to_string()
}

fn default_tenant_header() -> String {
    DEFAULT_TENANT_HEADER.to_string()
}

fn default_platform_sentinel() -> String {
    DEFAULT_PLATFORM_SENTINEL.to_string()
}

fn default_exempt_paths() -> Vec<String> {
    ["/auth/login", "/auth/register", "/health", "/tenant-config"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_lookup_timeout_ms() -> u64 {
    DEFAULT_LOOKUP_TIMEOUT_MS
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

/// Complete tenancy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenancyConfig {
    /// Tenant database URI template with a `{database}` placeholder.
    pub tenant_uri_template: String,
    /// URI of the global database holding the tenant directory.
    pub global_uri: String,
    /// Name of the global database.
    #[serde(default = "default_global_database")]
    pub global_database: String,
    /// Header carrying the tenant name.
    #[serde(default = "default_tenant_header")]
    pub tenant_header: String,
    /// Header value that addresses platform routes instead of a tenant.
    #[serde(default = "default_platform_sentinel")]
    pub platform_sentinel: String,
    /// Path prefixes that skip tenant resolution entirely.
    #[serde(default = "default_exempt_paths")]
    pub exempt_paths: Vec<String>,
    /// Directory lookup timeout in milliseconds, `0` disables.
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
    /// Connection creation timeout in milliseconds, `0` disables.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl TenancyConfig {
    /// Create a builder.
    pub fn builder() -> TenancyConfigBuilder {
        TenancyConfigBuilder::default()
    }

    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> TenancyResult<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| TenancyError::config(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> TenancyResult<Self> {
        Self::from_source(&StdEnvSource)
    }

    /// Load configuration from an environment source.
    pub fn from_source(env: &dyn EnvSource) -> TenancyResult<Self> {
        let required = |name: &str| {
            env.get(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| TenancyError::config(format!("{} is not set", name)))
        };
        let millis = |name: &str, default: u64| -> TenancyResult<u64> {
            match env.get(name) {
                Some(v) => v
                    .trim()
                    .parse()
                    .map_err(|_| TenancyError::config(format!("{} must be milliseconds", name))),
                None => Ok(default),
            }
        };

        let config = Self {
            tenant_uri_template: required("TENANTRY_TENANT_URI_TEMPLATE")?,
            global_uri: required("TENANTRY_GLOBAL_URI")?,
            global_database: env
                .get("TENANTRY_GLOBAL_DATABASE")
                .unwrap_or_else(default_global_database),
            tenant_header: env
                .get("TENANTRY_TENANT_HEADER")
                .unwrap_or_else(default_tenant_header),
            platform_sentinel: env
                .get("TENANTRY_PLATFORM_SENTINEL")
                .unwrap_or_else(default_platform_sentinel),
            exempt_paths: env
                .get("TENANTRY_EXEMPT_PATHS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_else(default_exempt_paths),
            lookup_timeout_ms: millis("TENANTRY_LOOKUP_TIMEOUT_MS", DEFAULT_LOOKUP_TIMEOUT_MS)?,
            connect_timeout_ms: millis("TENANTRY_CONNECT_TIMEOUT_MS", DEFAULT_CONNECT_TIMEOUT_MS)?,
        };

        config.validate()?;
        info!(
            template = %redact(&config.tenant_uri_template),
            header = %config.tenant_header,
            "Loaded tenancy configuration from environment"
        );
        Ok(config)
    }

    /// Validate the configuration, returning the parsed URI template.
    pub fn validate(&self) -> TenancyResult<UriTemplate> {
        let template = UriTemplate::parse(self.tenant_uri_template.clone())?;

        url::Url::parse(&self.global_uri)
            .map_err(|e| TenancyError::config(format!("invalid global URI: {}", e)))?;

        if self.global_database.is_empty() {
            return Err(TenancyError::config("global database name is empty"));
        }
        self.tenant_header_name()?;
        if self.platform_sentinel.is_empty() {
            return Err(TenancyError::config("platform sentinel is empty"));
        }

        Ok(template)
    }

    /// The routing header as an HTTP header name.
    pub fn tenant_header_name(&self) -> TenancyResult<HeaderName> {
        HeaderName::from_bytes(self.tenant_header.as_bytes()).map_err(|e| {
            TenancyError::config(format!(
                "invalid tenant header name {:?}: {}",
                self.tenant_header, e
            ))
        })
    }

    /// Directory lookup timeout, if enabled.
    pub fn lookup_timeout(&self) -> Option<Duration> {
        (self.lookup_timeout_ms > 0).then(|| Duration::from_millis(self.lookup_timeout_ms))
    }

    /// Connection creation timeout, if enabled.
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms))
    }

    /// Check if a request path skips tenant resolution.
    pub fn is_exempt(&self, path: &str) -> bool {
        is_exempt_path(&self.exempt_paths, path)
    }
}

/// Whole milliseconds of `d`, saturating at `u64::MAX`.
pub(crate) fn millis_saturating(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Check if `path` equals one of `prefixes` or lies below one of them.
pub fn is_exempt_path(prefixes: &[String], path: &str) -> bool {
    prefixes.iter().any(|prefix| {
        path == prefix
            || path
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.starts_with('/') || prefix.ends_with('/'))
    })
}

/// Builder for [`TenancyConfig`].
#[derive(Debug, Default)]
pub struct TenancyConfigBuilder {
    tenant_uri_template: Option<String>,
    global_uri: Option<String>,
    global_database: Option<String>,
    tenant_header: Option<String>,
    platform_sentinel: Option<String>,
    exempt_paths: Option<Vec<String>>,
    lookup_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
}

impl TenancyConfigBuilder {
    /// Set the tenant URI template.
    pub fn tenant_uri_template(mut self, template: impl Into<String>) -> Self {
        self.tenant_uri_template = Some(template.into());
        self
    }

    /// Set the global database URI.
    pub fn global_uri(mut self, uri: impl Into<String>) -> Self {
        self.global_uri = Some(uri.into());
        self
    }

    /// Set the global database name.
    pub fn global_database(mut self, name: impl Into<String>) -> Self {
        self.global_database = Some(name.into());
        self
    }

    /// Set the routing header.
    pub fn tenant_header(mut self, header: impl Into<String>) -> Self {
        self.tenant_header = Some(header.into());
        self
    }

    /// Set the platform sentinel.
    pub fn platform_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.platform_sentinel = Some(sentinel.into());
        self
    }

    /// Set the exempt path prefixes.
    pub fn exempt_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exempt_paths = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    /// Set the directory lookup timeout.
    pub fn lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = Some(timeout);
        self
    }

    /// Set the connection creation timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> TenancyResult<TenancyConfig> {
        let config = TenancyConfig {
            tenant_uri_template: self
                .tenant_uri_template
                .ok_or_else(|| TenancyError::config("tenant URI template is required"))?,
            global_uri: self
                .global_uri
                .ok_or_else(|| TenancyError::config("global URI is required"))?,
            global_database: self.global_database.unwrap_or_else(default_global_database),
            tenant_header: self.tenant_header.unwrap_or_else(default_tenant_header),
            platform_sentinel: self
                .platform_sentinel
                .unwrap_or_else(default_platform_sentinel),
            exempt_paths: self.exempt_paths.unwrap_or_else(default_exempt_paths),
            lookup_timeout_ms: self
                .lookup_timeout
                .map_or(DEFAULT_LOOKUP_TIMEOUT_MS, millis_saturating),
            connect_timeout_ms: self
                .connect_timeout
                .map_or(DEFAULT_CONNECT_TIMEOUT_MS, millis_saturating),
        };
        config.validate()?;
        Ok(config)
    }
}
