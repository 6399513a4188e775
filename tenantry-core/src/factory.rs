//! Connection factory: turns a logical database id into a live connection.
//!
//! Factories are stateless and safe to call concurrently. Opening a connection is
//! the slow suspension point that the pool deduplicates, so nothing here caches.

use std::fmt;

use async_trait::async_trait;
use url::Url;

use crate::error::{TenancyError, TenancyResult};
use crate::schema::SchemaDef;

/// Placeholder substituted with the logical database id.
pub const DATABASE_PLACEHOLDER: &str = "{database}";

/// A live, reusable handle to one tenant database.
#[async_trait]
pub trait TenantConnection: Send + Sync + 'static {
    /// Register a schema (collection, indexes) on this database.
    async fn register_schema(&self, schema: &SchemaDef) -> TenancyResult<()>;

    /// Close the connection and release its resources.
    async fn close(&self) -> TenancyResult<()>;
}

/// Opens connections to tenant databases.
#[async_trait]
pub trait ConnectionFactory<C: TenantConnection>: Send + Sync {
    /// Open a new connection to the given logical database.
    async fn create(&self, logical_db: &str) -> TenancyResult<C>;
}

/// A database URI template containing [`DATABASE_PLACEHOLDER`].
///
/// The template is validated once when it is built; a malformed template is a
/// startup failure, never a per-request error.
///
/// ```rust
/// use tenantry_core::UriTemplate;
///
/// let template = UriTemplate::parse("mongodb://localhost:27017/{database}").unwrap();
/// assert_eq!(
///     template.expand("gw_db").unwrap(),
///     "mongodb://localhost:27017/gw_db"
/// );
///
/// assert!(UriTemplate::parse("mongodb://localhost:27017/").is_err());
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct UriTemplate {
    template: String,
}

impl UriTemplate {
    /// Parse and validate a template.
    pub fn parse(template: impl Into<String>) -> TenancyResult<Self> {
        let template = template.into();

        if !template.contains(DATABASE_PLACEHOLDER) {
            return Err(TenancyError::config(format!(
                "tenant URI template must contain {}",
                DATABASE_PLACEHOLDER
            )));
        }

        let probe = template.replace(DATABASE_PLACEHOLDER, "probe");
        Url::parse(&probe)
            .map_err(|e| TenancyError::config(format!("invalid tenant URI template: {}", e)))?;

        Ok(Self { template })
    }

    /// Substitute the logical database id.
    pub fn expand(&self, logical_db: &str) -> TenancyResult<String> {
        validate_database_name(logical_db)?;
        Ok(self.template.replace(DATABASE_PLACEHOLDER, logical_db))
    }

    /// The raw template string.
    pub fn as_str(&self) -> &str {
        &self.template
    }
}

// Templates usually embed credentials; keep them out of logs.
impl fmt::Debug for UriTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UriTemplate")
            .field("template", &redact(&self.template))
            .finish()
    }
}

/// Replace the userinfo part of a URI with `***`.
pub fn redact(uri: &str) -> String {
    match (uri.find("://"), uri.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}***{}", &uri[..scheme_end + 3], &uri[at..])
        }
        _ => uri.to_string(),
    }
}

fn validate_database_name(name: &str) -> TenancyResult<()> {
    const FORBIDDEN: &[char] = &['/', '\\', '.', ' ', '"', '$', '\0', '?', '#', '@', ':'];

    if name.is_empty() {
        return Err(TenancyError::connection("logical database id is empty"));
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN.contains(c)) {
        return Err(TenancyError::connection(format!(
            "logical database id `{}` contains forbidden character {:?}",
            name, c
        )));
    }
    Ok(())
}
