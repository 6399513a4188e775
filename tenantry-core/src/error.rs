//! Error types for tenant resolution and connection lifecycle.
//!
//! Every failure in the resolution path is terminal for the current request.
//! The variants are kept distinct so the HTTP layer can tell a tenant that does
//! not exist apart from one that is suspended or one whose database is down.
//!
//! ```rust
//! use tenantry_core::{ErrorCode, TenancyError};
//!
//! let err = TenancyError::not_found("greenwood");
//! assert_eq!(err.code(), ErrorCode::TenantNotFound);
//! assert!(err.is_not_found());
//!
//! let err = TenancyError::timeout("connect", 5000);
//! assert!(err.is_retryable());
//! ```

use std::fmt;
use thiserror::Error;

/// Result type for tenancy operations.
pub type TenancyResult<T> = Result<T, TenancyError>;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Routing header absent (T1001).
    TenantNameMissing = 1001,
    /// No directory record for the name or id (T1002).
    TenantNotFound = 1002,
    /// Record found but suspended (T1003).
    InactiveTenant = 1003,
    /// Name or database id already taken (T1004).
    DuplicateTenant = 1004,
    /// Database connection could not be established (T3001).
    ConnectionFailed = 3001,
    /// A required schema failed to register (T5001).
    SchemaRegistration = 5001,
    /// Tenant directory storage failure (T6001).
    DirectoryFailure = 6001,
    /// Invalid configuration (T7001).
    InvalidConfiguration = 7001,
    /// Request reached a tenant route without a tenant context (T8001).
    Forbidden = 8001,
}

impl ErrorCode {
    /// Get the error code string (e.g., "T1002").
    pub fn code(&self) -> String {
        format!("T{}", *self as u16)
    }

    /// Get a short description of the error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::TenantNameMissing => "Tenant name header missing",
            Self::TenantNotFound => "Tenant not found",
            Self::InactiveTenant => "Tenant is inactive",
            Self::DuplicateTenant => "Tenant already exists",
            Self::ConnectionFailed => "Tenant database connection failed",
            Self::SchemaRegistration => "Schema registration failed",
            Self::DirectoryFailure => "Tenant directory failure",
            Self::InvalidConfiguration => "Invalid configuration",
            Self::Forbidden => "Tenant context required",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Errors produced while resolving tenants and managing their connections.
///
/// The type is `Clone` so one failed connection attempt can be handed to every
/// caller that was waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TenancyError {
    /// The routing header carrying the tenant name was absent.
    #[error("tenant name header is missing")]
    TenantNameMissing,

    /// No tenant record matches the given name or id.
    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    /// The tenant exists but is suspended.
    #[error("tenant is inactive: {0}")]
    InactiveTenant(String),

    /// The tenant database could not be reached.
    #[error("connection error: {message}")]
    Connection {
        /// Human readable cause.
        message: String,
        /// Whether a later attempt may succeed.
        retryable: bool,
    },

    /// A schema could not be registered on a tenant connection.
    #[error("schema registration failed for `{schema}`: {message}")]
    SchemaRegistration {
        /// Name of the schema that failed.
        schema: String,
        /// Human readable cause.
        message: String,
    },

    /// A unique tenant attribute is already taken.
    #[error("tenant {field} already exists: {value}")]
    Duplicate {
        /// The attribute that collided (`name` or `database`).
        field: &'static str,
        /// The colliding value.
        value: String,
    },

    /// The tenant directory storage failed.
    #[error("tenant directory error: {0}")]
    Directory(String),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A tenant-scoped route was reached without a resolved tenant.
    #[error("tenant context required")]
    Forbidden,
}

impl TenancyError {
    /// Create a not found error.
    pub fn not_found(tenant: impl Into<String>) -> Self {
        Self::TenantNotFound(tenant.into())
    }

    /// Create an inactive tenant error.
    pub fn inactive(tenant: impl Into<String>) -> Self {
        Self::InactiveTenant(tenant.into())
    }

    /// Create a non-retryable connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            retryable: false,
        }
    }

    /// Create a retryable connection error.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            retryable: true,
        }
    }

    /// Create the connection error reported when an operation exceeds its deadline.
    pub fn timeout(operation: &str, millis: u64) -> Self {
        Self::retryable(format!("{} timed out after {}ms", operation, millis))
    }

    /// Create a schema registration error.
    pub fn schema(schema: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaRegistration {
            schema: schema.into(),
            message: message.into(),
        }
    }

    /// Create a duplicate tenant error.
    pub fn duplicate(field: &'static str, value: impl Into<String>) -> Self {
        Self::Duplicate {
            field,
            value: value.into(),
        }
    }

    /// Create a directory error.
    pub fn directory(message: impl Into<String>) -> Self {
        Self::Directory(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::TenantNameMissing => ErrorCode::TenantNameMissing,
            Self::TenantNotFound(_) => ErrorCode::TenantNotFound,
            Self::InactiveTenant(_) => ErrorCode::InactiveTenant,
            Self::Connection { .. } => ErrorCode::ConnectionFailed,
            Self::SchemaRegistration { .. } => ErrorCode::SchemaRegistration,
            Self::Duplicate { .. } => ErrorCode::DuplicateTenant,
            Self::Directory(_) => ErrorCode::DirectoryFailure,
            Self::Config(_) => ErrorCode::InvalidConfiguration,
            Self::Forbidden => ErrorCode::Forbidden,
        }
    }

    /// Check if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::TenantNotFound(_))
    }

    /// Check if this is an inactive tenant error.
    pub fn is_inactive(&self) -> bool {
        matches!(self, Self::InactiveTenant(_))
    }

    /// Check if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Check if a later attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { retryable: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ErrorCode::TenantNotFound.code(), "T1002");
        assert_eq!(ErrorCode::ConnectionFailed.to_string(), "T3001");
        assert_eq!(
            TenancyError::TenantNameMissing.code(),
            ErrorCode::TenantNameMissing
        );
    }

    #[test]
    fn test_error_predicates() {
        assert!(TenancyError::not_found("x").is_not_found());
        assert!(TenancyError::inactive("x").is_inactive());
        assert!(TenancyError::connection("refused").is_connection_error());
        assert!(!TenancyError::connection("refused").is_retryable());
        assert!(TenancyError::timeout("connect", 10).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = TenancyError::timeout("connect", 250);
        assert_eq!(err.to_string(), "connection error: connect timed out after 250ms");

        let err = TenancyError::schema("students", "index build failed");
        assert_eq!(
            err.to_string(),
            "schema registration failed for `students`: index build failed"
        );

        let err = TenancyError::duplicate("name", "greenwood");
        assert_eq!(err.to_string(), "tenant name already exists: greenwood");
    }
}
