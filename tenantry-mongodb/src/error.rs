//! Error types for MongoDB operations.

use mongodb::error::{ErrorKind, WriteFailure};
use tenantry_core::TenancyError;
use thiserror::Error;

/// Result type for MongoDB operations.
pub type MongoResult<T> = Result<T, MongoError>;

/// Server error code for a unique index violation.
pub const DUPLICATE_KEY: i32 = 11000;

/// Errors that can occur during MongoDB operations.
#[derive(Error, Debug)]
pub enum MongoError {
    /// MongoDB driver error.
    #[error("mongodb error: {0}")]
    Driver(#[from] mongodb::error::Error),

    /// BSON serialization error.
    #[error("bson error: {0}")]
    Bson(#[from] bson::ser::Error),

    /// BSON deserialization error.
    #[error("bson deserialization error: {0}")]
    BsonDe(#[from] bson::de::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(String),
}

impl MongoError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Server error code, if the server reported one.
    pub fn server_code(&self) -> Option<i32> {
        let Self::Driver(e) = self else {
            return None;
        };
        match e.kind.as_ref() {
            ErrorKind::Command(cmd) => Some(cmd.code),
            ErrorKind::Write(WriteFailure::WriteError(w)) => Some(w.code),
            ErrorKind::Write(WriteFailure::WriteConcernError(w)) => Some(w.code),
            _ => None,
        }
    }

    /// Check if this is a unique index violation.
    pub fn is_duplicate_key(&self) -> bool {
        self.server_code() == Some(DUPLICATE_KEY)
    }

    /// Check if this is a connection error.
    ///
    /// Covers network, DNS, server selection and authentication failures.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Driver(e) => matches!(
                e.kind.as_ref(),
                ErrorKind::Io(_)
                    | ErrorKind::DnsResolve { .. }
                    | ErrorKind::ServerSelection { .. }
                    | ErrorKind::ConnectionPoolCleared { .. }
                    | ErrorKind::Authentication { .. }
            ),
            _ => false,
        }
    }

    /// Convert into a connection-class [`TenancyError`].
    pub fn into_connection_error(self) -> TenancyError {
        match self {
            Self::Config(msg) => TenancyError::config(msg),
            other if other.is_connection_error() => TenancyError::retryable(other.to_string()),
            other => TenancyError::connection(other.to_string()),
        }
    }
}

/// Name of the unique index a duplicate-key message refers to.
///
/// Server messages look like
/// `E11000 duplicate key error collection: db.tenants index: name_1 dup key: ...`.
pub fn duplicate_index(message: &str) -> Option<&str> {
    let rest = &message[message.find("index: ")? + "index: ".len()..];
    rest.split_whitespace().next()
}

impl From<MongoError> for TenancyError {
    fn from(err: MongoError) -> Self {
        match err {
            MongoError::Config(msg) => TenancyError::config(msg),
            MongoError::Connection(msg) => TenancyError::retryable(msg),
            other if other.is_connection_error() => TenancyError::retryable(other.to_string()),
            other => TenancyError::directory(other.to_string()),
        }
    }
}
