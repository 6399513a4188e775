//! Idempotent schema registration on tenant connections.
//!
//! Business modules declare the collections and indexes they need as
//! [`SchemaDef`]s. The [`SchemaRegistrar`] makes sure each one is registered on a
//! tenant connection exactly once, however many requests race to do it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{TenancyError, TenancyResult};
use crate::factory::TenantConnection;
use crate::pool::PooledConnection;

/// Sort direction of an index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexOrder {
    /// Ascending (`1`).
    Asc,
    /// Descending (`-1`).
    Desc,
}

impl IndexOrder {
    /// Numeric direction as used by document stores.
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::Asc => 1,
            Self::Desc => -1,
        }
    }
}

/// An index on a schema's collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Indexed fields in order.
    pub keys: Vec<(String, IndexOrder)>,
    /// Whether the index enforces uniqueness.
    #[serde(default)]
    pub unique: bool,
}

impl IndexDef {
    /// Ascending index on a single field.
    pub fn on(field: impl Into<String>) -> Self {
        Self {
            keys: vec![(field.into(), IndexOrder::Asc)],
            unique: false,
        }
    }

    /// Add another key to a compound index.
    pub fn then(mut self, field: impl Into<String>, order: IndexOrder) -> Self {
        self.keys.push((field.into(), order));
        self
    }

    /// Make the index unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A named schema: one collection plus its indexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDef {
    /// Registration name, unique per connection.
    pub name: String,
    /// Backing collection name.
    pub collection: String,
    /// Indexes to create.
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
}

impl SchemaDef {
    /// Schema whose collection has the same name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            collection: name.clone(),
            name,
            indexes: Vec::new(),
        }
    }

    /// Use a different collection name.
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// Add an index.
    pub fn index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }
}

/// Registers schemas on tenant connections, once per connection.
///
/// ```rust,ignore
/// let registrar = SchemaRegistrar::new([
///     SchemaDef::new("students").index(IndexDef::on("admissionNo").unique()),
///     SchemaDef::new("fees"),
/// ]);
///
/// registrar.ensure_all(&conn).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistrar {
    schemas: Arc<Vec<SchemaDef>>,
}

impl SchemaRegistrar {
    /// Create a registrar for the given schema set.
    pub fn new(schemas: impl IntoIterator<Item = SchemaDef>) -> Self {
        Self {
            schemas: Arc::new(schemas.into_iter().collect()),
        }
    }

    /// The configured schema set.
    pub fn schemas(&self) -> &[SchemaDef] {
        &self.schemas
    }

    /// Ensure the configured schema set is registered on `conn`.
    pub async fn ensure_all<C: TenantConnection>(
        &self,
        conn: &PooledConnection<C>,
    ) -> TenancyResult<usize> {
        Self::ensure(conn, &self.schemas).await
    }

    /// Register every schema in `schemas` not yet registered on `conn`.
    ///
    /// Returns how many schemas were newly registered. Calls for the same
    /// connection are serialized, so concurrent calls register each schema once.
    /// A failed schema is not recorded and is retried by the next call.
    pub async fn ensure<C: TenantConnection>(
        conn: &PooledConnection<C>,
        schemas: &[SchemaDef],
    ) -> TenancyResult<usize> {
        let mut registered = conn.schemas.lock().await;

        // Cheap exit for the common case, before checking liveness.
        if schemas.iter().all(|s| registered.contains(&s.name)) {
            return Ok(0);
        }

        if !conn.is_open() {
            return Err(TenancyError::connection(format!(
                "connection for tenant {} is closed",
                conn.tenant_id()
            )));
        }

        let mut added = 0;
        for schema in schemas {
            if registered.contains(&schema.name) {
                continue;
            }

            debug!(
                tenant = %conn.tenant_id(),
                schema = %schema.name,
                collection = %schema.collection,
                "registering schema"
            );

            conn.connection()
                .register_schema(schema)
                .await
                .map_err(|e| match e {
                    TenancyError::SchemaRegistration { .. } => e,
                    other => TenancyError::schema(&schema.name, other.to_string()),
                })?;

            registered.insert(schema.name.clone());
            added += 1;
        }

        if added > 0 {
            info!(tenant = %conn.tenant_id(), added, "schemas registered");
        }
        Ok(added)
    }

    /// Check if a schema is already registered on `conn`.
    pub async fn is_registered<C: TenantConnection>(
        conn: &PooledConnection<C>,
        name: &str,
    ) -> bool {
        conn.schemas.lock().await.contains(name)
    }
}
