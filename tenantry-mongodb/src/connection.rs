//! A tenant's MongoDB connection.

use async_trait::async_trait;
use bson::{Document, doc};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, Database, IndexModel};
use tenantry_core::{SchemaDef, TenancyError, TenancyResult, TenantConnection};
use tracing::{debug, info};

use crate::error::MongoError;

/// Server error code returned when a collection already exists.
const NAMESPACE_EXISTS: i32 = 48;

/// A driver client bound to one tenant database.
///
/// The driver pools sockets inside the `Client`; Tenantry keeps one client per
/// tenant and shuts it down when the tenant is evicted.
#[derive(Debug, Clone)]
pub struct MongoConnection {
    client: Client,
    database: Database,
}

impl MongoConnection {
    /// Wrap a client and the tenant database it addresses.
    pub fn new(client: Client, database: impl AsRef<str>) -> Self {
        let database = client.database(database.as_ref());
        Self { client, database }
    }

    /// The tenant database.
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Get a typed collection.
    pub fn collection<T>(&self, name: &str) -> Collection<T>
    where
        T: Send + Sync,
    {
        self.database.collection(name)
    }

    /// The underlying driver client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Ping the server.
    pub async fn ping(&self) -> Result<(), MongoError> {
        self.database.run_command(doc! { "ping": 1 }, None).await?;
        Ok(())
    }

    async fn ensure_collection(&self, name: &str) -> Result<bool, MongoError> {
        let existing = self.database.list_collection_names(None).await?;
        if existing.iter().any(|c| c == name) {
            return Ok(false);
        }

        match self.database.create_collection(name, None).await {
            Ok(()) => Ok(true),
            Err(e) => {
                let err = MongoError::from(e);
                // Lost a race with another process creating it.
                if err.server_code() == Some(NAMESPACE_EXISTS) {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }
}

fn index_model(fields: &[(String, tenantry_core::IndexOrder)], unique: bool) -> IndexModel {
    let mut keys = Document::new();
    for (field, order) in fields {
        keys.insert(field.clone(), order.as_i32());
    }
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(unique).build())
        .build()
}

#[async_trait]
impl TenantConnection for MongoConnection {
    async fn register_schema(&self, schema: &SchemaDef) -> TenancyResult<()> {
        let schema_error = |e: MongoError| TenancyError::schema(&schema.name, e.to_string());

        let created = self
            .ensure_collection(&schema.collection)
            .await
            .map_err(schema_error)?;

        let collection = self.collection::<Document>(&schema.collection);
        for index in &schema.indexes {
            let name = collection
                .create_index(index_model(&index.keys, index.unique), None)
                .await
                .map_err(|e| schema_error(e.into()))?
                .index_name;
            debug!(
                database = %self.database.name(),
                collection = %schema.collection,
                index = %name,
                "index ensured"
            );
        }

        if created {
            info!(
                database = %self.database.name(),
                collection = %schema.collection,
                "collection created"
            );
        }
        Ok(())
    }

    async fn close(&self) -> TenancyResult<()> {
        debug!(database = %self.database.name(), "shutting down tenant client");
        self.client.clone().shutdown().await;
        Ok(())
    }
}
