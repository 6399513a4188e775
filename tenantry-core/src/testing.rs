//! In-memory connection and factory doubles.
//!
//! Enabled with the `testing` feature. [`MockFactory`] counts invocations, can
//! delay, hang or fail, and tracks how many connections are open per logical
//! database so tests can assert the one-connection-per-tenant invariant.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{TenancyError, TenancyResult};
use crate::factory::{ConnectionFactory, TenantConnection};
use crate::schema::SchemaDef;

#[derive(Debug, Default)]
struct MockState {
    open: Mutex<HashMap<String, usize>>,
    registrations: AtomicUsize,
}

/// A fake tenant connection.
#[derive(Debug)]
pub struct MockConnection {
    database: String,
    serial: u64,
    closed: AtomicBool,
    fail_close: bool,
    fail_schemas: HashSet<String>,
    registered: Mutex<Vec<String>>,
    state: Arc<MockState>,
}

impl MockConnection {
    /// Logical database this connection was opened for.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Creation sequence number, unique per factory.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Schemas registered on this connection, in order.
    pub fn registered_schemas(&self) -> Vec<String> {
        self.registered.lock().clone()
    }
}

#[async_trait]
impl TenantConnection for MockConnection {
    async fn register_schema(&self, schema: &SchemaDef) -> TenancyResult<()> {
        tokio::task::yield_now().await;
        if self.fail_schemas.contains(&schema.name) {
            return Err(TenancyError::schema(&schema.name, "rejected by mock"));
        }
        self.state.registrations.fetch_add(1, Ordering::Relaxed);
        self.registered.lock().push(schema.name.clone());
        Ok(())
    }

    async fn close(&self) -> TenancyResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            if let Some(count) = self.state.open.lock().get_mut(&self.database) {
                *count = count.saturating_sub(1);
            }
        }
        if self.fail_close {
            return Err(TenancyError::connection(format!(
                "failed to close {}",
                self.database
            )));
        }
        Ok(())
    }
}

/// A configurable fake connection factory.
#[derive(Debug, Default)]
pub struct MockFactory {
    delay: Option<Duration>,
    hang: bool,
    fail_databases: HashSet<String>,
    fail_close_databases: HashSet<String>,
    fail_schemas: HashSet<String>,
    remaining_failures: AtomicUsize,
    created: AtomicU64,
    created_per_db: Mutex<HashMap<String, usize>>,
    state: Arc<MockState>,
}

impl MockFactory {
    /// Create a factory that succeeds immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before every creation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Never complete a creation.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Fail every creation for this database.
    pub fn failing_for(mut self, database: impl Into<String>) -> Self {
        self.fail_databases.insert(database.into());
        self
    }

    /// Fail the next `n` creations, whatever the database.
    pub fn failing_times(self, n: usize) -> Self {
        self.remaining_failures.store(n, Ordering::Relaxed);
        self
    }

    /// Connections to this database fail to close.
    pub fn failing_close_for(mut self, database: impl Into<String>) -> Self {
        self.fail_close_databases.insert(database.into());
        self
    }

    /// Registration of this schema fails on every connection.
    pub fn failing_schema(mut self, schema: impl Into<String>) -> Self {
        self.fail_schemas.insert(schema.into());
        self
    }

    /// Number of `create` calls that reached the factory.
    pub fn create_count(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Number of `create` calls for one database.
    pub fn create_count_for(&self, database: &str) -> usize {
        self.created_per_db
            .lock()
            .get(database)
            .copied()
            .unwrap_or(0)
    }

    /// Connections currently open for one database.
    pub fn open_count(&self, database: &str) -> usize {
        self.state.open.lock().get(database).copied().unwrap_or(0)
    }

    /// Successful schema registrations across all connections.
    pub fn registration_count(&self) -> usize {
        self.state.registrations.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ConnectionFactory<MockConnection> for MockFactory {
    async fn create(&self, logical_db: &str) -> TenancyResult<MockConnection> {
        let serial = self.created.fetch_add(1, Ordering::Relaxed);
        *self
            .created_per_db
            .lock()
            .entry(logical_db.to_string())
            .or_insert(0) += 1;

        if self.hang {
            futures::future::pending::<()>().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let should_fail = self.fail_databases.contains(logical_db)
            || self
                .remaining_failures
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
                .is_ok();
        if should_fail {
            return Err(TenancyError::connection(format!(
                "{} is unreachable",
                logical_db
            )));
        }

        *self
            .state
            .open
            .lock()
            .entry(logical_db.to_string())
            .or_insert(0) += 1;

        Ok(MockConnection {
            database: logical_db.to_string(),
            serial,
            closed: AtomicBool::new(false),
            fail_close: self.fail_close_databases.contains(logical_db),
            fail_schemas: self.fail_schemas.clone(),
            registered: Mutex::new(Vec::new()),
            state: Arc::clone(&self.state),
        })
    }
}
