use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::{BulkLoad, Credentials};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Warehouse error {code}: {message}")]
pub struct WarehouseError {
    pub code: String,
    pub message: String,
}

impl WarehouseError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Failed to load {source_uri} into {target_table}: {message}")]
pub struct LoadError {
    pub source_uri: String,
    pub target_table: String,
    pub message: String,
}

/// A session against the warehouse.
#[async_trait]
pub trait WarehouseClient: Send + Sync {
    /// Runs one or more `;`-separated statements as a single operation and
    /// returns the rows affected.
    async fn execute(&self, sql: &str) -> Result<u64, WarehouseError>;

    /// Runs a query and returns the first column of its first row.
    async fn fetch_scalar(&self, sql: &str) -> Result<Option<i64>, WarehouseError>;

    async fn bulk_load(&self, load: &BulkLoad) -> Result<u64, LoadError>;
}

/// Opens warehouse sessions for the pool.
#[async_trait]
pub trait WarehouseConnector: Send + Sync {
    async fn connect(
        &self,
        conn_id: &str,
        credentials: &Credentials,
    ) -> Result<Box<dyn WarehouseClient>, WarehouseError>;
}

/// Bounded set of warehouse sessions shared by every task of a run.
#[derive(Clone)]
pub struct ConnectionPool {
    connector: Arc<dyn WarehouseConnector>,
    permits: Arc<Semaphore>,
    size: usize,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn WarehouseConnector>, size: usize) -> Self {
        let size = size.max(1);
        Self {
            connector,
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Waits for a free slot and opens a session. The slot is given back
    /// when the returned guard is dropped.
    pub async fn acquire(
        &self,
        conn_id: &str,
        credentials: &Credentials,
    ) -> Result<PooledConnection, WarehouseError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| WarehouseError::new("pool_closed", "connection pool is closed"))?;

        let client = self.connector.connect(conn_id, credentials).await?;

        Ok(PooledConnection {
            client,
            _permit: permit,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

pub struct PooledConnection {
    client: Box<dyn WarehouseClient>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
    type Target = dyn WarehouseClient;

    fn deref(&self) -> &Self::Target {
        self.client.as_ref()
    }
}
