use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::warehouse::PooledConnection;
use crate::{ConnectionError, ConnectionPool, Credentials, Outcome, TaskError};

/// State of one execution of a graph. The executor fills in resolved
/// connections before the first task and an outcome per task as each
/// finishes.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    /// Date the run processes data for; drives templated object-store keys.
    pub logical_date: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub resolved_connections: BTreeMap<String, Credentials>,
    pub task_outcomes: BTreeMap<String, Outcome>,
    cancel: CancellationToken,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            run_id: format!("manual__{}", Uuid::new_v4()),
            logical_date: now,
            start_time: now,
            resolved_connections: BTreeMap::new(),
            task_outcomes: BTreeMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn with_logical_date(mut self, logical_date: DateTime<Utc>) -> Self {
        self.logical_date = logical_date;
        self
    }

    /// Token that cancels this run when triggered from elsewhere.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn outcome(&self, task_id: &str) -> Option<&Outcome> {
        self.task_outcomes.get(task_id)
    }
}

/// Read-only view of the run handed to a task attempt.
#[derive(Clone)]
pub struct TaskContext {
    pub run_id: String,
    pub task_id: String,
    pub attempt: u32,
    pub logical_date: DateTime<Utc>,
    connections: Arc<BTreeMap<String, Credentials>>,
    pool: ConnectionPool,
}

impl TaskContext {
    pub(crate) fn new(
        run: &RunContext,
        task_id: &str,
        connections: Arc<BTreeMap<String, Credentials>>,
        pool: ConnectionPool,
    ) -> Self {
        Self {
            run_id: run.run_id.clone(),
            task_id: task_id.to_string(),
            attempt: 1,
            logical_date: run.logical_date,
            connections,
            pool,
        }
    }

    pub(crate) fn for_attempt(&self, attempt: u32) -> Self {
        Self {
            attempt,
            ..self.clone()
        }
    }

    pub fn credentials(&self, conn_id: &str) -> Result<&Credentials, ConnectionError> {
        self.connections
            .get(conn_id)
            .ok_or_else(|| ConnectionError::NotFound {
                name: conn_id.to_string(),
            })
    }

    /// Checks a session out of the pool for the rest of the attempt.
    pub async fn connect(&self, conn_id: &str) -> Result<PooledConnection, TaskError> {
        let credentials = self.credentials(conn_id)?;
        Ok(self.pool.acquire(conn_id, credentials).await?)
    }
}
