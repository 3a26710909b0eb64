use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::operators::{self, Completion};
use crate::{
    ConnectionPool, ConnectionRegistry, ErrorInfo, ErrorKind, Outcome, RetryExecutor, RunContext,
    RunReport, RunStatus, SkipReason, StardagError, Task, TaskContext, TaskGraph, TaskStatus,
};

/// Runs a validated task graph batch by batch.
pub struct Executor {
    registry: Arc<dyn ConnectionRegistry>,
    pool: ConnectionPool,
    max_parallelism: usize,
}

impl Executor {
    pub fn new(registry: Arc<dyn ConnectionRegistry>, pool: ConnectionPool) -> Self {
        let max_parallelism = pool.size();
        Self {
            registry,
            pool,
            max_parallelism,
        }
    }

    /// Upper bound on tasks running at once within a batch.
    pub fn with_max_parallelism(mut self, max_parallelism: usize) -> Self {
        self.max_parallelism = max_parallelism.max(1);
        self
    }

    /// Executes every task of `graph`. Graph and connection errors abort
    /// before any task runs; task failures are recorded in the report and
    /// skip everything downstream of them. Outcomes left in `ctx` by an
    /// earlier run are discarded; resolved connections are reused.
    pub async fn run(
        &self,
        graph: &TaskGraph,
        ctx: &mut RunContext,
    ) -> Result<RunReport, StardagError> {
        let batches = graph.topological_batches()?;
        ctx.task_outcomes.clear();
        self.resolve_connections(graph, ctx)?;

        let connections = Arc::new(ctx.resolved_connections.clone());
        let semaphore = Arc::new(Semaphore::new(self.max_parallelism));
        let mut execution_order = Vec::with_capacity(graph.len());

        info!(
            run_id = %ctx.run_id,
            tasks = graph.len(),
            batches = batches.len(),
            "starting run"
        );

        for batch in batches {
            let mut pending = Vec::new();

            for task in batch {
                if let Some(outcome) = Self::skip_before_start(graph, ctx, &task) {
                    info!(run_id = %ctx.run_id, task = task.id(), reason = ?outcome.skip_reason, "task skipped");
                    execution_order.push(task.id().to_string());
                    ctx.task_outcomes.insert(task.id().to_string(), outcome);
                    continue;
                }

                let task_ctx = TaskContext::new(
                    ctx,
                    task.id(),
                    Arc::clone(&connections),
                    self.pool.clone(),
                );
                let id = task.id().to_string();
                let handle = tokio::spawn(Self::run_task(
                    task,
                    task_ctx,
                    ctx.cancellation_token(),
                    Arc::clone(&semaphore),
                ));
                pending.push((id, handle));
            }

            let (ids, handles): (Vec<_>, Vec<_>) = pending.into_iter().unzip();
            for (id, joined) in ids.into_iter().zip(join_all(handles).await) {
                let outcome = joined.unwrap_or_else(|e| {
                    Outcome::failed(
                        0,
                        ErrorInfo {
                            kind: ErrorKind::Internal,
                            message: format!("task panicked: {}", e),
                            failing_tables: Vec::new(),
                        },
                    )
                });
                execution_order.push(id.clone());
                ctx.task_outcomes.insert(id, outcome);
            }
        }

        let status = Self::run_status(ctx);
        match status {
            RunStatus::Success => info!(run_id = %ctx.run_id, "run succeeded"),
            RunStatus::Failed => error!(run_id = %ctx.run_id, "run failed"),
            RunStatus::Cancelled => warn!(run_id = %ctx.run_id, "run cancelled"),
        }

        Ok(RunReport {
            run_id: ctx.run_id.clone(),
            status,
            started_at: ctx.start_time,
            finished_at: Utc::now(),
            outcomes: ctx.task_outcomes.clone(),
            execution_order,
        })
    }

    fn resolve_connections(
        &self,
        graph: &TaskGraph,
        ctx: &mut RunContext,
    ) -> Result<(), StardagError> {
        for conn_id in graph.connection_ids() {
            if ctx.resolved_connections.contains_key(conn_id) {
                continue;
            }
            let credentials = self.registry.resolve(conn_id)?;
            ctx.resolved_connections.insert(conn_id.to_string(), credentials);
        }
        Ok(())
    }

    fn skip_before_start(graph: &TaskGraph, ctx: &RunContext, task: &Task) -> Option<Outcome> {
        if ctx.is_cancelled() {
            return Some(Outcome::skipped(SkipReason::Cancelled, 0));
        }

        graph
            .upstream(task.id())
            .find(|up| ctx.outcome(up).is_some_and(Outcome::blocks_downstream))
            .map(|up| {
                Outcome::skipped(
                    SkipReason::UpstreamFailed {
                        upstream: up.to_string(),
                    },
                    0,
                )
            })
    }

    async fn run_task(
        task: Arc<Task>,
        base: TaskContext,
        cancel: CancellationToken,
        semaphore: Arc<Semaphore>,
    ) -> Outcome {
        let _permit = match semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return Outcome::failed(
                    0,
                    ErrorInfo {
                        kind: ErrorKind::Internal,
                        message: "scheduler closed".to_string(),
                        failing_tables: Vec::new(),
                    },
                );
            }
        };

        // Queued behind the semaphore while the run was cancelled.
        if cancel.is_cancelled() {
            info!(run_id = %base.run_id, task = task.id(), "task skipped: run cancelled");
            return Outcome::skipped(SkipReason::Cancelled, 0);
        }

        info!(run_id = %base.run_id, task = task.id(), kind = task.kind().name(), "task started");

        let retry = RetryExecutor::new(task.retry_policy());
        let attempted = retry
            .execute_with_retry(&cancel, task.id(), |attempt| {
                let ctx = base.for_attempt(attempt);
                let task = Arc::clone(&task);
                async move { operators::execute(task.kind(), &ctx).await }
            })
            .await;

        match attempted.result {
            Ok(Completion::Done { rows_affected }) => {
                info!(
                    run_id = %base.run_id,
                    task = task.id(),
                    attempts = attempted.attempts,
                    rows_affected,
                    "task succeeded"
                );
                Outcome::success(attempted.attempts, rows_affected)
            }
            Ok(Completion::Skipped) => Outcome::skipped(SkipReason::Requested, attempted.attempts),
            Err(err) => {
                let mut info = ErrorInfo::from(&err);
                if attempted.cancelled {
                    info.message.push_str(" (remaining retries abandoned: run cancelled)");
                }
                error!(
                    run_id = %base.run_id,
                    task = task.id(),
                    attempts = attempted.attempts,
                    error = %info.message,
                    "task failed"
                );
                Outcome::failed(attempted.attempts, info)
            }
        }
    }

    fn run_status(ctx: &RunContext) -> RunStatus {
        let outcomes = ctx.task_outcomes.values();
        let mut cancelled = false;

        for outcome in outcomes {
            if outcome.status == TaskStatus::Failed {
                return RunStatus::Failed;
            }
            if outcome.skip_reason == Some(SkipReason::Cancelled) {
                cancelled = true;
            }
        }

        if cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Success
        }
    }
}
