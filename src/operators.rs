//! What each task kind does against the warehouse.

use async_trait::async_trait;
use tracing::info;

use crate::quality::run_checks;
use crate::task::{CreateSchemaSpec, LoadSpec, StageSpec, ValidateSpec};
use crate::{BulkLoad, InsertMode, TaskContext, TaskError, TaskKind};

/// Result of an attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Done { rows_affected: u64 },
    /// The task was configured not to run.
    Skipped,
}

#[async_trait]
pub trait Operator: Send + Sync {
    async fn execute(&self, ctx: &TaskContext) -> Result<Completion, TaskError>;
}

/// Runs one attempt of a task of the given kind.
pub async fn execute(kind: &TaskKind, ctx: &TaskContext) -> Result<Completion, TaskError> {
    match kind {
        TaskKind::CreateSchema(spec) => spec.execute(ctx).await,
        TaskKind::Stage(spec) => spec.execute(ctx).await,
        TaskKind::LoadFact(spec) | TaskKind::LoadDimension(spec) => spec.execute(ctx).await,
        TaskKind::Validate(spec) => spec.execute(ctx).await,
        TaskKind::NoOp => Ok(Completion::Done { rows_affected: 0 }),
    }
}

#[async_trait]
impl Operator for CreateSchemaSpec {
    async fn execute(&self, ctx: &TaskContext) -> Result<Completion, TaskError> {
        if self.skip {
            info!(task = %ctx.task_id, "skipping schema creation");
            return Ok(Completion::Skipped);
        }

        info!(task = %ctx.task_id, "creating warehouse schema");
        let conn = ctx.connect(&self.conn_id).await?;
        let rows_affected = conn.execute(&self.sql).await?;
        Ok(Completion::Done { rows_affected })
    }
}

#[async_trait]
impl Operator for StageSpec {
    async fn execute(&self, ctx: &TaskContext) -> Result<Completion, TaskError> {
        let aws = ctx.credentials(&self.aws_conn_id)?.clone();
        let location = self.location.for_date(ctx.logical_date);
        let conn = ctx.connect(&self.conn_id).await?;

        if self.clear_target {
            info!(task = %ctx.task_id, table = %self.table, "clearing staging table");
            conn.execute(&format!("DELETE FROM {}", self.table)).await?;
        }

        let load = BulkLoad {
            source_uri: location.uri(),
            target_table: self.table.clone(),
            format_spec: self.format_spec.clone(),
            region: self.region.clone(),
            credentials: Some(aws),
        };
        info!(
            task = %ctx.task_id,
            attempt = ctx.attempt,
            statement = %load.redacted_statement(),
            "copying data from object store"
        );
        let rows_affected = conn.bulk_load(&load).await?;
        Ok(Completion::Done { rows_affected })
    }
}

impl LoadSpec {
    /// The statement run for this load. In truncate mode the delete and the
    /// insert travel together as one operation.
    pub fn statement(&self) -> String {
        let select = self.sql.trim().trim_end_matches(';');
        let insert = format!("INSERT INTO {} {}", self.table, select);
        match self.insert_mode {
            InsertMode::Append => insert,
            InsertMode::TruncateThenInsert => format!("DELETE FROM {}; {}", self.table, insert),
        }
    }
}

#[async_trait]
impl Operator for LoadSpec {
    async fn execute(&self, ctx: &TaskContext) -> Result<Completion, TaskError> {
        info!(
            task = %ctx.task_id,
            table = %self.table,
            mode = %self.insert_mode,
            "inserting data into table"
        );
        let conn = ctx.connect(&self.conn_id).await?;
        let rows_affected = conn.execute(&self.statement()).await?;
        Ok(Completion::Done { rows_affected })
    }
}

#[async_trait]
impl Operator for ValidateSpec {
    async fn execute(&self, ctx: &TaskContext) -> Result<Completion, TaskError> {
        info!(task = %ctx.task_id, tables = ?self.tables, "running data quality checks");
        let conn = ctx.connect(&self.conn_id).await?;
        run_checks(&*conn, &self.tables, &self.checks).await?;
        Ok(Completion::Done { rows_affected: 0 })
    }
}
