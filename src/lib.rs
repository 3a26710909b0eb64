pub mod task;
pub mod retry;
pub mod cycle_check;
pub mod graph;
pub mod connections;
pub mod templates;
pub mod sql;
pub mod staging;
pub mod warehouse;
pub mod memory;
pub mod operators;
pub mod quality;
pub mod context;
pub mod report;
pub mod executor;
pub mod config;
pub mod pipeline;

pub use task::{InsertMode, Task, TaskKind};
pub use retry::{RetryExecutor, RetryPolicy};
pub use graph::TaskGraph;
pub use cycle_check::find_cycle;
pub use connections::{ConnectionError, ConnectionRegistry, Credentials, StaticConnectionRegistry};
pub use templates::{InMemoryTemplateStore, TemplateError, TemplateStore};
pub use staging::{BulkLoad, ObjectLocation};
pub use warehouse::{ConnectionPool, LoadError, WarehouseClient, WarehouseConnector, WarehouseError};
pub use memory::InMemoryWarehouse;
pub use quality::{Expectation, QualityCheck, ValidationFailure};
pub use context::{RunContext, TaskContext};
pub use report::{ErrorInfo, ErrorKind, Outcome, RunReport, RunStatus, SkipReason, TaskStatus};
pub use executor::Executor;
pub use config::PipelineConfig;

use thiserror::Error;

/// Errors that abort a run before any task executes.
#[derive(Error, Debug)]
pub enum StardagError {
    #[error("Unknown task: {0}")]
    UnknownTask(String),
    #[error("Duplicate task id: {0}")]
    DuplicateTask(String),
    #[error("Circular dependency detected among tasks: {}", .0.join(", "))]
    CircularDependency(Vec<String>),
    #[error("Task graph has not been validated")]
    NotValidated,
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),
}

/// Errors raised by a single task attempt. The executor turns these into
/// failed outcomes; they never cross task boundaries.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Validation(#[from] ValidationFailure),
}

impl TaskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::Connection(_) => ErrorKind::Connection,
            TaskError::Warehouse(_) => ErrorKind::Warehouse,
            TaskError::Load(_) => ErrorKind::Load,
            TaskError::Validation(_) => ErrorKind::Validation,
        }
    }
}
