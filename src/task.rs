use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::quality::QualityCheck;
use crate::staging::ObjectLocation;
use crate::RetryPolicy;

/// How a load task treats rows already present in its target table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InsertMode {
    /// Insert on top of existing rows. Re-running duplicates rows unless the
    /// select itself deduplicates.
    Append,
    /// Delete every row of the target, then insert, in one operation.
    TruncateThenInsert,
}

impl fmt::Display for InsertMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsertMode::Append => f.write_str("append"),
            InsertMode::TruncateThenInsert => f.write_str("truncate-then-insert"),
        }
    }
}

impl FromStr for InsertMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(InsertMode::Append),
            "truncate-then-insert" | "truncate" | "with truncate" => {
                Ok(InsertMode::TruncateThenInsert)
            }
            other => Err(format!("unknown insert mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSchemaSpec {
    pub conn_id: String,
    pub sql: String,
    #[serde(default)]
    pub skip: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub conn_id: String,
    pub aws_conn_id: String,
    pub table: String,
    pub location: ObjectLocation,
    pub region: String,
    pub format_spec: String,
    /// Delete the staging table's rows before copying so a retry never
    /// stacks a second copy on top of the first.
    pub clear_target: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadSpec {
    pub conn_id: String,
    pub table: String,
    /// Select statement producing the rows to insert.
    pub sql: String,
    pub insert_mode: InsertMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidateSpec {
    pub conn_id: String,
    pub tables: Vec<String>,
    pub checks: Vec<QualityCheck>,
}

/// The closed set of things a task can do. Each variant carries its own
/// immutable configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    CreateSchema(CreateSchemaSpec),
    Stage(StageSpec),
    LoadFact(LoadSpec),
    LoadDimension(LoadSpec),
    Validate(ValidateSpec),
    NoOp,
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::CreateSchema(_) => "create_schema",
            TaskKind::Stage(_) => "stage",
            TaskKind::LoadFact(_) => "load_fact",
            TaskKind::LoadDimension(_) => "load_dimension",
            TaskKind::Validate(_) => "validate",
            TaskKind::NoOp => "no_op",
        }
    }

    /// Logical connection names this task needs resolved before it runs.
    pub fn connection_ids(&self) -> Vec<&str> {
        match self {
            TaskKind::CreateSchema(spec) => vec![spec.conn_id.as_str()],
            TaskKind::Stage(spec) => vec![spec.conn_id.as_str(), spec.aws_conn_id.as_str()],
            TaskKind::LoadFact(spec) | TaskKind::LoadDimension(spec) => {
                vec![spec.conn_id.as_str()]
            }
            TaskKind::Validate(spec) => vec![spec.conn_id.as_str()],
            TaskKind::NoOp => Vec::new(),
        }
    }
}

/// A named unit of work. Immutable once added to a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    id: String,
    kind: TaskKind,
    #[serde(default)]
    params: BTreeMap<String, String>,
    #[serde(default)]
    retry: RetryPolicy,
}

impl Task {
    pub fn new(id: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            id: id.into(),
            kind,
            params: BTreeMap::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn no_op(id: impl Into<String>) -> Self {
        Self::new(id, TaskKind::NoOp)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}
