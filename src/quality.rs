use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::WarehouseClient;

/// What a check's scalar result must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum Expectation {
    Equals(i64),
    GreaterThan(i64),
    LessThan(i64),
}

impl Expectation {
    pub fn holds(&self, actual: i64) -> bool {
        match *self {
            Expectation::Equals(expected) => actual == expected,
            Expectation::GreaterThan(bound) => actual > bound,
            Expectation::LessThan(bound) => actual < bound,
        }
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::Equals(v) => write!(f, "= {}", v),
            Expectation::GreaterThan(v) => write!(f, "> {}", v),
            Expectation::LessThan(v) => write!(f, "< {}", v),
        }
    }
}

/// A query returning one number, run once per table with `{table}`
/// substituted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityCheck {
    pub query: String,
    pub expectation: Expectation,
}

impl QualityCheck {
    pub fn new(query: impl Into<String>, expectation: Expectation) -> Self {
        Self {
            query: query.into(),
            expectation,
        }
    }

    /// The table must contain at least one row.
    pub fn has_rows() -> Self {
        Self::new(crate::sql::COUNT_ROWS_SQL, Expectation::GreaterThan(0))
    }

    pub fn render(&self, table: &str) -> String {
        self.query.replace("{table}", table)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionFailure {
    pub table: String,
    pub query: String,
    pub expectation: Expectation,
    pub actual: Option<i64>,
    pub error: Option<String>,
}

impl fmt::Display for AssertionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.error, self.actual) {
            (Some(err), _) => write!(f, "{}: query failed: {}", self.table, err),
            (None, Some(actual)) => write!(
                f,
                "{}: expected {} but got {}",
                self.table, self.expectation, actual
            ),
            (None, None) => write!(f, "{}: query returned no results", self.table),
        }
    }
}

/// Every failed assertion of a data-quality task.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Data quality check failed for {}", self.describe())]
pub struct ValidationFailure {
    pub failures: Vec<AssertionFailure>,
}

impl ValidationFailure {
    /// Distinct failing tables in the order they were checked.
    pub fn failing_tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = Vec::new();
        for failure in &self.failures {
            if !tables.contains(&failure.table) {
                tables.push(failure.table.clone());
            }
        }
        tables
    }

    fn describe(&self) -> String {
        let mut result = self.failing_tables().join(", ");
        for failure in &self.failures {
            result.push_str(&format!("; {}", failure));
        }
        result
    }
}

/// Runs every check against every table and collects all failures. Returns
/// the number of assertions that passed.
pub async fn run_checks(
    client: &dyn WarehouseClient,
    tables: &[String],
    checks: &[QualityCheck],
) -> Result<usize, ValidationFailure> {
    let mut failures = Vec::new();
    let mut passed = 0;

    for table in tables {
        for check in checks {
            let query = check.render(table);
            let failure = |actual: Option<i64>, error: Option<String>| AssertionFailure {
                table: table.clone(),
                query: query.clone(),
                expectation: check.expectation,
                actual,
                error,
            };

            match client.fetch_scalar(&query).await {
                Ok(Some(actual)) if check.expectation.holds(actual) => {
                    info!(table = %table, actual, "data quality check passed");
                    passed += 1;
                }
                Ok(actual) => failures.push(failure(actual, None)),
                Err(err) => failures.push(failure(None, Some(err.to_string()))),
            }
        }
    }

    if failures.is_empty() {
        Ok(passed)
    } else {
        for failure in &failures {
            warn!(%failure, "data quality check failed");
        }
        Err(ValidationFailure { failures })
    }
}
