//! A warehouse held in memory.
//!
//! Tables are tracked by row count only. The statement vocabulary is the one
//! the pipeline's tasks emit: `CREATE TABLE`, `DROP TABLE`, `TRUNCATE`,
//! `DELETE FROM`, `INSERT INTO ... SELECT ... FROM <table>` and
//! `SELECT COUNT(*) FROM <table>`. An insert-select copies the row count of
//! the first existing table it reads from. Statements given to one `execute`
//! call apply atomically.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::{BulkLoad, Credentials, LoadError, WarehouseClient, WarehouseConnector, WarehouseError};

#[derive(Clone, Default)]
pub struct InMemoryWarehouse {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    tables: BTreeMap<String, u64>,
    objects: BTreeMap<String, u64>,
    faults: Vec<Fault>,
    statements: Vec<String>,
    open_sessions: usize,
    sessions_opened: usize,
    refuse_connections: bool,
}

struct Fault {
    pattern: String,
    remaining: Option<u32>,
    error: WarehouseError,
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers an object holding `rows` records at `uri`. Bulk loads pick
    /// up every object whose uri starts with the load's source prefix.
    pub fn put_object(&self, uri: impl Into<String>, rows: u64) {
        self.state().objects.insert(uri.into(), rows);
    }

    pub fn create_table(&self, name: &str, rows: u64) {
        self.state().tables.insert(normalize(name), rows);
    }

    pub fn row_count(&self, table: &str) -> Option<u64> {
        self.state().tables.get(&normalize(table)).copied()
    }

    pub fn tables(&self) -> Vec<String> {
        self.state().tables.keys().cloned().collect()
    }

    /// Makes the next `times` operations whose SQL contains `pattern` fail
    /// with `code`. `None` fails them forever.
    pub fn fail_on(&self, pattern: impl Into<String>, times: Option<u32>, code: impl Into<String>) {
        let pattern = pattern.into();
        let error = WarehouseError::new(code, format!("injected failure on '{}'", pattern));
        self.state().faults.push(Fault {
            pattern,
            remaining: times,
            error,
        });
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.state().refuse_connections = refuse;
    }

    /// Every operation received so far, bulk loads in their redacted form.
    pub fn statements(&self) -> Vec<String> {
        self.state().statements.clone()
    }

    pub fn open_sessions(&self) -> usize {
        self.state().open_sessions
    }

    pub fn sessions_opened(&self) -> usize {
        self.state().sessions_opened
    }
}

impl State {
    fn take_fault(&mut self, sql: &str) -> Option<WarehouseError> {
        let fault = self.faults.iter_mut().find(|f| {
            sql.contains(&f.pattern) && f.remaining.map_or(true, |left| left > 0)
        })?;
        if let Some(left) = fault.remaining.as_mut() {
            *left -= 1;
        }
        Some(fault.error.clone())
    }

    fn execute(&mut self, sql: &str) -> Result<u64, WarehouseError> {
        self.statements.push(sql.to_string());
        if let Some(err) = self.take_fault(sql) {
            return Err(err);
        }

        let snapshot = self.tables.clone();
        let mut affected = 0;
        for statement in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            match self.run_statement(statement) {
                Ok(rows) => affected += rows,
                Err(err) => {
                    self.tables = snapshot;
                    return Err(err);
                }
            }
        }
        Ok(affected)
    }

    fn run_statement(&mut self, statement: &str) -> Result<u64, WarehouseError> {
        let tokens: Vec<&str> = statement.split_whitespace().collect();
        let upper: Vec<String> = tokens.iter().map(|t| t.to_ascii_uppercase()).collect();
        let keyword = |i: usize| upper.get(i).map(String::as_str).unwrap_or_default();

        match (keyword(0), keyword(1)) {
            ("CREATE", "TABLE") => {
                let if_not_exists = keyword(2) == "IF";
                let name = table_at(&tokens, if if_not_exists { 5 } else { 2 })?;
                if self.tables.contains_key(&name) {
                    if if_not_exists {
                        return Ok(0);
                    }
                    return Err(WarehouseError::new(
                        "42P07",
                        format!("relation \"{}\" already exists", name),
                    ));
                }
                self.tables.insert(name, 0);
                Ok(0)
            }
            ("DROP", "TABLE") => {
                let if_exists = keyword(2) == "IF";
                let name = table_at(&tokens, if if_exists { 4 } else { 2 })?;
                if self.tables.remove(&name).is_none() && !if_exists {
                    return Err(missing_relation(&name));
                }
                Ok(0)
            }
            ("TRUNCATE", _) => {
                let name = table_at(&tokens, if keyword(1) == "TABLE" { 2 } else { 1 })?;
                self.clear(&name)
            }
            ("DELETE", "FROM") => {
                let name = table_at(&tokens, 2)?;
                self.clear(&name)
            }
            ("INSERT", "INTO") => {
                let name = table_at(&tokens, 2)?;
                if !self.tables.contains_key(&name) {
                    return Err(missing_relation(&name));
                }
                let rows = if upper.iter().any(|t| t.starts_with("VALUES")) {
                    1
                } else {
                    self.source_rows(&tokens[3..], &upper[3..], &name)
                };
                if let Some(count) = self.tables.get_mut(&name) {
                    *count += rows;
                }
                Ok(rows)
            }
            ("SELECT", _) | ("BEGIN", _) | ("COMMIT", _) | ("END", _) => Ok(0),
            _ => Err(WarehouseError::new(
                "42601",
                format!("syntax error at or near \"{}\"", tokens.first().unwrap_or(&"")),
            )),
        }
    }

    fn clear(&mut self, name: &str) -> Result<u64, WarehouseError> {
        match self.tables.get_mut(name) {
            Some(count) => Ok(std::mem::take(count)),
            None => Err(missing_relation(name)),
        }
    }

    fn source_rows(&self, tokens: &[&str], upper: &[String], target: &str) -> u64 {
        upper
            .iter()
            .enumerate()
            .filter(|(_, t)| t.as_str() == "FROM")
            .filter_map(|(i, _)| tokens.get(i + 1))
            .map(|t| normalize(t))
            .filter(|name| name != target)
            .find_map(|name| self.tables.get(&name).copied())
            .unwrap_or(0)
    }

    fn fetch_scalar(&mut self, sql: &str) -> Result<Option<i64>, WarehouseError> {
        self.statements.push(sql.to_string());
        if let Some(err) = self.take_fault(sql) {
            return Err(err);
        }

        let tokens: Vec<&str> = sql.split_whitespace().collect();
        let upper: Vec<String> = tokens.iter().map(|t| t.to_ascii_uppercase()).collect();
        let is_count = upper.len() >= 4
            && upper[0] == "SELECT"
            && upper[1] == "COUNT(*)"
            && upper[2] == "FROM";
        if !is_count {
            return Err(WarehouseError::new(
                "0A000",
                "only SELECT COUNT(*) FROM <table> is supported",
            ));
        }

        let name = table_at(&tokens, 3)?;
        let count = self
            .tables
            .get(&name)
            .copied()
            .ok_or_else(|| missing_relation(&name))?;

        // Row-level predicates are not modelled: filtered counts match nothing.
        if upper.iter().skip(4).any(|t| t == "WHERE") {
            return Ok(Some(0));
        }
        Ok(Some(count as i64))
    }

    fn bulk_load(&mut self, load: &BulkLoad) -> Result<u64, LoadError> {
        let statement = load.redacted_statement();
        self.statements.push(statement.clone());

        let load_error = |message: String| LoadError {
            source_uri: load.source_uri.clone(),
            target_table: load.target_table.clone(),
            message,
        };

        if let Some(err) = self.take_fault(&statement) {
            return Err(load_error(err.to_string()));
        }

        let name = normalize(&load.target_table);
        if !self.tables.contains_key(&name) {
            return Err(load_error(missing_relation(&name).to_string()));
        }

        let matched: Vec<u64> = self
            .objects
            .iter()
            .filter(|(uri, _)| uri.starts_with(&load.source_uri))
            .map(|(_, rows)| *rows)
            .collect();
        if matched.is_empty() {
            return Err(load_error("no objects found under prefix".to_string()));
        }

        let rows: u64 = matched.iter().sum();
        if let Some(count) = self.tables.get_mut(&name) {
            *count += rows;
        }
        Ok(rows)
    }
}

fn missing_relation(name: &str) -> WarehouseError {
    WarehouseError::new("42P01", format!("relation \"{}\" does not exist", name))
}

fn table_at(tokens: &[&str], index: usize) -> Result<String, WarehouseError> {
    tokens
        .get(index)
        .map(|t| normalize(t))
        .filter(|name| !name.is_empty())
        .ok_or_else(|| WarehouseError::new("42601", "missing table name"))
}

/// `public."Time"(` and `time` name the same table.
fn normalize(name: &str) -> String {
    let name = name
        .split('(')
        .next()
        .unwrap_or_default()
        .trim_matches(|c: char| c == ')' || c == ',' || c == ';')
        .replace('"', "")
        .to_ascii_lowercase();
    name.strip_prefix("public.").map(str::to_string).unwrap_or(name)
}

struct Session {
    state: Arc<Mutex<State>>,
}

impl Session {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let mut state = self.state();
        state.open_sessions = state.open_sessions.saturating_sub(1);
    }
}

#[async_trait]
impl WarehouseClient for Session {
    async fn execute(&self, sql: &str) -> Result<u64, WarehouseError> {
        self.state().execute(sql)
    }

    async fn fetch_scalar(&self, sql: &str) -> Result<Option<i64>, WarehouseError> {
        self.state().fetch_scalar(sql)
    }

    async fn bulk_load(&self, load: &BulkLoad) -> Result<u64, LoadError> {
        self.state().bulk_load(load)
    }
}

#[async_trait]
impl WarehouseConnector for InMemoryWarehouse {
    async fn connect(
        &self,
        conn_id: &str,
        _credentials: &Credentials,
    ) -> Result<Box<dyn WarehouseClient>, WarehouseError> {
        let mut state = self.state();
        if state.refuse_connections {
            return Err(WarehouseError::new(
                "08001",
                format!("could not connect to {}", conn_id),
            ));
        }
        state.open_sessions += 1;
        state.sessions_opened += 1;
        drop(state);

        Ok(Box::new(Session {
            state: Arc::clone(&self.state),
        }))
    }
}
