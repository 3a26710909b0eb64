use std::collections::BTreeMap;

use crate::sql;

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("SQL template not found: {name}")]
    NotFound { name: String },
}

/// Parameterized SQL text keyed by logical name.
pub trait TemplateStore: Send + Sync {
    fn get(&self, name: &str) -> Result<String, TemplateError>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryTemplateStore {
    templates: BTreeMap<String, String>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schema DDL and insert-selects for the sparkify star schema.
    pub fn sparkify() -> Self {
        Self::new()
            .with(sql::CREATE_TABLES, sql::CREATE_TABLES_SQL)
            .with(sql::SONGPLAY_INSERT, sql::SONGPLAY_INSERT_SQL)
            .with(sql::USER_INSERT, sql::USER_INSERT_SQL)
            .with(sql::SONG_INSERT, sql::SONG_INSERT_SQL)
            .with(sql::ARTIST_INSERT, sql::ARTIST_INSERT_SQL)
            .with(sql::TIME_INSERT, sql::TIME_INSERT_SQL)
    }

    pub fn with(mut self, name: impl Into<String>, sql: impl Into<String>) -> Self {
        self.templates.insert(name.into(), sql.into());
        self
    }
}

impl TemplateStore for InMemoryTemplateStore {
    fn get(&self, name: &str) -> Result<String, TemplateError> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| TemplateError::NotFound {
                name: name.to_string(),
            })
    }
}
