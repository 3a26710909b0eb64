//! Named warehouse and object-store connections.
//!
//! Tasks refer to connections by logical name ("redshift",
//! "aws_credentials"); the registry turns that name into concrete access
//! parameters once per run.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection not found: {name}")]
    NotFound { name: String },
}

/// Access parameters for one logical connection.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub conn_type: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Database name for warehouse connections.
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl Credentials {
    pub fn new(conn_type: impl Into<String>) -> Self {
        Self {
            conn_type: conn_type.into(),
            ..Default::default()
        }
    }

    pub fn with_host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = Some(host.into());
        self.port = Some(port);
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_login(mut self, login: impl Into<String>, password: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self.password = Some(password.into());
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("conn_type", &self.conn_type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("schema", &self.schema)
            .field("login", &self.login)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("extra", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Resolves logical connection names.
pub trait ConnectionRegistry: Send + Sync {
    fn resolve(&self, name: &str) -> Result<Credentials, ConnectionError>;
}

/// Registry over a fixed set of connections, typically from configuration.
#[derive(Debug, Default, Clone)]
pub struct StaticConnectionRegistry {
    connections: BTreeMap<String, Credentials>,
}

impl StaticConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, credentials: Credentials) -> Self {
        self.connections.insert(name.into(), credentials);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, credentials: Credentials) {
        self.connections.insert(name.into(), credentials);
    }
}

impl From<BTreeMap<String, Credentials>> for StaticConnectionRegistry {
    fn from(connections: BTreeMap<String, Credentials>) -> Self {
        Self { connections }
    }
}

impl ConnectionRegistry for StaticConnectionRegistry {
    fn resolve(&self, name: &str) -> Result<Credentials, ConnectionError> {
        self.connections
            .get(name)
            .cloned()
            .ok_or_else(|| ConnectionError::NotFound {
                name: name.to_string(),
            })
    }
}
