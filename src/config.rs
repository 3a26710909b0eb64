//! Pipeline configuration.
//!
//! Layered with `figment`: built-in defaults, then an optional TOML file,
//! then `STARDAG_`-prefixed environment variables (`__` separates nested
//! keys, e.g. `STARDAG_CONNECTIONS__REDSHIFT__HOST`).

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::{Credentials, InsertMode, RetryPolicy, StardagError, StaticConnectionRegistry};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub dag_id: String,
    pub owner: String,
    pub description: String,
    pub retries: u32,
    pub retry_delay_secs: u64,
    pub retry_exponential_backoff: bool,
    pub max_retry_delay_secs: u64,
    pub max_parallelism: usize,
    pub redshift_conn_id: String,
    pub aws_conn_id: String,
    pub region: String,
    pub s3_bucket: String,
    pub log_data_prefix: String,
    pub song_data_prefix: String,
    pub log_json_path: String,
    pub skip_create_schema: bool,
    pub dimension_insert_mode: InsertMode,
    pub quality_tables: Vec<String>,
    /// Data-quality failures point at the data, not at a flaky warehouse,
    /// so they are not retried unless asked for.
    pub quality_check_retries: u32,
    pub connections: BTreeMap<String, Credentials>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dag_id: "s3_redshift_dag".to_string(),
            owner: "sparkify".to_string(),
            description: "Load and transform data in Redshift".to_string(),
            retries: 3,
            retry_delay_secs: 300,
            retry_exponential_backoff: false,
            max_retry_delay_secs: 3600,
            max_parallelism: 4,
            redshift_conn_id: "redshift".to_string(),
            aws_conn_id: "aws_credentials".to_string(),
            region: "us-west-2".to_string(),
            s3_bucket: "udacity-dend".to_string(),
            log_data_prefix: "log_data".to_string(),
            song_data_prefix: "song_data".to_string(),
            log_json_path: "s3://udacity-dend/log_json_path.json".to_string(),
            skip_create_schema: false,
            dimension_insert_mode: InsertMode::TruncateThenInsert,
            quality_tables: ["songplays", "users", "songs", "artists", "time"]
                .into_iter()
                .map(String::from)
                .collect(),
            quality_check_retries: 0,
            connections: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    /// Defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, StardagError> {
        let mut figment = Figment::from(Serialized::defaults(PipelineConfig::default()));

        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("STARDAG_").split("__"));

        figment.extract().map_err(|e| StardagError::Config(Box::new(e)))
    }

    /// Policy shared by every task except the data-quality check.
    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(self.retries, Duration::from_secs(self.retry_delay_secs));
        if self.retry_exponential_backoff {
            policy.with_exponential_backoff(2.0, Duration::from_secs(self.max_retry_delay_secs))
        } else {
            policy
        }
    }

    pub fn quality_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.quality_check_retries,
            ..self.retry_policy()
        }
    }

    pub fn connection_registry(&self) -> StaticConnectionRegistry {
        StaticConnectionRegistry::from(self.connections.clone())
    }
}
