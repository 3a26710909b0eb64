use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::Credentials;

/// A prefix inside an object-store bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectLocation {
    pub bucket: String,
    /// May contain `{ds}`, `{year}`, `{month}` and `{day}`, filled in from
    /// the run's logical date.
    pub key_prefix: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key_prefix: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key_prefix: key_prefix.into(),
        }
    }

    /// `s3://bucket/prefix` with placeholders left as they are.
    pub fn uri(&self) -> String {
        let prefix = self.key_prefix.trim_start_matches('/');
        if prefix.is_empty() {
            format!("s3://{}", self.bucket)
        } else {
            format!("s3://{}/{}", self.bucket, prefix)
        }
    }

    /// The location with date placeholders rendered for `logical_date`.
    pub fn for_date(&self, logical_date: DateTime<Utc>) -> ObjectLocation {
        let key_prefix = self
            .key_prefix
            .replace("{ds}", &logical_date.format("%Y-%m-%d").to_string())
            .replace("{year}", &logical_date.year().to_string())
            .replace("{month}", &format!("{:02}", logical_date.month()))
            .replace("{day}", &format!("{:02}", logical_date.day()));

        ObjectLocation {
            bucket: self.bucket.clone(),
            key_prefix,
        }
    }
}

/// One bulk copy from the object store into a warehouse table.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkLoad {
    pub source_uri: String,
    pub target_table: String,
    pub format_spec: String,
    pub region: String,
    pub credentials: Option<Credentials>,
}

impl BulkLoad {
    /// Redshift `COPY` statement for this load.
    pub fn copy_statement(&self) -> String {
        self.render(false)
    }

    /// Same statement with the secret key masked, for logs.
    pub fn redacted_statement(&self) -> String {
        self.render(true)
    }

    fn render(&self, redact: bool) -> String {
        let mut sql = format!("COPY {} FROM '{}'", self.target_table, self.source_uri);

        if let Some(creds) = &self.credentials {
            let access_key = creds.login.as_deref().unwrap_or_default();
            let secret = if redact {
                "***"
            } else {
                creds.password.as_deref().unwrap_or_default()
            };
            sql.push_str(&format!(
                " ACCESS_KEY_ID '{}' SECRET_ACCESS_KEY '{}'",
                access_key, secret
            ));
        }
        if !self.region.is_empty() {
            sql.push_str(&format!(" REGION '{}'", self.region));
        }
        if !self.format_spec.is_empty() {
            sql.push(' ');
            sql.push_str(&self.format_spec);
        }

        sql
    }
}
