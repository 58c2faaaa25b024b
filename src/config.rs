//! # Configuration Management
//!
//! Configuration is stored in Cloudflare KV storage under the `config` key and
//! loaded once per isolate. Every field has a default, so a partial (or absent)
//! document is valid.
//!
//! ## Configuration Options
//!
//! - `bucket_binding`: R2 binding the assembled objects are written to
//! - `part_concurrency`: part uploads in flight per batch (default: available parallelism)
//! - `part_timeout_ms` / `control_timeout_ms`: per-call deadlines
//! - `max_sessions`: bound on concurrently open upload sessions
//! - `stale_session_secs`: idle time after which a session is swept
//! - `max_object_size`: largest object a single request may assemble
//!
//! ## Example
//!
//! ```json
//! {
//!   "bucket_binding": "STORAGE_BUCKET",
//!   "part_concurrency": 8,
//!   "control_timeout_ms": 10000
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use worker::kv::KvStore;
use worker::Error as WorkerError;

use crate::constants::{
    CONFIG_KV_KEY, DEFAULT_CONTROL_TIMEOUT_MS, DEFAULT_MAX_OBJECT_SIZE, DEFAULT_MAX_SESSIONS,
    DEFAULT_PART_TIMEOUT_MS, DEFAULT_STALE_SESSION_SECS, STORAGE_BUCKET_NAME,
};
use crate::coordinator::CoordinatorOptions;
use crate::errors::{AppError, AppResult};
use crate::log_data;
use crate::logging::Logger;
use crate::sequencer::PartSequencer;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name of the R2 bucket binding. Must match the binding name in wrangler.toml.
    pub bucket_binding: String,

    /// Part uploads in flight per batch; `None` uses the available parallelism.
    pub part_concurrency: Option<usize>,

    pub part_timeout_ms: u64,

    /// Deadline for initiate, complete and abort calls.
    pub control_timeout_ms: u64,

    pub max_sessions: usize,

    pub stale_session_secs: u64,

    /// Maximum assembled object size in bytes.
    pub max_object_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bucket_binding: STORAGE_BUCKET_NAME.to_string(),
            part_concurrency: None,
            part_timeout_ms: DEFAULT_PART_TIMEOUT_MS,
            control_timeout_ms: DEFAULT_CONTROL_TIMEOUT_MS,
            max_sessions: DEFAULT_MAX_SESSIONS,
            stale_session_secs: DEFAULT_STALE_SESSION_SECS,
            max_object_size: DEFAULT_MAX_OBJECT_SIZE,
        }
    }
}

impl Config {
    /// Loads configuration from KV storage with fallback to defaults.
    ///
    /// A missing document yields the defaults; a document that fails to parse
    /// or validate is an error.
    pub async fn load(kv: &KvStore, logger: &Logger) -> AppResult<Self> {
        let config = match kv
            .get(CONFIG_KV_KEY)
            .json::<Config>()
            .await
            .map_err(WorkerError::from)?
        {
            Some(config) => {
                logger.info("Configuration loaded from KV storage", None);
                config
            }
            None => {
                logger.info("Config not found in KV, using default", None);
                Self::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(raw: &str) -> AppResult<Self> {
        let config: Config = serde_json::from_str(raw)
            .map_err(|e| AppError::BadRequest(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        let invalid = |field: &str| AppError::BadRequest(format!("configuration `{field}` must be positive"));
        if self.bucket_binding.trim().is_empty() {
            return Err(AppError::BadRequest("configuration `bucket_binding` is empty".into()));
        }
        if self.part_concurrency == Some(0) {
            return Err(invalid("part_concurrency"));
        }
        if self.part_timeout_ms == 0 {
            return Err(invalid("part_timeout_ms"));
        }
        if self.control_timeout_ms == 0 {
            return Err(invalid("control_timeout_ms"));
        }
        if self.max_sessions == 0 {
            return Err(invalid("max_sessions"));
        }
        Ok(())
    }

    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            bucket: self.bucket_binding.clone(),
            part_timeout: Duration::from_millis(self.part_timeout_ms),
            control_timeout: Duration::from_millis(self.control_timeout_ms),
        }
    }

    pub fn sequencer(&self) -> PartSequencer {
        self.part_concurrency
            .map(PartSequencer::new)
            .unwrap_or_default()
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.stale_session_secs).unwrap_or(i64::MAX))
    }

    /// Log-friendly summary of the effective settings.
    pub fn describe(&self, logger: &Logger) {
        logger.info(
            "Effective configuration",
            log_data!(
                "bucketBinding" => self.bucket_binding,
                "partConcurrency" => self.sequencer().concurrency(),
                "maxSessions" => self.max_sessions
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_document_fills_defaults() {
        let config = Config::from_json(r#"{"part_concurrency": 8}"#).unwrap();
        assert_eq!(config.part_concurrency, Some(8));
        assert_eq!(config.bucket_binding, STORAGE_BUCKET_NAME);
        assert_eq!(config.max_sessions, DEFAULT_MAX_SESSIONS);
        assert_eq!(config.sequencer().concurrency(), 8);
    }

    #[test]
    fn empty_document_is_default() {
        assert_eq!(Config::from_json("{}").unwrap(), Config::default());
    }

    #[test]
    fn rejects_zero_limits() {
        assert!(Config::from_json(r#"{"max_sessions": 0}"#).is_err());
        assert!(Config::from_json(r#"{"part_concurrency": 0}"#).is_err());
        assert!(Config::from_json(r#"{"control_timeout_ms": 0}"#).is_err());
        assert!(Config::from_json(r#"{"bucket_binding": " "}"#).is_err());
    }

    #[test]
    fn derives_coordinator_options() {
        let config = Config::from_json(
            r#"{"bucket_binding": "UPLOADS", "part_timeout_ms": 500, "control_timeout_ms": 250}"#,
        )
        .unwrap();
        let options = config.coordinator_options();
        assert_eq!(options.bucket, "UPLOADS");
        assert_eq!(options.part_timeout, Duration::from_millis(500));
        assert_eq!(options.control_timeout, Duration::from_millis(250));
    }

    #[test]
    fn stale_threshold_in_seconds() {
        let config = Config {
            stale_session_secs: 90,
            ..Config::default()
        };
        assert_eq!(config.stale_after(), chrono::Duration::seconds(90));
    }
}
