//! Configuration struct definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::backoff::BackoffPolicy;

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "super::defaults::default_host")]
    pub host: String,

    #[serde(default = "super::defaults::default_port")]
    pub port: u16,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "super::defaults::default_data_dir")]
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("docpipe.db")
    }

    /// Directory holding transient source blobs until finalize
    pub fn blob_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }
}

/// Size limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "super::defaults::default_max_document_size")]
    pub max_document_size_bytes: u64,
}

/// What the finalize stage accepts for sentences that could not be classified
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletenessPolicy {
    /// Sentences in classification `error` are allowed; only `pending` blocks completion
    #[default]
    Tolerant,
    /// Every sentence must have classification `success`
    Strict,
}

/// Orchestrator and task queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of concurrent task workers
    #[serde(default = "super::defaults::default_workers")]
    pub workers: usize,

    /// Retries per stage task before the document is marked as failed
    #[serde(default = "super::defaults::default_task_max_retries")]
    pub max_retries: u32,

    #[serde(default = "super::defaults::default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    #[serde(default)]
    pub default_priority: i64,

    #[serde(default)]
    pub completeness_policy: CompletenessPolicy,

    /// Delay between stage retries. The attempt budget comes from `max_retries`.
    #[serde(default = "super::defaults::default_task_backoff")]
    pub retry_backoff: BackoffPolicy,

    /// How long an idle worker sleeps before checking the queue again
    #[serde(default = "super::defaults::default_idle_poll_ms")]
    pub idle_poll_ms: u64,

    /// Interval of the stale-task sweep
    #[serde(default = "super::defaults::default_stale_sweep_secs")]
    pub stale_sweep_secs: u64,
}

impl PipelineConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn stale_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.stale_sweep_secs)
    }

    /// Stage retry backoff with the attempt budget derived from `max_retries`
    pub fn retry_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.max_retries.saturating_add(1),
            ..self.retry_backoff
        }
    }
}

/// Structural parser service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    #[serde(default = "super::defaults::default_parser_url")]
    pub base_url: String,

    #[serde(default = "super::defaults::default_parser_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Sentence classifier service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "super::defaults::default_classifier_url")]
    pub base_url: String,

    /// Per-call timeout
    #[serde(default = "super::defaults::default_classifier_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Sentences per batch, also the number of concurrent calls
    #[serde(default = "super::defaults::default_batch_size")]
    pub batch_size: usize,

    /// Retries per sentence after the first attempt
    #[serde(default = "super::defaults::default_classifier_max_retries")]
    pub max_retries: u32,

    #[serde(default = "super::defaults::default_classifier_backoff")]
    pub backoff: BackoffPolicy,
}

impl ClassifierConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Backoff policy with the attempt budget derived from `max_retries`
    pub fn retry_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.max_retries.saturating_add(1),
            ..self.backoff
        }
    }
}

/// Client-side status monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "super::defaults::default_monitor_base_interval_ms")]
    pub base_interval_ms: u64,

    #[serde(default = "super::defaults::default_monitor_max_interval_ms")]
    pub max_interval_ms: u64,

    #[serde(default = "super::defaults::default_monitor_jitter_ms")]
    pub jitter_ms: u64,

    /// Consecutive failed polls before giving up
    #[serde(default = "super::defaults::default_monitor_max_retries")]
    pub max_retries: u32,

    /// Give up when no poll has succeeded for this long
    #[serde(default = "super::defaults::default_monitor_global_timeout_secs")]
    pub global_timeout_secs: u64,

    #[serde(default = "super::defaults::default_error_cache_ttl_secs")]
    pub error_cache_ttl_secs: u64,

    /// Consecutive "not found" answers before the document is considered gone
    #[serde(default = "super::defaults::default_not_found_threshold")]
    pub not_found_threshold: u32,

    /// Report a stall when progress has not moved for this long
    #[serde(default = "super::defaults::default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,
}

impl MonitorConfig {
    pub fn base_interval(&self) -> Duration {
        Duration::from_millis(self.base_interval_ms)
    }

    pub fn global_timeout(&self) -> Duration {
        Duration::from_secs(self.global_timeout_secs)
    }

    pub fn error_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.error_cache_ttl_secs)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_ms: self.base_interval_ms,
            multiplier: 2.0,
            cap_ms: self.max_interval_ms,
            jitter_ms: self.jitter_ms,
            max_attempts: self.max_retries,
        }
    }
}
