//! Default value functions for AppConfig.

use std::path::PathBuf;

use crate::backoff::BackoffPolicy;

use super::schemas::{
    ClassifierConfig, CompletenessPolicy, LimitsConfig, MonitorConfig, ParserConfig,
    PipelineConfig, ServerConfig, StorageConfig,
};

// ==================== Top-level Section Defaults ====================

pub(crate) fn default_server() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
    }
}

pub(crate) fn default_storage() -> StorageConfig {
    StorageConfig {
        data_dir: default_data_dir(),
    }
}

pub(crate) fn default_limits() -> LimitsConfig {
    LimitsConfig {
        max_document_size_bytes: default_max_document_size(),
    }
}

pub(crate) fn default_pipeline() -> PipelineConfig {
    PipelineConfig {
        workers: default_workers(),
        max_retries: default_task_max_retries(),
        task_timeout_secs: default_task_timeout_secs(),
        default_priority: 0,
        completeness_policy: CompletenessPolicy::default(),
        retry_backoff: default_task_backoff(),
        idle_poll_ms: default_idle_poll_ms(),
        stale_sweep_secs: default_stale_sweep_secs(),
    }
}

pub(crate) fn default_parser() -> ParserConfig {
    ParserConfig {
        base_url: default_parser_url(),
        request_timeout_secs: default_parser_timeout_secs(),
    }
}

pub(crate) fn default_classifier() -> ClassifierConfig {
    ClassifierConfig {
        base_url: default_classifier_url(),
        request_timeout_ms: default_classifier_timeout_ms(),
        batch_size: default_batch_size(),
        max_retries: default_classifier_max_retries(),
        backoff: default_classifier_backoff(),
    }
}

pub(crate) fn default_monitor() -> MonitorConfig {
    MonitorConfig {
        base_interval_ms: default_monitor_base_interval_ms(),
        max_interval_ms: default_monitor_max_interval_ms(),
        jitter_ms: default_monitor_jitter_ms(),
        max_retries: default_monitor_max_retries(),
        global_timeout_secs: default_monitor_global_timeout_secs(),
        error_cache_ttl_secs: default_error_cache_ttl_secs(),
        not_found_threshold: default_not_found_threshold(),
        stall_timeout_secs: default_stall_timeout_secs(),
    }
}

// ==================== Server / Storage ====================

pub(crate) fn default_host() -> String {
    "0.0.0.0".to_string()
}

pub(crate) fn default_port() -> u16 {
    8080
}

pub(crate) fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

pub(crate) fn default_max_document_size() -> u64 {
    100 * 1024 * 1024
}

// ==================== Pipeline ====================

pub(crate) fn default_workers() -> usize {
    4
}

pub(crate) fn default_task_max_retries() -> u32 {
    3
}

pub(crate) fn default_task_timeout_secs() -> u64 {
    600
}

pub(crate) fn default_task_backoff() -> BackoffPolicy {
    BackoffPolicy {
        base_ms: 2_000,
        multiplier: 2.0,
        cap_ms: 60_000,
        jitter_ms: 500,
        max_attempts: default_task_max_retries() + 1,
    }
}

pub(crate) fn default_idle_poll_ms() -> u64 {
    2_000
}

pub(crate) fn default_stale_sweep_secs() -> u64 {
    60
}

// ==================== Collaborators ====================

pub(crate) fn default_parser_url() -> String {
    "http://localhost:8001".to_string()
}

pub(crate) fn default_parser_timeout_secs() -> u64 {
    300
}

pub(crate) fn default_classifier_url() -> String {
    "http://localhost:8002".to_string()
}

pub(crate) fn default_classifier_timeout_ms() -> u64 {
    30_000
}

pub(crate) fn default_batch_size() -> usize {
    10
}

pub(crate) fn default_classifier_max_retries() -> u32 {
    2
}

pub(crate) fn default_classifier_backoff() -> BackoffPolicy {
    BackoffPolicy {
        base_ms: 500,
        multiplier: 2.0,
        cap_ms: 10_000,
        jitter_ms: 250,
        max_attempts: default_classifier_max_retries() + 1,
    }
}

// ==================== Status Monitor ====================

pub(crate) fn default_monitor_base_interval_ms() -> u64 {
    2_000
}

pub(crate) fn default_monitor_max_interval_ms() -> u64 {
    30_000
}

pub(crate) fn default_monitor_jitter_ms() -> u64 {
    1_000
}

pub(crate) fn default_monitor_max_retries() -> u32 {
    5
}

pub(crate) fn default_monitor_global_timeout_secs() -> u64 {
    300
}

pub(crate) fn default_error_cache_ttl_secs() -> u64 {
    60
}

pub(crate) fn default_not_found_threshold() -> u32 {
    3
}

pub(crate) fn default_stall_timeout_secs() -> u64 {
    120
}
