//! Service configuration.
//!
//! Values come from an optional `config.{toml,yaml,json}` file in the working
//! directory, overridden by `DOCPIPE__SECTION__KEY` environment variables.

mod defaults;
mod loader;
mod schemas;

use serde::{Deserialize, Serialize};

pub use loader::load_config;
pub use schemas::{
    ClassifierConfig, CompletenessPolicy, LimitsConfig, MonitorConfig, ParserConfig,
    PipelineConfig, ServerConfig, StorageConfig,
};

use defaults::{
    default_classifier, default_limits, default_monitor, default_parser, default_pipeline,
    default_server, default_storage,
};

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_server")]
    pub server: ServerConfig,

    #[serde(default = "default_storage")]
    pub storage: StorageConfig,

    #[serde(default = "default_limits")]
    pub limits: LimitsConfig,

    #[serde(default = "default_pipeline")]
    pub pipeline: PipelineConfig,

    #[serde(default = "default_parser")]
    pub parser: ParserConfig,

    #[serde(default = "default_classifier")]
    pub classifier: ClassifierConfig,

    /// Client-side status monitor settings (used by `docpipe-watch`)
    #[serde(default = "default_monitor")]
    pub monitor: MonitorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            storage: default_storage(),
            limits: default_limits(),
            pipeline: default_pipeline(),
            parser: default_parser(),
            classifier: default_classifier(),
            monitor: default_monitor(),
        }
    }
}
