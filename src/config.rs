use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::PayerCatalog;
use crate::pipeline::{CommandLine, FilingPolicy, DEFAULT_AMOUNT_SCALE};

/// Application-level constants
pub const APP_NAME: &str = "payrecon";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const ENV_SOURCE_ROOT: &str = "PAYRECON_SOURCE_ROOT";
pub const ENV_DATA_DIR: &str = "PAYRECON_DATA_DIR";

pub const DEFAULT_TASK_URL_TEMPLATE: &str = "https://pyrus.com/t#id{task_id}";
const TASK_ID_PLACEHOLDER: &str = "{task_id}";

/// Log filter used when `RUST_LOG` is not set
pub fn default_log_filter() -> String {
    "info,payrecon_lib=debug".to_string()
}

/// Default config file: `<data_local_dir>/payrecon/config.json`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join(APP_NAME).join("config.json"))
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No config file given and no local data directory on this platform")]
    NoConfigPath,

    #[error("Cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Payer catalog is empty")]
    EmptyCatalog,

    #[error("Task URL template {0:?} has no {{task_id}} placeholder")]
    BadTaskUrlTemplate(String),

    #[error("No {0} command configured")]
    MissingCommand(&'static str),

    #[error("Source root is not set")]
    MissingSourceRoot,
}

/// Everything one reconciliation run needs to know.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Network folder holding the numeric-prefixed project folders.
    #[serde(default)]
    pub source_root: PathBuf,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// JSON array of task entries fetched ahead of the run.
    pub task_snapshot: PathBuf,
    #[serde(default = "default_task_url_template")]
    pub task_url_template: String,
    #[serde(default)]
    pub extractor: CommandLine,
    #[serde(default)]
    pub uploader: CommandLine,
    /// Skip source documents older than this many days.
    #[serde(default)]
    pub max_age_days: Option<u32>,
    #[serde(default = "default_lookback_days")]
    pub idempotency_lookback_days: u32,
    #[serde(default = "default_amount_scale")]
    pub amount_scale: u32,
    #[serde(default)]
    pub filing: FilingPolicy,
    pub payers: PayerCatalog,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_task_url_template() -> String {
    DEFAULT_TASK_URL_TEMPLATE.to_string()
}

fn default_lookback_days() -> u32 {
    30
}

fn default_amount_scale() -> u32 {
    DEFAULT_AMOUNT_SCALE
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        tracing::debug!(config = %path.display(), payers = config.payers.len(), "Config loaded");
        Ok(config)
    }

    /// Apply `PAYRECON_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(root) = lookup(ENV_SOURCE_ROOT).filter(|v| !v.trim().is_empty()) {
            self.source_root = PathBuf::from(root);
        }
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|v| !v.trim().is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.payers.is_empty() {
            return Err(ConfigError::EmptyCatalog);
        }
        if !self.task_url_template.contains(TASK_ID_PLACEHOLDER) {
            return Err(ConfigError::BadTaskUrlTemplate(self.task_url_template.clone()));
        }
        if self.source_root.as_os_str().is_empty() {
            return Err(ConfigError::MissingSourceRoot);
        }
        if self.extractor.is_empty() {
            return Err(ConfigError::MissingCommand("extractor"));
        }
        if self.uploader.is_empty() {
            return Err(ConfigError::MissingCommand("uploader"));
        }
        Ok(())
    }

    pub fn layout(&self) -> DataLayout {
        DataLayout::new(&self.data_dir)
    }
}

pub fn render_task_reference(template: &str, task_id: u64) -> String {
    template.replace(TASK_ID_PLACEHOLDER, &task_id.to_string())
}

/// Local working area: staged copies, daily ledgers, snapshot archive.
#[derive(Debug, Clone, PartialEq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files_dir(&self) -> PathBuf {
        self.root.join("files")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn entries_dir(&self) -> PathBuf {
        self.root.join("entries")
    }
}
