use std::path::PathBuf;

use clap::Parser;

use crate::config::{default_config_path, ConfigError, RunConfig};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "payrecon",
    version,
    about = "Reconcile bank payment orders with approval tasks and file them"
)]
pub struct Cli {
    /// Config file (default: <local data dir>/payrecon/config.json)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Local working directory for staging, ledgers and snapshot archives
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Folder holding the numeric-prefixed project folders with payment orders
    #[arg(long)]
    pub source_root: Option<PathBuf>,

    /// Skip documents older than this many days
    #[arg(long)]
    pub max_age_days: Option<u32>,
}

impl Cli {
    pub fn config_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => default_config_path().ok_or(ConfigError::NoConfigPath),
        }
    }

    /// Config file, then `PAYRECON_*` environment, then command line.
    pub fn load_config(&self) -> Result<RunConfig, ConfigError> {
        let mut config = RunConfig::load(&self.config_path()?)?;
        config.apply_env();
        self.apply(&mut config);
        Ok(config)
    }

    pub fn apply(&self, config: &mut RunConfig) {
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(root) = &self.source_root {
            config.source_root = root.clone();
        }
        if let Some(days) = self.max_age_days {
            config.max_age_days = Some(days);
        }
    }
}
