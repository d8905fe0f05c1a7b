use anyhow::{Context, Result};
use cache_storage_core::{BrokerConfig, MemoryEngineConfig};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "cache-storage-server",
    version,
    about = "Serve Cache Storage requests as line-delimited JSON over stdio"
)]
pub struct Args {
    /// YAML config file. Flags below override its values.
    #[arg(long, env = "CACHE_STORAGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Body bytes allowed per origin.
    #[arg(long, env = "CACHE_STORAGE_QUOTA_BYTES")]
    pub quota_bytes: Option<u64>,

    #[arg(long, value_enum, env = "CACHE_STORAGE_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Log requests from ephemeral sessions too. Same effect as
    /// `CACHE_STORAGE_LOG_EPHEMERAL_SESSIONS=1`.
    #[arg(long)]
    pub log_ephemeral_sessions: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub broker: BrokerConfig,
    pub engine: MemoryEngineConfig,
    pub log_format: LogFormat,
}

impl ServerConfig {
    /// Defaults or the config file, then `CACHE_STORAGE_*` variables, then flags.
    pub fn load(args: &Args) -> Result<Self> {
        let mut cfg = match &args.config {
            Some(path) => Self::from_path(path)?,
            None => Self::default(),
        };
        cfg.broker = cfg.broker.with_env_overrides();

        if let Some(quota_bytes) = args.quota_bytes {
            cfg.engine.quota_bytes = quota_bytes;
        }
        if let Some(format) = args.log_format {
            cfg.log_format = format;
        }
        if args.log_ephemeral_sessions {
            cfg.broker.log_ephemeral_sessions = true;
        }
        Ok(cfg)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_yaml(&raw).with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }
}
