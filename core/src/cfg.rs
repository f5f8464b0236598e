use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::logx::LogFormat;
use crate::retry::RetryPolicy;
use crate::scheduler::SchedulerSettings;

/// Identifier used to compute per-app configuration directories.
#[derive(Clone, Copy)]
pub struct AppId {
    /// Reverse-DNS style qualifier, e.g. `"com"`.
    pub qualifier: &'static str,
    /// Organization or vendor name, e.g. `"local"`.
    pub organization: &'static str,
    /// Application name, e.g. `"cadenced"`.
    pub application: &'static str,
}

/// Application configuration persisted to `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Tracing level to use if `RUST_LOG` is not set (e.g. `"info"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    /// Job store directory. Defaults to the per-app data dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub web: WebConfig,
}

/// `[scheduler]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Concurrent dispatches; `0` means one per CPU.
    #[serde(default)]
    pub max_concurrency: usize,
    /// Upper bound on a single dispatch attempt.
    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

/// `[web]` table. The management API stays off without `http_addr`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_addr: Option<String>,
}

fn default_log_level() -> String { "info".to_string() }
fn default_dispatch_timeout_ms() -> u64 { 30_000 }

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            data_dir: None,
            scheduler: SchedulerConfig::default(),
            web: WebConfig::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 0,
            dispatch_timeout_ms: default_dispatch_timeout_ms(),
            retry: RetryPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    /// Coordinator settings, resolving `max_concurrency = 0` to `cpus`.
    pub fn settings(&self, cpus: usize) -> SchedulerSettings {
        let max_concurrency = if self.max_concurrency == 0 { cpus.max(1) } else { self.max_concurrency };
        SchedulerSettings {
            max_concurrency,
            retry: self.retry.clone(),
            ..SchedulerSettings::default()
        }
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms.max(1))
    }
}

impl Config {
    /// Where the job store lives: `data_dir` if set, else the app data dir.
    pub fn store_dir(&self, app: &AppId) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(data_dir(app)?.join("jobs")),
        }
    }
}

fn project_dirs(app: &AppId) -> Result<ProjectDirs> {
    ProjectDirs::from(app.qualifier, app.organization, app.application)
        .ok_or_else(|| anyhow::anyhow!("failed to resolve ProjectDirs"))
}

/// Return the configuration directory for this app, creating it if needed.
pub fn config_dir(app: &AppId) -> Result<PathBuf> {
    let dir = project_dirs(app)?.config_dir().to_path_buf();
    fs::create_dir_all(&dir).with_context(|| format!("create config dir {}", dir.display()))?;
    Ok(dir)
}

/// Return the data directory for this app, creating it if needed.
pub fn data_dir(app: &AppId) -> Result<PathBuf> {
    let dir = project_dirs(app)?.data_dir().to_path_buf();
    fs::create_dir_all(&dir).with_context(|| format!("create data dir {}", dir.display()))?;
    Ok(dir)
}

/// Load `config.toml` from the app config dir or create a default one.
pub fn load_or_init(app: &AppId) -> Result<Config> {
    let path = config_dir(app)?.join("config.toml");
    if path.exists() {
        load_from(&path)
    } else {
        let cfg = Config::default();
        save_config(&path, &cfg)?;
        Ok(cfg)
    }
}

/// Load a specific config file.
pub fn load_from(path: &Path) -> Result<Config> {
    let txt = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: Config = toml::from_str(&txt).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}

fn save_config(path: &Path, cfg: &Config) -> Result<()> {
    let s = toml::to_string_pretty(cfg)?;
    fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
