//! Configuration for the typereg binary.
//!
//! Sources, later ones overriding earlier ones:
//! 1. built-in defaults;
//! 2. a TOML file, either given explicitly or `typereg.toml` in the platform
//!    configuration directory (skipped if it doesn't exist);
//! 3. `DATABASE_URL` and `QUEUE_URL`;
//! 4. `TYPEREG_*` variables, with `__` separating nested keys
//!    (`TYPEREG_WORKER__FILE_CONCURRENCY=4`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "typereg.toml";
pub const ENV_PREFIX: &str = "TYPEREG_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// SQLite URL of the entry store.
    pub database_url: String,
    /// SQLite URL of the job queue. May be the same database as the store.
    pub queue_url: String,
    /// Where upstream repositories are cloned.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "UpstreamConfig::definitely_typed")]
    pub definitely_typed: UpstreamConfig,
    #[serde(default = "UpstreamConfig::registry")]
    pub registry: UpstreamConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub url: String,
    pub branch: String,
}

impl UpstreamConfig {
    fn definitely_typed() -> Self {
        Self {
            url: "https://github.com/DefinitelyTyped/DefinitelyTyped.git".to_string(),
            branch: "master".to_string(),
        }
    }

    fn registry() -> Self {
        Self {
            url: "https://github.com/typings/registry.git".to_string(),
            branch: "master".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// File jobs processed in parallel, per upstream.
    pub file_concurrency: usize,
    /// Minimum time between two network refreshes of the same mirror.
    pub refresh_interval_secs: u64,
    pub resync_interval_secs: u64,
    /// Running jobs without a heartbeat for this long are re-queued.
    pub stuck_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            file_concurrency: 10,
            refresh_interval_secs: 300,
            resync_interval_secs: 300,
            stuck_timeout_secs: 120,
        }
    }
}

impl WorkerConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn stuck_timeout(&self) -> Duration {
        Duration::from_secs(self.stuck_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for every further attempt.
    pub backoff_ms: u64,
    pub poll_interval_ms: u64,
    /// How long running jobs get to finish on shutdown before being released.
    pub shutdown_grace_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_ms: 2_000,
            poll_interval_ms: 500,
            shutdown_grace_secs: 5,
        }
    }
}

impl QueueConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "typereg")
}

fn default_data_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("typereg"))
}

/// `typereg.toml` in the platform configuration directory.
pub fn default_config_file() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

impl Config {
    /// Load and validate the configuration.
    ///
    /// An explicit `file` must exist; the default one is optional.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let file = match file {
            Some(file) if !file.is_file() => exn::bail!(ErrorKind::NotFound(file.display().to_string())),
            Some(file) => Some(file.to_path_buf()),
            None => default_config_file(),
        };
        let config = Self::from_figment(Self::figment(file.as_deref()))?;
        tracing::debug!(file = ?file, data_dir = %config.data_dir.display(), "configuration loaded");
        Ok(config)
    }

    /// Every source layered in order, without extracting anything.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::new();
        if let Some(file) = file {
            figment = figment.merge(Toml::file(file));
        }
        figment
            .merge(Env::raw().only(&["DATABASE_URL", "QUEUE_URL"]))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| -> Result<()> { Err(ErrorKind::Invalid(reason.to_string()).into()) };
        if self.database_url.trim().is_empty() {
            return invalid("database_url is empty");
        }
        if self.queue_url.trim().is_empty() {
            return invalid("queue_url is empty");
        }
        for (name, upstream) in [("definitely_typed", &self.definitely_typed), ("registry", &self.registry)] {
            if upstream.url.trim().is_empty() || upstream.branch.trim().is_empty() {
                return invalid(&format!("{name} needs both a url and a branch"));
            }
        }
        if self.worker.file_concurrency == 0 {
            return invalid("worker.file_concurrency must be at least 1");
        }
        if self.worker.resync_interval_secs == 0 || self.worker.stuck_timeout_secs == 0 {
            return invalid("worker intervals must be non-zero");
        }
        if self.queue.max_attempts == 0 {
            return invalid("queue.max_attempts must be at least 1");
        }
        if self.queue.poll_interval_ms == 0 {
            return invalid("queue.poll_interval_ms must be non-zero");
        }
        Ok(())
    }
}
