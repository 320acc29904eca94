//! Config - TOML ファイル + 環境変数
//!
//! 優先順位: デフォルト値 < TOML ファイル < 環境変数。
//! 読み込んだ後に `validate()` で範囲チェックをして、起動時に失敗させる（Fail-fast）。
//!
//! ```toml
//! [runner]
//! worker_count = 4
//! queue_size = 100
//! stuck_task_age_secs = 1800
//!
//! [srs]
//! min_ease_factor = 1.3
//!
//! [log]
//! level = "debug"
//! format = "json"
//!
//! [database]
//! path = "recall.db"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::observability::LogConfig;
use crate::srs::SrsParams;

pub const ENV_LOG_LEVEL: &str = "RECALL_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "RECALL_LOG_FORMAT";
pub const ENV_DATABASE_PATH: &str = "RECALL_DATABASE_PATH";
pub const ENV_WORKER_COUNT: &str = "RECALL_WORKER_COUNT";
pub const ENV_QUEUE_SIZE: &str = "RECALL_QUEUE_SIZE";

const MAX_STUCK_TASK_AGE_SECS: u64 = 7 * 24 * 60 * 60;
const LOG_LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {var}: {value:?}")]
    Env { var: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// TaskRunner の設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub worker_count: usize,
    /// bounded queue の容量
    pub queue_size: usize,
    /// この時間以上 processing のままの task は放棄されたとみなす
    pub stuck_task_age_secs: u64,
    /// 0 なら定期スキャンをしない（起動時の recovery だけ）
    pub stuck_task_check_interval_secs: u64,
    /// 起動時に pending の task も再投入する
    pub recover_pending: bool,
    pub shutdown_grace_secs: u64,
    /// status 書き込みが Unavailable のときのリトライ回数
    pub status_update_retries: u32,
    pub status_retry_delay_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            queue_size: 100,
            stuck_task_age_secs: 30 * 60,
            stuck_task_check_interval_secs: 5 * 60,
            recover_pending: true,
            shutdown_grace_secs: 30,
            status_update_retries: 3,
            status_retry_delay_ms: 200,
        }
    }
}

impl RunnerConfig {
    pub fn stuck_task_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.stuck_task_age_secs).unwrap_or(i64::MAX))
    }

    pub fn stuck_task_check_interval(&self) -> Option<Duration> {
        (self.stuck_task_check_interval_secs > 0)
            .then(|| Duration::from_secs(self.stuck_task_check_interval_secs))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn status_retry_delay(&self) -> Duration {
        Duration::from_millis(self.status_retry_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..100).contains(&self.worker_count) {
            return Err(ConfigError::Invalid(format!(
                "runner.worker_count must be in 1..=99 (got {})",
                self.worker_count
            )));
        }
        if !(1..10_000).contains(&self.queue_size) {
            return Err(ConfigError::Invalid(format!(
                "runner.queue_size must be in 1..=9999 (got {})",
                self.queue_size
            )));
        }
        if !(1..=MAX_STUCK_TASK_AGE_SECS).contains(&self.stuck_task_age_secs) {
            return Err(ConfigError::Invalid(format!(
                "runner.stuck_task_age_secs must be in 1..={MAX_STUCK_TASK_AGE_SECS} (got {})",
                self.stuck_task_age_secs
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("recall.db"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub runner: RunnerConfig,
    pub srs: SrsParams,
    pub log: LogConfig,
    pub database: DatabaseConfig,
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// ファイル（任意）→ 環境変数 → validate の順で読み込む
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// `lookup` はテストで環境変数を差し替えるため
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log.level = level;
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            self.log.format = format.parse().map_err(|_| ConfigError::Env {
                var: ENV_LOG_FORMAT,
                value: format.clone(),
            })?;
        }
        if let Some(path) = lookup(ENV_DATABASE_PATH) {
            self.database.path = PathBuf::from(path);
        }
        if let Some(n) = lookup(ENV_WORKER_COUNT) {
            self.runner.worker_count = n.trim().parse().map_err(|_| ConfigError::Env {
                var: ENV_WORKER_COUNT,
                value: n.clone(),
            })?;
        }
        if let Some(n) = lookup(ENV_QUEUE_SIZE) {
            self.runner.queue_size = n.trim().parse().map_err(|_| ConfigError::Env {
                var: ENV_QUEUE_SIZE,
                value: n.clone(),
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.runner.validate()?;
        self.srs
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if !LOG_LEVELS.contains(&self.log.level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "log.level must be one of {LOG_LEVELS:?} (got {:?})",
                self.log.level
            )));
        }
        Ok(())
    }
}
