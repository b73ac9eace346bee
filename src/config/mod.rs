use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use url::Url;

use crate::errors::{AppError, AppResult};

pub mod defaults;
pub mod duration_serde;

use defaults::*;
use duration_serde::duration;

/// Timing knobs for the heap scheduler and the execution guard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Budget divided among active entries to compute the suggested tick delay
    #[serde(with = "duration", default = "default_tick_budget")]
    pub tick_budget: Duration,
    /// Floor applied to every suggested delay
    #[serde(with = "duration", default = "default_min_tick_delay")]
    pub min_tick_delay: Duration,
    /// Delay returned when no source is scheduled at all
    #[serde(with = "duration", default = "default_idle_delay")]
    pub idle_delay: Duration,
    /// Re-check interval for sources with a positive refresh interval
    #[serde(with = "duration", default = "default_due_poll_interval")]
    pub due_poll_interval: Duration,
    /// Re-check interval for sources whose refresh is disabled
    #[serde(with = "duration", default = "default_disabled_poll_interval")]
    pub disabled_poll_interval: Duration,
    /// A running job older than this may be overridden by a new submission
    #[serde(with = "duration", default = "default_max_job_runtime")]
    pub max_job_runtime: Duration,
    /// Bound applied to every job submission and status query
    #[serde(with = "duration", default = "default_job_call_timeout")]
    pub job_call_timeout: Duration,
}

/// HTTP job backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_url")]
    pub base_url: String,
    #[serde(with = "duration", default = "default_backend_request_timeout")]
    pub request_timeout: Duration,
}

/// File-backed source store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_sources_file")]
    pub sources_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

fn default_tick_budget() -> Duration {
    DEFAULT_TICK_BUDGET
}

fn default_min_tick_delay() -> Duration {
    DEFAULT_MIN_TICK_DELAY
}

fn default_idle_delay() -> Duration {
    DEFAULT_IDLE_DELAY
}

fn default_due_poll_interval() -> Duration {
    DEFAULT_DUE_POLL_INTERVAL
}

fn default_disabled_poll_interval() -> Duration {
    DEFAULT_DISABLED_POLL_INTERVAL
}

fn default_max_job_runtime() -> Duration {
    DEFAULT_MAX_JOB_RUNTIME
}

fn default_job_call_timeout() -> Duration {
    DEFAULT_JOB_CALL_TIMEOUT
}

fn default_backend_url() -> String {
    DEFAULT_BACKEND_URL.to_string()
}

fn default_backend_request_timeout() -> Duration {
    DEFAULT_BACKEND_REQUEST_TIMEOUT
}

fn default_sources_file() -> PathBuf {
    PathBuf::from(DEFAULT_SOURCES_FILE)
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_budget: default_tick_budget(),
            min_tick_delay: default_min_tick_delay(),
            idle_delay: default_idle_delay(),
            due_poll_interval: default_due_poll_interval(),
            disabled_poll_interval: default_disabled_poll_interval(),
            max_job_runtime: default_max_job_runtime(),
            job_call_timeout: default_job_call_timeout(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            request_timeout: default_backend_request_timeout(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sources_file: default_sources_file(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> AppResult<()> {
        let required = [
            ("tick_budget", self.tick_budget),
            ("min_tick_delay", self.min_tick_delay),
            ("idle_delay", self.idle_delay),
            ("due_poll_interval", self.due_poll_interval),
            ("disabled_poll_interval", self.disabled_poll_interval),
            ("max_job_runtime", self.max_job_runtime),
            ("job_call_timeout", self.job_call_timeout),
        ];

        for (name, value) in required {
            if value.is_zero() {
                return Err(AppError::configuration(format!(
                    "scheduler.{name} must be greater than zero"
                )));
            }
        }

        if self.min_tick_delay > self.tick_budget {
            return Err(AppError::configuration(
                "scheduler.min_tick_delay cannot exceed scheduler.tick_budget",
            ));
        }

        Ok(())
    }
}

impl BackendConfig {
    pub fn validate(&self) -> AppResult<()> {
        Url::parse(&self.base_url).map_err(|e| {
            AppError::configuration(format!("backend.base_url '{}' is invalid: {e}", self.base_url))
        })?;

        if self.request_timeout.is_zero() {
            return Err(AppError::configuration(
                "backend.request_timeout must be greater than zero",
            ));
        }

        Ok(())
    }
}

impl Config {
    /// Load configuration from defaults, an optional TOML file and
    /// `GEOSOURCE_` prefixed environment variables, in that order.
    pub fn load_from_file<P: AsRef<Path>>(config_file: P) -> AppResult<Self> {
        let config_file = config_file.as_ref();
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        if config_file.exists() {
            info!("Loading configuration from {}", config_file.display());
            figment = figment.merge(Toml::file(config_file));
        } else {
            info!(
                "Config file {} not found, using defaults",
                config_file.display()
            );
        }

        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| AppError::configuration(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        self.scheduler.validate()?;
        self.backend.validate()
    }
}
