/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
use std::time::Duration;

// Scheduler timing defaults
pub const DEFAULT_TICK_BUDGET: Duration = Duration::from_secs(60);
pub const DEFAULT_MIN_TICK_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_IDLE_DELAY: Duration = Duration::from_secs(300);
pub const DEFAULT_DUE_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_DISABLED_POLL_INTERVAL: Duration = Duration::from_secs(600);

// Execution guard defaults
pub const DEFAULT_MAX_JOB_RUNTIME: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_JOB_CALL_TIMEOUT: Duration = Duration::from_secs(10);

// Job backend defaults
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000/";
pub const DEFAULT_BACKEND_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// Source store defaults
pub const DEFAULT_SOURCES_FILE: &str = "./sources.toml";

// Environment overrides, e.g. GEOSOURCE_SCHEDULER__TICK_BUDGET=30s
pub const ENV_PREFIX: &str = "GEOSOURCE_";
