//! Hive configuration.
//!
//! Loaded from environment variables with sensible defaults, optionally
//! overlaid with a JSON configuration file (`HIVE_CONFIG_FILE`) for the
//! settings that operators tune per deployment.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::profiler::DEFAULT_PALETTE;

/// Configuration for one hive.
#[derive(Debug, Clone)]
pub struct HiveConfig {
    /// SQLite or MySQL connection URL.
    pub database_url: String,

    /// Cap on workers submitted per scheduling round; `None` is unlimited.
    pub submit_workers_max: Option<i64>,

    /// Meadow type used by analyses that do not pin one.
    pub default_meadow_type: String,

    /// Age after which a held sync lock is considered abandoned.
    pub sync_lock_timeout_secs: i64,

    /// Root directory for per-worker log directories; `None` disables
    /// worker logging.
    pub worker_log_root: Option<PathBuf>,

    /// Beekeeper round interval.
    pub beekeeper_interval: Duration,

    /// Chart colours for the activity profiler.
    pub palette: Vec<String>,
}

/// Operator-tunable overrides from `HIVE_CONFIG_FILE`.
#[derive(Debug, Clone, Default, Deserialize)]
struct HiveConfigFile {
    #[serde(default)]
    submit_workers_max: Option<i64>,
    #[serde(default)]
    default_meadow_type: Option<String>,
    #[serde(default)]
    palette: Option<Vec<String>>,
}

impl HiveConfig {
    /// A configuration with defaults for everything but the database URL.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            submit_workers_max: Some(50),
            default_meadow_type: "LOCAL".to_string(),
            sync_lock_timeout_secs: 600,
            worker_log_root: None,
            beekeeper_interval: Duration::from_secs(60),
            palette: DEFAULT_PALETTE.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Load configuration from environment variables, then overlay the
    /// optional JSON config file.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("HIVE_DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("HIVE_DATABASE_URL must be set"))?;
        let mut config = Self::new(database_url);

        if let Ok(value) = std::env::var("HIVE_SUBMIT_WORKERS_MAX") {
            config.submit_workers_max = Some(value.parse()?);
        }
        if let Ok(value) = std::env::var("HIVE_DEFAULT_MEADOW_TYPE") {
            config.default_meadow_type = value;
        }
        if let Ok(value) = std::env::var("HIVE_SYNC_LOCK_TIMEOUT_SECS") {
            config.sync_lock_timeout_secs = value.parse()?;
        }
        if let Ok(value) = std::env::var("HIVE_WORKER_LOG_ROOT") {
            if !value.is_empty() {
                config.worker_log_root = Some(PathBuf::from(value));
            }
        }
        if let Ok(value) = std::env::var("HIVE_BEEKEEPER_INTERVAL_SECS") {
            config.beekeeper_interval = Duration::from_secs(value.parse()?);
        }

        if let Ok(path) = std::env::var("HIVE_CONFIG_FILE") {
            let contents = std::fs::read_to_string(&path)
                .map_err(|err| anyhow::anyhow!("cannot read {path}: {err}"))?;
            let overlay: HiveConfigFile = serde_json::from_str(&contents)
                .map_err(|err| anyhow::anyhow!("cannot parse {path}: {err}"))?;
            if overlay.submit_workers_max.is_some() {
                config.submit_workers_max = overlay.submit_workers_max;
            }
            if let Some(meadow_type) = overlay.default_meadow_type {
                config.default_meadow_type = meadow_type;
            }
            if let Some(palette) = overlay.palette {
                if !palette.is_empty() {
                    config.palette = palette;
                }
            }
        }

        Ok(config)
    }
}
