use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::core::bluetooth::constants::{
    CONNECT_RETRY_DELAY_MS, CONNECT_TIMEOUT_MS, DEFAULT_FALLBACK_MTU, DEFAULT_MTU,
    DEFERRED_FINALIZE_DELAY_MS, LIVE_CONTROL_PERIOD_MS, MAX_CONNECT_ATTEMPTS,
};
use crate::utils::ensure_directory_exists;

pub const CONFIG_FILE_NAME: &str = "link_config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Overall budget for `connect`, retries included
    pub connect_timeout_ms: u64,

    /// Connection attempts before giving up
    pub connect_attempts: u32,

    /// Pause between two connection attempts
    pub connect_retry_delay_ms: u64,

    /// MTU asked for once services are bound
    pub requested_mtu: u16,

    /// MTU used when the exchange fails
    pub fallback_mtu: u16,

    /// Live controller frame period
    pub live_control_period_ms: u64,

    /// Delay of the cleanup FINALIZE sent after a transfer is stopped
    pub deferred_finalize_delay_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            connect_timeout_ms: CONNECT_TIMEOUT_MS,
            connect_attempts: MAX_CONNECT_ATTEMPTS,
            connect_retry_delay_ms: CONNECT_RETRY_DELAY_MS,
            requested_mtu: DEFAULT_MTU,
            fallback_mtu: DEFAULT_FALLBACK_MTU,
            live_control_period_ms: LIVE_CONTROL_PERIOD_MS,
            deferred_finalize_delay_ms: DEFERRED_FINALIZE_DELAY_MS,
        }
    }
}

impl LinkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }

    pub fn live_control_period(&self) -> Duration {
        Duration::from_millis(self.live_control_period_ms)
    }

    pub fn deferred_finalize_delay(&self) -> Duration {
        Duration::from_millis(self.deferred_finalize_delay_ms)
    }

    /// Loads the config from `config_dir`, or the defaults if there is no file yet.
    pub async fn load_config(config_dir: &Path) -> Result<Self> {
        let file_path = config_dir.join(CONFIG_FILE_NAME);

        if !file_path.exists() {
            warn!("Config file not found at {:?}, using default.", file_path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(&file_path).await?;
        let config: Self = serde_json::from_str(&config_json)?;
        config.validate()?;

        info!("Config loaded from {:?}", file_path);
        Ok(config)
    }

    /// Saves the config into `config_dir`, creating the directory if needed.
    pub async fn save_config(&self, config_dir: &Path) -> Result<()> {
        ensure_directory_exists(config_dir).await?;
        let file_path = config_dir.join(CONFIG_FILE_NAME);

        let config_json = match serde_json::to_string_pretty(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize link config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(&file_path, config_json).await?;

        info!("Link config saved to {:?}.", file_path);
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.connect_attempts == 0 {
            anyhow::bail!("connect_attempts must be at least 1");
        }
        if self.requested_mtu < 2 || self.fallback_mtu < 2 {
            anyhow::bail!("MTU values must be at least 2");
        }
        if self.live_control_period_ms == 0 {
            anyhow::bail!("live_control_period_ms must be positive");
        }
        Ok(())
    }
}
