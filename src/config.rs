use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Default location of the configuration file
pub const CONFIG_PATH: &str = "data/automod.yaml";

/// Engine and bot configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomodConfig {
    /// Directory holding the YAML snapshots of the store
    pub data_dir: String,
    /// Deepest recursion counter still evaluated by violation cascades
    pub recursion_limit: u32,
    pub slowmode_cooldown_secs: u64,
    pub delete_delay_ms: u64,
    pub trigger_timeout_secs: u64,
    pub effect_timeout_secs: u64,
    /// Triggered-rule log rows kept per guild
    pub triggered_log_limit: usize,
    /// Recent messages requested for history-based triggers
    pub history_limit: usize,
    pub scheduler_interval_secs: u64,
    pub save_interval_secs: u64,
    pub safe_browsing_api_key: Option<String>,
}

impl Default for AutomodConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            recursion_limit: 2,
            slowmode_cooldown_secs: 10,
            delete_delay_ms: 500,
            trigger_timeout_secs: 5,
            effect_timeout_secs: 10,
            triggered_log_limit: 200,
            history_limit: 500,
            scheduler_interval_secs: 15,
            save_interval_secs: 60,
            safe_browsing_api_key: None,
        }
    }
}

impl AutomodConfig {
    /// Load the configuration, falling back to defaults when the file is missing or invalid
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let mut config = match tokio::fs::read_to_string(path).await {
            Ok(content) => match serde_yaml::from_str::<Self>(&content) {
                Ok(config) => {
                    info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Invalid configuration in {}: {e}, using defaults", path.display());
                    Self::default()
                }
            },
            Err(_) => {
                info!("No configuration at {}, using defaults", path.display());
                Self::default()
            }
        };

        if let Ok(key) = std::env::var("SAFE_BROWSING_API_KEY") {
            if !key.is_empty() {
                config.safe_browsing_api_key = Some(key);
            }
        }
        config
    }

    pub fn slowmode_cooldown(&self) -> Duration {
        Duration::from_secs(self.slowmode_cooldown_secs)
    }

    pub fn delete_delay(&self) -> Duration {
        Duration::from_millis(self.delete_delay_ms)
    }

    pub fn trigger_timeout(&self) -> Duration {
        Duration::from_secs(self.trigger_timeout_secs)
    }

    pub fn effect_timeout(&self) -> Duration {
        Duration::from_secs(self.effect_timeout_secs)
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_secs.max(1))
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs.max(1))
    }
}
