use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::time::Duration;

use crate::engine::PollConfig;
use crate::negotiation::{NegotiationCategory, Origin};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// Per-message transport traces (the `WIRE` target)
    #[serde(default)]
    pub enable_wire_trace: bool,
    /// Side of the negotiation this client plays
    pub local_role: Origin,
    /// Node id embedded in generated transaction ids
    #[serde(default = "default_node_id")]
    pub node_id: u8,
    pub categories: Vec<CategoryConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CategoryConfig {
    pub category: NegotiationCategory,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub poll_jitter_ms: u64,
    /// Reading a notification of this category also acknowledges it
    #[serde(default)]
    pub auto_acknowledge: bool,
}

fn default_node_id() -> u8 {
    1
}

fn default_initial_delay_ms() -> u64 {
    5_000
}

fn default_poll_interval_ms() -> u64 {
    30_000
}

impl CategoryConfig {
    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            interval: Duration::from_millis(self.poll_interval_ms),
            jitter: Duration::from_millis(self.poll_jitter_ms),
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("Invalid config file: {}", config_path))
    }

    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(content).context("Failed to parse config yaml")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.categories.is_empty() {
            bail!("at least one negotiation category must be configured");
        }

        let mut seen = HashSet::new();
        for category in &self.categories {
            if !seen.insert(category.category) {
                bail!("category {} configured more than once", category.category);
            }
            if category.poll_interval_ms == 0 {
                bail!("poll_interval_ms for {} must be positive", category.category);
            }
        }
        Ok(())
    }

    pub fn category(&self, category: NegotiationCategory) -> Option<&CategoryConfig> {
        self.categories.iter().find(|c| c.category == category)
    }
}
