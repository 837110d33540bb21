use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

/// Broker configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    /// Maximum events retained per session (default: 10000)
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
    /// Result cap for `recent_since` queries (default: 100)
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,
    /// Buffered diagnostic notices per receiver (default: 1024)
    #[serde(default = "default_notice_capacity")]
    pub notice_capacity: usize,
}

fn default_history_cap() -> usize {
    10_000
}

fn default_recent_limit() -> usize {
    100
}

fn default_notice_capacity() -> usize {
    1024
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            history_cap: default_history_cap(),
            recent_limit: default_recent_limit(),
            notice_capacity: default_notice_capacity(),
        }
    }
}

impl BrokerSettings {
    pub fn load() -> Result<Self, ConfigError> {
        // A missing .env file is fine
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with defaults
            .add_source(File::with_name("config/default").required(false))
            // Add environment-specific file
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local configuration file (not tracked by git)
            .add_source(File::with_name("config/local").required(false))
            // Add in settings from environment variables (with prefix COLLAB_BUS)
            .add_source(
                Environment::with_prefix("COLLAB_BUS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }
}
