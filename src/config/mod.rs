//! Configuration management for RateBridge
//!
//! Loads from YAML files + environment variables via .env

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub feeds: FeedsConfig,
    /// Subscribers to start at boot; each one owns a collector instance.
    #[serde(default)]
    pub subscribers: Vec<SubscriberConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Path to the derivation formula document
    pub formulas_path: String,
    /// Anchor currencies tried for cross rates, in order
    pub anchors: Vec<String>,
    /// Sink backend tag ("log" or "memory")
    pub sink: String,
    /// Per-subscriber event channel capacity
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedsConfig {
    pub line: LineFeedConfig,
    pub rest: RestFeedConfig,
}

/// Persistent line-protocol feed endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct LineFeedConfig {
    pub host: String,
    pub port: u16,
    /// Connection establishment timeout in milliseconds
    pub connect_timeout_ms: u64,
}

/// REST polling feed endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct RestFeedConfig {
    pub base_url: String,
    /// Sleep between polling cycles in milliseconds
    pub poll_interval_ms: u64,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
}

/// One configured subscription: which platform, which transport, which rates.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriberConfig {
    pub id: String,
    pub platform: String,
    /// Collector kind tag resolved through the registry ("line" or "rest")
    pub kind: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub rates: Vec<String>,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Pipeline defaults
            .set_default("pipeline.formulas_path", "config/formulas.json")?
            .set_default("pipeline.anchors", vec!["USD"])?
            .set_default("pipeline.sink", "log")?
            .set_default("pipeline.channel_capacity", 256)?
            // Line feed defaults
            .set_default("feeds.line.host", "localhost")?
            .set_default("feeds.line.port", 5001)?
            .set_default("feeds.line.connect_timeout_ms", 5000)?
            // REST feed defaults
            .set_default("feeds.rest.base_url", "http://localhost:8080")?
            .set_default("feeds.rest.poll_interval_ms", 2000)?
            .set_default("feeds.rest.request_timeout_ms", 2000)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (RATEBRIDGE_*)
            .add_source(Environment::with_prefix("RATEBRIDGE").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(app_config)
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "anchors={:?} sink={} subscribers={} formulas={}",
            self.pipeline.anchors,
            self.pipeline.sink,
            self.subscribers.len(),
            self.pipeline.formulas_path
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_has_no_credentials() {
        let cfg = AppConfig {
            pipeline: PipelineConfig {
                formulas_path: "config/formulas.json".to_string(),
                anchors: vec!["USD".to_string()],
                sink: "log".to_string(),
                channel_capacity: 256,
            },
            feeds: FeedsConfig {
                line: LineFeedConfig {
                    host: "localhost".to_string(),
                    port: 5001,
                    connect_timeout_ms: 5000,
                },
                rest: RestFeedConfig {
                    base_url: "http://localhost:8080".to_string(),
                    poll_interval_ms: 2000,
                    request_timeout_ms: 2000,
                },
            },
            subscribers: vec![SubscriberConfig {
                id: "subscriber1".to_string(),
                platform: "PF1".to_string(),
                kind: "line".to_string(),
                user: "user1".to_string(),
                password: "hunter2".to_string(),
                rates: vec!["PF1_USDTRY".to_string()],
            }],
        };
        let digest = cfg.digest();
        assert!(digest.contains("subscribers=1"));
        assert!(!digest.contains("hunter2"));
    }
}
