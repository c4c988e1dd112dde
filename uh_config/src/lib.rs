//! ABOUTME: Configuration management with validation and environment loading
//! ABOUTME: Handles all application settings from environment variables and files

use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use uh_core::{Error, Result};
use validator::Validate;

/// Main configuration struct
#[derive(Debug, Clone, Deserialize, Serialize, Validate, Default)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub database: DatabaseConfig,
    #[validate(nested)]
    pub broker: BrokerConfig,
    #[validate(nested)]
    pub hub: HubConfig,
    #[validate(nested)]
    pub cache: CacheConfig,
    #[validate(nested)]
    pub publish: PublishConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1, max = 65535))]
    pub port: u16,
    #[validate(range(min = 1, max = 65535))]
    pub obs_port: u16,
    /// `production` switches logs to JSON
    pub environment: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            obs_port: 9000,
            environment: "development".to_string(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct DatabaseConfig {
    #[validate(length(min = 1))]
    pub path: String,
    #[validate(range(min = 1, max = 100))]
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "userhub.db".to_string(),
            pool_size: 10,
        }
    }
}

/// What the consumer does with a message it cannot decode
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPolicyConfig {
    /// Log, acknowledge and discard
    #[default]
    Drop,
    /// Republish the raw bytes to the dead-letter routing key
    DeadLetter,
}

/// Broker topology: one exchange, one queue per event category
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct BrokerConfig {
    #[validate(length(min = 1))]
    pub exchange: String,
    #[validate(length(min = 1))]
    pub created_queue: String,
    #[validate(length(min = 1))]
    pub created_routing_key: String,
    #[validate(length(min = 1))]
    pub failed_queue: String,
    #[validate(length(min = 1))]
    pub failed_routing_key: String,
    pub malformed_policy: MalformedPolicyConfig,
    #[validate(length(min = 1))]
    pub dead_letter_queue: String,
    #[validate(length(min = 1))]
    pub dead_letter_routing_key: String,
    /// Per-queue cap; the oldest messages are discarded beyond it
    #[validate(range(min = 1, max = 1000000))]
    pub max_queue_depth: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            exchange: "user.exchange".to_string(),
            created_queue: "user.created.queue".to_string(),
            created_routing_key: "user.created".to_string(),
            failed_queue: "user.creation.failed.queue".to_string(),
            failed_routing_key: "user.created.failed".to_string(),
            malformed_policy: MalformedPolicyConfig::Drop,
            dead_letter_queue: "user.events.dead".to_string(),
            dead_letter_routing_key: "user.events.dead".to_string(),
            max_queue_depth: 10000,
        }
    }
}

/// Fan-out hub and live stream settings
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct HubConfig {
    /// Upper bound on a single push to one subscriber
    #[validate(range(min = 1, max = 60000))]
    pub send_timeout_ms: u64,
    /// Events buffered per subscriber before pushes start waiting
    #[validate(range(min = 1, max = 10000))]
    pub subscriber_buffer: usize,
    /// Maximum lifetime of one SSE connection
    #[validate(range(min = 1, max = 86400))]
    pub stream_timeout_secs: u64,
    #[validate(range(min = 1, max = 3600))]
    pub keepalive_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: 1000,
            subscriber_buffer: 32,
            stream_timeout_secs: 1800,
            keepalive_secs: 15,
        }
    }
}

/// User-by-email cache settings
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct CacheConfig {
    #[validate(range(min = 1, max = 1000000))]
    pub max_entries: usize,
    #[validate(range(min = 1, max = 86400))]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            ttl_secs: 300, // 5 min
        }
    }
}

/// Caller-side retry for event publishing
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct PublishConfig {
    #[validate(range(max = 10))]
    pub max_retries: u32,
    #[validate(range(min = 1, max = 60000))]
    pub initial_delay_ms: u64,
    #[validate(range(min = 1, max = 300000))]
    pub max_delay_ms: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

/// Environment variables whose keys contain underscores and so cannot go
/// through the `_` separated environment source.
const UNDERSCORE_OVERRIDES: &[(&str, &str)] = &[
    ("USERHUB_SERVER_OBS_PORT", "server.obs_port"),
    ("USERHUB_DATABASE_POOL_SIZE", "database.pool_size"),
    ("USERHUB_BROKER_CREATED_QUEUE", "broker.created_queue"),
    ("USERHUB_BROKER_CREATED_ROUTING_KEY", "broker.created_routing_key"),
    ("USERHUB_BROKER_FAILED_QUEUE", "broker.failed_queue"),
    ("USERHUB_BROKER_FAILED_ROUTING_KEY", "broker.failed_routing_key"),
    ("USERHUB_BROKER_MALFORMED_POLICY", "broker.malformed_policy"),
    ("USERHUB_BROKER_DEAD_LETTER_QUEUE", "broker.dead_letter_queue"),
    ("USERHUB_BROKER_DEAD_LETTER_ROUTING_KEY", "broker.dead_letter_routing_key"),
    ("USERHUB_BROKER_MAX_QUEUE_DEPTH", "broker.max_queue_depth"),
    ("USERHUB_HUB_SEND_TIMEOUT_MS", "hub.send_timeout_ms"),
    ("USERHUB_HUB_SUBSCRIBER_BUFFER", "hub.subscriber_buffer"),
    ("USERHUB_HUB_STREAM_TIMEOUT_SECS", "hub.stream_timeout_secs"),
    ("USERHUB_HUB_KEEPALIVE_SECS", "hub.keepalive_secs"),
    ("USERHUB_CACHE_MAX_ENTRIES", "cache.max_entries"),
    ("USERHUB_CACHE_TTL_SECS", "cache.ttl_secs"),
    ("USERHUB_PUBLISH_MAX_RETRIES", "publish.max_retries"),
    ("USERHUB_PUBLISH_INITIAL_DELAY_MS", "publish.initial_delay_ms"),
    ("USERHUB_PUBLISH_MAX_DELAY_MS", "publish.max_delay_ms"),
];

impl Config {
    /// Load configuration from environment variables and optional .env file
    pub fn load() -> Result<Self> {
        let defaults = Config::default();
        let mut builder = ConfigBuilder::builder();

        builder = builder
            .set_default("server.host", defaults.server.host)?
            .set_default("server.port", defaults.server.port as i64)?
            .set_default("server.obs_port", defaults.server.obs_port as i64)?
            .set_default("server.environment", defaults.server.environment)?
            .set_default("database.path", defaults.database.path)?
            .set_default("database.pool_size", defaults.database.pool_size as i64)?
            .set_default("broker.exchange", defaults.broker.exchange)?;

        for (var, key) in UNDERSCORE_OVERRIDES {
            if let Ok(value) = std::env::var(var) {
                builder = builder.set_override(*key, value)?;
            }
        }

        if std::path::Path::new(".env").exists() {
            builder = builder.add_source(File::with_name(".env").required(false));
        }

        // Environment variables with USERHUB_ prefix (highest priority)
        builder = builder.add_source(
            Environment::with_prefix("USERHUB")
                .try_parsing(true)
                .separator("_"),
        );

        let config = builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to build config: {}", e)))?;

        let parsed: Config = config
            .try_deserialize()
            .map_err(|e| Error::Config(format!("Failed to deserialize config: {}", e)))?;

        parsed
            .validate()
            .map_err(|e| Error::Config(format!("Config validation failed: {}", e)))?;

        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "USERHUB_SERVER_HOST",
            "USERHUB_SERVER_PORT",
            "USERHUB_DATABASE_PATH",
            "USERHUB_DATABASE_POOL_SIZE",
            "USERHUB_HUB_SEND_TIMEOUT_MS",
            "USERHUB_BROKER_MALFORMED_POLICY",
            "USERHUB_BROKER_CREATED_ROUTING_KEY",
            "USERHUB_BROKER_FAILED_ROUTING_KEY",
            "USERHUB_BROKER_DEAD_LETTER_ROUTING_KEY",
            "USERHUB_PUBLISH_INITIAL_DELAY_MS",
            "USERHUB_PUBLISH_MAX_DELAY_MS",
            "USERHUB_BROKER_MAX_QUEUE_DEPTH",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn test_config_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();

        let config = Config::load().expect("Should load with defaults");

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.path, "userhub.db");
        assert_eq!(config.broker.exchange, "user.exchange");
        assert_eq!(config.broker.created_routing_key, "user.created");
        assert_eq!(config.broker.failed_routing_key, "user.created.failed");
        assert_eq!(config.broker.malformed_policy, MalformedPolicyConfig::Drop);
        assert_eq!(config.hub.send_timeout_ms, 1000);
    }

    #[test]
    fn test_config_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();

        env::set_var("USERHUB_SERVER_HOST", "0.0.0.0");
        env::set_var("USERHUB_SERVER_PORT", "9100");
        env::set_var("USERHUB_HUB_SEND_TIMEOUT_MS", "250");
        env::set_var("USERHUB_BROKER_MALFORMED_POLICY", "dead_letter");
        env::set_var("USERHUB_BROKER_CREATED_ROUTING_KEY", "custom.created");
        env::set_var("USERHUB_BROKER_FAILED_ROUTING_KEY", "custom.failed");
        env::set_var("USERHUB_BROKER_DEAD_LETTER_ROUTING_KEY", "dlq.key");
        env::set_var("USERHUB_PUBLISH_INITIAL_DELAY_MS", "7");
        env::set_var("USERHUB_PUBLISH_MAX_DELAY_MS", "5000");
        env::set_var("USERHUB_BROKER_MAX_QUEUE_DEPTH", "50");

        let config = Config::load().expect("Should load from env");

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.hub.send_timeout_ms, 250);
        assert_eq!(
            config.broker.malformed_policy,
            MalformedPolicyConfig::DeadLetter
        );
        assert_eq!(config.broker.created_routing_key, "custom.created");
        assert_eq!(config.broker.failed_routing_key, "custom.failed");
        assert_eq!(config.broker.dead_letter_routing_key, "dlq.key");
        assert_eq!(config.publish.initial_delay_ms, 7);
        assert_eq!(config.publish.max_delay_ms, 5000);
        assert_eq!(config.broker.max_queue_depth, 50);

        clear_env();
    }

    #[test]
    fn test_config_validation_failure() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();

        env::set_var("USERHUB_DATABASE_POOL_SIZE", "200"); // too big

        let result = Config::load();
        assert!(result.is_err());

        clear_env();
    }

    #[test]
    fn test_zero_send_timeout_rejected() {
        let mut config = Config::default();
        config.hub.send_timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
