//! Configuration management for QAForge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Completion provider configuration
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Resolution pipeline tuning
    #[serde(default)]
    pub resolution: ResolutionConfig,

    /// Answer cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Knowledge and history service endpoints
    #[serde(default)]
    pub collaborators: CollaboratorConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Maximum concurrent requests
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

#[derive(Clone, Deserialize, Serialize)]
pub struct CompletionConfig {
    /// Base URL of the chat completion API (without `/chat/completions`)
    #[serde(default = "default_completion_base_url")]
    pub base_url: String,

    /// Bearer credential
    pub api_key: Option<String>,

    /// Model identifier
    #[serde(default = "default_completion_model")]
    pub model: String,

    /// Maximum output tokens per answer
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-request timeout in seconds
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,

    /// Timeout for the connectivity self-test in seconds
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,
}

// The bearer credential must never reach the logs.
impl fmt::Debug for CompletionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout_secs", &self.timeout_secs)
            .field("ping_timeout_secs", &self.ping_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolutionConfig {
    /// Number of most recent history turns sent with a contextual question
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Expire ready entries after this many seconds (unbounded when unset)
    pub ttl_secs: Option<u64>,

    /// Redis URL of the shared answer tier (disabled when unset)
    pub redis_url: Option<String>,

    /// TTL of answers written to the shared tier
    #[serde(default = "default_redis_ttl")]
    pub redis_ttl_secs: u64,

    /// Give up on the shared tier if connecting takes longer than this
    #[serde(default = "default_redis_connect_timeout")]
    pub redis_connect_timeout_secs: u64,

    /// Key prefix for namespacing
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollaboratorConfig {
    /// Knowledge service base URL (in-memory store when unset)
    pub knowledge_url: Option<String>,

    /// History service base URL (in-memory log when unset)
    pub history_url: Option<String>,

    /// Per-call timeout in seconds
    #[serde(default = "default_collaborator_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name reported in logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second (global)
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_concurrent() -> usize { 100 }
fn default_completion_base_url() -> String { "https://api.deepseek.com/v1".to_string() }
fn default_completion_model() -> String { "deepseek-chat".to_string() }
fn default_max_tokens() -> u32 { 1000 }
fn default_temperature() -> f32 { 0.7 }
fn default_completion_timeout() -> u64 { 60 }
fn default_ping_timeout() -> u64 { 30 }
fn default_max_history_turns() -> usize { 10 }
fn default_redis_ttl() -> u64 { 3600 }
fn default_redis_connect_timeout() -> u64 { 3 }
fn default_key_prefix() -> String { "qaforge".to_string() }
fn default_collaborator_timeout() -> u64 { 5 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "qaforge".to_string() }
fn default_rate_limit() -> u32 { 50 }
fn default_burst() -> u32 { 100 }
fn default_enabled() -> bool { true }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__COMPLETION__API_KEY=sk-...
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

impl CompletionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }

    pub fn redis_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.redis_connect_timeout_secs)
    }
}

impl CollaboratorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            max_concurrent_requests: default_max_concurrent(),
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: default_completion_base_url(),
            api_key: None,
            model: default_completion_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_completion_timeout(),
            ping_timeout_secs: default_ping_timeout(),
        }
    }
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            max_history_turns: default_max_history_turns(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: None,
            redis_url: None,
            redis_ttl_secs: default_redis_ttl(),
            redis_connect_timeout_secs: default_redis_connect_timeout(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            knowledge_url: None,
            history_url: None,
            timeout_secs: default_collaborator_timeout(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}
