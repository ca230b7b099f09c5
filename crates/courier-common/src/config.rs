//! Configuration for Courier

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Dispatch engine configuration
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Channel transports
    #[serde(default)]
    pub transport: TransportConfig,

    /// Content variation (AI rewrite) service
    #[serde(default)]
    pub variation: VariationConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Hostname, used in generated Message-IDs
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            bind_address: default_bind_address(),
        }
    }
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database backend: "postgres" or "memory"
    #[serde(default = "default_db_backend")]
    pub backend: String,

    /// Database URL (for postgres)
    pub url: Option<String>,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_db_backend(),
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }
}

fn default_db_backend() -> String {
    "postgres".to_string()
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    2
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API port
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Shared secret for provider webhook signatures (HMAC-SHA256)
    pub webhook_secret: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
            webhook_secret: None,
        }
    }
}

fn default_api_port() -> u16 {
    8080
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level, used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Dispatch engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Supervisor tick interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Tenant-local offset from UTC in minutes, defines "today" and business hours
    #[serde(default)]
    pub utc_offset_minutes: i32,

    /// First local hour of the business-hours window (inclusive)
    #[serde(default = "default_business_hours_start")]
    pub business_hours_start: u32,

    /// Last local hour of the business-hours window (exclusive)
    #[serde(default = "default_business_hours_end")]
    pub business_hours_end: u32,

    /// ISO weekday numbers (1 = Monday .. 7 = Sunday) counted as business days
    #[serde(default = "default_business_days")]
    pub business_days: Vec<u32>,

    /// Timeout for one content variation call in milliseconds
    #[serde(default = "default_variation_timeout")]
    pub variation_timeout_ms: u64,

    /// Age after which a PENDING reservation is considered abandoned
    #[serde(default = "default_stale_reservation")]
    pub stale_reservation_secs: u64,

    /// Base backoff after a provider rate-limit response
    #[serde(default = "default_rate_limit_backoff")]
    pub rate_limit_backoff_secs: u64,

    /// Rate-limited retries of the same recipient before it is recorded FAILED
    #[serde(default = "default_max_rate_limit_retries")]
    pub max_rate_limit_retries: u32,

    /// Delay before a worker that stopped on a storage error is restarted
    #[serde(default = "default_restart_backoff")]
    pub restart_backoff_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            utc_offset_minutes: 0,
            business_hours_start: default_business_hours_start(),
            business_hours_end: default_business_hours_end(),
            business_days: default_business_days(),
            variation_timeout_ms: default_variation_timeout(),
            stale_reservation_secs: default_stale_reservation(),
            rate_limit_backoff_secs: default_rate_limit_backoff(),
            max_rate_limit_retries: default_max_rate_limit_retries(),
            restart_backoff_secs: default_restart_backoff(),
        }
    }
}

impl DispatchConfig {
    /// Validate value ranges
    pub fn validate(&self) -> crate::Result<()> {
        if self.business_hours_start >= 24 || self.business_hours_end > 24 {
            return Err(crate::Error::Config(
                "business hours must be within 0..24".to_string(),
            ));
        }
        if self.business_hours_start >= self.business_hours_end {
            return Err(crate::Error::Config(
                "business_hours_start must be before business_hours_end".to_string(),
            ));
        }
        if self.business_days.is_empty() || self.business_days.iter().any(|d| !(1..=7).contains(d)) {
            return Err(crate::Error::Config(
                "business_days must be ISO weekday numbers 1..=7".to_string(),
            ));
        }
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(crate::Error::Config("utc_offset_minutes out of range".to_string()));
        }
        Ok(())
    }
}

fn default_poll_interval() -> u64 {
    15
}

fn default_business_hours_start() -> u32 {
    9
}

fn default_business_hours_end() -> u32 {
    18
}

fn default_business_days() -> Vec<u32> {
    vec![1, 2, 3, 4, 5]
}

fn default_variation_timeout() -> u64 {
    8000
}

fn default_stale_reservation() -> u64 {
    900
}

fn default_rate_limit_backoff() -> u64 {
    30
}

fn default_max_rate_limit_retries() -> u32 {
    3
}

fn default_restart_backoff() -> u64 {
    60
}

/// Channel transport configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportConfig {
    /// WhatsApp via the UltraMsg HTTP API
    pub whatsapp: Option<WhatsappConfig>,

    /// Email via SMTP relay
    pub email: Option<EmailConfig>,
}

/// UltraMsg WhatsApp configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsappConfig {
    /// UltraMsg instance id (e.g. "instance12345")
    pub instance_id: String,

    /// UltraMsg API token
    pub token: String,

    /// API base URL
    #[serde(default = "default_ultramsg_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_transport_timeout")]
    pub timeout_secs: u64,
}

fn default_ultramsg_url() -> String {
    "https://api.ultramsg.com".to_string()
}

fn default_transport_timeout() -> u64 {
    30
}

/// SMTP relay configuration for outbound campaign email
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub host: String,

    #[serde(default = "default_smtp_port")]
    pub port: u16,

    pub username: Option<String>,

    pub password: Option<String>,

    /// Implicit TLS
    #[serde(default)]
    pub use_tls: bool,

    /// STARTTLS upgrade
    #[serde(default = "default_use_starttls")]
    pub use_starttls: bool,

    /// Envelope and header sender
    pub from_address: String,

    pub from_name: Option<String>,

    #[serde(default = "default_transport_timeout")]
    pub timeout_secs: u64,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_use_starttls() -> bool {
    true
}

/// Content variation service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariationConfig {
    /// Enable AI variation for campaigns that request it
    #[serde(default)]
    pub enabled: bool,

    /// OpenAI-compatible chat completions endpoint
    #[serde(default = "default_variation_endpoint")]
    pub endpoint: String,

    pub api_key: Option<String>,

    #[serde(default = "default_variation_model")]
    pub model: String,

    /// Sampling temperature for rewrites
    #[serde(default = "default_variation_temperature")]
    pub temperature: f32,
}

impl Default for VariationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_variation_endpoint(),
            api_key: None,
            model: default_variation_model(),
            temperature: default_variation_temperature(),
        }
    }
}

fn default_variation_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_variation_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_variation_temperature() -> f32 {
    0.8
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        config.dispatch.validate()?;

        Ok(config)
    }

    /// Load configuration from `COURIER_CONFIG` or the default locations
    pub fn load() -> crate::Result<Self> {
        if let Ok(path) = std::env::var("COURIER_CONFIG") {
            return Self::from_file(Path::new(&path));
        }

        let paths = [
            PathBuf::from("./courier.toml"),
            PathBuf::from("/etc/courier/courier.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }
}
