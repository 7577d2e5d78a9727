use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_CURRENCY: &str = "USD";
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PAYMENT_EXPIRY_MINUTES: i64 = 30;
const DEFAULT_EXPIRY_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;
const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Payment gateway connection settings.
#[derive(Clone, Debug, Deserialize)]
pub struct GatewayConfig {
    /// "sandbox" runs an in-process gateway; "http" talks to `base_url`.
    #[serde(default = "default_gateway_mode")]
    pub mode: String,

    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,

    /// Bounded timeout for intent creation and status polling.
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            mode: default_gateway_mode(),
            base_url: default_gateway_base_url(),
            timeout_secs: default_gateway_timeout_secs(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,

    /// ISO 4217 code passed to the gateway with every intent.
    #[serde(default = "default_currency")]
    pub currency: String,

    #[serde(default)]
    pub gateway: GatewayConfig,

    /// AWAITING_PAYMENT orders older than this are expired by the sweep.
    #[serde(default = "default_payment_expiry_minutes")]
    pub payment_expiry_minutes: i64,

    #[serde(default = "default_expiry_sweep_interval_secs")]
    pub expiry_sweep_interval_secs: u64,

    /// HMAC secret for inbound webhook signatures; unset disables checks.
    #[serde(default)]
    pub webhook_secret: Option<String>,

    #[serde(default = "default_webhook_tolerance_secs")]
    pub webhook_tolerance_secs: u64,

    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}
fn default_gateway_mode() -> String {
    "sandbox".to_string()
}
fn default_gateway_base_url() -> String {
    "http://localhost:9090".to_string()
}
fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}
fn default_payment_expiry_minutes() -> i64 {
    DEFAULT_PAYMENT_EXPIRY_MINUTES
}
fn default_expiry_sweep_interval_secs() -> u64 {
    DEFAULT_EXPIRY_SWEEP_INTERVAL_SECS
}
fn default_webhook_tolerance_secs() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}
fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_json: false,
            currency: default_currency(),
            gateway: GatewayConfig::default(),
            payment_expiry_minutes: default_payment_expiry_minutes(),
            expiry_sweep_interval_secs: default_expiry_sweep_interval_secs(),
            webhook_secret: None,
            webhook_tolerance_secs: default_webhook_tolerance_secs(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.payment_expiry_minutes <= 0 {
            return Err(ConfigError::Message(
                "payment_expiry_minutes must be positive".into(),
            ));
        }
        if self.gateway.timeout_secs == 0 {
            return Err(ConfigError::Message(
                "gateway.timeout_secs must be positive".into(),
            ));
        }
        if self.currency.len() != 3 {
            return Err(ConfigError::Message(
                "currency must be a 3-letter ISO code".into(),
            ));
        }
        Ok(())
    }
}

/// Loads configuration from `config/default.toml` (optional) with
/// `APP_`-prefixed environment overrides (`APP_GATEWAY__MODE=http`).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let cfg: AppConfig = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?
        .try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}

/// Installs the global tracing subscriber.
pub fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
