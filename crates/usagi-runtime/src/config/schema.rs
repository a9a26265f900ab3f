//! Configuration schema definitions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use usagi_core::{ChainSettings, RenderImage};
use usagi_transport::{GatewayConfig, ReconnectConfig};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UsagiConfig {
    /// Gateway connection settings.
    #[serde(default)]
    pub gateway: GatewaySection,

    /// Outbound chain settings.
    #[serde(default)]
    pub chain: ChainSection,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Gateway connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySection {
    /// WebSocket base URL of the gateway.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// HTTP base URL for media uploads and roster reads.
    #[serde(default = "default_http_url")]
    pub http_url: String,

    /// Verify key configured on the gateway.
    #[serde(default)]
    pub verify_key: String,

    /// Bot account the session binds to.
    #[serde(default)]
    pub account: i64,

    /// Auto-reconnect on disconnection.
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    /// Deadline for correlated command replies, in seconds.
    #[serde(default = "default_api_timeout_secs")]
    pub api_timeout_secs: u64,

    /// Reconnection backoff policy.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            http_url: default_http_url(),
            verify_key: String::new(),
            account: 0,
            auto_reconnect: default_auto_reconnect(),
            api_timeout_secs: default_api_timeout_secs(),
            retry: RetryConfig::default(),
        }
    }
}

impl GatewaySection {
    /// Converts to the transport-layer gateway config.
    pub fn to_gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            url: self.ws_url.clone(),
            verify_key: self.verify_key.clone(),
            account: self.account,
            auto_reconnect: self.auto_reconnect,
            reconnect: self.retry.to_reconnect_config(),
            api_timeout: Duration::from_secs(self.api_timeout_secs),
        }
    }
}

fn default_ws_url() -> String {
    "ws://127.0.0.1:8080".to_string()
}

fn default_http_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_api_timeout_secs() -> u64 {
    30
}

/// Reconnection backoff policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts; `None` retries forever.
    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Initial delay between retries in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: None,
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Converts to the transport-layer reconnect policy.
    pub fn to_reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.backoff_multiplier,
            max_retries: self.max_retries,
        }
    }
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

/// Outbound chain settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSection {
    /// Text at or beyond this length is converted to a card image.
    #[serde(default = "default_convert_length")]
    pub convert_length: usize,

    /// Card canvas width in pixels.
    #[serde(default = "default_image_width")]
    pub image_width: u32,

    /// Card inner padding in pixels.
    #[serde(default = "default_padding")]
    pub padding: u32,

    /// Card background color, `#RRGGBB`.
    #[serde(default = "default_background")]
    pub background: String,

    /// Optional watermark image placed on every rendered card.
    #[serde(default)]
    pub logo_path: Option<PathBuf>,

    /// Watermark square size in pixels.
    #[serde(default = "default_logo_size")]
    pub logo_size: u32,
}

impl Default for ChainSection {
    fn default() -> Self {
        Self {
            convert_length: default_convert_length(),
            image_width: default_image_width(),
            padding: default_padding(),
            background: default_background(),
            logo_path: None,
            logo_size: default_logo_size(),
        }
    }
}

impl ChainSection {
    /// Converts to the core chain settings.
    pub fn to_settings(&self) -> ChainSettings {
        let logo = self.logo_path.clone().map(|path| RenderImage {
            source: path.into(),
            size: self.logo_size,
            // Bottom-right corner, offset by the logo's own size.
            pos: (-(self.logo_size as i32), -(self.logo_size as i32)),
        });
        ChainSettings {
            convert_length: self.convert_length,
            image_width: self.image_width,
            padding: self.padding,
            background: self.background.clone(),
            logo,
        }
    }
}

fn default_convert_length() -> usize {
    100
}

fn default_image_width() -> u32 {
    700
}

fn default_padding() -> u32 {
    10
}

fn default_background() -> String {
    "#F5F5F5".to_string()
}

fn default_logo_size() -> u32 {
    60
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Log file path; `None` logs to stdout only.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Per-module level overrides, e.g. `usagi_transport = "trace"`.
    #[serde(default)]
    pub filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            file_path: None,
            filters: HashMap::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Compact single-line output.
    #[default]
    Compact,
    /// Standard `tracing` full format.
    Full,
    /// Multi-line human-oriented output.
    Pretty,
    /// Newline-delimited JSON (requires the `json-log` feature).
    #[cfg(feature = "json-log")]
    Json,
}
