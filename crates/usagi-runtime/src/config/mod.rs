//! Configuration module for the usagi runtime.
//!
//! TOML-based configuration loading with environment overrides for the
//! gateway connection, outbound chain settings, and logging.

pub mod error;
pub mod loader;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use schema::{
    ChainSection, GatewaySection, LogFormat, LoggingConfig, RetryConfig, UsagiConfig,
};
