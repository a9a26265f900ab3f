//! Configuration loader using figment.
//!
//! Sources are layered, later ones overriding earlier ones:
//!
//! 1. Built-in defaults
//! 2. Config file (`usagi.toml` / `config.toml`, searched in the current
//!    directory and the user config directory)
//! 3. Environment variables (`USAGI_*`)
//!
//! Environment variables use the `USAGI_` prefix with `__` as separator:
//!
//! - `USAGI_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `USAGI_GATEWAY__VERIFY_KEY=xxx` → `gateway.verify_key = "xxx"`

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Serialized};
#[cfg(feature = "toml-config")]
use figment::providers::{Format, Toml};
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::UsagiConfig;

/// Configuration loader with figment-based multi-source support.
///
/// # Example
///
/// ```rust,ignore
/// let config = ConfigLoader::new()
///     .file("usagi.toml")
///     .load()?;
/// ```
pub struct ConfigLoader {
    /// Base figment instance for programmatic overrides.
    figment: Figment,
    /// Search paths for configuration files.
    search_paths: Vec<PathBuf>,
    /// Whether to load environment variables.
    load_env: bool,
    /// Specific config file to load (overrides search).
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a new configuration loader with defaults.
    pub fn new() -> Self {
        Self {
            figment: Figment::new(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Sets a specific configuration file to load.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges additional configuration programmatically.
    pub fn merge(mut self, config: UsagiConfig) -> Self {
        self.figment = self.figment.merge(Serialized::defaults(config));
        self
    }

    /// Loads and returns the configuration.
    pub fn load(self) -> ConfigResult<UsagiConfig> {
        let figment = self.build_figment()?;

        let config: UsagiConfig = figment
            .extract()
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        if config.gateway.account == 0 {
            warn!("gateway.account is not set; the gateway handshake will fail");
        }
        debug!(
            account = config.gateway.account,
            level = %config.logging.level,
            "configuration loaded"
        );

        Ok(config)
    }

    fn build_figment(mut self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(UsagiConfig::default()));

        let user_figment = std::mem::take(&mut self.figment);
        figment = figment.merge(user_figment);

        if let Some(path) = &self.config_file {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
            info!(path = %path.display(), "loading configuration file");
            figment = Self::merge_config_file(figment, path)?;
        } else {
            figment = self.load_config_files(figment);
        }

        if self.load_env {
            trace!("loading environment variables with USAGI_ prefix");
            figment = figment.merge(
                Env::prefixed("USAGI_")
                    .split("__")
                    .map(|key| key.as_str().replace("__", ".").into()),
            );
        }

        Ok(figment)
    }

    /// Merges a single config file into the figment, dispatching on extension.
    fn merge_config_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            #[cfg(feature = "toml-config")]
            "toml" => Ok(figment.merge(Toml::file(path))),
            _ => Err(ConfigError::Parse(format!(
                "unsupported or disabled configuration file format: .{ext}"
            ))),
        }
    }

    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        let mut paths = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd);
        }
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("usagi"));
        }
        paths
    }

    /// Searches for and loads the first configuration file found.
    fn load_config_files(&self, mut figment: Figment) -> Figment {
        #[cfg(feature = "toml-config")]
        for search_path in self.resolve_search_paths() {
            for base_name in ["usagi.toml", "config.toml"] {
                let path = search_path.join(base_name);
                if path.exists() {
                    info!(path = %path.display(), "loading configuration file");
                    return figment.merge(Toml::file(path));
                }
            }
        }
        warn!("no configuration file found, using defaults");
        figment
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_sources() {
        let config = ConfigLoader::new()
            .search_path("/nonexistent")
            .without_env()
            .load()
            .unwrap();

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.chain.convert_length, 100);
        assert!(config.gateway.auto_reconnect);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = ConfigLoader::new()
            .file("/nonexistent/usagi.toml")
            .without_env()
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn programmatic_merge_overrides_defaults() {
        let mut overrides = UsagiConfig::default();
        overrides.gateway.account = 123456;
        overrides.chain.convert_length = 60;

        let config = ConfigLoader::new()
            .search_path("/nonexistent")
            .without_env()
            .merge(overrides)
            .load()
            .unwrap();

        assert_eq!(config.gateway.account, 123456);
        assert_eq!(config.chain.convert_length, 60);
    }
}
