//! Configuration for azcollection
//!
//! Handles loading and merging configuration from multiple sources:
//! - Default values
//! - System configuration (/etc/azcollection/config.toml)
//! - User configuration (~/.azcollection.toml)
//! - Project configuration (./azcollection.toml)
//! - Environment variables (`AZCOLLECTION_*`)
//!
//! Files are merged key by key, so a later file only needs the settings it changes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cloud and credential defaults
    pub azure: AzureConfig,

    /// HTTP transport settings
    pub http: HttpConfig,

    /// Long-running operation and eventual-consistency polling
    pub polling: PollingConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

/// Cloud and credential defaults; module parameters override these.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureConfig {
    /// `AzureCloud`, `AzureChinaCloud` or `AzureUSGovernment`
    pub cloud_environment: Option<String>,

    /// Override for the Resource Manager endpoint
    pub management_endpoint: Option<String>,

    /// Override for the Azure AD authority host
    pub authority_host: Option<String>,

    /// Path of the INI credentials file (default `~/.azure/credentials`)
    pub credentials_file: Option<PathBuf>,

    /// Default credentials file profile
    pub profile: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Retries for throttled or failed requests
    pub max_retries: u32,

    /// First backoff delay; doubles on each retry
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_retries: 4,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(20),
            timeout: Duration::from_secs(600),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level when no `-v` flag or `RUST_LOG` is given
    pub level: String,

    /// `text` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut merged = serde_json::to_value(Config::default())?;

        for path in Self::get_config_paths(config_path) {
            if path.exists() {
                let layer = Self::read_file(&path)?;
                merge_values(&mut merged, layer);
            }
        }

        let mut config: Config = serde_json::from_value(merged)
            .context("Invalid configuration after merging config files")?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Get the list of configuration file paths to check
    fn get_config_paths(explicit_path: Option<&PathBuf>) -> Vec<PathBuf> {
        if let Some(path) = explicit_path {
            return vec![path.clone()];
        }

        let mut paths = vec![PathBuf::from("/etc/azcollection/config.toml")];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".azcollection.toml"));
        }
        paths.push(PathBuf::from("azcollection.toml"));

        if let Ok(env_config) = std::env::var("AZCOLLECTION_CONFIG") {
            paths.push(PathBuf::from(env_config));
        }
        paths
    }

    /// Parse one file into a generic value tree.
    fn read_file(path: &Path) -> Result<serde_json::Value> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let value = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            _ => {
                let table: toml::Value = toml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
                serde_json::to_value(table)?
            }
        };
        Ok(value)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(cloud) = std::env::var("AZCOLLECTION_CLOUD_ENVIRONMENT") {
            self.azure.cloud_environment = Some(cloud);
        }
        if let Ok(endpoint) = std::env::var("AZCOLLECTION_MANAGEMENT_ENDPOINT") {
            self.azure.management_endpoint = Some(endpoint);
        }
        if let Ok(authority) = std::env::var("AZCOLLECTION_AUTHORITY_HOST") {
            self.azure.authority_host = Some(authority);
        }
        if let Ok(file) = std::env::var("AZCOLLECTION_CREDENTIALS_FILE") {
            self.azure.credentials_file = Some(PathBuf::from(file));
        }
        if let Ok(retries) = std::env::var("AZCOLLECTION_MAX_RETRIES") {
            self.http.max_retries = retries
                .parse()
                .with_context(|| format!("AZCOLLECTION_MAX_RETRIES={} is not a number", retries))?;
        }
        if let Ok(timeout) = std::env::var("AZCOLLECTION_HTTP_TIMEOUT") {
            self.http.timeout = humantime_serde::re::humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid AZCOLLECTION_HTTP_TIMEOUT '{}'", timeout))?;
        }
        if let Ok(interval) = std::env::var("AZCOLLECTION_POLL_INTERVAL") {
            self.polling.interval = humantime_serde::re::humantime::parse_duration(&interval)
                .with_context(|| format!("Invalid AZCOLLECTION_POLL_INTERVAL '{}'", interval))?;
        }
        if let Ok(timeout) = std::env::var("AZCOLLECTION_POLL_TIMEOUT") {
            self.polling.timeout = humantime_serde::re::humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid AZCOLLECTION_POLL_TIMEOUT '{}'", timeout))?;
        }
        if let Ok(level) = std::env::var("AZCOLLECTION_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("AZCOLLECTION_LOG_FORMAT") {
            self.logging.format = format;
        }
        Ok(())
    }
}

/// Recursively overlay `layer` onto `base`; objects merge, everything else replaces.
fn merge_values(base: &mut serde_json::Value, layer: serde_json::Value) {
    match (base, layer) {
        (serde_json::Value::Object(base), serde_json::Value::Object(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.polling.interval, Duration::from_secs(20));
        assert_eq!(config.polling.timeout, Duration::from_secs(600));
        assert_eq!(config.http.max_retries, 4);
        assert_eq!(config.logging.format, "text");
    }

    #[test]
    #[serial]
    fn test_load_toml_overrides_only_given_keys() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[polling]\ninterval = \"5s\"\n\n[azure]\ncloud_environment = \"AzureChinaCloud\""
        )
        .unwrap();

        let config = Config::load(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.polling.interval, Duration::from_secs(5));
        assert_eq!(config.polling.timeout, Duration::from_secs(600));
        assert_eq!(config.azure.cloud_environment.as_deref(), Some("AzureChinaCloud"));
    }

    #[test]
    #[serial]
    fn test_load_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        writeln!(file, "http:\n  max_retries: 1\nlogging:\n  format: json").unwrap();

        let config = Config::load(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.http.max_retries, 1);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("AZCOLLECTION_POLL_INTERVAL", "2s");
        std::env::set_var("AZCOLLECTION_MANAGEMENT_ENDPOINT", "http://localhost:9999");
        let mut config = Config::default();
        let result = config.apply_env_overrides();
        std::env::remove_var("AZCOLLECTION_POLL_INTERVAL");
        std::env::remove_var("AZCOLLECTION_MANAGEMENT_ENDPOINT");

        result.unwrap();
        assert_eq!(config.polling.interval, Duration::from_secs(2));
        assert_eq!(
            config.azure.management_endpoint.as_deref(),
            Some("http://localhost:9999")
        );
    }

    #[test]
    fn test_merge_values_nested() {
        let mut base = serde_json::json!({"a": {"x": 1, "y": 2}, "b": [1]});
        merge_values(&mut base, serde_json::json!({"a": {"y": 3}, "b": [2, 3]}));
        assert_eq!(base, serde_json::json!({"a": {"x": 1, "y": 3}, "b": [2, 3]}));
    }
}
