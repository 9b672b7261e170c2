use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::tls::provider::CertSource;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Provider fallback order used when registering a new domain
    #[serde(default = "default_providers")]
    pub providers: Vec<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub renewal: RenewalSettings,
    #[serde(default)]
    pub reload: ReloadConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            logging: LoggingConfig::default(),
            renewal: RenewalSettings::default(),
            reload: ReloadConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

fn default_providers() -> Vec<String> {
    vec!["certd".to_string(), "west".to_string()]
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_log_output")]
    pub output: String,
    #[serde(default)]
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            output: default_log_output(),
            file_path: None,
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
fn default_log_output() -> String { "console".to_string() }

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RenewalSettings {
    /// Renew once a certificate is this many days from expiry
    #[serde(default = "default_window_days")]
    pub window_days: u64,
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
}

impl Default for RenewalSettings {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            check_interval_secs: default_check_interval(),
        }
    }
}

fn default_window_days() -> u64 { 10 }
fn default_check_interval() -> u64 { 24 * 60 * 60 }

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ReloadConfig {
    #[serde(default = "default_reload_command")]
    pub command: String,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            command: default_reload_command(),
        }
    }
}

fn default_reload_command() -> String { "nginx -s reload".to_string() }

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// "auto", "sqlite" or "sled"
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_data_dir")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_data_dir(),
        }
    }
}

fn default_backend() -> String { "auto".to_string() }
fn default_data_dir() -> String { "~/.sslkeeper".to_string() }

impl StorageConfig {
    /// Data directory with a leading `~` expanded to `$HOME`
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.path)
    }
}

fn expand_home(path: &str) -> PathBuf {
    expand_home_with(path, std::env::var("HOME").ok().as_deref())
}

fn expand_home_with(path: &str, home: Option<&str>) -> PathBuf {
    match (path.strip_prefix('~'), home) {
        (Some(rest), Some(home)) => PathBuf::from(format!("{}{}", home, rest)),
        _ => PathBuf::from(path),
    }
}

pub fn load_config(path: &str) -> Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path))?;
    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path))?;
    validate_config(&config)?;
    Ok(config)
}

/// Load the config file, or fall back to defaults when it does not exist yet
pub fn load_or_default(path: &str) -> Result<Config> {
    if std::path::Path::new(path).exists() {
        load_config(path)
    } else {
        Ok(Config::default())
    }
}

pub fn validate_config(config: &Config) -> Result<()> {
    if config.renewal.window_days == 0 {
        bail!("renewal.window_days must be greater than zero");
    }
    if config.renewal.check_interval_secs == 0 {
        bail!("renewal.check_interval_secs must be greater than zero");
    }
    if config.providers.is_empty() {
        bail!("at least one provider must be listed in `providers`");
    }
    for name in &config.providers {
        name.parse::<CertSource>()
            .with_context(|| format!("unknown provider in `providers`: {}", name))?;
    }
    match config.storage.backend.as_str() {
        "auto" | "sqlite" | "sled" => {}
        other => bail!("unknown storage backend: {}", other),
    }
    Ok(())
}
