use sslkeeper::config::{load_config, load_or_default, validate_config, Config};
use sslkeeper::settings::{SettingsStore, TomlSettings};

fn write_config(contents: &str) -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sslkeeper.toml");
    std::fs::write(&path, contents).unwrap();
    (dir, path.display().to_string())
}

#[test]
fn test_load_full_config() {
    let (_dir, path) = write_config(
        r#"
providers = ["west", "certd"]

[logging]
level = "debug"
format = "json"
output = "file"
file_path = "/var/log/sslkeeper"

[renewal]
window_days = 21
check_interval_secs = 3600

[reload]
command = "systemctl reload nginx"

[storage]
backend = "sled"
path = "/var/lib/sslkeeper"

[third.certd]
api_url = "https://certd.example.com"
key_id = "kid"
key_secret = "secret"
"#,
    );

    let config = load_config(&path).unwrap();
    assert_eq!(config.providers, vec!["west", "certd"]);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.file_path.as_deref(), Some("/var/log/sslkeeper"));
    assert_eq!(config.renewal.window_days, 21);
    assert_eq!(config.renewal.check_interval_secs, 3600);
    assert_eq!(config.reload.command, "systemctl reload nginx");
    assert_eq!(config.storage.backend, "sled");
    assert_eq!(config.storage.data_dir().display().to_string(), "/var/lib/sslkeeper");
}

#[test]
fn test_validate_config_rejects_zero_window() {
    let mut config = Config::default();
    config.renewal.window_days = 0;
    assert!(validate_config(&config).is_err());
}

#[test]
fn test_validate_config_rejects_unknown_provider() {
    let mut config = Config::default();
    config.providers = vec!["certd".to_string(), "letsencrypt".to_string()];
    assert!(validate_config(&config).is_err());

    config.providers.clear();
    assert!(validate_config(&config).is_err());
}

#[test]
fn test_validate_config_rejects_unknown_backend() {
    let (_dir, path) = write_config("[storage]\nbackend = \"badger\"\n");
    assert!(load_config(&path).is_err());
}

#[test]
fn test_load_config_reports_syntax_errors() {
    let (_dir, path) = write_config("providers = [\"certd\"\n");
    let err = load_config(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to parse config file"));
}

#[test]
fn test_load_or_default_without_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.toml").display().to_string();

    let config = load_or_default(&path).unwrap();
    assert_eq!(config.renewal.window_days, 10);
    assert_eq!(config.providers, vec!["certd", "west"]);
}

#[test]
fn test_settings_share_the_config_file() {
    let (_dir, path) = write_config("[renewal]\nwindow_days = 15\n");

    let settings = TomlSettings::new(&path);
    settings.set("third.west", "username", "alice").unwrap();
    settings.set("third.west", "api_key", "k3y").unwrap();

    // Typed config still loads and keeps its values
    let config = load_config(&path).unwrap();
    assert_eq!(config.renewal.window_days, 15);

    let reread = TomlSettings::new(&path);
    assert_eq!(
        reread.get("third.west", "username").unwrap().as_deref(),
        Some("alice")
    );
    assert_eq!(reread.require("third.west", "api_key").unwrap(), "k3y");
    assert!(reread.require("third.certd", "key_id").is_err());
}
