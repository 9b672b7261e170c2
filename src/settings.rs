//! Section-scoped key/value settings used for provider credentials
//!
//! Sections are dotted paths into the TOML document (`third.certd` is the
//! `[third.certd]` table); the empty section addresses the document root.

use std::path::{Path, PathBuf};
use toml::{Table, Value};

use crate::error::{CertError, CertResult};

pub trait SettingsStore: Send + Sync {
    fn get(&self, section: &str, key: &str) -> CertResult<Option<String>>;

    fn set(&self, section: &str, key: &str, value: &str) -> CertResult<()>;

    /// Fetch a value that must be present and non-empty
    fn require(&self, section: &str, key: &str) -> CertResult<String> {
        match self.get(section, key)? {
            Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
            _ => Err(CertError::missing(section, key)),
        }
    }
}

/// Settings backed by a TOML file, re-read on every lookup
#[derive(Debug, Clone)]
pub struct TomlSettings {
    path: PathBuf,
}

impl TomlSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> CertResult<Table> {
        if !self.path.exists() {
            return Ok(Table::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        contents
            .parse::<Table>()
            .map_err(|e| CertError::Format(format!("{}: {}", self.path.display(), e)))
    }
}

/// Keys whose values are never shown
const SECRET_KEYS: &[&str] = &["key_secret", "api_key"];

/// A settings value as printed for an operator, secrets masked
pub fn display_value(key: &str, value: &str) -> String {
    if SECRET_KEYS.contains(&key) && !value.is_empty() {
        "<REDACTED>".to_string()
    } else {
        value.to_string()
    }
}

/// Keep integer and boolean keys typed so the file still loads as `Config`
fn coerce_like(existing: Option<&Value>, value: &str) -> Value {
    match existing {
        Some(Value::Integer(_)) => value
            .trim()
            .parse::<i64>()
            .map(Value::Integer)
            .unwrap_or_else(|_| Value::String(value.to_string())),
        Some(Value::Boolean(_)) => value
            .trim()
            .parse::<bool>()
            .map(Value::Boolean)
            .unwrap_or_else(|_| Value::String(value.to_string())),
        _ => Value::String(value.to_string()),
    }
}

fn section_parts(section: &str) -> Vec<&str> {
    section.split('.').filter(|s| !s.is_empty()).collect()
}

impl SettingsStore for TomlSettings {
    fn get(&self, section: &str, key: &str) -> CertResult<Option<String>> {
        let doc = self.load()?;
        let mut table = &doc;
        for part in section_parts(section) {
            match table.get(part) {
                Some(Value::Table(t)) => table = t,
                _ => return Ok(None),
            }
        }
        Ok(match table.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Table(_)) | None => None,
            Some(other) => Some(other.to_string()),
        })
    }

    fn set(&self, section: &str, key: &str, value: &str) -> CertResult<()> {
        let mut doc = self.load()?;
        let mut table = &mut doc;
        for part in section_parts(section) {
            let entry = table
                .entry(part.to_string())
                .or_insert(Value::Table(Table::new()));
            if !entry.is_table() {
                *entry = Value::Table(Table::new());
            }
            table = entry.as_table_mut().ok_or_else(|| {
                CertError::Format(format!("section '{}' is not a table", section))
            })?;
        }
        let typed = coerce_like(table.get(key), value);
        table.insert(key.to_string(), typed);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let rendered = toml::to_string(&doc)
            .map_err(|e| CertError::Format(format!("failed to render settings: {}", e)))?;
        std::fs::write(&self.path, rendered)?;
        Ok(())
    }
}
