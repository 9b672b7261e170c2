//! Error taxonomy shared by providers, the parser, stores and the renewal engine

use std::io;
use thiserror::Error;

pub type CertResult<T> = Result<T, CertError>;

/// Errors raised while fetching, parsing, storing or deploying certificates
#[derive(Debug, Error)]
pub enum CertError {
    /// A provider credential or setting is absent or empty
    #[error("missing configuration '{key}' in section '{section}'")]
    ConfigurationMissing { section: String, key: String },

    /// Network-level failure talking to a provider
    #[error("transport error: {0}")]
    Transport(String),

    /// The provider answered with something we cannot decode
    #[error("unexpected response format: {0}")]
    Format(String),

    /// The provider reported a non-success status
    #[error("provider error {code}: {message}")]
    Provider { code: i64, message: String },

    /// PEM or X.509 decoding failed
    #[error("certificate parse error: {0}")]
    Parse(String),

    /// Store lookup missed
    #[error("not found: {0}")]
    NotFound(String),

    #[error("domain '{0}' is already registered")]
    DuplicateDomain(String),

    /// Every provider in the fallback chain failed
    #[error("no provider could issue a certificate for '{domain}': {reason}")]
    NoProviderAvailable { domain: String, reason: String },

    #[error("failed to write certificate material for '{domain}' to {path}: {source}")]
    Deploy {
        domain: String,
        path: String,
        #[source]
        source: io::Error,
    },

    /// Reload command failed to spawn or exited non-zero
    #[error("reload command failed (exit status: {}): {output}", describe_status(.exit_status))]
    Reload {
        exit_status: Option<i32>,
        output: String,
    },

    /// Storage backend failure other than a lookup miss
    #[error("store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A reconciliation pass is already running
    #[error("a renewal pass is already in progress")]
    PassInProgress,
}

fn describe_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "none".to_string(),
    }
}

impl CertError {
    pub fn missing(section: &str, key: &str) -> Self {
        CertError::ConfigurationMissing {
            section: section.to_string(),
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CertError::NotFound(_))
    }
}

impl From<reqwest::Error> for CertError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            CertError::Format(e.to_string())
        } else {
            CertError::Transport(e.to_string())
        }
    }
}

impl From<sqlx::Error> for CertError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => CertError::NotFound("row not found".to_string()),
            other => CertError::Store(other.to_string()),
        }
    }
}

impl From<sled::Error> for CertError {
    fn from(e: sled::Error) -> Self {
        CertError::Store(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reload_error_display() {
        let err = CertError::Reload {
            exit_status: Some(1),
            output: "nginx: [emerg] bad config".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "reload command failed (exit status: 1): nginx: [emerg] bad config"
        );

        let err = CertError::Reload {
            exit_status: None,
            output: "not found".to_string(),
        };
        assert!(err.to_string().contains("exit status: none"));
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: CertError = sqlx::Error::RowNotFound.into();
        assert!(err.is_not_found());
    }
}
