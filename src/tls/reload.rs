//! Web-server reload after certificate files change

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{error, info};

use crate::error::{CertError, CertResult};

/// Something that makes the web server pick up new certificate files
#[async_trait]
pub trait ReloadHook: Send + Sync {
    /// Run the reload and return its combined output
    async fn reload(&self) -> CertResult<String>;
}

/// Runs a configured command line such as `nginx -s reload`.
///
/// The line is split on whitespace into program and arguments; there is no
/// shell and no quoting.
#[derive(Debug, Clone)]
pub struct CommandReload {
    command: String,
}

impl CommandReload {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait]
impl ReloadHook for CommandReload {
    async fn reload(&self) -> CertResult<String> {
        let mut parts = self.command.split_whitespace();
        let program = parts.next().ok_or_else(|| CertError::Reload {
            exit_status: None,
            output: "reload command is empty".to_string(),
        })?;
        let args: Vec<&str> = parts.collect();

        info!("Running reload command: {}", self.command);

        let output = Command::new(program)
            .args(&args)
            .output()
            .await
            .map_err(|e| {
                error!("Failed to start reload command '{}': {}", self.command, e);
                CertError::Reload {
                    exit_status: None,
                    output: e.to_string(),
                }
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            error!(
                "Reload command '{}' exited with {}: {}",
                self.command,
                output.status,
                combined.trim()
            );
            return Err(CertError::Reload {
                exit_status: output.status.code(),
                output: combined,
            });
        }

        info!("Reload command finished: {}", combined.trim());
        Ok(combined)
    }
}
