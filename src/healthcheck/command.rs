//! Command health check: run a local command and report its exit status.

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::healthcheck::{Base, CheckError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CommandCheckConfig {
    #[serde(flatten)]
    pub base: Base,
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,
}

impl CommandCheckConfig {
    pub fn validate(&self) -> Result<(), CheckError> {
        self.base.validate(true)?;
        if self.command.is_empty() {
            return Err(CheckError::Validation(format!(
                "healthcheck {}: command is missing",
                self.base.name
            )));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct CommandCheck {
    pub config: CommandCheckConfig,
}

impl CommandCheck {
    pub fn new(config: CommandCheckConfig) -> Self {
        CommandCheck { config }
    }

    pub fn summary(&self) -> String {
        format!("command check {:?}", self.config.command)
    }

    pub fn initialize(&mut self) -> Result<(), CheckError> {
        Ok(())
    }

    pub async fn execute(&self) -> Result<(), CheckError> {
        let output = Command::new(&self.config.command)
            .args(&self.config.arguments)
            // The scheduler enforces the per-attempt deadline; make sure an
            // aborted attempt does not leak the child process.
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                CheckError::Execution(format!(
                    "cannot execute command {:?}: {}",
                    self.config.command, err
                ))
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output
                .status
                .code()
                .map(|code| code.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            return Err(CheckError::Execution(format!(
                "command {:?} failed with exit code {}: {}",
                self.config.command,
                code,
                stderr.trim()
            )));
        }
        Ok(())
    }
}
