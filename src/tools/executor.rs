use anyhow::{bail, Context, Result};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

const FALLBACK_SHELL: &str = "/bin/sh";

/// Runs confirmed commands through the user's shell.
pub struct CommandRunner {
    shell: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub success: bool,
    pub code: Option<i32>,
}

impl CommandOutcome {
    /// Text recorded as terminal output context after the command ran.
    pub fn feedback(&self, command: &str) -> String {
        let status = if self.success { "[ok]" } else { "[error]" };
        format!("$ {command}\n{status}")
    }
}

impl CommandRunner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    /// Uses `$SHELL` when it points at an existing file.
    pub fn from_env() -> Self {
        let shell = std::env::var("SHELL")
            .ok()
            .filter(|shell| !shell.trim().is_empty() && Path::new(shell).exists())
            .unwrap_or_else(|| FALLBACK_SHELL.to_string());
        Self::new(shell)
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    /// Runs with the terminal attached so interactive programs work.
    pub async fn run(&self, command: &str) -> Result<CommandOutcome> {
        let command = non_empty_command(command)?;
        tracing::debug!(shell = %self.shell, command, "running command");

        let status = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .with_context(|| format!("Failed to start {}", self.shell))?;

        Ok(CommandOutcome {
            success: status.success(),
            code: status.code(),
        })
    }
}

fn non_empty_command(command: &str) -> Result<&str> {
    let command = command.trim();
    if command.is_empty() {
        bail!("Refusing to run an empty command");
    }
    Ok(command)
}
