use std::process::Command;

use log::debug;

use crate::runner::{CommandOutput, CommandRunner, RunnerError};

/// Runs commands on this machine through `sh -c`.
#[derive(Debug, Clone, Default)]
pub struct LocalRunner;

impl LocalRunner {
    pub fn new() -> Self {
        LocalRunner
    }
}

impl CommandRunner for LocalRunner {
    fn run(&self, command: &str) -> Result<CommandOutput, RunnerError> {
        debug!("local: {}", command);
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .map_err(|e| RunnerError::Spawn(e.to_string()))?;
        Ok(CommandOutput {
            // Killed by a signal
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
