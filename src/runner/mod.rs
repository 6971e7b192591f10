/*
 * This module provides command execution on the emulation host.
 * Emulators only care that a command ran and what it printed, not where.
 * This allows for driving a local Mininet host as well as a remote one.
 */

pub mod local;
pub mod ssh;

use std::{rc::Rc, sync::Arc};

use thiserror::Error;

pub use local::LocalRunner;
pub use ssh::SshRunner;

/// Output of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Both streams, stdout first, the way an interactive shell shows them.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        out.push_str(&self.stderr);
        out
    }

    /// What to report when the command failed. Runners merging both streams
    /// leave stderr empty, the message is then on stdout.
    pub fn error_text(&self) -> &str {
        let text = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        text.trim_end()
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to spawn command: {0}")]
    Spawn(String),
    #[error("TCP error: {0}")]
    Tcp(String),
    #[error("SSH error: {0}")]
    Ssh(String),
    #[error("SSH authentication error: {0}")]
    Auth(String),
    #[error("Command execution error: {0}")]
    Command(String),
    #[error("Cannot quote {0}")]
    Quote(String),
}

/// Something that can run a shell command line on the emulation host.
pub trait CommandRunner {
    fn run(&self, command: &str) -> Result<CommandOutput, RunnerError>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for Box<R> {
    fn run(&self, command: &str) -> Result<CommandOutput, RunnerError> {
        (**self).run(command)
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for Rc<R> {
    fn run(&self, command: &str) -> Result<CommandOutput, RunnerError> {
        (**self).run(command)
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for Arc<R> {
    fn run(&self, command: &str) -> Result<CommandOutput, RunnerError> {
        (**self).run(command)
    }
}

/// Quotes a single word for a POSIX shell. Words holding a NUL byte are rejected.
pub fn shell_quote(word: &str) -> Result<String, RunnerError> {
    shlex::try_quote(word)
        .map(|quoted| quoted.into_owned())
        .map_err(|e| RunnerError::Quote(format!("{:?}: {}", word, e)))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;

    use super::*;

    /// Records every command, failing the ones containing `fail_on`.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingRunner {
        commands: RefCell<Vec<String>>,
        fail_on: Option<String>,
    }

    impl RecordingRunner {
        pub(crate) fn failing_on(pattern: &str) -> Self {
            Self {
                commands: RefCell::new(Vec::new()),
                fail_on: Some(pattern.to_string()),
            }
        }

        /// Commands run since the last call, oldest first.
        pub(crate) fn take(&self) -> Vec<String> {
            self.commands.borrow_mut().drain(..).collect()
        }
    }

    impl CommandRunner for RecordingRunner {
        fn run(&self, command: &str) -> Result<CommandOutput, RunnerError> {
            self.commands.borrow_mut().push(command.to_string());
            let fails = self
                .fail_on
                .as_ref()
                .is_some_and(|pattern| command.contains(pattern.as_str()));
            Ok(CommandOutput {
                status: if fails { 1 } else { 0 },
                stdout: "out\n".to_string(),
                stderr: if fails { "boom\n".to_string() } else { String::new() },
            })
        }
    }
}
