//! Command execution seam for the emulation driver.
//!
//! Everything the driver does to the system goes through [`CommandRunner`],
//! so tests can swap in a recorder and assert on the exact sequence of
//! operations without touching OVS or network namespaces.

use std::io;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Cleanup paths tolerate failure; everything else treats a nonzero
    /// exit as an error.
    pub allow_failure: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            allow_failure: false,
        }
    }

    #[must_use]
    pub fn tolerant(mut self) -> Self {
        self.allow_failure = true;
        self
    }

    #[must_use]
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

#[derive(Clone, Debug)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("command '{command}' exited with status {status:?}: {stderr}")]
    Failed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError>;
}

/// Executes commands on the real system.
#[derive(Clone, Copy, Debug, Default)]
pub struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        debug!(command = %spec.command_line(), "running");

        let mut command = tokio::process::Command::new(&spec.program);
        command.args(&spec.args);
        // Children get their own process group: an interrupt aimed at (or
        // raised by) an emulation command must not cascade into the driver.
        #[cfg(unix)]
        command.process_group(0);

        let output = command
            .output()
            .await
            .map_err(|source| CommandError::Spawn {
                program: spec.program.clone(),
                source,
            })?;

        let result = CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !result.success() {
            if spec.allow_failure {
                warn!(
                    command = %spec.command_line(),
                    status = ?result.status,
                    "tolerated command failure"
                );
            } else {
                return Err(CommandError::Failed {
                    command: spec.command_line(),
                    status: result.status,
                    stderr: result.stderr,
                });
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::Mutex;

    use super::*;

    /// Records every command and answers with a canned success.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingRunner {
        calls: Mutex<Vec<CommandSpec>>,
        pub(crate) canned_stdout: String,
    }

    impl RecordingRunner {
        pub(crate) fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                canned_stdout: "true".to_owned(),
            }
        }

        pub(crate) fn command_lines(&self) -> Vec<String> {
            self.calls
                .lock()
                .expect("recorder lock")
                .iter()
                .map(CommandSpec::command_line)
                .collect()
        }
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
            self.calls.lock().expect("recorder lock").push(spec.clone());
            Ok(CommandOutput {
                status: Some(0),
                stdout: self.canned_stdout.clone(),
                stderr: String::new(),
            })
        }
    }
}
