//! External process execution
//!
//! Commands are built as a program plus an argument vector and are never
//! passed through a shell, so caller-supplied values such as repository
//! references cannot inject extra commands.

use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// A program and its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured output of a successful command
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Error, Debug)]
pub enum InvokeError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {}: {}", exit_description(.code), .stderr.trim())]
    Exit {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

/// Runs external commands
///
/// The calling task suspends until the process exits. No retry and no
/// timeout are applied here.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn run(
        &self,
        command: &CommandLine,
        working_dir: &Path,
    ) -> Result<ProcessOutput, InvokeError>;
}

/// Invoker backed by `tokio::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessInvoker;

impl ProcessInvoker {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Invoker for ProcessInvoker {
    async fn run(
        &self,
        command: &CommandLine,
        working_dir: &Path,
    ) -> Result<ProcessOutput, InvokeError> {
        debug!("Running `{}` in {}", command, working_dir.display());

        let output = Command::new(&command.program)
            .args(&command.args)
            .current_dir(working_dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| InvokeError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(InvokeError::Exit {
                command: command.to_string(),
                code: output.status.code(),
                stderr,
            });
        }

        Ok(ProcessOutput { stdout, stderr })
    }
}
