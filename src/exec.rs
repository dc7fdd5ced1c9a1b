//! External command execution
//!
//! Everything `sb` learns about the outside world comes from running a
//! program: `git` for commit identity, `ansible-playbook` for declared tags
//! and for the install run itself. The [`Executor`] trait is the single seam
//! for that, so the resolver and dispatcher can be driven by stubs in tests.

use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use thiserror::Error;

/// A program invocation: binary, arguments and working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, cwd: impl AsRef<Path>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.as_ref().to_path_buf(),
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

    /// Human readable form for logs and error messages
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// How a streamed process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    /// Non-zero exit code
    Code(i32),
    /// Terminated by a signal (Unix signal number)
    Signal(i32),
}

/// Error type for command execution
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("'{command}' produced no output")]
    EmptyOutput { command: String },
}

pub type Result<T> = std::result::Result<T, ExecError>;

/// Capability to run external programs
pub trait Executor {
    /// Run to completion and return captured stdout. Non-zero exit is an error.
    fn capture(&self, spec: &CommandSpec) -> Result<String>;

    /// Run with inherited stdio so output reaches the terminal live.
    fn stream(&self, spec: &CommandSpec) -> Result<ExitOutcome>;
}

/// Executor backed by real child processes
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

impl SystemExecutor {
    fn command(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args).current_dir(&spec.cwd);
        cmd
    }
}

impl Executor for SystemExecutor {
    fn capture(&self, spec: &CommandSpec) -> Result<String> {
        tracing::debug!(command = %spec.display(), cwd = %spec.cwd.display(), "capturing");

        let output = Self::command(spec)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ExecError::Spawn {
                command: spec.display(),
                source,
            })?;

        if !output.status.success() {
            return Err(ExecError::Failed {
                command: spec.display(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn stream(&self, spec: &CommandSpec) -> Result<ExitOutcome> {
        tracing::debug!(command = %spec.display(), cwd = %spec.cwd.display(), "streaming");

        let status = Self::command(spec)
            .status()
            .map_err(|source| ExecError::Spawn {
                command: spec.display(),
                source,
            })?;

        Ok(exit_outcome(status))
    }
}

fn exit_outcome(status: ExitStatus) -> ExitOutcome {
    if status.success() {
        return ExitOutcome::Success;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitOutcome::Signal(signal);
        }
    }

    ExitOutcome::Code(status.code().unwrap_or(1))
}
