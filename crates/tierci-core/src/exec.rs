//! External command execution.
//!
//! Every collaborator tierci drives (toolchain, container runtime, test
//! harness, coverage renderer) is reached through [`CommandRunner`]. The
//! production implementation is [`ProcessRunner`]; tests use
//! [`crate::fakes::ScriptedRunner`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::error::{ExecError, ExecResult};

/// One external process invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Executable name or path.
    pub program: String,

    /// Arguments, in order.
    pub args: Vec<String>,

    /// Extra environment variables layered over the inherited environment.
    pub env: BTreeMap<String, String>,

    /// Working directory (inherits the caller's when `None`).
    pub cwd: Option<PathBuf>,

    /// Timeout in seconds (0 = no timeout).
    pub timeout_secs: u64,

    /// Stream stdout/stderr to the terminal instead of capturing them.
    pub inherit_output: bool,
}

impl CommandSpec {
    /// Create a spec for `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            timeout_secs: 0,
            inherit_output: false,
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

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Let the child write straight to the terminal.
    pub fn streaming(mut self) -> Self {
        self.inherit_output = true;
        self
    }

    /// Program and arguments joined by spaces, for logs and matching.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Exit code (0 = success, -1 = terminated by signal).
    pub exit_code: i32,

    /// Captured stdout (empty when output was streamed).
    pub stdout: String,

    /// Captured stderr (empty when output was streamed).
    pub stderr: String,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Non-empty, trimmed stdout lines.
    pub fn stdout_lines(&self) -> Vec<String> {
        self.stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Stderr if present, stdout otherwise; used in failure messages.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Executes external commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion.
    ///
    /// Returns `Err` only when the process could not be spawned, waited on,
    /// or exceeded its timeout. A non-zero exit is an `Ok` output.
    async fn run(&self, spec: &CommandSpec) -> ExecResult<CommandOutput>;
}

/// [`CommandRunner`] backed by real OS processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> ExecResult<CommandOutput> {
        if spec.program.is_empty() {
            return Err(ExecError::EmptyCommand);
        }

        debug!(command = %spec, "spawning");
        let start = Instant::now();

        let mut command = Command::new(&spec.program);
        command.args(&spec.args).envs(&spec.env).kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        if spec.inherit_output {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        let child = command.spawn().map_err(|source| ExecError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        let waited = if spec.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(spec.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| ExecError::Timeout {
                program: spec.program.clone(),
                timeout_secs: spec.timeout_secs,
            })?
        } else {
            child.wait_with_output().await
        };

        let output = waited.map_err(|source| ExecError::Wait {
            program: spec.program.clone(),
            source,
        })?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
