//! In-memory fakes for the command seam (testing only)
//!
//! [`ScriptedRunner`] records every [`CommandSpec`] it receives and answers
//! from a script of canned replies, so orchestration logic can be exercised
//! without a toolchain or container runtime on the host.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{ExecError, ExecResult};
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};

/// Side effect applied when a scripted reply fires (e.g. write an artifact).
pub type Effect = Arc<dyn Fn(&CommandSpec) + Send + Sync>;

/// How a script entry selects commands.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Program + leading args equal these tokens.
    Prefix(Vec<String>),
    /// Rendered command line contains this substring.
    Contains(String),
}

impl Matcher {
    fn matches(&self, spec: &CommandSpec) -> bool {
        match self {
            Matcher::Prefix(tokens) => {
                let line: Vec<&str> = std::iter::once(spec.program.as_str())
                    .chain(spec.args.iter().map(String::as_str))
                    .collect();
                line.len() >= tokens.len() && tokens.iter().zip(&line).all(|(t, l)| t == l)
            }
            Matcher::Contains(needle) => spec.command_line().contains(needle.as_str()),
        }
    }
}

/// Canned reply for a matched command.
#[derive(Debug, Clone)]
pub enum Reply {
    Exit {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    SpawnError(String),
}

impl Reply {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Reply::Exit {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn fail(exit_code: i32, stderr: impl Into<String>) -> Self {
        Reply::Exit {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

struct Entry {
    matcher: Matcher,
    reply: Reply,
    remaining: Option<usize>,
    effect: Option<Effect>,
}

/// Scripted [`CommandRunner`].
///
/// Entries registered later take precedence. Entries created with
/// [`ScriptedRunner::once`] are consumed after one use. Unmatched commands
/// succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    entries: Mutex<Vec<Entry>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl std::fmt::Debug for ScriptedRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedRunner")
            .field("calls", &self.calls.lock().unwrap().len())
            .finish()
    }
}

fn prefix(tokens: &[&str]) -> Matcher {
    Matcher::Prefix(tokens.iter().map(|t| t.to_string()).collect())
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(
        &self,
        matcher: Matcher,
        reply: Reply,
        remaining: Option<usize>,
        effect: Option<Effect>,
    ) {
        self.entries.lock().unwrap().push(Entry {
            matcher,
            reply,
            remaining,
            effect,
        });
    }

    /// Reply to every command starting with `tokens`.
    pub fn on(self, tokens: &[&str], reply: Reply) -> Self {
        self.push(prefix(tokens), reply, None, None);
        self
    }

    /// Reply once to the next command starting with `tokens`.
    pub fn once(self, tokens: &[&str], reply: Reply) -> Self {
        self.push(prefix(tokens), reply, Some(1), None);
        self
    }

    /// Reply to every command whose line contains `needle`.
    pub fn on_contains(self, needle: &str, reply: Reply) -> Self {
        self.push(Matcher::Contains(needle.to_string()), reply, None, None);
        self
    }

    /// Reply and run `effect` for every command starting with `tokens`.
    pub fn on_with<F>(self, tokens: &[&str], reply: Reply, effect: F) -> Self
    where
        F: Fn(&CommandSpec) + Send + Sync + 'static,
    {
        self.push(prefix(tokens), reply, None, Some(Arc::new(effect)));
        self
    }

    /// Every command received so far, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Rendered command lines received so far, in order.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(CommandSpec::command_line).collect()
    }

    /// Number of received commands whose line contains `needle`.
    pub fn count_containing(&self, needle: &str) -> usize {
        self.command_lines()
            .iter()
            .filter(|l| l.contains(needle))
            .count()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> ExecResult<CommandOutput> {
        self.calls.lock().unwrap().push(spec.clone());

        let (reply, effect) = {
            let mut entries = self.entries.lock().unwrap();
            let found = entries
                .iter_mut()
                .enumerate()
                .rev()
                .find(|(_, e)| e.remaining != Some(0) && e.matcher.matches(spec))
                .map(|(idx, e)| {
                    if let Some(n) = e.remaining.as_mut() {
                        *n -= 1;
                    }
                    (idx, e.reply.clone(), e.effect.clone())
                });
            match found {
                Some((idx, reply, effect)) => {
                    if entries[idx].remaining == Some(0) {
                        entries.remove(idx);
                    }
                    (reply, effect)
                }
                None => (Reply::ok(""), None),
            }
        };

        if let Some(effect) = effect {
            effect(spec);
        }

        match reply {
            Reply::Exit {
                exit_code,
                stdout,
                stderr,
            } => Ok(CommandOutput {
                exit_code,
                stdout,
                stderr,
                duration_ms: 0,
            }),
            Reply::SpawnError(reason) => Err(ExecError::Spawn {
                program: spec.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, reason),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unmatched_command_succeeds() {
        let runner = ScriptedRunner::new();
        let out = runner
            .run(&CommandSpec::new("go").arg("build"))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(runner.command_lines(), vec!["go build"]);
    }

    #[tokio::test]
    async fn test_later_entries_take_precedence() {
        let runner = ScriptedRunner::new()
            .on(&["go"], Reply::fail(1, "generic"))
            .on(&["go", "vet"], Reply::ok("vetted"));

        let vet = runner
            .run(&CommandSpec::new("go").arg("vet"))
            .await
            .unwrap();
        assert_eq!(vet.stdout, "vetted");

        let build = runner
            .run(&CommandSpec::new("go").arg("build"))
            .await
            .unwrap();
        assert_eq!(build.exit_code, 1);
    }

    #[tokio::test]
    async fn test_once_is_consumed() {
        let runner = ScriptedRunner::new()
            .on(&["docker", "ps"], Reply::ok("ready"))
            .once(&["docker", "ps"], Reply::ok("starting"));

        let spec = CommandSpec::new("docker").arg("ps");
        assert_eq!(runner.run(&spec).await.unwrap().stdout, "starting");
        assert_eq!(runner.run(&spec).await.unwrap().stdout, "ready");
        assert_eq!(runner.count_containing("docker ps"), 2);
    }

    #[tokio::test]
    async fn test_spawn_error_and_effect() {
        let hits = Arc::new(Mutex::new(0));
        let seen = hits.clone();
        let bump = move |_: &CommandSpec| *seen.lock().unwrap() += 1;
        let runner = ScriptedRunner::new()
            .on(&["missing"], Reply::SpawnError("not installed".to_string()))
            .on_with(&["touch"], Reply::ok(""), bump);

        assert!(runner.run(&CommandSpec::new("missing")).await.is_err());
        runner.run(&CommandSpec::new("touch")).await.unwrap();
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_contains_matcher() {
        let runner = ScriptedRunner::new().on_contains("windows", Reply::fail(2, "boom"));
        let spec = CommandSpec::new("go").args(["build", "-o", "bin/x-windows-386.exe"]);
        let out = runner.run(&spec).await.unwrap();
        assert_eq!(out.exit_code, 2);
    }
}
