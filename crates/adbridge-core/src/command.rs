//! Process invocation for the bridge.
//!
//! Every command is described as a program plus a discrete argument vector
//! and handed straight to the OS spawn call. Nothing here goes through a
//! shell, so caller-supplied values (device ids, package names, paths) can
//! never be reinterpreted as shell syntax.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Default limit for blocking `adb`/`emulator` invocations.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
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

    /// Shell-quoted rendering, for logs and responses only.
    pub fn display(&self) -> String {
        let mut words = Vec::with_capacity(self.args.len() + 1);
        words.push(self.program.as_str());
        words.extend(self.args.iter().map(String::as_str));
        shell_words::join(words)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_ok: bool,
    pub exit_code: Option<i32>,
}

impl CommandResult {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_ok: true,
            exit_code: Some(0),
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_ok: false,
            exit_code: Some(exit_code),
        }
    }

    /// Best text to report when the command did not succeed.
    pub fn error_text(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.exit_code {
            Some(code) => format!("command exited with status {}", code),
            None => "command terminated by signal".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Failed to start `{program}`: {message}")]
    Spawn { program: String, message: String },

    #[error("Command timed out after {secs}s: {command}")]
    Timeout { secs: u64, command: String },

    #[error("I/O error while running `{command}`: {message}")]
    Io { command: String, message: String },
}

/// Runs bridge commands. The server and the agent's `adb` tool only talk to
/// processes through this trait, which keeps them testable without devices.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion and capture both output streams.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandResult, CommandError>;

    /// Launch without waiting for the process. Returns the pid when known.
    async fn spawn_detached(&self, spec: &CommandSpec) -> Result<Option<u32>, CommandError>;
}

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::with_timeout_secs(DEFAULT_COMMAND_TIMEOUT_SECS)
    }

    /// `0` disables the limit.
    pub fn with_timeout_secs(secs: u64) -> Self {
        Self {
            timeout: (secs > 0).then(|| Duration::from_secs(secs)),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<&mut R>) -> String {
    let mut buf = Vec::new();
    if let Some(pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf).await;
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn spawn_error(spec: &CommandSpec, error: std::io::Error) -> CommandError {
    CommandError::Spawn {
        program: spec.program.clone(),
        message: error.to_string(),
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandResult, CommandError> {
        tracing::debug!(command = %spec, "running command");

        let mut command = tokio::process::Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| spawn_error(spec, e))?;
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        // A grandchild that inherits the pipes keeps them open after the
        // child exits, so the limit covers reading them too.
        let collect = async {
            let (status, stdout, stderr) = tokio::join!(
                child.wait(),
                read_pipe(stdout_pipe.as_mut()),
                read_pipe(stderr_pipe.as_mut()),
            );
            status.map(|status| (status, stdout, stderr))
        };

        let collected = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, collect).await.ok(),
            None => Some(collect.await),
        };
        let Some(collected) = collected else {
            let secs = self.timeout.map(|limit| limit.as_secs()).unwrap_or_default();
            let _ = child.kill().await;
            tracing::warn!(command = %spec, secs, "command timed out");
            return Err(CommandError::Timeout {
                secs,
                command: spec.display(),
            });
        };
        let (status, stdout, stderr) = collected.map_err(|e| CommandError::Io {
            command: spec.display(),
            message: e.to_string(),
        })?;

        tracing::debug!(command = %spec, code = ?status.code(), "command finished");

        Ok(CommandResult {
            stdout,
            stderr,
            exit_ok: status.success(),
            exit_code: status.code(),
        })
    }

    async fn spawn_detached(&self, spec: &CommandSpec) -> Result<Option<u32>, CommandError> {
        let mut command = tokio::process::Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let mut child = command.spawn().map_err(|e| spawn_error(spec, e))?;
        let pid = child.id();
        tracing::info!(command = %spec, pid = ?pid, "launched detached process");

        // Reap the child so it does not linger as a zombie.
        let shown = spec.display();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    tracing::info!(command = %shown, code = ?status.code(), "detached process exited")
                }
                Err(error) => {
                    tracing::warn!(command = %shown, %error, "failed to wait on detached process")
                }
            }
        });

        Ok(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_arguments_with_metacharacters() {
        let spec = CommandSpec::new("adb")
            .arg("-s")
            .arg("emulator-5554; rm -rf /")
            .arg("devices");
        assert_eq!(spec.display(), "adb -s 'emulator-5554; rm -rf /' devices");
        assert_eq!(spec.args.len(), 3);
    }

    #[test]
    fn error_text_prefers_stderr_then_stdout() {
        let mut result = CommandResult::failure(1, "  boom \n");
        assert_eq!(result.error_text(), "boom");

        result.stderr.clear();
        result.stdout = "Failure [INSTALL_FAILED_OLDER_SDK]".to_string();
        assert_eq!(result.error_text(), "Failure [INSTALL_FAILED_OLDER_SDK]");

        result.stdout.clear();
        assert_eq!(result.error_text(), "command exited with status 1");
    }

    #[test]
    fn zero_timeout_disables_limit() {
        assert!(ProcessRunner::with_timeout_secs(0).timeout().is_none());
        assert_eq!(
            ProcessRunner::new().timeout(),
            Some(Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS))
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_captures_stdout_and_exit_status() {
        let runner = ProcessRunner::new();
        let result = runner
            .run(&CommandSpec::new("echo").arg("hello; world"))
            .await
            .expect("echo should run");
        assert!(result.exit_ok);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout.trim(), "hello; world");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_reports_nonzero_exit() {
        let runner = ProcessRunner::new();
        let result = runner
            .run(&CommandSpec::new("sh").args(["-c", "echo nope >&2; exit 3"]))
            .await
            .expect("sh should run");
        assert!(!result.exit_ok);
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.error_text(), "nope");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_times_out_hung_commands() {
        let runner = ProcessRunner::with_timeout_secs(1);
        let err = runner
            .run(&CommandSpec::new("sleep").arg("10"))
            .await
            .expect_err("sleep should exceed the limit");
        assert!(matches!(err, CommandError::Timeout { secs: 1, .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_covers_pipes_held_by_background_children() {
        let runner = ProcessRunner::with_timeout_secs(1);
        let started = std::time::Instant::now();
        let err = runner
            .run(&CommandSpec::new("sh").args(["-c", "sleep 20 & echo hi"]))
            .await
            .expect_err("inherited pipe should hit the limit");
        assert!(matches!(err, CommandError::Timeout { secs: 1, .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let runner = ProcessRunner::new();
        let err = runner
            .run(&CommandSpec::new("adbridge-definitely-not-installed"))
            .await
            .expect_err("unknown program should fail");
        assert!(matches!(err, CommandError::Spawn { .. }));
    }
}
