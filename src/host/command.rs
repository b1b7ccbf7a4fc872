//! External command execution seam.
//!
//! Host probing and the hypervisor CLI fallback shell out to system tools.
//! All of that goes through [`CommandRunner`] so tests can substitute a
//! scripted runner and the rest of the crate never touches
//! `tokio::process` directly.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Captured result of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal.
    pub status: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr.
    #[must_use]
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns true if the command exited with status 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Best available failure description.
    #[must_use]
    pub fn failure_message(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        match self.status {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Runs external programs.
///
/// Implementations hold no per-call mutable state, so a single runner may be
/// shared across concurrent workloads.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args`, bounded by `limit` when given.
    ///
    /// Returns `Err` only when the program could not be spawned or timed out;
    /// a non-zero exit is reported through [`CommandOutput::status`].
    async fn run(
        &self,
        program: &str,
        args: &[String],
        limit: Option<Duration>,
    ) -> Result<CommandOutput>;

    /// Returns true if `program` can be found on this host.
    fn is_installed(&self, program: &str) -> bool;
}

/// Runs commands with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        limit: Option<Duration>,
    ) -> Result<CommandOutput> {
        debug!("exec {} {}", program, args.join(" "));
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match limit {
            Some(duration) => timeout(duration, cmd.output())
                .await
                .map_err(|_| Error::Timeout {
                    operation: format!("{} {}", program, args.join(" ")),
                    duration,
                })?,
            None => cmd.output().await,
        }
        .map_err(|e| Error::CommandFailed {
            command: program.to_string(),
            reason: e.to_string(),
        })?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn is_installed(&self, program: &str) -> bool {
        find_in_path(program).is_some()
    }
}

/// Runs a command and returns its stdout, mapping a non-zero exit to
/// [`Error::CommandFailed`].
pub async fn run_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[String],
    limit: Option<Duration>,
) -> Result<String> {
    let output = runner.run(program, args, limit).await?;
    if !output.success() {
        return Err(Error::CommandFailed {
            command: format!("{} {}", program, args.join(" ")),
            reason: output.failure_message(),
        });
    }
    Ok(output.stdout)
}

/// Locates `program` on `PATH`.
///
/// Absolute or relative paths containing a separator are checked directly.
pub fn find_in_path(program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        return path.is_file().then_some(path);
    }
    std::env::var("PATH").ok().and_then(|path| {
        path.split(':')
            .filter(|dir| !dir.is_empty())
            .map(|dir| std::path::Path::new(dir).join(program))
            .find(|p| p.is_file())
    })
}

/// Builds an owned argument vector.
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}
