use std::path::Path;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use super::WorkspaceError;

/// Runs `git` subprocesses in one directory with a hard timeout.
///
/// `secret` (the access token) is scrubbed from every command line and error
/// message that leaves this module.
#[derive(Debug, Clone)]
pub struct Git {
    timeout: Duration,
    secret: String,
}

impl Git {
    pub fn new(timeout: Duration, secret: &str) -> Self {
        Self {
            timeout,
            secret: secret.to_string(),
        }
    }

    /// Run and return trimmed stdout; non-zero exit is an error.
    pub async fn run(&self, dir: &Path, args: &[&str]) -> Result<String, WorkspaceError> {
        let output = self.output(dir, args).await?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let err = WorkspaceError::Git {
            command: self.describe(args),
            code: output.status.code().unwrap_or(-1),
            stderr: self.redact(stderr.trim()),
        };
        warn!(error = %err, "git command failed");
        Err(err)
    }

    /// Run and report only whether it succeeded, e.g. for `rev-parse --verify`.
    pub async fn succeeds(&self, dir: &Path, args: &[&str]) -> Result<bool, WorkspaceError> {
        Ok(self.output(dir, args).await?.status.success())
    }

    async fn output(&self, dir: &Path, args: &[&str]) -> Result<Output, WorkspaceError> {
        debug!(command = %self.describe(args), dir = %dir.display(), "running git");
        let child = Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout, child).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(WorkspaceError::Timeout {
                command: self.describe(args),
                secs: self.timeout.as_secs(),
            }),
        }
    }

    fn describe(&self, args: &[&str]) -> String {
        self.redact(&format!("git {}", args.join(" ")))
    }

    pub fn redact(&self, text: &str) -> String {
        if self.secret.is_empty() {
            text.to_string()
        } else {
            text.replace(&self.secret, "***")
        }
    }
}
