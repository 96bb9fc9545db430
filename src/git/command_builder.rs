//! Type-safe builder for running the system `git` binary.
//!
//! Only the local snapshot executor shells out to git; everything else talks
//! to the executor trait. The builder keeps argument passing, timeouts,
//! environment and logging consistent across those calls.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::git::strip_auth_from_url;

/// Builder for a single git invocation.
///
/// ```rust,no_run
/// use gitctx::git::command_builder::GitCommand;
///
/// # async fn example() -> anyhow::Result<()> {
/// GitCommand::checkout("v1.0")
///     .current_dir("/tmp/repo")
///     .with_context("GIT CLONE github.com/acme/repo")
///     .execute_success()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct GitCommand {
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    env_vars: Vec<(String, String)>,
    timeout_duration: Option<Duration>,
    context: Option<String>,
}

impl Default for GitCommand {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            current_dir: None,
            env_vars: Vec::new(),
            // Default timeout of 5 minutes for most git operations
            timeout_duration: Some(Duration::from_secs(300)),
            context: None,
        }
    }
}

impl GitCommand {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run git with `-C <dir>` so the process working directory is irrelevant.
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
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
        self.env_vars.push((key.into(), value.into()));
        self
    }

    pub const fn with_timeout(mut self, duration: Option<Duration>) -> Self {
        self.timeout_duration = duration;
        self
    }

    /// Label used in log lines for this command.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Trust exactly the given `known_hosts` file for SSH remotes.
    pub fn known_hosts_file(self, path: impl AsRef<Path>) -> Self {
        let ssh = format!(
            "ssh -o UserKnownHostsFile={} -o StrictHostKeyChecking=yes",
            path.as_ref().display()
        );
        self.env("GIT_SSH_COMMAND", ssh)
    }

    fn display_args(full_args: &[String]) -> String {
        full_args.iter().map(|a| strip_auth_from_url(a)).collect::<Vec<_>>().join(" ")
    }

    /// Run the command to completion.
    ///
    /// # Errors
    ///
    /// Fails when git cannot be spawned, exits non-zero, or exceeds the
    /// timeout. The error message carries git's stderr.
    pub async fn execute_success(self) -> Result<()> {
        let start = std::time::Instant::now();
        let mut cmd = Command::new("git");

        let mut full_args = Vec::new();
        if let Some(ref dir) = self.current_dir {
            full_args.push("-C".to_string());
            full_args.push(dir.display().to_string());
        }
        full_args.extend(self.args.iter().cloned());
        let shown = Self::display_args(&full_args);

        cmd.args(&full_args);
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        for (key, value) in &self.env_vars {
            tracing::trace!(target: "gitctx::git", "Setting env var: {}", key);
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        match &self.context {
            Some(ctx) => tracing::debug!(target: "gitctx::git", "({}) Executing: git {}", ctx, shown),
            None => tracing::debug!(target: "gitctx::git", "Executing: git {}", shown),
        }

        let output_future = cmd.output();
        let output = match self.timeout_duration {
            Some(duration) => timeout(duration, output_future)
                .await
                .map_err(|_| {
                    anyhow::anyhow!(
                        "git {} timed out after {} seconds",
                        shown,
                        duration.as_secs()
                    )
                })?
                .with_context(|| format!("Failed to execute git {shown}"))?,
            None => output_future.await.with_context(|| format!("Failed to execute git {shown}"))?,
        };

        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::debug!(
                target: "gitctx::git",
                "Command failed with exit code {:?}: {}",
                output.status.code(),
                stderr.trim()
            );
            let detail = if stderr.trim().is_empty() {
                stdout.trim()
            } else {
                stderr.trim()
            };
            return Err(anyhow::anyhow!("git {} failed: {}", shown, detail));
        }

        let elapsed = start.elapsed();
        if elapsed.as_secs() > 1 {
            tracing::info!(target: "gitctx::git::perf", "git {} took {:.2}s", shown, elapsed.as_secs_f64());
        }

        Ok(())
    }
}

// Convenience builders for the operations the local executor needs

impl GitCommand {
    /// Full clone (history and tags are needed for metadata extraction).
    pub fn clone(url: &str, target: impl AsRef<Path>) -> Self {
        Self::new().args([
            "clone".to_string(),
            "--quiet".to_string(),
            url.to_string(),
            target.as_ref().display().to_string(),
        ])
    }

    /// Checkout of a branch, tag or commit (tags and commits leave HEAD detached).
    pub fn checkout(ref_name: &str) -> Self {
        Self::new().args(["checkout", "--quiet", ref_name])
    }
}
