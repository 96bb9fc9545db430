//! Host-directory snapshot executor backed by the system `git` binary.
//!
//! Every snapshot is a directory below the executor's work directory.
//! Nothing is ever modified after it has been handed out as a snapshot:
//! writable mounts of non-empty snapshots are copied first.
//!
//! Commands run through `sh -c` on the host. Images are not available, so
//! the `image` of a [`RunRequest`] is ignored, and mount points are rebased
//! onto host directories by rewriting them in the command arguments and the
//! working directory.

use super::{CloneRequest, Mount, RunRequest, Snapshot, SnapshotExecutor};
use crate::constants::GIT_CLONE_TIMEOUT;
use crate::git::command_builder::GitCommand;
use crate::git::strip_auth_from_url;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::process::Command;
use walkdir::WalkDir;

#[derive(Debug, Clone)]
enum LocalSnapshot {
    Empty,
    Dir(PathBuf),
}

/// Executor that realises snapshots as host directories.
#[derive(Debug)]
pub struct LocalGitExecutor {
    work_dir: PathBuf,
    counter: AtomicU64,
}

impl LocalGitExecutor {
    /// Create an executor storing its snapshots below `work_dir`.
    ///
    /// The directory is created if needed. Removing it is the caller's job,
    /// typically through [`crate::utils::cleanup::CleanupCollection`].
    ///
    /// # Errors
    ///
    /// Fails when `git` is not on `PATH` or the directory cannot be created.
    pub fn new(work_dir: impl Into<PathBuf>) -> Result<Self> {
        which::which("git").map_err(|_| anyhow::anyhow!("git was not found in PATH"))?;
        let work_dir = work_dir.into();
        std::fs::create_dir_all(&work_dir).with_context(|| {
            format!("Failed to create snapshot work directory {}", work_dir.display())
        })?;
        Ok(Self {
            work_dir,
            counter: AtomicU64::new(0),
        })
    }

    /// Directory holding all snapshots of this executor.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Host directory backing a snapshot of this executor.
    ///
    /// `None` for the empty scratch snapshot and for foreign snapshots.
    #[must_use]
    pub fn snapshot_dir(snapshot: &Snapshot) -> Option<&Path> {
        match snapshot.payload::<LocalSnapshot>()? {
            LocalSnapshot::Dir(dir) => Some(dir),
            LocalSnapshot::Empty => None,
        }
    }

    fn fresh_dir(&self, kind: &str) -> PathBuf {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        self.work_dir.join(format!("{kind}-{n}"))
    }

    fn local(snapshot: &Snapshot) -> Result<&LocalSnapshot> {
        snapshot.payload::<LocalSnapshot>().ok_or_else(|| {
            anyhow::anyhow!("snapshot {} was not created by the local executor", snapshot.description())
        })
    }

    async fn writable_copy(&self, mount: &Mount) -> Result<PathBuf> {
        let dir = self.fresh_dir("mount");
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create mount directory {}", dir.display()))?;
        if let LocalSnapshot::Dir(src) = Self::local(&mount.source)? {
            copy_dir(src.clone(), dir.clone()).await?;
        }
        Ok(dir)
    }
}

#[async_trait]
impl SnapshotExecutor for LocalGitExecutor {
    async fn clone_snapshot(&self, request: CloneRequest) -> Result<Snapshot> {
        let dir = self.fresh_dir("clone");
        let shown_url = strip_auth_from_url(&request.url);
        tracing::debug!(target: "gitctx::git", "{} -> {}", request.name, dir.display());

        let known_hosts = if request.key_scans.is_empty() {
            None
        } else {
            let path = self.fresh_dir("known_hosts");
            let mut content = request.key_scans.join("\n");
            content.push('\n');
            tokio::fs::write(&path, content)
                .await
                .with_context(|| format!("Failed to write known hosts to {}", path.display()))?;
            Some(path)
        };

        let mut clone = GitCommand::clone(&request.url, &dir)
            .with_timeout(Some(GIT_CLONE_TIMEOUT))
            .with_context(request.name.clone());
        if let Some(path) = &known_hosts {
            clone = clone.known_hosts_file(path);
        }
        clone.execute_success().await.with_context(|| format!("Failed to clone {shown_url}"))?;

        if !request.git_ref.is_empty() {
            GitCommand::checkout(&request.git_ref)
                .current_dir(&dir)
                .with_context(request.name.clone())
                .execute_success()
                .await
                .with_context(|| format!("Ref '{}' not found in {shown_url}", request.git_ref))?;
        }

        if !request.keep_git_dir {
            let git_dir = dir.join(".git");
            tokio::fs::remove_dir_all(&git_dir)
                .await
                .with_context(|| format!("Failed to remove {}", git_dir.display()))?;
        }

        Ok(Snapshot::new(request.name, LocalSnapshot::Dir(dir)))
    }

    async fn run_in_snapshot(&self, request: RunRequest) -> Result<Snapshot> {
        tracing::debug!(
            target: "gitctx::git",
            "{} (image {} ignored by local executor)",
            request.name,
            request.image
        );

        // Longest targets first so "/dest" never rewrites part of "/destination".
        let mut mounts = request.mounts.clone();
        mounts.sort_by(|a, b| b.target.len().cmp(&a.target.len()));

        let mut rebased: Vec<(String, PathBuf)> = Vec::with_capacity(mounts.len());
        for mount in &mounts {
            let host_dir = match (Self::local(&mount.source)?, mount.readonly) {
                (LocalSnapshot::Dir(dir), true) => dir.clone(),
                _ => self.writable_copy(mount).await?,
            };
            rebased.push((mount.target.clone(), host_dir));
        }

        let rewrite = |value: &str| {
            let mut value = value.to_string();
            for (target, host_dir) in &rebased {
                value = value.replace(target.as_str(), &host_dir.display().to_string());
            }
            value
        };

        let args: Vec<String> = request.args.iter().map(|a| rewrite(a)).collect();
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("empty command for {}", request.name))?;
        let program = if program == "/bin/sh" {
            "sh"
        } else {
            program.as_str()
        };

        let output = Command::new(program)
            .args(rest)
            .current_dir(rewrite(&request.dir))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", request.name))?;

        if !output.status.success() {
            return Err(anyhow::anyhow!(
                "{} exited with {:?}: {}",
                request.name,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let out_dir = rebased
            .iter()
            .find(|(target, _)| *target == request.output)
            .map(|(_, dir)| dir.clone())
            .ok_or_else(|| anyhow::anyhow!("output {} is not a mount", request.output))?;

        Ok(Snapshot::new(request.name, LocalSnapshot::Dir(out_dir)))
    }

    async fn read_file(&self, snapshot: &Snapshot, path: &str) -> Result<Option<Vec<u8>>> {
        let LocalSnapshot::Dir(root) = Self::local(snapshot)? else {
            return Ok(None);
        };
        let relative = safe_relative(path)?;
        let full = root.join(relative);
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", full.display())),
        }
    }

    async fn scoped_copy(&self, source: &Snapshot, sub_dir: &str, dest: &Snapshot) -> Result<Snapshot> {
        let LocalSnapshot::Dir(root) = Self::local(source)? else {
            return Err(anyhow::anyhow!("cannot copy {sub_dir} out of an empty snapshot"));
        };
        let from = root.join(safe_relative(sub_dir)?);
        if !from.is_dir() {
            return Err(anyhow::anyhow!("{sub_dir} is not a directory in {}", source.description()));
        }

        let dir = self.fresh_dir("copy");
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        if let LocalSnapshot::Dir(base) = Self::local(dest)? {
            copy_dir(base.clone(), dir.clone()).await?;
        }
        copy_dir(from, dir.clone()).await?;

        Ok(Snapshot::new(format!("{} [{sub_dir}]", source.description()), LocalSnapshot::Dir(dir)))
    }

    fn scratch(&self) -> Snapshot {
        Snapshot::new("scratch", LocalSnapshot::Empty)
    }
}

/// Reject absolute paths and `..` so reads stay inside the snapshot.
fn safe_relative(path: &str) -> Result<PathBuf> {
    let path = Path::new(path);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return Err(anyhow::anyhow!("path {} escapes the snapshot", path.display())),
        }
    }
    Ok(out)
}

async fn copy_dir(from: PathBuf, to: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        for entry in WalkDir::new(&from) {
            let entry = entry.with_context(|| format!("Failed to walk {}", from.display()))?;
            let relative = entry.path().strip_prefix(&from)?;
            let target = to.join(relative);
            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&target)
                    .with_context(|| format!("Failed to create {}", target.display()))?;
            } else if entry.file_type().is_file() {
                std::fs::copy(entry.path(), &target)
                    .with_context(|| format!("Failed to copy to {}", target.display()))?;
            }
        }
        Ok(())
    })
    .await
    .context("copy task panicked")?
}
