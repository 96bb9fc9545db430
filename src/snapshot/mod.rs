//! Snapshot executor abstraction.
//!
//! A *snapshot* is an immutable filesystem state: a cloned repository, the
//! output directory of a command, or a subset copied out of another
//! snapshot. Snapshots are produced and read by a [`SnapshotExecutor`]. The
//! resolver only ever holds [`Snapshot`] handles and never looks inside them,
//! so any backend (a container build engine, a remote build service, or the
//! bundled [`local::LocalGitExecutor`]) can be plugged in.
//!
//! # Operations
//!
//! | operation          | purpose                                               |
//! |--------------------|-------------------------------------------------------|
//! | `clone_snapshot`   | repository content at a ref, optionally with `.git`   |
//! | `run_in_snapshot`  | run a command with mounts, return one mount's result  |
//! | `read_file`        | materialize a snapshot and read one file              |
//! | `scoped_copy`      | copy a subdirectory of a snapshot onto a base         |
//! | `scratch`          | the empty base snapshot                               |
//!
//! Executor errors are plain [`anyhow::Error`]s; the resolver maps them onto
//! the typed error of the stage that issued the call.

pub mod local;

use crate::core::GitCtxError;
use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use local::LocalGitExecutor;

/// Opaque, shared, immutable filesystem snapshot handle.
///
/// Cloning the handle shares the underlying state; the state lives as long
/// as its longest-lived holder. Executors attach whatever payload they need
/// and recover it with [`Snapshot::payload`].
#[derive(Clone)]
pub struct Snapshot {
    inner: Arc<SnapshotInner>,
}

struct SnapshotInner {
    description: String,
    payload: Box<dyn Any + Send + Sync>,
}

impl Snapshot {
    /// Wrap an executor-specific payload.
    pub fn new<T: Any + Send + Sync>(description: impl Into<String>, payload: T) -> Self {
        Self {
            inner: Arc::new(SnapshotInner {
                description: description.into(),
                payload: Box::new(payload),
            }),
        }
    }

    /// Human-readable description for logs.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.inner.description
    }

    /// The executor payload, if it has type `T`.
    #[must_use]
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.inner.payload.downcast_ref::<T>()
    }

    /// Whether two handles refer to the same snapshot instance.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot").field("description", &self.inner.description).finish()
    }
}

/// Target platform for snapshot operations, e.g. `linux/amd64`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Platform(String);

impl Platform {
    pub fn new(platform: impl Into<String>) -> Self {
        Self(platform.into())
    }

    /// The platform of the host this process runs on.
    #[must_use]
    pub fn native() -> Self {
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            other => other,
        };
        Self(format!("{}/{}", std::env::consts::OS, arch))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request for a repository snapshot at a ref.
#[derive(Debug, Clone)]
pub struct CloneRequest {
    /// Clone URL (may carry credentials; never log it unscrubbed)
    pub url: String,
    /// Branch, tag or commit; empty for the remote default branch
    pub git_ref: String,
    /// Keep the `.git` directory instead of producing a bare working tree
    pub keep_git_dir: bool,
    /// `known_hosts` lines to trust for SSH remotes
    pub key_scans: Vec<String>,
    pub platform: Platform,
    /// Display name of the operation
    pub name: String,
}

/// A snapshot mounted into a command.
#[derive(Debug, Clone)]
pub struct Mount {
    /// Absolute mount point, e.g. `/git-src`
    pub target: String,
    pub source: Snapshot,
    pub readonly: bool,
}

/// Request to run a command over a set of mounts.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Image providing the command's root filesystem
    pub image: String,
    pub args: Vec<String>,
    /// Working directory (usually one of the mount targets)
    pub dir: String,
    pub mounts: Vec<Mount>,
    /// Mount target whose final contents become the returned snapshot
    pub output: String,
    /// Run with a read-only root filesystem
    pub readonly_rootfs: bool,
    pub platform: Platform,
    /// Display name of the operation
    pub name: String,
}

/// Backend that materializes snapshots.
#[async_trait]
pub trait SnapshotExecutor: Send + Sync {
    /// Snapshot of a repository at a ref.
    async fn clone_snapshot(&self, request: CloneRequest) -> anyhow::Result<Snapshot>;

    /// Run a command and return the final state of `request.output`.
    async fn run_in_snapshot(&self, request: RunRequest) -> anyhow::Result<Snapshot>;

    /// Read one file out of a snapshot.
    ///
    /// Returns `Ok(None)` when the file does not exist, so callers can tell a
    /// missing file from an empty one.
    async fn read_file(&self, snapshot: &Snapshot, path: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Copy `sub_dir` of `source` onto the root of `dest`.
    async fn scoped_copy(
        &self,
        source: &Snapshot,
        sub_dir: &str,
        dest: &Snapshot,
    ) -> anyhow::Result<Snapshot>;

    /// The empty base snapshot.
    fn scratch(&self) -> Snapshot;
}

/// Await an executor call unless the session is cancelled first.
///
/// Executor errors are mapped with `map_err`; cancellation always yields
/// [`GitCtxError::Cancelled`] and drops the executor future.
pub async fn cancellable<T, F>(
    cancel: &CancellationToken,
    call: F,
    map_err: impl FnOnce(anyhow::Error) -> GitCtxError,
) -> Result<T, GitCtxError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(GitCtxError::Cancelled),
        result = call => result.map_err(map_err),
    }
}
