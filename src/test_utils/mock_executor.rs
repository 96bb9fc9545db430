//! In-memory snapshot executor for tests.
//!
//! [`MockExecutor`] serves repositories described by [`MockCommit`]s and
//! records every call, so tests can assert how often the resolver cloned,
//! which subdirectories it copied and which files it read. Clones can be
//! slowed down or made to fail, and metadata outputs can be withheld.

use crate::constants::GIT_SRC_MOUNT;
use crate::snapshot::{CloneRequest, RunRequest, Snapshot, SnapshotExecutor};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One commit of a mock repository.
#[derive(Debug, Clone, Default)]
pub struct MockCommit {
    pub hash: String,
    /// Raw `git-branch` output
    pub branch: String,
    /// Raw `git-tags` output
    pub tags: String,
    pub timestamp: String,
    pub author: String,
    pub body: String,
    /// Repository content by relative path
    pub files: BTreeMap<String, Vec<u8>>,
}

impl MockCommit {
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            timestamp: "1700000000".to_string(),
            author: "dev@example.com".to_string(),
            ..Self::default()
        }
    }

    pub fn branch(mut self, branch: &str) -> Self {
        self.branch = format!("{branch}\n");
        self
    }

    pub fn tags(mut self, tags: &str) -> Self {
        self.tags = tags.to_string();
        self
    }

    pub fn body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    pub fn file(mut self, path: &str, content: &str) -> Self {
        self.files.insert(path.to_string(), content.as_bytes().to_vec());
        self
    }

    fn short_hash(&self) -> String {
        self.hash.chars().take(8).collect()
    }
}

/// A recorded executor call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Clone {
        url: String,
        git_ref: String,
    },
    Run {
        name: String,
    },
    ReadFile {
        path: String,
    },
    ScopedCopy {
        sub_dir: String,
    },
}

#[derive(Debug, Clone, Default)]
struct MockSnapshot {
    commit: Option<Arc<MockCommit>>,
    files: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Default)]
struct MockRepo {
    refs: HashMap<String, Arc<MockCommit>>,
    default_ref: String,
}

/// Recording in-memory [`SnapshotExecutor`].
#[derive(Debug, Default)]
pub struct MockExecutor {
    repos: Mutex<HashMap<String, MockRepo>>,
    calls: Mutex<Vec<MockCall>>,
    clones: AtomicUsize,
    failing_clones: AtomicUsize,
    clone_delay: Mutex<Option<Duration>>,
    withheld: Mutex<HashSet<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `commit` for `url` at `git_ref`. The first ref added for a URL is
    /// its default branch.
    pub fn with_ref(self, url: &str, git_ref: &str, commit: MockCommit) -> Self {
        self.add_ref(url, git_ref, commit);
        self
    }

    pub fn add_ref(&self, url: &str, git_ref: &str, commit: MockCommit) {
        let mut repos = lock(&self.repos);
        let repo = repos.entry(url.to_string()).or_default();
        if repo.default_ref.is_empty() {
            repo.default_ref = git_ref.to_string();
        }
        repo.refs.insert(git_ref.to_string(), Arc::new(commit));
    }

    /// Delay every clone, widening the window for concurrent callers.
    pub fn with_clone_delay(self, delay: Duration) -> Self {
        *lock(&self.clone_delay) = Some(delay);
        self
    }

    /// Make the next `n` clones fail.
    pub fn fail_next_clones(&self, n: usize) {
        self.failing_clones.store(n, Ordering::SeqCst);
    }

    /// Stop producing the metadata output `field` (e.g. `git-ts`).
    pub fn withhold_field(&self, field: &str) {
        lock(&self.withheld).insert(field.to_string());
    }

    pub fn restore_fields(&self) {
        lock(&self.withheld).clear();
    }

    /// Number of clone requests served or failed.
    pub fn clone_count(&self) -> usize {
        self.clones.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.calls).clone()
    }

    /// Sub directories passed to `scoped_copy`, in call order.
    pub fn scoped_copies(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MockCall::ScopedCopy {
                    sub_dir,
                } => Some(sub_dir),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: MockCall) {
        lock(&self.calls).push(call);
    }

    fn find_commit(&self, url: &str, git_ref: &str) -> Option<Arc<MockCommit>> {
        let repos = lock(&self.repos);
        let repo = repos.get(url)?;
        let git_ref = if git_ref.is_empty() {
            repo.default_ref.as_str()
        } else {
            git_ref
        };
        repo.refs
            .get(git_ref)
            .cloned()
            .or_else(|| repo.refs.values().find(|c| c.hash == git_ref).cloned())
    }

    fn payload(snapshot: &Snapshot) -> Result<&MockSnapshot> {
        snapshot
            .payload::<MockSnapshot>()
            .ok_or_else(|| anyhow!("foreign snapshot {}", snapshot.description()))
    }
}

#[async_trait]
impl SnapshotExecutor for MockExecutor {
    async fn clone_snapshot(&self, request: CloneRequest) -> Result<Snapshot> {
        self.record(MockCall::Clone {
            url: request.url.clone(),
            git_ref: request.git_ref.clone(),
        });
        self.clones.fetch_add(1, Ordering::SeqCst);

        let delay = *lock(&self.clone_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .failing_clones
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(anyhow!("injected clone failure"));
        }

        let commit = self
            .find_commit(&request.url, &request.git_ref)
            .ok_or_else(|| anyhow!("couldn't find remote ref {}", request.git_ref))?;
        Ok(Snapshot::new(
            request.name,
            MockSnapshot {
                files: commit.files.clone(),
                commit: Some(commit),
            },
        ))
    }

    async fn run_in_snapshot(&self, request: RunRequest) -> Result<Snapshot> {
        self.record(MockCall::Run {
            name: request.name.clone(),
        });
        let source = request
            .mounts
            .iter()
            .find(|m| m.target == GIT_SRC_MOUNT)
            .ok_or_else(|| anyhow!("no {GIT_SRC_MOUNT} mount"))?;
        let commit = Self::payload(&source.source)?
            .commit
            .clone()
            .ok_or_else(|| anyhow!("{GIT_SRC_MOUNT} is not a repository"))?;

        let withheld = lock(&self.withheld).clone();
        let outputs = [
            ("git-hash", format!("{}\n", commit.hash)),
            ("git-short-hash", format!("{}\n", commit.short_hash())),
            ("git-branch", commit.branch.clone()),
            ("git-tags", commit.tags.clone()),
            ("git-ts", format!("{}\n", commit.timestamp)),
            ("git-author", format!("{}\n", commit.author)),
            ("git-body", commit.body.clone()),
        ];
        let files = outputs
            .into_iter()
            .filter(|(name, _)| !withheld.contains(*name))
            .map(|(name, content)| (name.to_string(), content.into_bytes()))
            .collect();

        Ok(Snapshot::new(
            request.name,
            MockSnapshot {
                commit: None,
                files,
            },
        ))
    }

    async fn read_file(&self, snapshot: &Snapshot, path: &str) -> Result<Option<Vec<u8>>> {
        self.record(MockCall::ReadFile {
            path: path.to_string(),
        });
        Ok(Self::payload(snapshot)?.files.get(path).cloned())
    }

    async fn scoped_copy(&self, source: &Snapshot, sub_dir: &str, dest: &Snapshot) -> Result<Snapshot> {
        self.record(MockCall::ScopedCopy {
            sub_dir: sub_dir.to_string(),
        });
        let prefix = format!("{}/", sub_dir.trim_end_matches('/'));
        let mut files = Self::payload(dest)?.files.clone();
        let mut found = false;
        for (path, content) in &Self::payload(source)?.files {
            if let Some(rest) = path.strip_prefix(&prefix) {
                files.insert(rest.to_string(), content.clone());
                found = true;
            }
        }
        if !found {
            return Err(anyhow!("{sub_dir} not found"));
        }
        Ok(Snapshot::new(
            format!("copy of {sub_dir}"),
            MockSnapshot {
                commit: None,
                files,
            },
        ))
    }

    fn scratch(&self) -> Snapshot {
        Snapshot::new("scratch", MockSnapshot::default())
    }
}

/// Read a file from a snapshot created by a [`MockExecutor`].
pub fn mock_snapshot_file(snapshot: &Snapshot, path: &str) -> Option<Vec<u8>> {
    snapshot.payload::<MockSnapshot>().and_then(|s| s.files.get(path).cloned())
}
