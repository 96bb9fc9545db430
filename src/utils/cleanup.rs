//! Session teardown actions.
//!
//! Resources that outlive the call that created them, such as scratch
//! directories holding build-file copies, register a release action here.
//! [`CleanupCollection::close`] runs the actions in reverse registration
//! order when the session ends.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use tempfile::TempDir;

type ReleaseFn = Box<dyn FnOnce() -> Result<()> + Send>;

/// Ordered collection of release actions.
#[derive(Default)]
pub struct CleanupCollection {
    actions: Mutex<Vec<ReleaseFn>>,
}

impl CleanupCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action to run at teardown.
    pub fn add(&self, release: impl FnOnce() -> Result<()> + Send + 'static) {
        self.actions.lock().unwrap_or_else(PoisonError::into_inner).push(Box::new(release));
    }

    /// Take ownership of `dir` and remove it at teardown.
    ///
    /// The directory is detached from its `TempDir` guard, so it survives
    /// until [`close`](Self::close) runs. A collection that is dropped
    /// without being closed leaves it in place.
    pub fn add_dir(&self, dir: TempDir) -> PathBuf {
        let path = dir.keep();
        let owned = path.clone();
        self.add(move || {
            std::fs::remove_dir_all(&owned)
                .with_context(|| format!("Failed to remove {}", owned.display()))
        });
        path
    }

    /// Number of actions not yet run.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every registered action, newest first.
    ///
    /// All actions run even when some fail; failures are logged and the
    /// first one is returned. The collection is empty afterwards, so a second
    /// call is a no-op.
    pub fn close(&self) -> Result<()> {
        let actions = std::mem::take(&mut *self.actions.lock().unwrap_or_else(PoisonError::into_inner));
        let mut first_error = None;
        for action in actions.into_iter().rev() {
            if let Err(e) = action() {
                tracing::warn!("Cleanup action failed: {:#}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for CleanupCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupCollection").field("pending", &self.len()).finish()
    }
}
