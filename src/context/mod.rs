//! Build contexts handed to callers.
//!
//! A target's build context is the content of its directory at the resolved
//! commit. For the repository root that is the project snapshot itself; for
//! a subdirectory it is a copy of that subdirectory onto an empty base.

use crate::core::{GitCtxError, Stage};
use crate::snapshot::{Snapshot, SnapshotExecutor, cancellable};
use tokio_util::sync::CancellationToken;

/// Produces the build context of a target.
#[derive(Debug, Clone)]
pub enum ContextFactory {
    /// The context is an already constructed snapshot.
    Preconstructed(Snapshot),
}

impl ContextFactory {
    /// Build the context of `sub_dir` inside `project`.
    ///
    /// `"."` returns the project snapshot without calling the executor.
    ///
    /// # Errors
    ///
    /// [`GitCtxError::ContextCopyError`] when the scoped copy fails, or
    /// [`GitCtxError::Cancelled`].
    pub async fn for_sub_dir(
        executor: &dyn SnapshotExecutor,
        cancel: &CancellationToken,
        project: &Snapshot,
        sub_dir: &str,
        reference: &str,
    ) -> Result<Self, GitCtxError> {
        if sub_dir == "." {
            return Ok(Self::Preconstructed(project.clone()));
        }

        let scratch = executor.scratch();
        let copy = cancellable(cancel, executor.scoped_copy(project, sub_dir, &scratch), |e| {
            GitCtxError::ContextCopyError {
                reference: reference.to_string(),
                sub_dir: sub_dir.to_string(),
                reason: format!("{e:#}"),
            }
            .in_stage(Stage::ScopeContext, reference)
        })
        .await?;

        Ok(Self::Preconstructed(copy))
    }

    /// The snapshot holding the context.
    #[must_use]
    pub const fn snapshot(&self) -> &Snapshot {
        match self {
            Self::Preconstructed(snapshot) => snapshot,
        }
    }
}
