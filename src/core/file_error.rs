//! File operation context for scratch-copy errors.
//!
//! Local file operations (creating scratch directories, writing build-file
//! copies) report which operation failed on which path, so the error chain
//! points at the exact file instead of a bare `io::Error`.

use crate::core::error::GitCtxError;
use std::path::Path;

/// Types of file operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOperation {
    /// Reading a file completely
    Read,
    /// Writing a file
    Write,
    /// Creating a directory
    CreateDir,
    /// Removing a directory tree
    RemoveDir,
    /// Changing file permissions
    SetPermissions,
}

impl std::fmt::Display for FileOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileOperation::Read => write!(f, "reading"),
            FileOperation::Write => write!(f, "writing"),
            FileOperation::CreateDir => write!(f, "creating directory"),
            FileOperation::RemoveDir => write!(f, "removing directory"),
            FileOperation::SetPermissions => write!(f, "setting permissions on"),
        }
    }
}

/// Extension trait that attaches a [`FileOperation`] and path to IO results.
///
/// ```rust,no_run
/// use gitctx::core::file_error::{FileOperation, FileResultExt};
/// use std::path::Path;
///
/// # fn example() -> Result<(), gitctx::core::GitCtxError> {
/// let path = Path::new("/tmp/gitctx-git/Earthfile");
/// std::fs::write(path, b"VERSION 0.7\n").with_file_context(FileOperation::Write, path)?;
/// # Ok(())
/// # }
/// ```
pub trait FileResultExt<T> {
    /// Convert an IO error into [`GitCtxError::FileSystemError`].
    fn with_file_context(self, operation: FileOperation, path: &Path) -> Result<T, GitCtxError>;
}

impl<T> FileResultExt<T> for std::io::Result<T> {
    fn with_file_context(self, operation: FileOperation, path: &Path) -> Result<T, GitCtxError> {
        self.map_err(|e| GitCtxError::FileSystemError {
            operation,
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}
