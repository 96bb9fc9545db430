//! Core types shared across gitctx: the error taxonomy and file-operation
//! error context.

pub mod error;
pub mod file_error;

pub use error::{ErrorContext, GitCtxError, Stage, user_friendly_error};
pub use file_error::{FileOperation, FileResultExt};

/// Result type used inside the resolution pipeline.
pub type Result<T, E = GitCtxError> = std::result::Result<T, E>;
