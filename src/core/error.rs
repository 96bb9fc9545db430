//! Error handling for gitctx
//!
//! The error system follows two rules:
//! 1. **Strongly-typed errors** ([`GitCtxError`]) for every failure inside the
//!    resolution pipeline, so callers and tests can match on the failing stage
//! 2. **User-friendly messages** ([`ErrorContext`]) with an actionable
//!    suggestion when an error reaches the command line
//!
//! # Error Categories
//!
//! - **Reference handling**: [`GitCtxError::InvalidReference`],
//!   [`GitCtxError::UnexpectedLocalReference`], [`GitCtxError::ResolutionError`]
//! - **Snapshot execution**: [`GitCtxError::CloneError`],
//!   [`GitCtxError::MetadataReadError`], [`GitCtxError::ContextCopyError`]
//! - **Build files**: [`GitCtxError::BuildFileNotFound`],
//!   [`GitCtxError::FeatureParseError`], [`GitCtxError::FileSystemError`]
//! - **Session**: [`GitCtxError::Cancelled`], [`GitCtxError::ConfigError`]
//!
//! Errors raised inside a cached computation are wrapped in
//! [`GitCtxError::Stage`], which names the stage and the cache key. The type is
//! `Clone` because a single failed computation is reported to every caller
//! that was waiting on it.
//!
//! # Examples
//!
//! ```rust,no_run
//! use gitctx::core::{GitCtxError, Stage, user_friendly_error};
//!
//! let error = GitCtxError::Cancelled.in_stage(Stage::Clone, "https://github.com/o/r.git#main");
//! assert!(error.is_cancelled());
//!
//! let ctx = user_friendly_error(anyhow::Error::from(error));
//! ctx.display();
//! ```

use crate::core::file_error::FileOperation;
use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// Stage of the resolution pipeline an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Mapping the reference locator to a clone URL
    ResolveUrl,
    /// Cloning the repository into a snapshot
    Clone,
    /// Running and reading the metadata extraction step
    ExtractMetadata,
    /// Searching and copying the build-definition file
    LocateBuildFile,
    /// Parsing feature flags of the build-definition file
    ParseFeatures,
    /// Restricting the build context to a subdirectory
    ScopeContext,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ResolveUrl => "resolve URL",
            Self::Clone => "clone",
            Self::ExtractMetadata => "extract metadata",
            Self::LocateBuildFile => "locate build file",
            Self::ParseFeatures => "parse features",
            Self::ScopeContext => "scope context",
        };
        f.write_str(name)
    }
}

/// The main error type for gitctx operations
///
/// # Examples
///
/// ```rust,no_run
/// use gitctx::core::GitCtxError;
///
/// fn handle_error(error: &GitCtxError) {
///     match error.root() {
///         GitCtxError::BuildFileNotFound { dir, .. } => {
///             eprintln!("No build file in {dir}");
///         }
///         GitCtxError::Cancelled => {}
///         other => eprintln!("Unexpected error: {other}"),
///     }
/// }
/// ```
#[derive(Error, Debug)]
pub enum GitCtxError {
    /// The reference string could not be parsed.
    #[error("Invalid reference '{reference}': {reason}")]
    InvalidReference {
        /// The offending reference string
        reference: String,
        /// Why it was rejected
        reason: String,
    },

    /// A local reference was passed where a remote one is required.
    #[error("Unexpected local reference {reference}")]
    UnexpectedLocalReference {
        /// The local reference
        reference: String,
    },

    /// The repository locator could not be mapped to a clone URL.
    ///
    /// Raised for malformed locators and hosts without a built-in or
    /// configured remote.
    #[error("Failed to get URL for cloning '{locator}': {reason}")]
    ResolutionError {
        /// The repository locator taken from the reference
        locator: String,
        /// Why no clone URL could be derived
        reason: String,
    },

    /// The snapshot executor failed to clone or inspect the repository.
    ///
    /// Covers network failures, authentication failures and refs that do not
    /// exist on the remote.
    #[error("Failed to clone {url} at '{git_ref}': {reason}")]
    CloneError {
        /// Clone URL, with credentials stripped
        url: String,
        /// The ref that was requested
        git_ref: String,
        /// Executor error output
        reason: String,
    },

    /// One of the seven extracted metadata files could not be read.
    ///
    /// An empty file is a valid, empty value; a missing one is this error.
    #[error("Failed to read {field}: {reason}")]
    MetadataReadError {
        /// Output file name of the field (e.g. `git-hash`)
        field: String,
        /// What went wrong
        reason: String,
    },

    /// None of the recognized build-definition files exist in the directory.
    #[error("No build file found in {dir} of {url}")]
    BuildFileNotFound {
        /// Directory that was searched, relative to the repository root
        dir: String,
        /// Repository locator of the reference
        url: String,
    },

    /// The feature-flag declaration of a build file is malformed.
    #[error("Failed to parse features of {path}: {reason}")]
    FeatureParseError {
        /// Local copy of the build file
        path: String,
        /// Parser error
        reason: String,
    },

    /// The scoped copy of a subdirectory failed.
    #[error("Failed to copy git context {sub_dir} for {reference}: {reason}")]
    ContextCopyError {
        /// Canonical form of the reference
        reference: String,
        /// Subdirectory that was being extracted
        sub_dir: String,
        /// Executor error output
        reason: String,
    },

    /// A local file operation on a scratch copy failed.
    #[error("File system error while {operation} {path}: {reason}")]
    FileSystemError {
        /// The operation that failed
        operation: FileOperation,
        /// The path involved
        path: String,
        /// Underlying IO error message
        reason: String,
    },

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Description of the problem
        message: String,
    },

    /// The session was cancelled while an operation was in flight.
    #[error("Operation cancelled")]
    Cancelled,

    /// A failure inside a cached computation, annotated with stage and key.
    #[error("{stage} failed for {key}")]
    Stage {
        /// The stage that failed
        stage: Stage,
        /// Cache key (or reference) the stage was working on
        key: String,
        /// The underlying failure
        #[source]
        source: Box<GitCtxError>,
    },
}

impl Clone for GitCtxError {
    fn clone(&self) -> Self {
        match self {
            Self::InvalidReference {
                reference,
                reason,
            } => Self::InvalidReference {
                reference: reference.clone(),
                reason: reason.clone(),
            },
            Self::UnexpectedLocalReference {
                reference,
            } => Self::UnexpectedLocalReference {
                reference: reference.clone(),
            },
            Self::ResolutionError {
                locator,
                reason,
            } => Self::ResolutionError {
                locator: locator.clone(),
                reason: reason.clone(),
            },
            Self::CloneError {
                url,
                git_ref,
                reason,
            } => Self::CloneError {
                url: url.clone(),
                git_ref: git_ref.clone(),
                reason: reason.clone(),
            },
            Self::MetadataReadError {
                field,
                reason,
            } => Self::MetadataReadError {
                field: field.clone(),
                reason: reason.clone(),
            },
            Self::BuildFileNotFound {
                dir,
                url,
            } => Self::BuildFileNotFound {
                dir: dir.clone(),
                url: url.clone(),
            },
            Self::FeatureParseError {
                path,
                reason,
            } => Self::FeatureParseError {
                path: path.clone(),
                reason: reason.clone(),
            },
            Self::ContextCopyError {
                reference,
                sub_dir,
                reason,
            } => Self::ContextCopyError {
                reference: reference.clone(),
                sub_dir: sub_dir.clone(),
                reason: reason.clone(),
            },
            Self::FileSystemError {
                operation,
                path,
                reason,
            } => Self::FileSystemError {
                operation: operation.clone(),
                path: path.clone(),
                reason: reason.clone(),
            },
            Self::ConfigError {
                message,
            } => Self::ConfigError {
                message: message.clone(),
            },
            Self::Cancelled => Self::Cancelled,
            Self::Stage {
                stage,
                key,
                source,
            } => Self::Stage {
                stage: *stage,
                key: key.clone(),
                source: source.clone(),
            },
        }
    }
}

impl GitCtxError {
    /// Wrap this error with the stage and key it was raised for.
    ///
    /// Cancellation is never wrapped so it stays recognizable to callers.
    #[must_use]
    pub fn in_stage(self, stage: Stage, key: impl Into<String>) -> Self {
        if matches!(self, Self::Cancelled) {
            return self;
        }
        Self::Stage {
            stage,
            key: key.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through any [`GitCtxError::Stage`] layers.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Stage {
                source,
                ..
            } => source.root(),
            other => other,
        }
    }

    /// The outermost stage annotation, if any.
    #[must_use]
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage {
                stage,
                ..
            } => Some(*stage),
            _ => None,
        }
    }

    /// Whether this error stems from session cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled)
    }
}

/// Error wrapper that adds a suggestion and details for CLI display
///
/// ```rust,no_run
/// use gitctx::core::{ErrorContext, GitCtxError};
///
/// let context = ErrorContext::new(GitCtxError::Cancelled)
///     .with_suggestion("Re-run the command")
///     .with_details("The session was interrupted");
/// context.display();
/// ```
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: GitCtxError,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context with no suggestion or details.
    #[must_use]
    pub const fn new(error: GitCtxError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Add an actionable suggestion, displayed in green.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add details explaining the error, displayed in yellow.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error, details and suggestion to stderr with colors.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        let mut source = std::error::Error::source(&self.error);
        while let Some(cause) = source {
            eprintln!("  {}: {}", "caused by".red(), cause);
            source = cause.source();
        }

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into an [`ErrorContext`] with a suggestion where one is known.
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(ctx_error) = error.downcast_ref::<GitCtxError>() {
        return create_error_context(ctx_error.clone());
    }

    if let Some(toml_error) = error.downcast_ref::<toml::de::Error>() {
        return ErrorContext::new(GitCtxError::ConfigError {
            message: toml_error.to_string(),
        })
        .with_suggestion("Check the TOML syntax of your gitctx configuration file");
    }

    ErrorContext::new(GitCtxError::ConfigError {
        message: format!("{error:#}"),
    })
}

fn create_error_context(error: GitCtxError) -> ErrorContext {
    let (suggestion, details) = match error.root() {
        GitCtxError::InvalidReference {
            ..
        } => (
            "Use the form <host>/<owner>/<repo>[/<dir>][:<ref>]+<target>",
            None,
        ),
        GitCtxError::UnexpectedLocalReference {
            ..
        } => ("Only remote references can be resolved through git", None),
        GitCtxError::ResolutionError {
            ..
        } => (
            "Add a [[remotes]] entry for this host to your gitctx configuration",
            Some("Only github.com, gitlab.com and bitbucket.org are known without configuration"),
        ),
        GitCtxError::CloneError {
            ..
        } => (
            "Check network access, credentials and that the ref exists on the remote",
            None,
        ),
        GitCtxError::MetadataReadError {
            ..
        } => (
            "Retry the command; the metadata extraction step did not produce all of its outputs",
            None,
        ),
        GitCtxError::BuildFileNotFound {
            ..
        } => (
            "Make sure the directory contains an Earthfile (or the requested Dockerfile)",
            None,
        ),
        GitCtxError::FeatureParseError {
            ..
        } => ("Check the VERSION line at the top of the build file", None),
        GitCtxError::ContextCopyError {
            ..
        } => ("Check that the subdirectory exists at the requested ref", None),
        GitCtxError::FileSystemError {
            ..
        } => (
            "Check that the temporary directory is writable (GITCTX_TMP_DIR)",
            None,
        ),
        GitCtxError::ConfigError {
            ..
        } => ("Check your gitctx configuration file", None),
        GitCtxError::Cancelled | GitCtxError::Stage {
            ..
        } => ("Re-run the command", None),
    };

    let mut ctx = ErrorContext::new(error).with_suggestion(suggestion);
    if let Some(details) = details {
        ctx = ctx.with_details(details);
    }
    ctx
}
