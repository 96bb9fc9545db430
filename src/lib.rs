//! gitctx - remote project resolution for build contexts
//!
//! gitctx turns a reference to a target inside a remote git repository,
//! such as `github.com/acme/monorepo/services/api:v1.2.0+build`, into
//! everything a build needs to evaluate that target: commit metadata, an
//! immutable snapshot of the repository content scoped to the target's
//! directory, and a local copy of the build file with its feature flags.
//!
//! Resolution happens many times per build session, often for the same
//! repository and ref. Projects and build files are therefore memoized per
//! session, with at most one fetch in flight per key.
//!
//! # Architecture
//!
//! ```text
//! Reference ──► GitLookup ──► project cache ──► context factory ──► build-file cache
//!                              (metadata            (scoped copy)        (copy + parse)
//!                               extractor)
//! ```
//!
//! All filesystem state lives behind the [`snapshot::SnapshotExecutor`]
//! trait. [`snapshot::LocalGitExecutor`] implements it with host directories
//! and the system `git` binary; other backends can be plugged in.
//!
//! # Modules
//!
//! - [`reference`] - parsing and canonical forms of references
//! - [`git`] - locator to clone URL mapping, git command builder
//! - [`snapshot`] - executor trait, snapshot handles, local executor
//! - [`metadata`] - resolved projects and metadata extraction
//! - [`cache`] - single-flight memoizing cache
//! - [`buildfile`] - build-file location and feature flags
//! - [`context`] - build-context factories
//! - [`resolver`] - the resolution pipeline
//! - [`config`] - TOML configuration
//! - [`core`] - error types
//! - [`utils`] - session cleanup
//! - [`cli`] - command-line interface
//!
//! # Example
//!
//! ```rust,no_run
//! use gitctx::buildfile::VersionLineParser;
//! use gitctx::config::ResolverConfig;
//! use gitctx::reference::Reference;
//! use gitctx::resolver::GitResolver;
//! use gitctx::snapshot::LocalGitExecutor;
//! use gitctx::utils::CleanupCollection;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ResolverConfig::load().await?;
//! let cleanup = Arc::new(CleanupCollection::new());
//! let executor = Arc::new(LocalGitExecutor::new("/tmp/gitctx-work")?);
//! let resolver = GitResolver::new(&config, executor, Arc::new(VersionLineParser), cleanup.clone())?;
//!
//! let reference = Reference::parse("github.com/acme/repo/services/api:main+build")?;
//! let bundle = resolver.resolve_build_context(&CancellationToken::new(), &reference).await?;
//! println!("{} @ {}", bundle.build_file_path.display(), bundle.git_metadata.short_hash);
//!
//! cleanup.close()?;
//! # Ok(())
//! # }
//! ```

pub mod buildfile;
pub mod cache;
pub mod cli;
pub mod config;
pub mod constants;
pub mod context;
pub mod core;
pub mod git;
pub mod metadata;
pub mod reference;
pub mod resolver;
pub mod snapshot;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
