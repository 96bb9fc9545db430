//! Extract commit metadata from a remote repository.
//!
//! Extraction is a fixed sequence of executor calls:
//!
//! 1. Clone the repository at the requested ref, keeping `.git`.
//! 2. Run a shell script in the git image with the clone mounted read-only
//!    at `/git-src` and an empty directory at `/dest`. The script writes one
//!    file per field.
//! 3. Read the seven output files and parse them.
//! 4. Clone again, pinned to the resolved hash. That snapshot is what the
//!    project hands out as build context, so a moving branch cannot change
//!    the content after the metadata was read.
//!
//! All hash-independent steps of the script fall back to `touch`, so a
//! repository without tags or with a detached HEAD still yields every file.

use super::{ResolvedProject, parse_co_authors_from_body};
use crate::constants::{GIT_META_DEST_MOUNT, GIT_META_TIMEOUT, GIT_SRC_MOUNT};
use crate::core::{GitCtxError, Stage};
use crate::git::strip_auth_from_url;
use crate::snapshot::{
    CloneRequest, Mount, Platform, RunRequest, Snapshot, SnapshotExecutor, cancellable,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Output file and the git command producing it.
///
/// The flag marks steps that must succeed; the others degrade to an empty
/// file.
const META_STEPS: &[(&str, &str, bool)] = &[
    ("git-hash", "git rev-parse HEAD", true),
    ("git-short-hash", "git rev-parse --short=8 HEAD", true),
    ("git-branch", "git symbolic-ref --short -q HEAD", false),
    ("git-tags", "git describe --exact-match --tags", false),
    ("git-ts", "git log -1 --format=%ct", false),
    ("git-author", "git log -1 --format=%ae", false),
    ("git-body", "git log -1 --format=%b", false),
];

/// What to extract: a clone URL at a ref.
#[derive(Debug, Clone)]
pub struct ExtractRequest {
    /// Clone URL as returned by [`crate::git::GitLookup`]
    pub url: String,
    /// Requested ref; empty for the default branch
    pub git_ref: String,
    pub key_scans: Vec<String>,
    /// Project-canonical form of the reference, for operation names
    pub project: String,
    /// Cache key the extraction runs under, for error annotations
    pub cache_key: String,
}

/// Drives a [`SnapshotExecutor`] to produce [`ResolvedProject`]s.
pub struct GitMetadataExtractor {
    executor: Arc<dyn SnapshotExecutor>,
    git_image: String,
    platform: Platform,
}

impl GitMetadataExtractor {
    pub fn new(executor: Arc<dyn SnapshotExecutor>, git_image: impl Into<String>, platform: Platform) -> Self {
        Self {
            executor,
            git_image: git_image.into(),
            platform,
        }
    }

    /// Shell script writing every metadata field to the output mount.
    #[must_use]
    pub fn extraction_script() -> String {
        META_STEPS
            .iter()
            .map(|(file, command, required)| {
                let out = format!("{GIT_META_DEST_MOUNT}/{file}");
                if *required {
                    format!("{command} >{out} ; ")
                } else {
                    format!("{command} >{out} || touch {out} ; ")
                }
            })
            .collect()
    }

    /// Resolve the repository at the requested ref.
    ///
    /// # Errors
    ///
    /// - [`GitCtxError::CloneError`] (stage `clone`) when either clone or the
    ///   extraction run fails
    /// - [`GitCtxError::MetadataReadError`] (stage `extract metadata`) when an
    ///   output file is missing, unreadable, or the hash is empty
    /// - [`GitCtxError::Cancelled`] when `cancel` fires first
    pub async fn extract(
        &self,
        cancel: &CancellationToken,
        request: &ExtractRequest,
    ) -> Result<ResolvedProject, GitCtxError> {
        let shown_url = strip_auth_from_url(&request.url);
        tracing::debug!(
            target: "gitctx::git",
            "Extracting metadata of {} at '{}'",
            shown_url,
            request.git_ref
        );

        let source = self
            .clone_at(cancel, request, &request.git_ref, format!("GIT CLONE {shown_url}"))
            .await?;

        let meta = self.run_script(cancel, request, source).await?;

        let mut fields = Vec::with_capacity(META_STEPS.len());
        for (file, _, _) in META_STEPS {
            fields.push(self.read_field(cancel, request, &meta, file).await?);
        }
        let [hash, short_hash, branch, tags, ts, author, body]: [String; 7] =
            fields.try_into().map_err(|_| {
                GitCtxError::MetadataReadError {
                    field: "git-meta".to_string(),
                    reason: "unexpected number of fields".to_string(),
                }
                .in_stage(Stage::ExtractMetadata, &request.cache_key)
            })?;

        let hash = first_line(&hash);
        if hash.is_empty() {
            return Err(GitCtxError::MetadataReadError {
                field: "git-hash".to_string(),
                reason: "empty commit hash".to_string(),
            }
            .in_stage(Stage::ExtractMetadata, &request.cache_key));
        }

        let snapshot = self
            .clone_at(
                cancel,
                request,
                &hash,
                format!("[context {shown_url}] git context {}", request.project),
            )
            .await?;

        Ok(ResolvedProject {
            short_hash: first_line(&short_hash),
            branches: parse_branches(&branch),
            tags: parse_tags(&tags),
            timestamp: first_line(&ts),
            author: first_line(&author),
            co_authors: parse_co_authors_from_body(&body),
            hash,
            snapshot,
        })
    }

    async fn clone_at(
        &self,
        cancel: &CancellationToken,
        request: &ExtractRequest,
        git_ref: &str,
        name: String,
    ) -> Result<Snapshot, GitCtxError> {
        let clone = self.executor.clone_snapshot(CloneRequest {
            url: request.url.clone(),
            git_ref: git_ref.to_string(),
            keep_git_dir: true,
            key_scans: request.key_scans.clone(),
            platform: self.platform.clone(),
            name,
        });
        cancellable(cancel, clone, |e| {
            GitCtxError::CloneError {
                url: strip_auth_from_url(&request.url),
                git_ref: git_ref.to_string(),
                reason: format!("{e:#}"),
            }
            .in_stage(Stage::Clone, &request.cache_key)
        })
        .await
    }

    async fn run_script(
        &self,
        cancel: &CancellationToken,
        request: &ExtractRequest,
        source: Snapshot,
    ) -> Result<Snapshot, GitCtxError> {
        let run = self.executor.run_in_snapshot(RunRequest {
            image: self.git_image.clone(),
            args: vec!["/bin/sh".to_string(), "-c".to_string(), Self::extraction_script()],
            dir: GIT_SRC_MOUNT.to_string(),
            mounts: vec![
                Mount {
                    target: GIT_SRC_MOUNT.to_string(),
                    source,
                    readonly: true,
                },
                Mount {
                    target: GIT_META_DEST_MOUNT.to_string(),
                    source: self.executor.scratch(),
                    readonly: false,
                },
            ],
            output: GIT_META_DEST_MOUNT.to_string(),
            readonly_rootfs: true,
            platform: self.platform.clone(),
            name: format!("GET GIT META {}", request.project),
        });
        let timed = async {
            tokio::time::timeout(GIT_META_TIMEOUT, run).await.map_err(|_| {
                anyhow::anyhow!("metadata extraction timed out after {}s", GIT_META_TIMEOUT.as_secs())
            })?
        };
        cancellable(cancel, timed, |e| {
            GitCtxError::CloneError {
                url: strip_auth_from_url(&request.url),
                git_ref: request.git_ref.clone(),
                reason: format!("{e:#}"),
            }
            .in_stage(Stage::ExtractMetadata, &request.cache_key)
        })
        .await
    }

    async fn read_field(
        &self,
        cancel: &CancellationToken,
        request: &ExtractRequest,
        meta: &Snapshot,
        file: &str,
    ) -> Result<String, GitCtxError> {
        let read_error = |reason: String| {
            GitCtxError::MetadataReadError {
                field: file.to_string(),
                reason,
            }
            .in_stage(Stage::ExtractMetadata, &request.cache_key)
        };

        let bytes = cancellable(cancel, self.executor.read_file(meta, file), |e| {
            read_error(format!("{e:#}"))
        })
        .await?
        .ok_or_else(|| read_error("file was not produced".to_string()))?;

        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn first_line(output: &str) -> String {
    output.split('\n').next().unwrap_or_default().trim_end_matches('\r').to_string()
}

fn non_empty_lines(output: &str) -> impl Iterator<Item = &str> {
    output.split('\n').map(|line| line.trim_end_matches('\r')).filter(|line| !line.is_empty())
}

/// Ref names of a listing; a detached checkout may report the literal `HEAD`,
/// which is never a usable alias.
fn parse_refs(output: &str) -> Vec<String> {
    non_empty_lines(output).filter(|name| *name != "HEAD").map(str::to_string).collect()
}

fn parse_branches(output: &str) -> Vec<String> {
    parse_refs(output)
}

fn parse_tags(output: &str) -> Vec<String> {
    parse_refs(output)
}
