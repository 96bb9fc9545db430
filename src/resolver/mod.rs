//! Build-context resolution for remote references.
//!
//! [`GitResolver::resolve_build_context`] is the single entry point. For a
//! remote reference it
//!
//! 1. maps the locator to a clone URL and subdirectory ([`GitLookup`]),
//! 2. resolves the project through the project cache, extracting metadata at
//!    most once per `"<clone-url>#<ref>"` key,
//! 3. builds the context factory for targets (commands get none), copying a
//!    subdirectory at most once per commit,
//! 4. locates the build file through the build-file cache.
//!
//! # Project Cache Aliases
//!
//! After a successful extraction the project is also registered under
//! `"<clone-url>#<branch>"` and `"<clone-url>#<tag>"` for the first branch
//! and tag pointing at the commit. A later reference that names the branch
//! or tag explicitly then reuses the project without cloning again. Alias
//! registration runs in a detached task and never fails the resolution.

use crate::buildfile::{BuildFileFormat, BuildFileLocator, FeatureParser, FeatureSet, LocateRequest};
use crate::cache::SyncCache;
use crate::config::ResolverConfig;
use crate::context::ContextFactory;
use crate::core::{GitCtxError, Stage};
use crate::git::{CloneTarget, GitLookup, strip_auth_from_url};
use crate::metadata::extractor::ExtractRequest;
use crate::metadata::{GitMetadata, GitMetadataExtractor, ResolvedProject};
use crate::reference::Reference;
use crate::snapshot::{Platform, SnapshotExecutor};
use crate::utils::CleanupCollection;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a build needs to evaluate a remote target.
#[derive(Debug, Clone)]
pub struct BuildContextBundle {
    /// Local copy of the build file
    pub build_file_path: PathBuf,
    /// Build context; `None` for command references
    pub context_factory: Option<ContextFactory>,
    pub git_metadata: GitMetadata,
    pub features: FeatureSet,
}

/// Resolves remote references for one session.
///
/// Both caches live as long as the resolver. Scratch copies of build files
/// are released by the [`CleanupCollection`] passed in at construction.
pub struct GitResolver {
    lookup: GitLookup,
    executor: Arc<dyn SnapshotExecutor>,
    extractor: GitMetadataExtractor,
    build_files: BuildFileLocator,
    projects: Arc<SyncCache<Arc<ResolvedProject>>>,
    contexts: SyncCache<ContextFactory>,
    cleanup: Arc<CleanupCollection>,
}

impl GitResolver {
    /// Create a resolver.
    ///
    /// # Errors
    ///
    /// Returns [`GitCtxError::ConfigError`] when a configured remote pattern
    /// does not compile.
    pub fn new(
        config: &ResolverConfig,
        executor: Arc<dyn SnapshotExecutor>,
        parser: Arc<dyn FeatureParser>,
        cleanup: Arc<CleanupCollection>,
    ) -> Result<Self, GitCtxError> {
        let platform = config.platform.as_ref().map_or_else(Platform::native, Platform::new);
        Ok(Self {
            lookup: GitLookup::new(config)?,
            extractor: GitMetadataExtractor::new(executor.clone(), config.git_image.clone(), platform),
            build_files: BuildFileLocator::new(
                executor.clone(),
                parser,
                cleanup.clone(),
                config.temp_root(),
                config.feature_overrides.clone(),
            ),
            executor,
            projects: Arc::new(SyncCache::new("project")),
            contexts: SyncCache::new("context"),
            cleanup,
        })
    }

    /// Resolve a remote reference into a build-context bundle.
    ///
    /// Safe to call concurrently; identical projects are fetched once.
    ///
    /// # Errors
    ///
    /// The returned error wraps a [`GitCtxError`] naming the failing stage;
    /// use `downcast_ref::<GitCtxError>()` to inspect it.
    pub async fn resolve_build_context(
        &self,
        cancel: &CancellationToken,
        reference: &Reference,
    ) -> Result<BuildContextBundle> {
        self.resolve(cancel, reference)
            .await
            .with_context(|| format!("Failed to resolve build context for {reference}"))
    }

    async fn resolve(
        &self,
        cancel: &CancellationToken,
        reference: &Reference,
    ) -> Result<BuildContextBundle, GitCtxError> {
        if !reference.is_remote() {
            return Err(GitCtxError::UnexpectedLocalReference {
                reference: reference.to_string(),
            });
        }

        let (project, target) = self.resolve_project(cancel, reference).await?;

        let context_factory = if reference.is_target() {
            let key = context_cache_key(&target.url, &project.hash, &target.sub_dir);
            let canonical = reference.string_canonical();
            let factory = self
                .contexts
                .get_or_compute(cancel, &key, || {
                    ContextFactory::for_sub_dir(
                        self.executor.as_ref(),
                        cancel,
                        &project.snapshot,
                        &target.sub_dir,
                        &canonical,
                    )
                })
                .await?;
            Some(factory)
        } else {
            None
        };

        let project_key = reference.project_canonical();
        let (key, format) = match reference.dockerfile_name() {
            Some(name) => (reference.string_canonical(), BuildFileFormat::Fallback(name.to_string())),
            None => (project_key.clone(), BuildFileFormat::Native),
        };
        let build_file = self
            .build_files
            .locate_and_cache(
                cancel,
                &project,
                LocateRequest {
                    key: &key,
                    project_key: &project_key,
                    locator: reference.git_url(),
                    sub_dir: &target.sub_dir,
                    format,
                },
            )
            .await?;

        Ok(BuildContextBundle {
            build_file_path: build_file.path.clone(),
            context_factory,
            git_metadata: GitMetadata {
                base_dir: String::new(),
                rel_dir: target.sub_dir.clone(),
                remote_url: strip_auth_from_url(&target.url),
                hash: project.hash.clone(),
                short_hash: project.short_hash.clone(),
                branches: project.branches.clone(),
                tags: project.tags.clone(),
                timestamp: project.timestamp.clone(),
                author: project.author.clone(),
                co_authors: project.co_authors.clone(),
            },
            features: build_file.features.clone(),
        })
    }

    /// Resolve the project a reference points into.
    ///
    /// # Errors
    ///
    /// Stage-annotated [`GitCtxError`]s from URL resolution, cloning and
    /// metadata extraction.
    pub async fn resolve_project(
        &self,
        cancel: &CancellationToken,
        reference: &Reference,
    ) -> Result<(Arc<ResolvedProject>, CloneTarget), GitCtxError> {
        let target = self
            .lookup
            .get_clone_url(reference.git_url())
            .map_err(|e| e.in_stage(Stage::ResolveUrl, reference.git_url()))?;

        let cache_key = project_cache_key(&target.url, reference.tag());
        let request = ExtractRequest {
            url: target.url.clone(),
            git_ref: reference.tag().to_string(),
            key_scans: target.key_scans.clone(),
            project: reference.project_canonical(),
            cache_key: cache_key.clone(),
        };

        let project = self
            .projects
            .get_or_compute(cancel, &cache_key, || async {
                let project = Arc::new(self.extractor.extract(cancel, &request).await?);
                self.spawn_alias_registration(&request.url, &cache_key, &project);
                Ok(project)
            })
            .await?;

        Ok((project, target))
    }

    fn spawn_alias_registration(&self, url: &str, primary: &str, project: &Arc<ResolvedProject>) {
        let aliases: Vec<String> = project
            .branches
            .first()
            .into_iter()
            .chain(project.tags.first())
            .map(|git_ref| project_cache_key(url, git_ref))
            .filter(|alias| alias != primary)
            .collect();
        if aliases.is_empty() {
            return;
        }

        let projects = self.projects.clone();
        let project = project.clone();
        tokio::spawn(async move {
            for alias in aliases {
                if let Err(e) = projects.add(&alias, project.clone()) {
                    tracing::debug!(target: "gitctx::cache", "Skipping alias: {}", e);
                }
            }
        });
    }

    /// Cache of resolved projects, keyed by `"<clone-url>#<ref>"`.
    pub fn project_cache(&self) -> &SyncCache<Arc<ResolvedProject>> {
        &self.projects
    }

    /// Cache of build contexts, keyed by `"<clone-url>@<hash>:<sub-dir>"`.
    pub const fn context_cache(&self) -> &SyncCache<ContextFactory> {
        &self.contexts
    }

    /// Cache of located build files.
    pub const fn build_file_cache(&self) -> &SyncCache<Arc<crate::buildfile::BuildFile>> {
        self.build_files.cache()
    }

    /// Collection releasing this session's scratch directories.
    pub const fn cleanup(&self) -> &Arc<CleanupCollection> {
        &self.cleanup
    }
}

/// Project cache key for a clone URL at a ref.
#[must_use]
pub fn project_cache_key(url: &str, git_ref: &str) -> String {
    format!("{url}#{git_ref}")
}

fn context_cache_key(url: &str, hash: &str, sub_dir: &str) -> String {
    format!("{url}@{hash}:{sub_dir}")
}
