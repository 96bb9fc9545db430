//! Locating, copying and memoizing build-definition files.
//!
//! For every project (and, for fallback-format files, every fully qualified
//! reference) the build file is read out of the project snapshot once,
//! written to a local scratch directory and parsed for feature flags. The
//! scratch directory lives until the session's
//! [`CleanupCollection`](crate::utils::CleanupCollection) is closed, not
//! until the cache entry goes away.
//!
//! | format   | searched names               | features                |
//! |----------|------------------------------|-------------------------|
//! | native   | `Earthfile`, `build.earth`   | parsed from `VERSION`   |
//! | fallback | `Dockerfile` or a given name | [`FeatureSet::default`] |

pub mod features;

use crate::cache::SyncCache;
use crate::constants::{BUILD_FILE_TMP_PREFIX, NATIVE_BUILD_FILE_NAMES};
use crate::core::{FileOperation, FileResultExt, GitCtxError, Stage};
use crate::metadata::ResolvedProject;
use crate::snapshot::{SnapshotExecutor, cancellable};
use crate::utils::CleanupCollection;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use features::{FeatureParser, FeatureSet, VersionLineParser};

/// Kind of build file a reference asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildFileFormat {
    /// `Earthfile`, falling back to `build.earth`
    Native,
    /// A Dockerfile with the given name
    Fallback(String),
}

impl BuildFileFormat {
    fn candidates(&self) -> Vec<&str> {
        match self {
            Self::Native => NATIVE_BUILD_FILE_NAMES.to_vec(),
            Self::Fallback(name) => vec![name.as_str()],
        }
    }
}

/// A build file copied out of a project snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFile {
    /// Local copy of the file
    pub path: PathBuf,
    pub features: FeatureSet,
}

/// What to locate.
#[derive(Debug, Clone)]
pub struct LocateRequest<'a> {
    /// Cache key: project-canonical form, or the full reference for the
    /// fallback format
    pub key: &'a str,
    /// Project-canonical form, handed to the feature parser
    pub project_key: &'a str,
    /// Repository locator, for error messages
    pub locator: &'a str,
    pub sub_dir: &'a str,
    pub format: BuildFileFormat,
}

/// Memoizing build-file locator.
pub struct BuildFileLocator {
    executor: Arc<dyn SnapshotExecutor>,
    parser: Arc<dyn FeatureParser>,
    cleanup: Arc<CleanupCollection>,
    temp_root: PathBuf,
    feature_overrides: String,
    cache: SyncCache<Arc<BuildFile>>,
}

impl BuildFileLocator {
    pub fn new(
        executor: Arc<dyn SnapshotExecutor>,
        parser: Arc<dyn FeatureParser>,
        cleanup: Arc<CleanupCollection>,
        temp_root: PathBuf,
        feature_overrides: String,
    ) -> Self {
        Self {
            executor,
            parser,
            cleanup,
            temp_root,
            feature_overrides,
            cache: SyncCache::new("buildfile"),
        }
    }

    /// The underlying cache, keyed by [`LocateRequest::key`].
    pub const fn cache(&self) -> &SyncCache<Arc<BuildFile>> {
        &self.cache
    }

    /// Locate the build file of `request.sub_dir`, at most once per key.
    ///
    /// # Errors
    ///
    /// [`GitCtxError::BuildFileNotFound`] when no candidate exists,
    /// [`GitCtxError::FileSystemError`] when the scratch copy fails,
    /// [`GitCtxError::FeatureParseError`] from the parser. None of them are
    /// cached.
    pub async fn locate_and_cache(
        &self,
        cancel: &CancellationToken,
        project: &ResolvedProject,
        request: LocateRequest<'_>,
    ) -> Result<Arc<BuildFile>, GitCtxError> {
        self.cache
            .get_or_compute(cancel, request.key, || async {
                self.locate(cancel, project, &request).await.map(Arc::new)
            })
            .await
    }

    async fn locate(
        &self,
        cancel: &CancellationToken,
        project: &ResolvedProject,
        request: &LocateRequest<'_>,
    ) -> Result<BuildFile, GitCtxError> {
        let in_locate = |e: GitCtxError| e.in_stage(Stage::LocateBuildFile, request.key);

        let scratch = self.create_scratch_dir().map_err(in_locate)?;

        let mut found = None;
        for name in request.format.candidates() {
            let path = join_sub_dir(request.sub_dir, name);
            let bytes = cancellable(cancel, self.executor.read_file(&project.snapshot, &path), |e| {
                GitCtxError::FileSystemError {
                    operation: FileOperation::Read,
                    path: path.clone(),
                    reason: format!("{e:#}"),
                }
            })
            .await
            .map_err(in_locate)?;
            if let Some(bytes) = bytes {
                found = Some((name, bytes));
                break;
            }
        }

        let Some((name, bytes)) = found else {
            return Err(in_locate(GitCtxError::BuildFileNotFound {
                dir: request.sub_dir.to_string(),
                url: request.locator.to_string(),
            }));
        };

        let local_path = scratch.join(name);
        write_private(&local_path, &bytes).await.map_err(in_locate)?;
        tracing::debug!(target: "gitctx::buildfile", "{} -> {}", request.key, local_path.display());

        let features = match request.format {
            BuildFileFormat::Native => self
                .parser
                .parse(&local_path, &self.feature_overrides, request.project_key)
                .map_err(|e| e.in_stage(Stage::ParseFeatures, request.key))?,
            BuildFileFormat::Fallback(_) => FeatureSet::default(),
        };

        Ok(BuildFile {
            path: local_path,
            features,
        })
    }

    /// Fresh scratch directory, removed when the cleanup collection closes.
    fn create_scratch_dir(&self) -> Result<PathBuf, GitCtxError> {
        std::fs::create_dir_all(&self.temp_root)
            .with_file_context(FileOperation::CreateDir, &self.temp_root)?;
        let dir = tempfile::Builder::new()
            .prefix(BUILD_FILE_TMP_PREFIX)
            .tempdir_in(&self.temp_root)
            .with_file_context(FileOperation::CreateDir, &self.temp_root)?;
        Ok(self.cleanup.add_dir(dir))
    }
}

fn join_sub_dir(sub_dir: &str, name: &str) -> String {
    match sub_dir.trim_end_matches('/') {
        "" | "." => name.to_string(),
        dir => format!("{dir}/{name}"),
    }
}

/// Write `bytes` to `path`, readable and writable by the owner only.
async fn write_private(path: &Path, bytes: &[u8]) -> Result<(), GitCtxError> {
    tokio::fs::write(path, bytes).await.with_file_context(FileOperation::Write, path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .await
            .with_file_context(FileOperation::SetPermissions, path)?;
    }
    Ok(())
}
