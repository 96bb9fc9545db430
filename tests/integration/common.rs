//! Shared fixtures for the integration suite.

use gitctx::buildfile::VersionLineParser;
use gitctx::config::{RemoteConfig, ResolverConfig};
use gitctx::core::GitCtxError;
use gitctx::resolver::GitResolver;
use gitctx::test_utils::{MockCommit, MockExecutor, TestGit, init_test_logging};
use gitctx::utils::CleanupCollection;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub const REPO_LOCATOR: &str = "github.com/acme/repo";
pub const REPO_URL: &str = "https://github.com/acme/repo.git";
pub const HASH: &str = "0123456789abcdef0123456789abcdef01234567";

/// A resolver backed by a [`MockExecutor`], with its own scratch root.
pub struct MockHarness {
    pub executor: Arc<MockExecutor>,
    pub resolver: GitResolver,
    pub cleanup: Arc<CleanupCollection>,
    pub temp: TempDir,
}

impl MockHarness {
    pub fn new(executor: MockExecutor) -> Self {
        init_test_logging(None);
        let temp = TempDir::new().unwrap();
        let config = ResolverConfig {
            temp_dir: Some(temp.path().to_path_buf()),
            ..Default::default()
        };
        let executor = Arc::new(executor);
        let cleanup = Arc::new(CleanupCollection::new());
        let resolver =
            GitResolver::new(&config, executor.clone(), Arc::new(VersionLineParser), cleanup.clone())
                .unwrap();
        Self {
            executor,
            resolver,
            cleanup,
            temp,
        }
    }

    /// Mock repository with a single `main` commit.
    pub fn with_main(commit: MockCommit) -> Self {
        Self::new(MockExecutor::new().with_ref(REPO_URL, "main", commit))
    }
}

/// Commit on `main` with a root Earthfile and a `services/api` target.
pub fn sample_commit() -> MockCommit {
    MockCommit::new(HASH)
        .branch("main")
        .body("Add api\n\nCo-authored-by: Jane Doe <jane@example.com>\n")
        .file("Earthfile", "VERSION 0.7\n\nbuild:\n    RUN true\n")
        .file("services/api/Earthfile", "VERSION --use-cache-command 0.7\n")
        .file("services/api/Dockerfile", "FROM alpine\n")
        .file("services/api/main.go", "package main\n")
        .file("docs/README.md", "# docs\n")
}

/// The innermost [`GitCtxError`] of a resolution failure.
pub fn root_error(err: &anyhow::Error) -> &GitCtxError {
    err.downcast_ref::<GitCtxError>().expect("resolution errors carry a GitCtxError").root()
}

/// A fixture repository on disk plus a config that maps
/// `local.test/<name>` to it.
pub struct LocalRepo {
    pub git: TestGit,
    pub root: TempDir,
    pub config: ResolverConfig,
}

impl LocalRepo {
    /// Initialize `repo` with a root Earthfile, a `services/api` target and a
    /// commit carrying a co-author trailer, tagged `v1.0`.
    pub fn create() -> Self {
        init_test_logging(None);
        let root = TempDir::new().unwrap();
        let git = TestGit::new(root.path().join("repo"));
        git.init().unwrap();
        git.write_file("Earthfile", "VERSION 0.7\n\nbuild:\n    RUN true\n").unwrap();
        git.write_file("services/api/Earthfile", "VERSION --use-cache-command 0.7\n").unwrap();
        git.write_file("services/api/src/main.go", "package main\n").unwrap();
        git.write_file("services/api/Dockerfile", "FROM alpine\n").unwrap();
        git.add_all().unwrap();
        git.commit("Add api\n\nCo-authored-by: Jane Doe <jane@example.com>").unwrap();
        git.tag("v1.0").unwrap();

        let config = local_config(root.path());
        Self {
            git,
            root,
            config,
        }
    }
}

/// Configuration mapping `local.test/<name>` to `file://<dir>/<name>`.
pub fn local_config(dir: &Path) -> ResolverConfig {
    ResolverConfig {
        temp_dir: Some(dir.join("tmp")),
        remotes: vec![RemoteConfig {
            host: "local.test".to_string(),
            pattern: Some(r"local\.test/([^/]+)".to_string()),
            substitute: Some(format!("file://{}/${{1}}", dir.display())),
            ..Default::default()
        }],
        ..Default::default()
    }
}
