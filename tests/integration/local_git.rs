//! End-to-end resolution against on-disk repositories with the local executor.

use crate::common::{LocalRepo, root_error};
use gitctx::buildfile::VersionLineParser;
use gitctx::core::GitCtxError;
use gitctx::reference::Reference;
use gitctx::resolver::GitResolver;
use gitctx::snapshot::LocalGitExecutor;
use gitctx::utils::CleanupCollection;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn resolver_for(repo: &LocalRepo) -> (GitResolver, Arc<CleanupCollection>) {
    let executor = Arc::new(LocalGitExecutor::new(repo.root.path().join("snapshots")).unwrap());
    let cleanup = Arc::new(CleanupCollection::new());
    let resolver =
        GitResolver::new(&repo.config, executor, Arc::new(VersionLineParser), cleanup.clone()).unwrap();
    (resolver, cleanup)
}

#[tokio::test]
async fn test_resolve_subdirectory_at_tag() {
    let repo = LocalRepo::create();
    let (resolver, cleanup) = resolver_for(&repo);
    let reference = Reference::parse("local.test/repo/services/api:v1.0+build").unwrap();

    let bundle = resolver.resolve_build_context(&CancellationToken::new(), &reference).await.unwrap();
    let git = &bundle.git_metadata;

    assert_eq!(git.hash, repo.git.rev_parse_head().unwrap());
    assert_eq!(git.short_hash, &git.hash[..8]);
    assert_eq!(git.tags, vec!["v1.0"]);
    assert_eq!(git.author, "test@gitctx.example");
    assert_eq!(git.co_authors, vec!["jane@example.com"]);
    assert!(git.timestamp.parse::<u64>().is_ok(), "{}", git.timestamp);
    assert_eq!(git.rel_dir, "services/api");
    assert!(git.remote_url.starts_with("file://"));

    assert!(bundle.features.has("use-cache-command"));
    assert_eq!(bundle.features.version.as_deref(), Some("0.7"));
    assert_eq!(
        std::fs::read_to_string(&bundle.build_file_path).unwrap(),
        "VERSION --use-cache-command 0.7\n"
    );
    assert!(bundle.build_file_path.starts_with(repo.root.path().join("tmp")));

    let context = bundle.context_factory.expect("targets have a build context");
    let dir = LocalGitExecutor::snapshot_dir(context.snapshot()).expect("directory snapshot");
    assert!(dir.join("src/main.go").is_file());
    assert!(dir.join("Earthfile").is_file());
    assert!(!dir.join("services").exists());
    assert!(!dir.join(".git").exists());

    cleanup.close().unwrap();
    assert!(!bundle.build_file_path.exists());
}

#[tokio::test]
async fn test_resolve_root_on_default_branch() {
    let repo = LocalRepo::create();
    let (resolver, _cleanup) = resolver_for(&repo);
    let reference = Reference::parse("local.test/repo+build").unwrap();

    let bundle = resolver.resolve_build_context(&CancellationToken::new(), &reference).await.unwrap();

    assert_eq!(bundle.git_metadata.branches, vec!["main"]);
    assert_eq!(bundle.git_metadata.rel_dir, ".");
    assert_eq!(bundle.features.version.as_deref(), Some("0.7"));
    assert!(!bundle.features.has("use-cache-command"));

    let context = bundle.context_factory.expect("targets have a build context");
    let dir = LocalGitExecutor::snapshot_dir(context.snapshot()).expect("directory snapshot");
    assert!(dir.join("services/api/Earthfile").is_file());
}

#[tokio::test]
async fn test_fallback_build_file_from_disk() {
    let repo = LocalRepo::create();
    let (resolver, _cleanup) = resolver_for(&repo);
    let reference = Reference::parse("local.test/repo/services/api:main+@dockerfile:").unwrap();

    let bundle = resolver.resolve_build_context(&CancellationToken::new(), &reference).await.unwrap();

    assert!(bundle.build_file_path.ends_with("Dockerfile"));
    assert!(bundle.features.is_empty());
}

#[tokio::test]
async fn test_missing_ref_is_clone_error() {
    let repo = LocalRepo::create();
    let (resolver, _cleanup) = resolver_for(&repo);
    let reference = Reference::parse("local.test/repo:does-not-exist+build").unwrap();

    let err = resolver.resolve_build_context(&CancellationToken::new(), &reference).await.unwrap_err();
    assert!(matches!(root_error(&err), GitCtxError::CloneError { .. }), "{err:#}");
}

#[tokio::test]
async fn test_tag_checkout_reports_no_branch_and_no_head_alias() {
    let repo = LocalRepo::create();
    let tagged = repo.git.rev_parse_head().unwrap();
    repo.git.write_file("NOTES.md", "moved on\n").unwrap();
    repo.git.add_all().unwrap();
    repo.git.commit("Move main past the tag").unwrap();
    let head = repo.git.rev_parse_head().unwrap();

    let (resolver, _cleanup) = resolver_for(&repo);
    let cancel = CancellationToken::new();

    let at_tag = resolver
        .resolve_build_context(&cancel, &Reference::parse("local.test/repo:v1.0+build").unwrap())
        .await
        .unwrap();
    assert_eq!(at_tag.git_metadata.hash, tagged);
    assert!(at_tag.git_metadata.branches.is_empty(), "{:?}", at_tag.git_metadata.branches);
    assert_eq!(at_tag.git_metadata.tags, vec!["v1.0"]);

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let keys = resolver.project_cache().ready_keys();
    assert!(keys.iter().all(|key| !key.ends_with("#HEAD")), "{keys:?}");

    let at_head = resolver
        .resolve_build_context(&cancel, &Reference::parse("local.test/repo:HEAD+build").unwrap())
        .await
        .unwrap();
    assert_eq!(at_head.git_metadata.hash, head);
}
