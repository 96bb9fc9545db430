//! Resolution pipeline behavior against the in-memory executor.

use crate::common::{HASH, MockHarness, REPO_LOCATOR, REPO_URL, root_error, sample_commit};
use futures::future::join_all;
use gitctx::context::ContextFactory;
use gitctx::core::{GitCtxError, Stage};
use gitctx::reference::Reference;
use gitctx::snapshot::Snapshot;
use gitctx::test_utils::{MockCommit, MockExecutor, mock_snapshot_file};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn reference(s: &str) -> Reference {
    Reference::parse(s).unwrap()
}

/// Let detached alias registration run.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
#[serial]
async fn test_concurrent_resolution_extracts_once() {
    let harness = MockHarness::new(
        MockExecutor::new()
            .with_ref(REPO_URL, "main", sample_commit())
            .with_clone_delay(Duration::from_millis(50)),
    );
    let cancel = CancellationToken::new();
    let r = reference(&format!("{REPO_LOCATOR}:main+build"));

    let results =
        join_all((0..8).map(|_| harness.resolver.resolve_project(&cancel, &r))).await;
    let projects: Vec<_> = results.into_iter().map(|r| r.unwrap().0).collect();

    assert!(projects.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    // One clone to read metadata, one pinned to the resolved hash.
    assert_eq!(harness.executor.clone_count(), 2);
    assert_eq!(projects[0].hash, HASH);
    assert_eq!(projects[0].short_hash, "01234567");
    assert_eq!(projects[0].co_authors, vec!["jane@example.com"]);
}

#[tokio::test]
#[serial]
async fn test_repeat_resolution_hits_primary_key_without_alias() {
    let harness = MockHarness::with_main(sample_commit());
    let cancel = CancellationToken::new();
    let r = reference(&format!("{REPO_LOCATOR}:main+build"));

    let first = harness.resolver.resolve_build_context(&cancel, &r).await.unwrap();
    settle().await;
    let second = harness.resolver.resolve_build_context(&cancel, &r).await.unwrap();

    assert_eq!(harness.executor.clone_count(), 2);
    assert_eq!(first.git_metadata, second.git_metadata);
    assert_eq!(harness.resolver.project_cache().ready_keys(), vec![format!("{REPO_URL}#main")]);
}

#[tokio::test]
async fn test_second_clone_is_pinned_to_hash() {
    let harness = MockHarness::with_main(sample_commit());
    let cancel = CancellationToken::new();

    harness.resolver.resolve_project(&cancel, &reference(&format!("{REPO_LOCATOR}:main+build"))).await.unwrap();

    let clone_refs: Vec<String> = harness
        .executor
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            gitctx::test_utils::MockCall::Clone {
                git_ref,
                ..
            } => Some(git_ref),
            _ => None,
        })
        .collect();
    assert_eq!(clone_refs, vec!["main".to_string(), HASH.to_string()]);
}

#[tokio::test]
#[serial]
async fn test_head_tag_is_dropped_and_tag_alias_is_registered() {
    let harness = MockHarness::with_main(sample_commit().tags("HEAD\nv1.0\n"));
    let cancel = CancellationToken::new();

    let bundle = harness
        .resolver
        .resolve_build_context(&cancel, &reference(&format!("{REPO_LOCATOR}:main+build")))
        .await
        .unwrap();
    assert_eq!(bundle.git_metadata.tags, vec!["v1.0"]);
    assert_eq!(bundle.git_metadata.branches, vec!["main"]);

    settle().await;
    let keys = harness.resolver.project_cache().ready_keys();
    assert_eq!(keys, vec![format!("{REPO_URL}#main"), format!("{REPO_URL}#v1.0")]);

    // The mock serves no `v1.0` ref, so this only succeeds through the alias.
    let (by_tag, _) = harness
        .resolver
        .resolve_project(&cancel, &reference(&format!("{REPO_LOCATOR}:v1.0+build")))
        .await
        .unwrap();
    assert_eq!(by_tag.hash, HASH);
    assert_eq!(harness.executor.clone_count(), 2);
}

#[tokio::test]
#[serial]
async fn test_branch_alias_for_default_ref() {
    let harness = MockHarness::with_main(sample_commit());
    let cancel = CancellationToken::new();

    harness.resolver.resolve_project(&cancel, &reference(&format!("{REPO_LOCATOR}+build"))).await.unwrap();
    settle().await;

    assert_eq!(
        harness.resolver.project_cache().ready_keys(),
        vec![format!("{REPO_URL}#"), format!("{REPO_URL}#main")]
    );
    harness.resolver.resolve_project(&cancel, &reference(&format!("{REPO_LOCATOR}:main+build"))).await.unwrap();
    assert_eq!(harness.executor.clone_count(), 2);
}

#[tokio::test]
async fn test_detached_head_has_no_branches_tags_or_aliases() {
    let commit = MockCommit::new(HASH).file("Earthfile", "VERSION 0.7\n");
    let harness = MockHarness::new(MockExecutor::new().with_ref(REPO_URL, HASH, commit));
    let cancel = CancellationToken::new();

    let bundle = harness
        .resolver
        .resolve_build_context(&cancel, &reference(&format!("{REPO_LOCATOR}:{HASH}+build")))
        .await
        .unwrap();
    settle().await;

    assert!(bundle.git_metadata.branches.is_empty());
    assert!(bundle.git_metadata.tags.is_empty());
    assert_eq!(harness.resolver.project_cache().len(), 1);
}

#[tokio::test]
async fn test_root_context_is_project_snapshot() {
    let harness = MockHarness::with_main(sample_commit());
    let cancel = CancellationToken::new();
    let r = reference(&format!("{REPO_LOCATOR}:main+build"));

    let bundle = harness.resolver.resolve_build_context(&cancel, &r).await.unwrap();
    let (project, _) = harness.resolver.resolve_project(&cancel, &r).await.unwrap();

    let Some(ContextFactory::Preconstructed(context)) = &bundle.context_factory else {
        panic!("targets have a build context");
    };
    assert!(Snapshot::ptr_eq(context, &project.snapshot));
    assert!(harness.executor.scoped_copies().is_empty());
    assert_eq!(bundle.git_metadata.rel_dir, ".");
}

#[tokio::test]
async fn test_subdirectory_context_is_scoped_copy() {
    let harness = MockHarness::with_main(sample_commit());
    let cancel = CancellationToken::new();

    let bundle = harness
        .resolver
        .resolve_build_context(&cancel, &reference(&format!("{REPO_LOCATOR}/services/api:main+build")))
        .await
        .unwrap();

    assert_eq!(harness.executor.scoped_copies(), vec!["services/api"]);
    let context = bundle.context_factory.expect("targets have a build context");
    assert!(mock_snapshot_file(context.snapshot(), "main.go").is_some());
    assert!(mock_snapshot_file(context.snapshot(), "docs/README.md").is_none());
    assert_eq!(bundle.git_metadata.rel_dir, "services/api");
    assert_eq!(bundle.git_metadata.remote_url, REPO_URL);
    assert_eq!(bundle.git_metadata.base_dir, "");
}

#[tokio::test]
async fn test_subdirectory_is_copied_once_per_commit() {
    let harness = MockHarness::with_main(sample_commit());
    let cancel = CancellationToken::new();
    let build = reference(&format!("{REPO_LOCATOR}/services/api:main+build"));
    let docker = reference(&format!("{REPO_LOCATOR}/services/api:main+@dockerfile:"));

    let first = harness.resolver.resolve_build_context(&cancel, &build).await.unwrap();
    let second = harness.resolver.resolve_build_context(&cancel, &build).await.unwrap();
    let third = harness.resolver.resolve_build_context(&cancel, &docker).await.unwrap();

    assert_eq!(harness.executor.scoped_copies(), vec!["services/api"]);
    let snapshot = |bundle: &gitctx::resolver::BuildContextBundle| {
        bundle.context_factory.as_ref().unwrap().snapshot().clone()
    };
    assert!(Snapshot::ptr_eq(&snapshot(&first), &snapshot(&second)));
    assert!(Snapshot::ptr_eq(&snapshot(&first), &snapshot(&third)));
    assert_eq!(
        harness.resolver.context_cache().ready_keys(),
        vec![format!("{REPO_URL}@{HASH}:services/api")]
    );
}

#[tokio::test]
async fn test_failed_context_copy_is_retried() {
    let harness = MockHarness::with_main(sample_commit());
    let cancel = CancellationToken::new();
    let r = reference(&format!("{REPO_LOCATOR}/nope:main+build"));

    harness.resolver.resolve_build_context(&cancel, &r).await.unwrap_err();
    harness.resolver.resolve_build_context(&cancel, &r).await.unwrap_err();

    assert_eq!(harness.executor.scoped_copies(), vec!["nope", "nope"]);
    assert!(harness.resolver.context_cache().is_empty());
}

#[tokio::test]
async fn test_missing_subdirectory_is_context_copy_error() {
    let harness = MockHarness::with_main(sample_commit());
    let cancel = CancellationToken::new();

    let err = harness
        .resolver
        .resolve_build_context(&cancel, &reference(&format!("{REPO_LOCATOR}/nope:main+build")))
        .await
        .unwrap_err();

    assert!(matches!(root_error(&err), GitCtxError::ContextCopyError { sub_dir, .. } if sub_dir == "nope"));
    let staged = err.downcast_ref::<GitCtxError>().unwrap();
    assert_eq!(staged.stage(), Some(Stage::ScopeContext));
}

#[tokio::test]
async fn test_command_reference_has_no_context() {
    let harness = MockHarness::with_main(sample_commit());
    let cancel = CancellationToken::new();

    let bundle = harness
        .resolver
        .resolve_build_context(&cancel, &reference(&format!("{REPO_LOCATOR}/services/api:main+DEPLOY")))
        .await
        .unwrap();

    assert!(bundle.context_factory.is_none());
    assert!(harness.executor.scoped_copies().is_empty());
    assert!(bundle.build_file_path.ends_with("Earthfile"));
}

#[tokio::test]
async fn test_native_and_fallback_build_files_are_cached_separately() {
    let harness = MockHarness::with_main(sample_commit());
    let cancel = CancellationToken::new();
    let native = reference(&format!("{REPO_LOCATOR}/services/api:main+build"));
    let fallback = reference(&format!("{REPO_LOCATOR}/services/api:main+@dockerfile:"));

    let native_bundle = harness.resolver.resolve_build_context(&cancel, &native).await.unwrap();
    let fallback_bundle = harness.resolver.resolve_build_context(&cancel, &fallback).await.unwrap();

    assert_ne!(native_bundle.build_file_path, fallback_bundle.build_file_path);
    assert!(native_bundle.build_file_path.ends_with("Earthfile"));
    assert!(fallback_bundle.build_file_path.ends_with("Dockerfile"));
    assert_eq!(native_bundle.features.version.as_deref(), Some("0.7"));
    assert!(native_bundle.features.has("use-cache-command"));
    assert!(fallback_bundle.features.is_empty());

    assert_eq!(
        harness.resolver.build_file_cache().ready_keys(),
        vec![native.project_canonical(), fallback.string_canonical()]
    );
    assert_eq!(
        std::fs::read_to_string(&fallback_bundle.build_file_path).unwrap(),
        "FROM alpine\n"
    );
}

#[tokio::test]
async fn test_build_file_falls_back_to_build_earth() {
    let commit = MockCommit::new(HASH).branch("main").file("build.earth", "VERSION 0.6\n");
    let harness = MockHarness::with_main(commit);
    let cancel = CancellationToken::new();

    let bundle = harness
        .resolver
        .resolve_build_context(&cancel, &reference(&format!("{REPO_LOCATOR}:main+build")))
        .await
        .unwrap();
    assert!(bundle.build_file_path.ends_with("build.earth"));
    assert_eq!(bundle.features.version.as_deref(), Some("0.6"));
}

#[tokio::test]
async fn test_missing_build_file_is_not_cached() {
    let harness = MockHarness::with_main(sample_commit());
    let cancel = CancellationToken::new();
    let r = reference(&format!("{REPO_LOCATOR}/docs:main+build"));

    let err = harness.resolver.resolve_build_context(&cancel, &r).await.unwrap_err();
    assert!(matches!(root_error(&err), GitCtxError::BuildFileNotFound { dir, .. } if dir == "docs"));

    let message = format!("{err:#}");
    assert!(message.contains(&r.string_canonical()), "{message}");
    assert!(message.contains("locate build file"), "{message}");
    assert!(harness.resolver.build_file_cache().is_empty());
}

#[tokio::test]
async fn test_malformed_version_is_feature_parse_error() {
    let commit = MockCommit::new(HASH).branch("main").file("Earthfile", "VERSION latest\n");
    let harness = MockHarness::with_main(commit);
    let cancel = CancellationToken::new();

    let err = harness
        .resolver
        .resolve_build_context(&cancel, &reference(&format!("{REPO_LOCATOR}:main+build")))
        .await
        .unwrap_err();
    assert!(matches!(root_error(&err), GitCtxError::FeatureParseError { .. }));
    assert_eq!(err.downcast_ref::<GitCtxError>().unwrap().stage(), Some(Stage::ParseFeatures));
}

const METADATA_FIELDS: [&str; 7] =
    ["git-hash", "git-short-hash", "git-branch", "git-tags", "git-ts", "git-author", "git-body"];

#[tokio::test]
async fn test_missing_metadata_field_is_not_cached() {
    for field in METADATA_FIELDS {
        let harness = MockHarness::with_main(sample_commit());
        let cancel = CancellationToken::new();
        let r = reference(&format!("{REPO_LOCATOR}:main+build"));

        harness.executor.withhold_field(field);
        let err = harness.resolver.resolve_build_context(&cancel, &r).await.unwrap_err();
        assert!(
            matches!(root_error(&err), GitCtxError::MetadataReadError { field: f, .. } if f == field),
            "{field}: {err:#}"
        );
        assert_eq!(err.downcast_ref::<GitCtxError>().unwrap().stage(), Some(Stage::ExtractMetadata));
        assert!(harness.resolver.project_cache().is_empty(), "{field}");
        assert_eq!(harness.executor.clone_count(), 1, "{field}");

        harness.executor.restore_fields();
        let bundle = harness.resolver.resolve_build_context(&cancel, &r).await.unwrap();
        assert_eq!(bundle.git_metadata.hash, HASH, "{field}");
        assert_eq!(bundle.git_metadata.timestamp, "1700000000");
        assert_eq!(harness.executor.clone_count(), 3, "{field}");
    }
}

#[tokio::test]
async fn test_empty_hash_is_metadata_read_error() {
    let commit = MockCommit::new("").branch("main").file("Earthfile", "VERSION 0.7\n");
    let harness = MockHarness::with_main(commit);
    let cancel = CancellationToken::new();

    let err = harness
        .resolver
        .resolve_build_context(&cancel, &reference(&format!("{REPO_LOCATOR}:main+build")))
        .await
        .unwrap_err();

    assert!(matches!(root_error(&err), GitCtxError::MetadataReadError { field, .. } if field == "git-hash"));
    assert!(harness.resolver.project_cache().is_empty());
    // No pinned clone without a hash to pin to.
    assert_eq!(harness.executor.clone_count(), 1);
}

#[tokio::test]
async fn test_empty_optional_output_is_accepted() {
    let harness = MockHarness::with_main(sample_commit().body(""));
    let cancel = CancellationToken::new();

    let bundle = harness
        .resolver
        .resolve_build_context(&cancel, &reference(&format!("{REPO_LOCATOR}:main+build")))
        .await
        .unwrap();
    assert!(bundle.git_metadata.co_authors.is_empty());
}

#[tokio::test]
async fn test_clone_error_is_not_cached() {
    let harness = MockHarness::with_main(sample_commit());
    let cancel = CancellationToken::new();
    let r = reference(&format!("{REPO_LOCATOR}:main+build"));

    harness.executor.fail_next_clones(1);
    let err = harness.resolver.resolve_build_context(&cancel, &r).await.unwrap_err();
    assert!(matches!(root_error(&err), GitCtxError::CloneError { git_ref, .. } if git_ref == "main"));
    assert_eq!(err.downcast_ref::<GitCtxError>().unwrap().stage(), Some(Stage::Clone));

    harness.resolver.resolve_build_context(&cancel, &r).await.unwrap();
}

#[tokio::test]
async fn test_unknown_ref_is_clone_error() {
    let harness = MockHarness::with_main(sample_commit());
    let cancel = CancellationToken::new();

    let err = harness
        .resolver
        .resolve_build_context(&cancel, &reference(&format!("{REPO_LOCATOR}:no-such-branch+build")))
        .await
        .unwrap_err();
    assert!(matches!(root_error(&err), GitCtxError::CloneError { .. }));
}

#[tokio::test]
#[serial]
async fn test_concurrent_waiters_share_failure() {
    let harness = MockHarness::new(
        MockExecutor::new()
            .with_ref(REPO_URL, "main", sample_commit())
            .with_clone_delay(Duration::from_millis(50)),
    );
    let cancel = CancellationToken::new();
    let r = reference(&format!("{REPO_LOCATOR}:main+build"));

    harness.executor.fail_next_clones(1);
    let results = join_all((0..4).map(|_| harness.resolver.resolve_project(&cancel, &r))).await;

    assert!(results.iter().all(|r| matches!(r, Err(e) if matches!(e.root(), GitCtxError::CloneError { .. }))));
    assert_eq!(harness.executor.clone_count(), 1);
}

#[tokio::test]
#[serial]
async fn test_cancellation_returns_cancelled_and_key_stays_retryable() {
    let harness = MockHarness::new(
        MockExecutor::new()
            .with_ref(REPO_URL, "main", sample_commit())
            .with_clone_delay(Duration::from_millis(200)),
    );
    let r = reference(&format!("{REPO_LOCATOR}:main+build"));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = harness.resolver.resolve_build_context(&cancel, &r).await.unwrap_err();
    assert!(root_error(&err).is_cancelled());
    assert!(harness.resolver.project_cache().is_empty());

    let fresh = CancellationToken::new();
    harness.resolver.resolve_build_context(&fresh, &r).await.unwrap();
}

#[tokio::test]
async fn test_local_reference_is_rejected() {
    let harness = MockHarness::with_main(sample_commit());
    let err = harness
        .resolver
        .resolve_build_context(&CancellationToken::new(), &reference("./services/api+build"))
        .await
        .unwrap_err();
    assert!(matches!(root_error(&err), GitCtxError::UnexpectedLocalReference { .. }));
    assert_eq!(harness.executor.clone_count(), 0);
}

#[tokio::test]
async fn test_unknown_host_is_resolution_error() {
    let harness = MockHarness::with_main(sample_commit());
    let err = harness
        .resolver
        .resolve_build_context(&CancellationToken::new(), &reference("git.unknown.example/a/b+build"))
        .await
        .unwrap_err();
    assert!(matches!(root_error(&err), GitCtxError::ResolutionError { .. }));
    assert_eq!(err.downcast_ref::<GitCtxError>().unwrap().stage(), Some(Stage::ResolveUrl));
}

#[tokio::test]
async fn test_cleanup_removes_build_file_copies() {
    let harness = MockHarness::with_main(sample_commit());
    let cancel = CancellationToken::new();

    let bundle = harness
        .resolver
        .resolve_build_context(&cancel, &reference(&format!("{REPO_LOCATOR}:main+build")))
        .await
        .unwrap();
    assert!(bundle.build_file_path.exists());
    assert!(bundle.build_file_path.starts_with(harness.temp.path()));
    assert_eq!(harness.cleanup.len(), 1);

    harness.cleanup.close().unwrap();
    assert!(!bundle.build_file_path.exists());
}
