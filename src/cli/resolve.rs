//! `gitctx resolve` - resolve a reference with the local executor.

use crate::buildfile::{FeatureSet, VersionLineParser};
use crate::config::ResolverConfig;
use crate::core::{FileOperation, FileResultExt};
use crate::metadata::GitMetadata;
use crate::reference::Reference;
use crate::resolver::{BuildContextBundle, GitResolver};
use crate::snapshot::LocalGitExecutor;
use crate::utils::CleanupCollection;
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Resolve a remote reference and print the resulting build context.
#[derive(Args, Debug)]
pub struct ResolveCommand {
    /// Reference to resolve, e.g. `github.com/acme/repo/sub:main+build`
    pub reference: String,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,

    /// Feature flag overrides, e.g. `--use-cache-command,--no-wait-block`
    #[arg(long, allow_hyphen_values = true)]
    pub feature_flags: Option<String>,

    /// Target platform for snapshot operations, e.g. `linux/arm64`
    #[arg(long)]
    pub platform: Option<String>,

    /// Keep scratch copies and snapshots instead of removing them on exit
    #[arg(long)]
    pub keep: bool,
}

#[derive(Serialize)]
struct ResolveOutput<'a> {
    reference: String,
    build_file_path: String,
    has_build_context: bool,
    git: &'a GitMetadata,
    features: &'a FeatureSet,
}

impl ResolveCommand {
    pub async fn execute(self, config_path: Option<PathBuf>) -> Result<()> {
        let reference = Reference::parse(&self.reference)?;

        let mut config = ResolverConfig::load_with_optional(config_path).await?;
        if let Some(flags) = &self.feature_flags {
            if config.feature_overrides.is_empty() {
                config.feature_overrides = flags.clone();
            } else {
                config.feature_overrides = format!("{},{flags}", config.feature_overrides);
            }
        }
        if let Some(platform) = &self.platform {
            config.platform = Some(platform.clone());
        }

        let cleanup = Arc::new(CleanupCollection::new());
        let result = self.resolve_with(&config, &reference, &cleanup).await;

        if self.keep {
            tracing::info!("Keeping {} scratch location(s)", cleanup.len());
        } else if let Err(e) = cleanup.close() {
            tracing::warn!("Cleanup incomplete: {:#}", e);
        }

        let bundle = result?;
        self.print(&reference, &bundle)
    }

    async fn resolve_with(
        &self,
        config: &ResolverConfig,
        reference: &Reference,
        cleanup: &Arc<CleanupCollection>,
    ) -> Result<BuildContextBundle> {
        let temp_root = config.temp_root();
        std::fs::create_dir_all(&temp_root).with_file_context(FileOperation::CreateDir, &temp_root)?;
        let work_dir = tempfile::Builder::new()
            .prefix("gitctx-snapshots")
            .tempdir_in(&temp_root)
            .with_file_context(FileOperation::CreateDir, &temp_root)?;
        let executor = Arc::new(LocalGitExecutor::new(cleanup.add_dir(work_dir))?);

        let resolver =
            GitResolver::new(config, executor, Arc::new(VersionLineParser), cleanup.clone())?;

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_interrupt.cancel();
            }
        });

        let result = resolver.resolve_build_context(&cancel, reference).await;
        interrupt.abort();
        result
    }

    fn print(&self, reference: &Reference, bundle: &BuildContextBundle) -> Result<()> {
        if self.json {
            let output = ResolveOutput {
                reference: reference.string_canonical(),
                build_file_path: bundle.build_file_path.display().to_string(),
                has_build_context: bundle.context_factory.is_some(),
                git: &bundle.git_metadata,
                features: &bundle.features,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
            return Ok(());
        }

        let git = &bundle.git_metadata;
        println!("{}", reference.string_canonical().cyan().bold());
        println!("  {:<12} {}", "remote".dimmed(), git.remote_url);
        println!("  {:<12} {}", "directory".dimmed(), git.rel_dir);
        println!("  {:<12} {} ({})", "commit".dimmed(), git.hash, git.short_hash.yellow());
        if !git.branches.is_empty() {
            println!("  {:<12} {}", "branches".dimmed(), git.branches.join(", "));
        }
        if !git.tags.is_empty() {
            println!("  {:<12} {}", "tags".dimmed(), git.tags.join(", ").green());
        }
        println!("  {:<12} {}", "timestamp".dimmed(), git.timestamp);
        println!("  {:<12} {}", "author".dimmed(), git.author);
        if !git.co_authors.is_empty() {
            println!("  {:<12} {}", "co-authors".dimmed(), git.co_authors.join(", "));
        }
        println!("  {:<12} {}", "build file".dimmed(), bundle.build_file_path.display());
        match &bundle.features.version {
            Some(version) => println!("  {:<12} {}", "version".dimmed(), version),
            None => println!("  {:<12} {}", "version".dimmed(), "-".dimmed()),
        }
        if !bundle.features.flags.is_empty() {
            let flags: Vec<&str> = bundle.features.flags.iter().map(String::as_str).collect();
            println!("  {:<12} {}", "features".dimmed(), flags.join(" "));
        }
        if bundle.context_factory.is_none() {
            println!("  {}", "command reference: no build context".dimmed());
        }
        Ok(())
    }
}
