//! Resolver configuration.
//!
//! Configuration is read from a TOML file. Every field has a default, so a
//! missing file is equivalent to an empty one.
//!
//! # Location Priority
//!
//! 1. `--config <PATH>` on the command line
//! 2. `GITCTX_CONFIG_PATH` environment variable
//! 3. `~/.gitctx/config.toml`
//!
//! # Example
//!
//! ```toml
//! git_image = "alpine/git:v2.30.1"
//! feature_overrides = "--use-cache-command"
//!
//! [[remotes]]
//! host = "git.example.com"
//! pattern = "git.example.com/([^/]+/[^/]+)"
//! substitute = "ssh://git@git.example.com:2222/$1.git"
//! key_scans = ["git.example.com ssh-ed25519 AAAA..."]
//!
//! [known_hosts]
//! "github.com" = ["github.com ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAA..."]
//! ```

use crate::constants::DEFAULT_GIT_IMAGE;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

/// How clone URLs are formed for a remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// `https` unless SSH host keys are known for the host
    #[default]
    Auto,
    /// `git@host:path.git`
    Ssh,
    /// `https://host/path.git`
    Https,
}

/// A configured git remote.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Host name the locator must start with
    pub host: String,

    /// Regex matched against the locator. The first capture group selects
    /// the repository part; whatever follows it is the subdirectory. When
    /// absent, the repository is `<host>/<owner>/<repo>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Clone URL template applied to the match (`$1` is the capture group).
    /// When absent, the URL is derived from `auth`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub substitute: Option<String>,

    #[serde(default)]
    pub auth: AuthMode,

    /// User for SSH clone URLs (defaults to `git`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// `known_hosts` lines to trust when cloning over SSH
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_scans: Vec<String>,
}

/// Top-level configuration for [`crate::resolver::GitResolver`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Image the metadata extraction step runs in
    #[serde(default = "default_git_image")]
    pub git_image: String,

    /// Root for build-file scratch directories (`GITCTX_TMP_DIR` wins)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,

    /// Feature flag overrides passed to the feature parser
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub feature_overrides: String,

    /// Target platform for snapshot operations (defaults to the host)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remotes: Vec<RemoteConfig>,

    /// Host name to `known_hosts` lines
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub known_hosts: HashMap<String, Vec<String>>,
}

fn default_git_image() -> String {
    DEFAULT_GIT_IMAGE.to_string()
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            git_image: default_git_image(),
            temp_dir: None,
            feature_overrides: String::new(),
            platform: None,
            remotes: Vec::new(),
            known_hosts: HashMap::new(),
        }
    }
}

impl ResolverConfig {
    /// Load from the default location, falling back to defaults when the
    /// file does not exist.
    pub async fn load() -> Result<Self> {
        Self::load_with_optional(None).await
    }

    /// Load from `path` when given, otherwise from the default location.
    pub async fn load_with_optional(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => Self::default_path()?,
        };
        if path.exists() {
            Self::load_from(&path).await
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load and parse a specific configuration file.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Default configuration file path.
    ///
    /// `GITCTX_CONFIG_PATH` overrides `~/.gitctx/config.toml`.
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("GITCTX_CONFIG_PATH") {
            return Ok(PathBuf::from(path));
        }

        Ok(dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?
            .join(".gitctx")
            .join("config.toml"))
    }

    /// Directory under which build-file scratch directories are created.
    ///
    /// `GITCTX_TMP_DIR` takes precedence over `temp_dir`, which takes
    /// precedence over the system temporary directory.
    /// `~` and environment variables in either value are expanded.
    #[must_use]
    pub fn temp_root(&self) -> PathBuf {
        let configured = std::env::var("GITCTX_TMP_DIR")
            .ok()
            .or_else(|| self.temp_dir.as_ref().map(|p| p.display().to_string()));
        match configured {
            Some(raw) => shellexpand::full(&raw)
                .map_or_else(|_| PathBuf::from(&raw), |expanded| PathBuf::from(expanded.as_ref())),
            None => std::env::temp_dir(),
        }
    }
}
