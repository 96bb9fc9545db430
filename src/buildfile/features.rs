//! Feature flags declared by build files.
//!
//! Native build files start with a version declaration that may enable
//! optional features:
//!
//! ```text
//! VERSION --use-cache-command --shell-out-anywhere 0.7
//! ```
//!
//! Comments and blank lines may precede it. A file without a `VERSION`
//! line yields a feature set without a version. Overrides (from the
//! configuration or `--feature-flags`) are merged on top of the declared
//! flags; a leading `--no-` disables a flag.

use crate::core::GitCtxError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Parsed feature flags of a build file.
///
/// The default value is the empty set used for fallback-format files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSet {
    /// Declared `major.minor` version, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Enabled flag names without the leading `--`
    pub flags: BTreeSet<String>,
}

impl FeatureSet {
    /// Whether the set carries neither a version nor flags.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.version.is_none() && self.flags.is_empty()
    }

    #[must_use]
    pub fn has(&self, flag: &str) -> bool {
        self.flags.contains(flag.trim_start_matches("--"))
    }
}

/// Parses the feature declaration of a local build-file copy.
pub trait FeatureParser: Send + Sync {
    /// Parse `path`, applying `overrides`.
    ///
    /// `project_key` identifies the project in error messages.
    fn parse(&self, path: &Path, overrides: &str, project_key: &str) -> Result<FeatureSet, GitCtxError>;
}

/// Parser for `VERSION [--flag ...] <major>.<minor>` declarations.
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionLineParser;

impl VersionLineParser {
    /// Parse build-file content (exposed separately for callers holding bytes).
    pub fn parse_content(
        content: &str,
        overrides: &str,
        origin: &str,
    ) -> Result<FeatureSet, GitCtxError> {
        let fail = |reason: String| GitCtxError::FeatureParseError {
            path: origin.to_string(),
            reason,
        };

        let mut features = FeatureSet::default();

        let declaration = content
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with('#'))
            .and_then(|line| {
                let mut words = line.split_whitespace();
                (words.next() == Some("VERSION")).then(|| words.collect::<Vec<_>>())
            });

        if let Some(words) = declaration {
            let Some((version, flags)) = words.split_last() else {
                return Err(fail("VERSION requires a version number".to_string()));
            };
            if !is_valid_version(version) {
                return Err(fail(format!("invalid version '{version}', expected <major>.<minor>")));
            }
            for flag in flags {
                let name = flag
                    .strip_prefix("--")
                    .filter(|name| !name.is_empty())
                    .ok_or_else(|| fail(format!("unexpected argument '{flag}' in VERSION")))?;
                features.flags.insert(name.to_string());
            }
            features.version = Some((*version).to_string());
        }

        for flag in overrides.split([',', ' ']).map(str::trim).filter(|f| !f.is_empty()) {
            let name = flag.trim_start_matches("--");
            if let Some(disabled) = name.strip_prefix("no-") {
                features.flags.remove(disabled);
            } else if !name.is_empty() {
                features.flags.insert(name.to_string());
            }
        }

        Ok(features)
    }
}

impl FeatureParser for VersionLineParser {
    fn parse(&self, path: &Path, overrides: &str, project_key: &str) -> Result<FeatureSet, GitCtxError> {
        let content = std::fs::read_to_string(path).map_err(|e| GitCtxError::FeatureParseError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        tracing::debug!(target: "gitctx::buildfile", "Parsing features of {} for {}", path.display(), project_key);
        Self::parse_content(&content, overrides, &path.display().to_string())
    }
}

fn is_valid_version(version: &str) -> bool {
    match version.split_once('.') {
        Some((major, minor)) => {
            !major.is_empty()
                && !minor.is_empty()
                && major.chars().all(|c| c.is_ascii_digit())
                && minor.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}
