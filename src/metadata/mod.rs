//! Commit metadata of resolved projects.
//!
//! A [`ResolvedProject`] is produced once per `(clone URL, ref)` pair by the
//! [`extractor::GitMetadataExtractor`] and then shared through the project
//! cache. [`GitMetadata`] is the serializable view handed to callers as part
//! of a build-context bundle.

pub mod extractor;

use crate::snapshot::Snapshot;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub use extractor::GitMetadataExtractor;

/// A repository resolved at a ref.
///
/// Never mutated after construction; shared between cache keys via `Arc`.
#[derive(Debug, Clone)]
pub struct ResolvedProject {
    /// Full commit hash (never empty)
    pub hash: String,
    /// Abbreviated commit hash, 8 hex characters
    pub short_hash: String,
    /// Branches pointing at the commit, first is the checked-out one
    pub branches: Vec<String>,
    /// Tags pointing exactly at the commit, `HEAD` excluded
    pub tags: Vec<String>,
    /// Committer timestamp in seconds since the epoch, verbatim
    pub timestamp: String,
    /// Author e-mail of the commit
    pub author: String,
    /// Addresses from `Co-authored-by:` trailers, de-duplicated, in order
    pub co_authors: Vec<String>,
    /// Repository content at `hash`, including `.git`
    pub snapshot: Snapshot,
}

/// Git information attached to a build-context bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitMetadata {
    /// Local base directory of the project; empty for remote projects
    pub base_dir: String,
    /// Subdirectory of the build file inside the repository
    pub rel_dir: String,
    /// Clone URL with credentials stripped
    pub remote_url: String,
    pub hash: String,
    pub short_hash: String,
    pub branches: Vec<String>,
    pub tags: Vec<String>,
    pub timestamp: String,
    pub author: String,
    pub co_authors: Vec<String>,
}

/// Collect the co-authors named in `Co-authored-by:` trailers of a commit body.
///
/// The e-mail address between `<` and `>` is used when present, otherwise the
/// whole trailer value. Matching is case-insensitive and duplicates are
/// dropped while keeping first-seen order.
///
/// ```
/// use gitctx::metadata::parse_co_authors_from_body;
///
/// let body = "Fix it\n\nCo-authored-by: Jane <jane@example.com>\nco-authored-by: bob\n";
/// assert_eq!(parse_co_authors_from_body(body), vec!["jane@example.com", "bob"]);
/// ```
#[must_use]
pub fn parse_co_authors_from_body(body: &str) -> Vec<String> {
    let mut authors: Vec<String> = Vec::new();
    let (Ok(trailer_re), Ok(email_re)) = (
        Regex::new(r"(?im)^\s*co-authored-by:\s*(.+?)\s*$"),
        Regex::new(r"<([^<>]+)>"),
    ) else {
        return authors;
    };
    for caps in trailer_re.captures_iter(body) {
        let value = &caps[1];
        let author = email_re
            .captures(value)
            .map_or_else(|| value.to_string(), |email| email[1].trim().to_string());
        if !author.is_empty() && !authors.contains(&author) {
            authors.push(author);
        }
    }
    authors
}
