//! References to targets and commands in remote projects.
//!
//! A reference names a build target (or a command) inside a project that
//! lives in a git repository:
//!
//! ```text
//! github.com/acme/monorepo/services/api:v1.2.0+build
//! └──────────── locator ──────────────┘└ ref ┘└name┘
//! ```
//!
//! - The **locator** is the repository path plus an optional subdirectory.
//!   Splitting it into clone URL and subdirectory is the job of
//!   [`crate::git::GitLookup`].
//! - The **ref** is optional and may be a branch, tag or commit.
//! - The **name** is the target. `UPPER_CASE` names are commands, which carry
//!   no build context. Names starting with `@dockerfile:` address a
//!   fallback-format build file.
//!
//! References whose locator is empty or starts with `./`, `../` or `/` are
//! local and cannot be resolved through git.

use crate::constants::{DEFAULT_DOCKERFILE_NAME, DOCKERFILE_META_TARGET};
use crate::core::GitCtxError;
use std::fmt;
use std::str::FromStr;

/// Whether a reference names a target or a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    /// A build target; resolving it yields a build context
    Target,
    /// A reusable command; it has no build context of its own
    Command,
}

/// A parsed target or command reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    locator: String,
    git_ref: Option<String>,
    name: String,
    kind: ReferenceKind,
}

impl Reference {
    /// Parse a reference string.
    ///
    /// # Errors
    ///
    /// Returns [`GitCtxError::InvalidReference`] when the `+name` part is
    /// missing or empty, or when the ref after `:` is empty.
    ///
    /// ```
    /// use gitctx::reference::Reference;
    ///
    /// let r = Reference::parse("github.com/acme/repo/sub:main+build").unwrap();
    /// assert_eq!(r.git_url(), "github.com/acme/repo/sub");
    /// assert_eq!(r.tag(), "main");
    /// assert_eq!(r.name(), "build");
    /// assert_eq!(r.project_canonical(), "github.com/acme/repo/sub:main");
    /// ```
    pub fn parse(input: &str) -> Result<Self, GitCtxError> {
        let invalid = |reason: &str| GitCtxError::InvalidReference {
            reference: input.to_string(),
            reason: reason.to_string(),
        };

        let input = input.trim();
        let plus = input.rfind('+').ok_or_else(|| invalid("missing '+<name>'"))?;
        let (project, name) = (&input[..plus], &input[plus + 1..]);
        if name.is_empty() {
            return Err(invalid("empty target name"));
        }

        let (locator, git_ref) = match project.split_once(':') {
            Some((_, "")) => return Err(invalid("empty ref after ':'")),
            Some((locator, git_ref)) => (locator, Some(git_ref.to_string())),
            None => (project, None),
        };

        let kind = if is_command_name(name) {
            ReferenceKind::Command
        } else {
            ReferenceKind::Target
        };

        Ok(Self {
            locator: locator.trim_end_matches('/').to_string(),
            git_ref,
            name: name.to_string(),
            kind,
        })
    }

    /// Whether the reference points at a remote repository.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        !(self.locator.is_empty()
            || self.locator.starts_with("./")
            || self.locator.starts_with("../")
            || self.locator.starts_with('/')
            || self.locator == "."
            || self.locator == "..")
    }

    /// Repository locator, including any subdirectory.
    #[must_use]
    pub fn git_url(&self) -> &str {
        &self.locator
    }

    /// The requested ref, or an empty string for the remote default branch.
    #[must_use]
    pub fn tag(&self) -> &str {
        self.git_ref.as_deref().unwrap_or("")
    }

    /// Target or command name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Target or command.
    #[must_use]
    pub const fn kind(&self) -> ReferenceKind {
        self.kind
    }

    /// Whether the reference names a target (and thus has a build context).
    #[must_use]
    pub fn is_target(&self) -> bool {
        self.kind == ReferenceKind::Target
    }

    /// Whether the target addresses a fallback-format build file.
    #[must_use]
    pub fn is_dockerfile(&self) -> bool {
        self.name.starts_with(DOCKERFILE_META_TARGET)
    }

    /// File name of the fallback-format build file this reference selects.
    ///
    /// Returns `None` for native references.
    #[must_use]
    pub fn dockerfile_name(&self) -> Option<&str> {
        self.name.strip_prefix(DOCKERFILE_META_TARGET).map(|rest| {
            if rest.is_empty() {
                DEFAULT_DOCKERFILE_NAME
            } else {
                rest
            }
        })
    }

    /// Project identity without the target name: `<locator>[:<ref>]`.
    #[must_use]
    pub fn project_canonical(&self) -> String {
        match &self.git_ref {
            Some(git_ref) => format!("{}:{}", self.locator, git_ref),
            None => self.locator.clone(),
        }
    }

    /// Full identity: `<locator>[:<ref>]+<name>`.
    #[must_use]
    pub fn string_canonical(&self) -> String {
        format!("{}+{}", self.project_canonical(), self.name)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.string_canonical())
    }
}

impl FromStr for Reference {
    type Err = GitCtxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn is_command_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}
