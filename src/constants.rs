//! Global constants used throughout the gitctx codebase.
//!
//! Timeouts, well-known file names, and the fixed metadata extraction
//! layout live here so the resolver, the extractor and the executors agree
//! on them.

use std::time::Duration;

/// Image the metadata extraction script runs in.
pub const DEFAULT_GIT_IMAGE: &str = "alpine/git:v2.30.1";

/// Mount point of the cloned repository inside the extraction step.
pub const GIT_SRC_MOUNT: &str = "/git-src";

/// Mount point the extraction step writes its output files to.
pub const GIT_META_DEST_MOUNT: &str = "/dest";

/// Prefix of target names that address a fallback-format build file.
///
/// `+@dockerfile:` selects `Dockerfile`, `+@dockerfile:Dockerfile.dev`
/// selects a named file in the same directory.
pub const DOCKERFILE_META_TARGET: &str = "@dockerfile:";

/// Default fallback-format file name.
pub const DEFAULT_DOCKERFILE_NAME: &str = "Dockerfile";

/// Native build-definition file names, in order of preference.
pub const NATIVE_BUILD_FILE_NAMES: &[&str] = &["Earthfile", "build.earth"];

/// Prefix for the scratch directories holding build-file copies.
pub const BUILD_FILE_TMP_PREFIX: &str = "gitctx-git";

/// Timeout for a single clone performed by the local executor (120 seconds).
///
/// Clone operations may take a while for large repositories.
pub const GIT_CLONE_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout for the metadata extraction script (60 seconds).
pub const GIT_META_TIMEOUT: Duration = Duration::from_secs(60);
