//! Test utilities for gitctx
//!
//! Available to unit tests and, through the `test-utils` feature, to the
//! integration suite:
//!
//! - [`MockExecutor`] - recording in-memory snapshot executor
//! - [`TestGit`] - thin wrapper for building fixture repositories with git
//! - [`init_test_logging`] - one-time tracing setup honoring `RUST_LOG`
//!
//! # Example
//!
//! ```rust,no_run
//! use gitctx::test_utils::{MockCommit, MockExecutor};
//!
//! let executor = MockExecutor::new().with_ref(
//!     "https://github.com/acme/repo.git",
//!     "main",
//!     MockCommit::new("0123456789abcdef0123456789abcdef01234567")
//!         .branch("main")
//!         .file("Earthfile", "VERSION 0.7\n"),
//! );
//! assert_eq!(executor.clone_count(), 0);
//! ```

pub mod git_helper;
pub mod mock_executor;

pub use git_helper::TestGit;
pub use mock_executor::{MockCall, MockCommit, MockExecutor, mock_snapshot_file};

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Uses `level` when given, otherwise `RUST_LOG`; with neither, logging
/// stays off. Safe to call from every test.
///
/// ```bash
/// RUST_LOG=gitctx::cache=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}
