//! Integration test suite for gitctx
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **resolve**: resolution pipeline against the in-memory executor
//! - **local_git**: end-to-end resolution of fixture repositories with git
//! - **cli**: the `gitctx` binary

mod common;

mod local_git;
mod resolve;
