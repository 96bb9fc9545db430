//! Session-level utilities.
//!
//! - [`cleanup`] - teardown actions for resources that outlive a single call

pub mod cleanup;

pub use cleanup::CleanupCollection;
