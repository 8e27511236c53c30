//! Shared test utilities for docjobs integration tests.
//!
//! This module provides:
//! - `TestHarness` with a temp data directory, SQLite job store and file store
//! - PDF and image builders
//! - Scripted executors standing in for real backends

pub mod builders;
pub mod executors;
pub mod harness;

pub use builders::*;
pub use executors::*;
pub use harness::TestHarness;
