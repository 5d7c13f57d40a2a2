//! Shared test utilities for dlstore integration tests.
//!
//! This module provides:
//! - `TestHarness` owning a file-backed store in a temp directory
//! - Builders for seeding jobs and episodes

pub mod builders;
pub mod harness;

#[allow(unused_imports)]
pub use builders::*;
pub use harness::TestHarness;
