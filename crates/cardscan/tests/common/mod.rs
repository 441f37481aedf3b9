//! Shared test utilities for cardscan integration tests.
//!
//! - `TestHarness` wires a file-backed database, image store and cache in a
//!   temp directory
//! - builders for scans, candidates and catalog cards
//! - in-memory fakes for the external services

pub mod builders;
pub mod fakes;
pub mod harness;

pub use builders::*;
pub use fakes::*;
pub use harness::TestHarness;
