//! # TheoryDB Testkit
//!
//! Test utilities for TheoryDB.
//!
//! This crate provides:
//! - [`MemoryBackend`], an in-memory store that evaluates conditions,
//!   updates, key conditions, filters and projections, with fault and
//!   unprocessed-work injection
//! - Deterministic fakes for the key service, randomness and the clock
//! - Sample records and a table [`Harness`]
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use theorydb_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_table() {
//!     let notes = Harness::<Note>::new();
//!     notes.put(&Note::new("A", "B", 1)).unwrap();
//!     notes.clock.advance(Duration::from_secs(60));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod eval;
pub mod fakes;
pub mod fixtures;
pub mod generators;
pub mod memory;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fakes::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::memory::*;
}

pub use fakes::*;
pub use fixtures::*;
pub use generators::*;
pub use memory::*;
