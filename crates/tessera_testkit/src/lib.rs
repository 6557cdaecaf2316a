//! # tessera testkit
//!
//! Test utilities for tessera.
//!
//! This crate provides:
//! - Bridge fixtures, in memory or in a temporary directory
//! - Seeded tables and record helpers
//! - Property-based generators using proptest
//! - An integration harness that tracks expected rows
//! - Tracing setup for tests and benchmarks
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tessera_testkit::prelude::*;
//!
//! #[test]
//! fn finds_penny() {
//!     let bridge = TestBridge::memory();
//!     seed_table(&bridge, "dev", "dog", "id", records(json!([{"id": 1, "name": "Penny"}])));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::logging::*;
    pub use serde_json::json;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use logging::*;
