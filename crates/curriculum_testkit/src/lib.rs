//! # Curriculum Testkit
//!
//! Test utilities for the curriculum engine.
//!
//! This crate provides:
//! - Persisted curriculum fixtures and a controller test harness
//! - Property-based test generators using proptest
//! - Tracing setup for tests
//!
//! The in-memory persistence service itself lives in `curriculum_engine`
//! and is re-exported here.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use curriculum_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn commit_sends_section() {
//!     let harness = TestHarness::empty();
//!     harness.create_section("Intro");
//!     assert!(harness.commit().await.is_success());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use curriculum_engine::{Endpoint, Failure, MemoryPersistence, ServiceCall};
}

pub use curriculum_engine::{Endpoint, Failure, MemoryPersistence, ServiceCall};
pub use fixtures::*;
pub use generators::*;
pub use logging::*;
