//! Shared test utilities for netportal integration tests.
//!
//! This crate provides:
//! - Table and store factories ([`traffic_table`], [`StoreFactory`])
//! - Scripted query executors ([`RowsExecutor`], [`TrackingExecutor`])
//! - Job assertion helpers
//!
//! # Example
//!
//! ```rust,ignore
//! use netportal_test_utils::{assert_job_complete, StoreFactory, traffic_table};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let store = StoreFactory::new().inline().build();
//!     let job = store.create(traffic_table(1), Criteria::new()).unwrap();
//!     job.start().await.unwrap();
//!     assert_job_complete(&job);
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod fixtures;

pub use assertions::*;
pub use fixtures::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("netportal=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
