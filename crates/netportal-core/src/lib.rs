//! # netportal-core
//!
//! Shared primitives for the netportal reporting engine.
//!
//! - **Identifiers**: strongly-typed IDs for jobs and tables
//! - **Errors**: the shared error type for primitive parsing and config
//! - **Observability**: logging initialisation and span helpers
//! - **Configuration**: environment-variable helpers
//!
//! ## Example
//!
//! ```rust
//! use netportal_core::prelude::*;
//!
//! let job = JobId::generate();
//! let table = TableId::new(1);
//! init_logging(LogFormat::Pretty);
//! # let _ = (job, table);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod error;
pub mod id;
pub mod observability;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::id::{JobId, TableId};
    pub use crate::observability::{init_logging, LogFormat};
}

pub use error::{Error, Result};
pub use id::{JobId, TableId};
pub use observability::{init_logging, LogFormat};
