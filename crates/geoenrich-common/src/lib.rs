//! geoenrich common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging, and error handling for the geoenrich workspace.
//!
//! # Overview
//!
//! - **Error Handling**: the shared [`GeoenrichError`] and [`Result`] alias
//! - **Logging**: `tracing` subscriber setup driven by `LOG_*` variables
//! - **Types**: jobs, queue messages and per-address resolution results
//!
//! # Example
//!
//! ```no_run
//! use geoenrich_common::types::{ResolutionResult, StatusTag};
//!
//! let miss = ResolutionResult::tagged("1 Main St", None, StatusTag::NoResultsFound);
//! assert!(miss.details.is_none());
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{GeoenrichError, Result};
