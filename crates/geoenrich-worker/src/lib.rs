//! geoenrich worker library
//!
//! Batch address enrichment. Each job streams a CSV of addresses out of
//! object storage, resolves every address to a business establishment
//! through a rate-limited places lookup, and streams one NDJSON result line
//! per address back into object storage.
//!
//! # Architecture
//!
//! - [`consumer`]: polls the job queue, records PROCESSING, runs jobs
//! - [`orchestrator`]: one job end to end, including its terminal status
//! - [`pipeline`]: reader → worker pool → writer over bounded feeds
//! - [`resolver`]: geocode → nearby search → place details
//! - [`rate_limit`]: process-wide token bucket shared by all lookups
//! - [`places`], [`storage`], [`jobs`]: external collaborators behind traits
//! - [`api`]: read-only job status endpoints
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use geoenrich_worker::{
//!     config::Config,
//!     places::GoogleMapsClient,
//!     rate_limit::RateLimiter,
//!     resolver::AddressResolver,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let api = Arc::new(GoogleMapsClient::new(&config.places)?);
//! let limiter = Arc::new(RateLimiter::new(
//!     config.places.requests_per_second,
//!     config.places.burst,
//! ));
//!
//! let resolver = AddressResolver::new(api, limiter);
//! let result = resolver
//!     .resolve("1600 Amphitheatre Pkwy, Mountain View", &CancellationToken::new())
//!     .await;
//! println!("{}", serde_json::to_string(&result)?);
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod api;
pub mod config;
pub mod consumer;
pub mod error;
pub mod jobs;
pub mod orchestrator;
pub mod pipeline;
pub mod places;
pub mod rate_limit;
pub mod resolver;
pub mod storage;

pub use error::{ConfigError, LookupError, PipelineError, StorageError, StoreError};
