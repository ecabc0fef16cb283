//! # fetch-plan
//!
//! A batched, deduplicating, cache-coordinated data-fetching engine.
//!
//! Express a computation that depends on multiple remote lookups as a
//! composable [`Plan`], then [`run`] it: identical requests are deduplicated,
//! independent requests against the same source are batched into one call,
//! independent requests against different sources are dispatched concurrently
//! in a single round, and results are cached across rounds.
//!
//! ## Features
//!
//! - One fetch call per source per round, ids deduplicated
//! - Cache hits never re-fetch, within a run or across runs sharing a cache
//! - A chronological round log with timings for observability
//! - Pluggable cache backends behind the [`CacheStore`] protocol
//!
//! ## Quick Start
//!
//! ```
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use fetch_plan::{one, run_fetch, DataSource, InMemoryCache};
//!
//! struct Users;
//!
//! #[async_trait]
//! impl DataSource for Users {
//!     type Id = u32;
//!     type Value = String;
//!
//!     fn name(&self) -> &str {
//!         "Users"
//!     }
//!
//!     async fn fetch(&self, ids: Vec<u32>) -> anyhow::Result<HashMap<u32, String>> {
//!         Ok(ids.into_iter().map(|id| (id, format!("user-{id}"))).collect())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> fetch_plan::Result<()> {
//!     let users = Arc::new(Users);
//!
//!     // Two independent lookups resolve in one batched round.
//!     let plan = one(&users, 1).join(one(&users, 2));
//!     let (env, (a, b)) = run_fetch(plan, InMemoryCache::empty()).await?;
//!
//!     assert_eq!((a.as_str(), b.as_str()), ("user-1", "user-2"));
//!     assert_eq!(env.rounds().len(), 1);
//!     Ok(())
//! }
//! ```
//!
//! ## Sequential dependencies
//!
//! Only [`join`](Plan::join)-shaped composition shares rounds. A
//! [`flat_map`](Plan::flat_map) continuation depends on the previous value,
//! so its fetches necessarily run in a later round.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod batch;
/// The cache protocol and the default in-memory implementation
pub mod cache;
/// The round interpreter and `run` entry points
pub mod engine;
/// The environment threaded through interpretation: cache plus round log
pub mod env;
/// Error types and result definitions
pub mod error;
/// Cache keys and type-erased values
pub mod identity;
/// The plan algebra and its combinators
pub mod plan;
/// The data-source interface
pub mod source;

// Re-export main types
pub use cache::{CacheStore, InMemoryCache, inserting_all};
pub use engine::{run, run_env, run_fetch};
pub use env::{ExecutionSummary, FetchEnv, Round, RoundKind, RoundSummary};
pub use error::{FetchError, Result};
pub use identity::{CacheValue, IdentityKey, SourceIdentity};
pub use plan::{Plan, collect, many, one, traverse};
pub use source::DataSource;
