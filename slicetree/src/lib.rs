//! # slicetree
//!
//! Hierarchical metric-tree time-series store over a wide-column database.
//!
//! slicetree is the storage side of a Graphite/carbon style metrics daemon.
//! Metrics live under dotted paths (`servers.web01.cpu`); each metric keeps
//! several retention archives, writes are split into time slices so sparse
//! series do not waste space, and finer archives roll up into coarser ones
//! as data arrives.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Gap-tolerant slices: a write only starts a new slice after more than
//!   `max_slice_gap` seconds without data
//! - Write-time rollup honoring each metric's xFilesFactor and aggregation
//!   method
//! - Slice boundary cache with runtime-switchable `none` / `latest` / `all`
//!   behavior
//! - Pluggable column store with bounded retries for transient failures
//! - Idempotent keyspace and table setup, safe to run on every start
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use slicetree::{CreateOptions, Database, DatabaseSettings, Retention};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = DatabaseSettings::new("./carbon-data", "metrics", "localhost");
//! let db = Database::open(settings)?;
//!
//! // 1 minute points for a day, 5 minute points for a week
//! db.create(
//!     "servers.web01.cpu",
//!     CreateOptions::new(
//!         vec![Retention::new(60, 1440), Retention::new(300, 2016)],
//!         0.5,
//!         "average",
//!     ),
//! )?;
//!
//! db.write("servers.web01.cpu", &[(1_700_000_000, 12.5), (1_700_000_060, 14.0)])?;
//!
//! let data = db.fetch("servers.web01.cpu", 1_700_000_000, 1_700_000_120, 1_700_000_120)?;
//! for (timestamp, value) in data.points() {
//!     println!("{timestamp}: {value:?}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Database`] - Host-facing adapter built from [`DatabaseSettings`]
//! - [`DataTree`] - Dotted-path namespace, branch index and `find`
//! - [`MetricNode`] - One metric: slice-aware writes, reads, rollup, pruning
//! - [`SliceCache`] - Slice boundary cache
//! - [`ColumnStoreClient`] - Retrying client over a [`column::ColumnStore`]
//!
//! ## Modules
//!
//! - [`adapter`] - Host calls and create options
//! - [`config`] - Settings parsing and validation
//! - [`tree`] - Tree operations and path validation
//! - [`node`] - Metric nodes and read results
//! - [`cache`] - Slice caching behaviors
//! - [`slice`] - Slice descriptors and column encoding
//! - [`layout`] - Keyspace/table initialization
//! - [`column`] - Column store trait, client and backends
//! - [`pattern`] - Glob patterns for `find`
//! - [`schema`] - Retentions, aggregation and node definitions
//! - [`error`] - Error types

pub mod adapter;
pub mod cache;
pub mod column;
pub mod config;
pub mod error;
pub mod layout;
pub mod node;
pub mod pattern;
pub mod schema;
pub mod slice;
pub mod tree;

// Re-export primary API types at crate root for convenience.
pub use adapter::{CreateOptions, Database};
pub use cache::{SliceCache, SliceCachingBehavior};
pub use column::ColumnStoreClient;
pub use config::DatabaseSettings;
pub use error::{ErrorKind, Result, SliceTreeError};
pub use node::{MetricNode, TimeSeriesData};
pub use schema::{AggregationMethod, Metadata, NodeDefinition, Retention};
pub use tree::{DataTree, TreeEntry, TreeOptions};
