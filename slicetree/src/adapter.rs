//! Host-facing database adapter.
//!
//! [`Database`] exposes the five calls a carbon-style daemon makes against
//! its storage plugin (`write`, `exists`, `create`, `get_metadata`,
//! `set_metadata`), translating host option names and settings into tree
//! calls. Every error it returns is wrapped in
//! [`SliceTreeError::Operation`] naming the call and the metric.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use slicetree::adapter::{CreateOptions, Database};
//! use slicetree::column::MemoryColumnStore;
//! use slicetree::config::DatabaseSettings;
//! use slicetree::schema::Retention;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = DatabaseSettings::new("/var/lib/carbon", "metrics", "localhost");
//! let db = Database::with_store(settings, Arc::new(MemoryColumnStore::new()))?;
//!
//! db.create(
//!     "servers.web01.load",
//!     CreateOptions::new(vec![Retention::new(60, 1440)], 0.5, "average"),
//! )?;
//! db.write("servers.web01.load", &[(1_700_000_000, 0.42)])?;
//! db.set_metadata("servers.web01.load", "owner", json!("ops"))?;
//!
//! assert!(db.exists("servers.web01.load")?);
//! assert_eq!(db.get_metadata("servers.web01.load", "aggregationMethod")?, json!("average"));
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::cache::SliceCachingBehavior;
use crate::column::{ColumnStore, FileColumnStore};
use crate::config::DatabaseSettings;
use crate::error::{NotFoundError, Result, SliceTreeError};
use crate::layout::initialize_table_layout;
use crate::node::TimeSeriesData;
use crate::schema::{AggregationMethod, Metadata, NodeDefinition, Retention};
use crate::tree::{DataTree, TreeEntry};

/// Options of a `create` call, using the host's option names.
///
/// Keys other than `retentions`, `xfilesfactor` and `aggregation-method`
/// are collected into `extra` and stored as metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOptions {
    /// Archives from finest to coarsest, as `[step, count]` pairs.
    pub retentions: Vec<Retention>,
    /// Minimum known fraction for rollup.
    #[serde(rename = "xfilesfactor")]
    pub x_files_factor: f64,
    /// Aggregation method name.
    #[serde(rename = "aggregation-method")]
    pub aggregation_method: String,
    /// Any other options.
    #[serde(flatten)]
    pub extra: Metadata,
}

impl CreateOptions {
    /// Creates options without extra metadata.
    pub fn new(
        retentions: Vec<Retention>,
        x_files_factor: f64,
        aggregation_method: impl Into<String>,
    ) -> Self {
        Self {
            retentions,
            x_files_factor,
            aggregation_method: aggregation_method.into(),
            extra: Metadata::new(),
        }
    }

    /// Adds an extra metadata entry.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    fn into_definition(self) -> Result<(NodeDefinition, Metadata)> {
        let aggregation_method: AggregationMethod = self.aggregation_method.parse()?;
        let definition =
            NodeDefinition::new(self.retentions, self.x_files_factor, aggregation_method)?;
        Ok((definition, self.extra))
    }
}

/// A storage plugin instance.
#[derive(Debug, Clone)]
pub struct Database {
    settings: DatabaseSettings,
    tree: DataTree,
}

impl Database {
    /// Opens a database backed by the file store under
    /// `settings.local_data_dir`, creating the keyspace and tables if
    /// needed.
    ///
    /// # Errors
    ///
    /// - [`ConfigError`](crate::error::ConfigError) for invalid settings
    /// - a store error if the data directory or schema cannot be set up
    pub fn open(settings: DatabaseSettings) -> Result<Self> {
        settings.validate()?;
        let store = FileColumnStore::open(&settings.local_data_dir)?;
        Self::with_store(settings, Arc::new(store))
    }

    /// Opens a database over an arbitrary column store backend.
    ///
    /// # Errors
    ///
    /// - [`ConfigError`](crate::error::ConfigError) for invalid settings
    /// - a store error if connecting or creating the schema fails
    pub fn with_store(settings: DatabaseSettings, store: Arc<dyn ColumnStore>) -> Result<Self> {
        settings.validate()?;
        let (client, layout) = initialize_table_layout(
            store,
            &settings.keyspace,
            settings.cluster_config()?,
            &settings.replication_strategy,
            &settings.strategy_options()?,
            &settings.local_dc_name,
        )?;
        let options = settings.tree_options()?;
        let tree = DataTree::new(client, layout, options);

        info!(
            keyspace = %settings.keyspace,
            datacenter = tree.layout().datacenter(),
            caching = %options.caching_behavior,
            max_slice_gap = options.max_slice_gap,
            "opened metric database"
        );
        Ok(Self { settings, tree })
    }

    /// The settings the database was opened with.
    pub fn settings(&self) -> &DatabaseSettings {
        &self.settings
    }

    /// The underlying tree.
    pub fn tree(&self) -> &DataTree {
        &self.tree
    }

    /// Stores datapoints for an existing metric.
    ///
    /// # Errors
    ///
    /// Fails if the metric does not exist, a value is not finite, or the
    /// store fails.
    pub fn write(&self, metric: &str, datapoints: &[(u64, f64)]) -> Result<()> {
        annotate("write", metric, || self.tree.store(metric, datapoints))
    }

    /// Whether the metric exists.
    ///
    /// # Errors
    ///
    /// Fails if the store fails.
    pub fn exists(&self, metric: &str) -> Result<bool> {
        annotate("exists", metric, || self.tree.has_node(metric))
    }

    /// Creates a metric.
    ///
    /// # Errors
    ///
    /// Fails for invalid options, an existing metric, or a store failure.
    pub fn create(&self, metric: &str, options: CreateOptions) -> Result<()> {
        annotate("create", metric, || {
            let (definition, extra) = options.into_definition()?;
            self.tree.create_node(metric, definition, extra).map(|_| ())
        })
    }

    /// Reads one metadata value.
    ///
    /// # Errors
    ///
    /// Fails if the metric or key does not exist, or the store fails.
    pub fn get_metadata(&self, metric: &str, key: &str) -> Result<Value> {
        annotate("get_metadata", metric, || {
            let mut metadata = self.tree.get_node(metric)?.read_metadata()?;
            metadata.remove(key).ok_or_else(|| {
                NotFoundError::MetadataKey {
                    path: metric.to_string(),
                    key: key.to_string(),
                }
                .into()
            })
        })
    }

    /// Sets one metadata value, keeping every other key.
    ///
    /// This is a read-modify-write of the whole mapping; concurrent writers
    /// to the same metric are not coordinated.
    ///
    /// # Errors
    ///
    /// Fails if the metric does not exist, the change would make the
    /// definition invalid, or the store fails.
    pub fn set_metadata(&self, metric: &str, key: &str, value: Value) -> Result<()> {
        annotate("set_metadata", metric, || {
            let mut node = self.tree.get_node(metric)?;
            let mut metadata = node.read_metadata()?;
            metadata.insert(key.to_string(), value);
            node.write_metadata(metadata)
        })
    }

    /// Reads a metric over `[from, until)` from the best archive at `now`.
    ///
    /// # Errors
    ///
    /// Fails if the metric does not exist, the range is empty, or the store
    /// fails.
    pub fn fetch(&self, metric: &str, from: u64, until: u64, now: u64) -> Result<TimeSeriesData> {
        annotate("fetch", metric, || self.tree.fetch(metric, from, until, now))
    }

    /// Finds metrics and branches matching a dotted glob pattern.
    ///
    /// # Errors
    ///
    /// Fails for a malformed pattern or a store failure.
    pub fn find(&self, pattern: &str) -> Result<Vec<TreeEntry>> {
        annotate("find", pattern, || self.tree.find(pattern))
    }

    /// Drops the cached slices of a metric.
    pub fn flush_cache(&self, metric: &str) -> usize {
        self.tree.flush_cache(metric)
    }

    /// Changes the slice caching behavior for subsequent operations.
    pub fn set_slice_caching_behavior(&self, behavior: SliceCachingBehavior) {
        self.tree.set_slice_caching_behavior(behavior);
    }
}

fn annotate<T>(
    operation: &'static str,
    metric: &str,
    call: impl FnOnce() -> Result<T>,
) -> Result<T> {
    call().map_err(|e: SliceTreeError| e.in_operation(operation, metric))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::MemoryColumnStore;
    use crate::error::{ErrorKind, ValidationError};
    use serde_json::json;

    fn database() -> Database {
        Database::with_store(
            DatabaseSettings::new("/unused", "metrics", "localhost"),
            Arc::new(MemoryColumnStore::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_create_options_use_host_names() {
        let options: CreateOptions = serde_json::from_value(json!({
            "retentions": [[60, 1440], [300, 2016]],
            "xfilesfactor": 0.5,
            "aggregation-method": "max",
            "owner": "ops"
        }))
        .unwrap();

        assert_eq!(options.retentions, vec![Retention::new(60, 1440), Retention::new(300, 2016)]);
        assert_eq!(options.aggregation_method, "max");
        assert_eq!(options.extra.get("owner"), Some(&json!("ops")));
    }

    #[test]
    fn test_create_stores_definition_and_extras() {
        let db = database();
        let options = CreateOptions::new(vec![Retention::new(10, 360), Retention::new(60, 1440)], 0.0, "sum")
            .with_extra("owner", json!("ops"));
        db.create("a.b.c", options).unwrap();

        assert!(db.exists("a.b.c").unwrap());
        assert_eq!(db.get_metadata("a.b.c", "timeStep").unwrap(), json!(10));
        assert_eq!(db.get_metadata("a.b.c", "retentions").unwrap(), json!([[10, 360], [60, 1440]]));
        assert_eq!(db.get_metadata("a.b.c", "xFilesFactor").unwrap(), json!(0.0));
        assert_eq!(db.get_metadata("a.b.c", "aggregationMethod").unwrap(), json!("sum"));
        assert_eq!(db.get_metadata("a.b.c", "owner").unwrap(), json!("ops"));
    }

    #[test]
    fn test_errors_name_operation_and_metric() {
        let db = database();

        let err = db.write("no.such.metric", &[(60, 1.0)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(
            err.to_string(),
            "write failed for metric 'no.such.metric': not found: metric 'no.such.metric' does not exist"
        );

        let err = db
            .create("a.b", CreateOptions::new(vec![Retention::new(60, 10)], 0.5, "median"))
            .unwrap_err();
        match err {
            SliceTreeError::Operation {
                operation, source, ..
            } => {
                assert_eq!(operation, "create");
                assert!(matches!(
                    *source,
                    SliceTreeError::Validation(ValidationError::UnknownAggregationMethod { .. })
                ));
            }
            other => panic!("expected Operation, got {other:?}"),
        }
        assert!(!db.exists("a.b").unwrap());
    }

    #[test]
    fn test_metadata_key_errors() {
        let db = database();
        db.create("a.b", CreateOptions::new(vec![Retention::new(60, 10)], 0.5, "average"))
            .unwrap();

        let err = db.get_metadata("a.b", "missing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = db.set_metadata("a.b", "xFilesFactor", json!(2.0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(db.get_metadata("a.b", "xFilesFactor").unwrap(), json!(0.5));
    }
}
