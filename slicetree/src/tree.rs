//! The dotted-path metric namespace.
//!
//! A [`DataTree`] owns the column store client, the table layout and the
//! slice cache, and hands out [`MetricNode`]s that share them. Besides the
//! metadata row of each metric it maintains a branch index: for `a.b.c`
//! the branch `a.b` lists `c`, `a` lists `b` and the root lists `a`. The
//! index backs [`DataTree::children`] and [`DataTree::find`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use slicetree::column::{ClusterConfig, MemoryColumnStore};
//! use slicetree::layout::initialize_table_layout;
//! use slicetree::schema::{AggregationMethod, Metadata, NodeDefinition, Retention};
//! use slicetree::tree::{DataTree, TreeOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (client, layout) = initialize_table_layout(
//!     Arc::new(MemoryColumnStore::new()),
//!     "metrics",
//!     ClusterConfig::new(["localhost"]),
//!     "SimpleStrategy",
//!     &json!({"replication_factor": 1}),
//!     "dc1",
//! )?;
//! let tree = DataTree::new(client, layout, TreeOptions::default());
//!
//! let definition = NodeDefinition::new(
//!     vec![Retention::new(60, 1440), Retention::new(300, 2016)],
//!     0.5,
//!     AggregationMethod::Average,
//! )?;
//! tree.create_node("servers.web01.cpu", definition, Metadata::new())?;
//! tree.store("servers.web01.cpu", &[(1_700_000_040, 0.75)])?;
//!
//! let data = tree.fetch("servers.web01.cpu", 1_700_000_000, 1_700_000_100, 1_700_000_100)?;
//! assert_eq!(data.step, 60);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::cache::{SliceCache, SliceCachingBehavior};
use crate::column::{Column, ColumnRange, ColumnStoreClient};
use crate::error::{NotFoundError, Result, SliceTreeError, ValidationError};
use crate::layout::TableLayout;
use crate::node::{MetricNode, TimeSeriesData, TreeContext};
use crate::pattern::compile_path_pattern;
use crate::schema::{Metadata, NodeDefinition, Retention};

/// Default maximum gap, in seconds, before a write starts a new slice.
pub const DEFAULT_MAX_SLICE_GAP: u64 = 3600;

/// Partition key prefix of branch index rows.
const BRANCH_PREFIX: &str = "branch:";

/// Runtime tuning of a [`DataTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeOptions {
    /// Initial slice caching behavior.
    pub caching_behavior: SliceCachingBehavior,
    /// Seconds of missing data tolerated before a new slice starts.
    pub max_slice_gap: u64,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            caching_behavior: SliceCachingBehavior::default(),
            max_slice_gap: DEFAULT_MAX_SLICE_GAP,
        }
    }
}

/// A child of a branch, or a match of [`DataTree::find`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct TreeEntry {
    /// Full dotted path.
    pub path: String,
    /// Whether a metric is stored at this path.
    pub is_leaf: bool,
}

/// Checks that `path` is a usable metric path.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidMetricPath`] if the path is empty, has
/// an empty component, or contains whitespace or control characters.
pub fn validate_metric_path(path: &str) -> std::result::Result<(), ValidationError> {
    let invalid = |reason| ValidationError::InvalidMetricPath {
        path: path.to_string(),
        reason,
    };
    if path.is_empty() {
        return Err(invalid("path is empty"));
    }
    if path.split('.').any(str::is_empty) {
        return Err(invalid("path has an empty component"));
    }
    if path.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid("path contains whitespace or control characters"));
    }
    Ok(())
}

/// Picks the finest archive whose window at `now` still covers `from`,
/// falling back to the coarsest.
fn select_archive(retentions: &[Retention], from: u64, now: u64) -> Option<&Retention> {
    retentions
        .iter()
        .find(|retention| retention.window_start(now) <= from)
        .or_else(|| retentions.last())
}

/// Hierarchical metric store over a column store.
#[derive(Debug, Clone)]
pub struct DataTree {
    context: Arc<TreeContext>,
}

impl DataTree {
    /// Creates a tree over an initialized layout.
    pub fn new(client: ColumnStoreClient, layout: TableLayout, options: TreeOptions) -> Self {
        let cache = SliceCache::new(options.caching_behavior);
        Self {
            context: Arc::new(TreeContext::new(client, layout, cache, options.max_slice_gap)),
        }
    }

    /// The column store client.
    pub fn client(&self) -> &ColumnStoreClient {
        &self.context.client
    }

    /// The table layout.
    pub fn layout(&self) -> &TableLayout {
        &self.context.layout
    }

    /// Whether a metric exists at `path`.
    ///
    /// Never creates anything. A path that is not a valid metric path never
    /// names a metric, so it reads as absent.
    ///
    /// # Errors
    ///
    /// Returns a store error if the lookup fails.
    pub fn has_node(&self, path: &str) -> Result<bool> {
        if validate_metric_path(path).is_err() {
            return Ok(false);
        }
        self.context.metadata_exists(path)
    }

    /// Creates a metric.
    ///
    /// The metadata row holds `extra` plus the definition keys, which take
    /// precedence over same-named keys in `extra`.
    ///
    /// # Arguments
    ///
    /// * `path` - Dotted metric path
    /// * `definition` - Retentions, xFilesFactor and aggregation method
    /// * `extra` - Additional metadata to store with the metric
    ///
    /// # Errors
    ///
    /// - [`ValidationError`] for an invalid path or definition
    /// - [`SliceTreeError::AlreadyExists`] if the metric exists
    /// - a store error if a read or write fails
    pub fn create_node(
        &self,
        path: &str,
        definition: NodeDefinition,
        extra: Metadata,
    ) -> Result<MetricNode> {
        validate_metric_path(path)?;
        definition.validate()?;
        if self.context.metadata_exists(path)? {
            return Err(SliceTreeError::AlreadyExists {
                path: path.to_string(),
            });
        }

        let mut metadata = extra;
        definition.merge_into(&mut metadata);
        self.context.write_metadata_row(path, &metadata)?;
        self.index_branches(path)?;

        info!(
            metric = path,
            retentions = %format_retentions(&definition.retentions),
            x_files_factor = definition.x_files_factor,
            aggregation = %definition.aggregation_method,
            "created metric"
        );
        Ok(MetricNode::new(path.to_string(), definition, self.context.clone()))
    }

    /// Opens an existing metric.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::InvalidMetricPath`] for an invalid path
    /// - [`NotFoundError::Node`] if no metric exists at `path`
    /// - [`ValidationError::InvalidMetadata`] if the stored definition
    ///   cannot be decoded
    /// - a store error if the read fails
    pub fn get_node(&self, path: &str) -> Result<MetricNode> {
        validate_metric_path(path)?;
        let metadata = self
            .context
            .read_metadata_row(path)?
            .ok_or_else(|| NotFoundError::Node {
                path: path.to_string(),
            })?;
        let definition = NodeDefinition::from_metadata(&metadata)?;
        Ok(MetricNode::new(path.to_string(), definition, self.context.clone()))
    }

    /// Writes datapoints to an existing metric.
    ///
    /// # Errors
    ///
    /// - [`NotFoundError::Node`] if the metric does not exist; it is never
    ///   created implicitly
    /// - see [`MetricNode::write`]
    pub fn store(&self, path: &str, datapoints: &[(u64, f64)]) -> Result<()> {
        self.get_node(path)?.write(datapoints)
    }

    /// Reads `[from, until)` from the finest archive still covering `from`
    /// at `now`.
    ///
    /// # Errors
    ///
    /// See [`DataTree::get_node`] and [`MetricNode::read_archive`].
    pub fn fetch(&self, path: &str, from: u64, until: u64, now: u64) -> Result<TimeSeriesData> {
        let node = self.get_node(path)?;
        let retentions = &node.definition().retentions;
        let step = select_archive(retentions, from, now)
            .map(|retention| retention.step)
            .ok_or(ValidationError::NoRetentions)?;
        node.read_archive(step, from, until)
    }

    /// Prunes expired slices of a metric. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// See [`DataTree::get_node`] and [`MetricNode::prune`].
    pub fn apply_retention(&self, path: &str, now: u64) -> Result<usize> {
        self.get_node(path)?.prune(now)
    }

    /// Lists the direct children of a branch (`""` for the root).
    ///
    /// # Errors
    ///
    /// Returns a store error if a read fails.
    pub fn children(&self, branch: &str) -> Result<Vec<TreeEntry>> {
        self.child_names(branch)?
            .into_iter()
            .map(|name| self.entry(join(branch, &name)))
            .collect()
    }

    /// Finds paths matching a dotted glob pattern, sorted by path.
    ///
    /// Each component may use `*`, `?`, `[...]` and `{a,b}`.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::InvalidPattern`] for a malformed pattern
    /// - a store error if a read fails
    pub fn find(&self, pattern: &str) -> Result<Vec<TreeEntry>> {
        let components = compile_path_pattern(pattern)?;

        let mut branches = vec![String::new()];
        for component in &components {
            let mut next = Vec::new();
            for branch in &branches {
                if component.is_literal() {
                    let path = join(branch, component.as_str());
                    if self.child_names(branch)?.iter().any(|n| n == component.as_str()) {
                        next.push(path);
                    }
                    continue;
                }
                for name in self.child_names(branch)? {
                    if component.is_match(&name) {
                        next.push(join(branch, &name));
                    }
                }
            }
            branches = next;
        }

        branches.sort();
        branches.dedup();
        branches.into_iter().map(|path| self.entry(path)).collect()
    }

    /// The current slice caching behavior.
    pub fn slice_caching_behavior(&self) -> SliceCachingBehavior {
        self.context.cache.behavior()
    }

    /// Changes the slice caching behavior for subsequent operations.
    pub fn set_slice_caching_behavior(&self, behavior: SliceCachingBehavior) {
        self.context.cache.set_behavior(behavior);
    }

    /// The current maximum slice gap in seconds.
    pub fn max_slice_gap(&self) -> u64 {
        self.context.max_slice_gap()
    }

    /// Changes the maximum slice gap for subsequent writes.
    pub fn set_max_slice_gap(&self, seconds: u64) {
        self.context.set_max_slice_gap(seconds);
    }

    /// Drops the cached slices of one metric. Returns how many were dropped.
    pub fn flush_cache(&self, path: &str) -> usize {
        self.context.cache.flush(path)
    }

    /// Number of slices currently cached across all metrics.
    pub fn cached_slices(&self) -> usize {
        self.context.cache.len()
    }

    fn index_branches(&self, path: &str) -> Result<()> {
        let mut branch = "";
        for (end, _) in path.match_indices('.').chain(std::iter::once((path.len(), ""))) {
            let child = path[..end].rsplit('.').next().unwrap_or_default();
            self.context.client.insert(
                self.context.layout.nodes_table(),
                &format!("{BRANCH_PREFIX}{branch}"),
                &[Column::new(child, Vec::<u8>::new())],
            )?;
            branch = &path[..end];
        }
        Ok(())
    }

    fn child_names(&self, branch: &str) -> Result<Vec<String>> {
        let columns = self.context.client.get(
            self.context.layout.nodes_table(),
            &format!("{BRANCH_PREFIX}{branch}"),
            &ColumnRange::all(),
        )?;
        Ok(columns.into_iter().map(|column| column.name).collect())
    }

    fn entry(&self, path: String) -> Result<TreeEntry> {
        let is_leaf = self.context.metadata_exists(&path)?;
        Ok(TreeEntry { path, is_leaf })
    }
}

fn join(branch: &str, name: &str) -> String {
    if branch.is_empty() {
        name.to_string()
    } else {
        format!("{branch}.{name}")
    }
}

fn format_retentions(retentions: &[Retention]) -> String {
    retentions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{ClusterConfig, MemoryColumnStore};
    use crate::error::ErrorKind;
    use crate::layout::initialize_table_layout;
    use crate::schema::AggregationMethod;
    use serde_json::json;

    fn tree() -> DataTree {
        let (client, layout) = initialize_table_layout(
            Arc::new(MemoryColumnStore::new()),
            "metrics",
            ClusterConfig::new(["localhost"]),
            "SimpleStrategy",
            &json!({"replication_factor": 1}),
            "dc1",
        )
        .unwrap();
        DataTree::new(client, layout, TreeOptions::default())
    }

    fn definition() -> NodeDefinition {
        NodeDefinition::new(
            vec![Retention::new(60, 60), Retention::new(600, 144)],
            0.0,
            AggregationMethod::Sum,
        )
        .unwrap()
    }

    #[test]
    fn test_validate_metric_path() {
        assert!(validate_metric_path("a.b.c").is_ok());
        assert!(validate_metric_path("servers.web-01.cpu_total").is_ok());
        for bad in ["", ".a", "a.", "a..b", "a b", "a\tb", "a\nb"] {
            assert!(validate_metric_path(bad).is_err(), "{bad:?} should be invalid");
        }
    }

    #[test]
    fn test_create_get_has() {
        let tree = tree();
        assert!(!tree.has_node("a.b.c").unwrap());
        assert!(!tree.has_node("a..c").unwrap());

        let mut extra = Metadata::new();
        extra.insert("owner".to_string(), json!("ops"));
        tree.create_node("a.b.c", definition(), extra).unwrap();

        assert!(tree.has_node("a.b.c").unwrap());
        assert!(!tree.has_node("a.b").unwrap());

        let node = tree.get_node("a.b.c").unwrap();
        assert_eq!(node.definition(), &definition());
        assert_eq!(node.read_metadata().unwrap()["owner"], json!("ops"));
    }

    #[test]
    fn test_create_twice_fails() {
        let tree = tree();
        tree.create_node("a.b", definition(), Metadata::new()).unwrap();
        let err = tree.create_node("a.b", definition(), Metadata::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_store_requires_existing_node() {
        let tree = tree();
        let err = tree.store("missing.metric", &[(60, 1.0)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!tree.has_node("missing.metric").unwrap());
    }

    #[test]
    fn test_children_and_find() {
        let tree = tree();
        for path in ["servers.web01.cpu", "servers.web02.cpu", "servers.db01.cpu", "servers.web01.mem"] {
            tree.create_node(path, definition(), Metadata::new()).unwrap();
        }

        let root = tree.children("").unwrap();
        assert_eq!(
            root,
            vec![TreeEntry {
                path: "servers".to_string(),
                is_leaf: false
            }]
        );

        let paths = |entries: Vec<TreeEntry>| entries.into_iter().map(|e| e.path).collect::<Vec<_>>();
        assert_eq!(
            paths(tree.children("servers").unwrap()),
            vec!["servers.db01", "servers.web01", "servers.web02"]
        );
        assert_eq!(
            paths(tree.find("servers.web*.cpu").unwrap()),
            vec!["servers.web01.cpu", "servers.web02.cpu"]
        );
        assert_eq!(
            paths(tree.find("servers.{db01,web01}.*").unwrap()),
            vec!["servers.db01.cpu", "servers.web01.cpu", "servers.web01.mem"]
        );
        assert!(tree.find("servers.web01.cpu").unwrap()[0].is_leaf);
        assert!(tree.find("servers.nope.cpu").unwrap().is_empty());
        assert!(tree.find("servers..cpu").is_err());
    }

    #[test]
    fn test_fetch_selects_archive_by_window() {
        let tree = tree();
        tree.create_node("a.b", definition(), Metadata::new()).unwrap();
        tree.store("a.b", &[(36_000, 1.0), (36_060, 2.0)]).unwrap();

        // The 60s archive covers one hour back from now.
        let fine = tree.fetch("a.b", 36_000, 36_120, 37_000).unwrap();
        assert_eq!(fine.step, 60);
        assert_eq!(fine.values, vec![Some(1.0), Some(2.0)]);

        let coarse = tree.fetch("a.b", 36_000, 36_600, 40_000).unwrap();
        assert_eq!(coarse.step, 600);
        assert_eq!(coarse.values, vec![Some(3.0)]);
    }

    #[test]
    fn test_runtime_settings() {
        let tree = tree();
        assert_eq!(tree.slice_caching_behavior(), SliceCachingBehavior::Latest);
        assert_eq!(tree.max_slice_gap(), DEFAULT_MAX_SLICE_GAP);

        tree.set_slice_caching_behavior(SliceCachingBehavior::All);
        tree.set_max_slice_gap(60);
        assert_eq!(tree.slice_caching_behavior(), SliceCachingBehavior::All);
        assert_eq!(tree.max_slice_gap(), 60);
    }
}
