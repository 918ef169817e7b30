//! Metric nodes: one time series with its retention archives.
//!
//! Each archive of a node is stored as a set of slices. A write aligns its
//! datapoints to the finest archive's step, places each point in a slice,
//! persists new slices in the slice index before their datapoints, and then
//! rolls the touched intervals up into each coarser archive in turn.
//!
//! Slice placement for a point at `ts` only looks at the newest slice that
//! starts at or before `ts`:
//!
//! - `ts` inside the slice: the point is overwritten in place
//! - `ts - end <= max_slice_gap`: the slice is extended
//! - otherwise, or when no slice starts at or before `ts`: a new slice
//!   starts at `ts`
//!
//! Because the decision depends only on persisted boundaries, rebuilding
//! the slice list from the store after a restart yields the same layout as
//! a warm cache would.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::cache::SliceCache;
use crate::column::{Column, ColumnRange, ColumnStoreClient};
use crate::error::{ColumnStoreError, Result, SliceTreeError, ValidationError};
use crate::layout::TableLayout;
use crate::schema::{Metadata, NodeDefinition};
use crate::slice::{
    Slice, align_down, align_up, decode_value, encode_value, parse_timestamp_column,
    timestamp_column,
};

/// Column holding the JSON metadata of a metric.
const METADATA_COLUMN: &str = "metadata";

/// State shared by a tree and every node it hands out.
#[derive(Debug)]
pub(crate) struct TreeContext {
    pub(crate) client: ColumnStoreClient,
    pub(crate) layout: TableLayout,
    pub(crate) cache: SliceCache,
    max_slice_gap: AtomicU64,
}

impl TreeContext {
    pub(crate) fn new(
        client: ColumnStoreClient,
        layout: TableLayout,
        cache: SliceCache,
        max_slice_gap: u64,
    ) -> Self {
        Self {
            client,
            layout,
            cache,
            max_slice_gap: AtomicU64::new(max_slice_gap),
        }
    }

    pub(crate) fn max_slice_gap(&self) -> u64 {
        self.max_slice_gap.load(Ordering::Relaxed)
    }

    pub(crate) fn set_max_slice_gap(&self, seconds: u64) {
        self.max_slice_gap.store(seconds, Ordering::Relaxed);
    }

    /// Whether a metadata row exists for `path`.
    pub(crate) fn metadata_exists(&self, path: &str) -> Result<bool> {
        let value =
            self.client
                .get_column(self.layout.metadata_table(), path, METADATA_COLUMN)?;
        Ok(value.is_some())
    }

    /// Reads and decodes the metadata row of `path`.
    pub(crate) fn read_metadata_row(&self, path: &str) -> Result<Option<Metadata>> {
        let Some(bytes) =
            self.client
                .get_column(self.layout.metadata_table(), path, METADATA_COLUMN)?
        else {
            return Ok(None);
        };

        let location = format!("{}/{path}", self.layout.metadata_table());
        let value: Value = serde_json::from_slice(&bytes).map_err(|source| {
            SliceTreeError::from(ColumnStoreError::Serde {
                location: location.clone(),
                source,
            })
        })?;
        match value {
            Value::Object(metadata) => Ok(Some(metadata)),
            other => Err(ColumnStoreError::Corrupted {
                location,
                reason: format!("metadata is not a JSON object: {other}"),
            }
            .into()),
        }
    }

    /// Replaces the metadata row of `path`.
    pub(crate) fn write_metadata_row(&self, path: &str, metadata: &Metadata) -> Result<()> {
        let bytes = serde_json::to_vec(metadata).map_err(|source| {
            SliceTreeError::from(ColumnStoreError::Serde {
                location: format!("{}/{path}", self.layout.metadata_table()),
                source,
            })
        })?;
        self.client.insert(
            self.layout.metadata_table(),
            path,
            &[Column::new(METADATA_COLUMN, bytes)],
        )
    }
}

/// Values of one archive over an aligned, half-open time range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesData {
    /// First timestamp (aligned down to `step`).
    pub from: u64,
    /// End of the range, exclusive (aligned up to `step`).
    pub until: u64,
    /// Seconds between values.
    pub step: u64,
    /// One entry per step; `None` where no point is stored.
    pub values: Vec<Option<f64>>,
}

impl TimeSeriesData {
    /// Timestamp/value pairs, including missing points.
    pub fn points(&self) -> impl Iterator<Item = (u64, Option<f64>)> + '_ {
        (self.from..self.until)
            .step_by(usize::try_from(self.step).unwrap_or(usize::MAX))
            .zip(self.values.iter().copied())
    }

    /// Number of stored (non-missing) values.
    pub fn known(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }
}

/// One metric of the tree.
///
/// Obtained from [`DataTree::create_node`](crate::tree::DataTree::create_node)
/// or [`DataTree::get_node`](crate::tree::DataTree::get_node). Cloning is
/// cheap; clones share the tree's column store client and slice cache.
#[derive(Debug, Clone)]
pub struct MetricNode {
    path: String,
    definition: NodeDefinition,
    context: Arc<TreeContext>,
}

impl MetricNode {
    pub(crate) fn new(path: String, definition: NodeDefinition, context: Arc<TreeContext>) -> Self {
        Self {
            path,
            definition,
            context,
        }
    }

    /// The dotted metric path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The node's storage policy.
    pub fn definition(&self) -> &NodeDefinition {
        &self.definition
    }

    /// Writes datapoints and rolls them up into the coarser archives.
    ///
    /// Timestamps are aligned down to the finest step; when several points
    /// share an aligned timestamp the last one wins. Points may arrive in
    /// any order.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::InvalidValue`] if any value is NaN or infinite;
    ///   nothing is written in that case
    /// - a store error if a read or write fails
    pub fn write(&self, datapoints: &[(u64, f64)]) -> Result<()> {
        if let Some(&(timestamp, value)) = datapoints.iter().find(|(_, v)| !v.is_finite()) {
            return Err(ValidationError::InvalidValue { timestamp, value }.into());
        }

        let Some(finest) = self.definition.retentions.first() else {
            return Err(ValidationError::NoRetentions.into());
        };
        let mut points = BTreeMap::new();
        for &(timestamp, value) in datapoints {
            points.insert(align_down(timestamp, finest.step), value);
        }
        if points.is_empty() {
            return Ok(());
        }

        self.write_archive(finest.step, &points)?;

        for pair in self.definition.retentions.windows(2) {
            let (fine, coarse) = (pair[0].step, pair[1].step);
            points = self.roll_up(fine, coarse, points.keys().copied())?;
            if points.is_empty() {
                break;
            }
            self.write_archive(coarse, &points)?;
        }
        Ok(())
    }

    /// Reads the finest archive over `[from, until)`.
    ///
    /// # Errors
    ///
    /// See [`MetricNode::read_archive`].
    pub fn read(&self, from: u64, until: u64) -> Result<TimeSeriesData> {
        self.read_archive(self.definition.time_step, from, until)
    }

    /// Reads one archive over `[from, until)`.
    ///
    /// `from` is aligned down and `until` up to the archive step. A range
    /// longer than the archive's span is shortened to the newest
    /// `count` points before `until`.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::UnknownArchive`] if the node has no such archive
    /// - [`ValidationError::InvalidTimeRange`] if `from >= until`
    /// - a store error if a read fails
    pub fn read_archive(&self, step: u64, from: u64, until: u64) -> Result<TimeSeriesData> {
        let Some(retention) = self.definition.archive(step) else {
            return Err(ValidationError::UnknownArchive { step }.into());
        };
        if from >= until {
            return Err(ValidationError::InvalidTimeRange { from, until }.into());
        }

        let until = align_up(until, step);
        let from = align_down(from.max(until.saturating_sub(retention.span())), step);
        let points = self.read_points(step, from, until)?;

        // `until` is only unaligned when rounding up saturated at `u64::MAX`.
        let count = (until - from).div_ceil(step);
        let values = (0..count)
            .map(|i| points.get(&(from + i * step)).copied())
            .collect();

        Ok(TimeSeriesData {
            from,
            until,
            step,
            values,
        })
    }

    /// The stored metadata mapping, or an empty mapping if none is stored.
    ///
    /// # Errors
    ///
    /// Returns a store error if the row cannot be read or decoded.
    pub fn read_metadata(&self) -> Result<Metadata> {
        Ok(self
            .context
            .read_metadata_row(&self.path)?
            .unwrap_or_default())
    }

    /// Replaces the metadata mapping.
    ///
    /// The mapping must still describe a valid definition; the node's
    /// definition is refreshed from it and its cached slices are dropped.
    /// Concurrent writers are not coordinated: the last write wins.
    ///
    /// # Errors
    ///
    /// - [`ValidationError`] if the definition keys are missing or invalid;
    ///   nothing is written in that case
    /// - a store error if the write fails
    pub fn write_metadata(&mut self, metadata: Metadata) -> Result<()> {
        let definition = NodeDefinition::from_metadata(&metadata)?;
        self.context.write_metadata_row(&self.path, &metadata)?;
        self.definition = definition;
        self.context.cache.flush(&self.path);
        Ok(())
    }

    /// Lists the slices of one archive as persisted in the store.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::UnknownArchive`] if the node has no such archive
    /// - a store error if a read fails
    pub fn slices(&self, step: u64) -> Result<Vec<Slice>> {
        if self.definition.archive(step).is_none() {
            return Err(ValidationError::UnknownArchive { step }.into());
        }
        self.read_slice_index(step)
    }

    /// Deletes slices that ended before their archive's retention window.
    ///
    /// Slices are dropped whole; a slice that still has one point inside
    /// the window is kept. Returns the number of slices removed.
    ///
    /// # Errors
    ///
    /// Returns a store error if a read or delete fails.
    pub fn prune(&self, now: u64) -> Result<usize> {
        let client = &self.context.client;
        let layout = &self.context.layout;
        let mut removed = 0;

        for retention in &self.definition.retentions {
            let window_start = retention.window_start(now);
            let expired: Vec<Slice> = self
                .read_slice_index(retention.step)?
                .into_iter()
                .filter(|slice| slice.end <= window_start)
                .collect();
            if expired.is_empty() {
                continue;
            }

            let names: Vec<String> = expired.iter().map(Slice::index_column).collect();
            client.remove_columns(layout.slices_table(), &self.path, &names)?;
            for slice in &expired {
                client.remove_partition(layout.datapoints_table(), &slice.data_partition(&self.path))?;
            }

            debug!(
                metric = %self.path,
                step = retention.step,
                window_start,
                slices = expired.len(),
                "pruned expired slices"
            );
            removed += expired.len();
        }

        if removed > 0 {
            self.context.cache.flush(&self.path);
        }
        Ok(removed)
    }

    /// Places `points` (aligned to `step`) into slices and persists them.
    fn write_archive(&self, step: u64, points: &BTreeMap<u64, f64>) -> Result<()> {
        let Some(&earliest) = points.keys().next() else {
            return Ok(());
        };
        let (mut slices, complete) = self.load_slices(step, earliest)?;
        let max_gap = self.context.max_slice_gap();

        let mut created = BTreeSet::new();
        let mut batches: BTreeMap<u64, Vec<Column>> = BTreeMap::new();

        for (&timestamp, &value) in points {
            let next = slices.partition_point(|slice| slice.start <= timestamp);
            let index = match next.checked_sub(1) {
                Some(i) if slices[i].contains(timestamp) => i,
                Some(i) if slices[i].gap_to(timestamp) <= max_gap => {
                    slices[i].extend_to(timestamp);
                    i
                }
                previous => {
                    if let Some(i) = previous {
                        debug!(
                            metric = %self.path,
                            step,
                            previous_end = slices[i].end,
                            timestamp,
                            "gap exceeds max slice gap, starting new slice"
                        );
                    }
                    let mut slice = Slice::new(step, timestamp);
                    slice.extend_to(timestamp);
                    slices.insert(next, slice);
                    created.insert(timestamp);
                    next
                }
            };

            batches
                .entry(slices[index].start)
                .or_default()
                .push(Column::new(timestamp_column(timestamp), encode_value(value)));
        }

        let client = &self.context.client;
        let layout = &self.context.layout;

        // New slices go into the index before their datapoints so a reader
        // never finds data it cannot reach.
        let index_columns: Vec<Column> = created
            .iter()
            .map(|&start| Column::new(Slice::new(step, start).index_column(), Vec::<u8>::new()))
            .collect();
        client.insert(layout.slices_table(), &self.path, &index_columns)?;

        for (start, columns) in &batches {
            let partition = Slice::new(step, *start).data_partition(&self.path);
            client.insert(layout.datapoints_table(), &partition, columns)?;
        }

        let cache = &self.context.cache;
        if complete {
            cache.put_all(&self.path, step, &slices);
        } else if let Some(newest) = slices.last() {
            cache.put(&self.path, step, *newest);
        }
        Ok(())
    }

    /// Aggregates the coarse intervals touched by `timestamps` from the
    /// `fine` archive.
    ///
    /// A coarse point is produced only when at least one finer point is
    /// known and the known fraction reaches the xFilesFactor.
    fn roll_up(
        &self,
        fine: u64,
        coarse: u64,
        timestamps: impl Iterator<Item = u64>,
    ) -> Result<BTreeMap<u64, f64>> {
        let intervals: BTreeSet<u64> = timestamps.map(|ts| align_down(ts, coarse)).collect();
        let expected = coarse / fine;
        let mut rolled = BTreeMap::new();

        for run in contiguous_runs(&intervals, coarse) {
            let (first, last) = (run[0], run[run.len() - 1]);
            let points = self.read_points(fine, first, last.saturating_add(coarse))?;

            for &interval in &run {
                let values: Vec<f64> = points
                    .range(interval..interval.saturating_add(coarse))
                    .map(|(_, value)| *value)
                    .collect();
                if values.is_empty() {
                    continue;
                }

                #[allow(clippy::cast_precision_loss)] // point counts are far below 2^52
                let known_ratio = values.len() as f64 / expected as f64;
                if known_ratio < self.definition.x_files_factor {
                    continue;
                }
                if let Some(value) = self.definition.aggregation_method.apply(&values) {
                    rolled.insert(interval, value);
                }
            }
        }
        Ok(rolled)
    }

    /// Reads the stored points of one archive within `[from, until)`.
    fn read_points(&self, step: u64, from: u64, until: u64) -> Result<BTreeMap<u64, f64>> {
        let (slices, _) = self.load_slices(step, from)?;
        let client = &self.context.client;
        let table = self.context.layout.datapoints_table();
        let mut points = BTreeMap::new();

        for slice in slices.iter().filter(|s| s.start < until && s.end > from) {
            let partition = slice.data_partition(&self.path);
            let range = ColumnRange::between(
                timestamp_column(from.max(slice.start)),
                timestamp_column(until.min(slice.end)),
            );
            for column in client.get(table, &partition, &range)? {
                let timestamp = parse_timestamp_column(&column.name)
                    .ok_or_else(|| corrupted(table, &partition, "bad timestamp column"))?;
                let value = decode_value(&column.value)
                    .ok_or_else(|| corrupted(table, &partition, "bad datapoint value"))?;
                points.insert(timestamp, value);
            }
        }
        Ok(points)
    }

    /// Slices of `step` relevant to timestamps at or after `earliest`.
    ///
    /// The flag is true when the returned list is the archive's complete
    /// slice list; otherwise it only holds the newest slice.
    fn load_slices(&self, step: u64, earliest: u64) -> Result<(Vec<Slice>, bool)> {
        let cache = &self.context.cache;
        if let Some(slices) = cache.all(&self.path, step) {
            return Ok((slices, true));
        }
        if let Some(latest) = cache.get(&self.path, step)
            && earliest >= latest.start
        {
            return Ok((vec![latest], false));
        }

        debug!(metric = %self.path, step, "slice cache miss, reading slice index");
        let slices = self.read_slice_index(step)?;
        cache.put_all(&self.path, step, &slices);
        Ok((slices, true))
    }

    /// Reads the slice index of one archive. Slice ends come from the last
    /// stored datapoint of each slice.
    fn read_slice_index(&self, step: u64) -> Result<Vec<Slice>> {
        let client = &self.context.client;
        let layout = &self.context.layout;
        let (start, end) = Slice::index_range(step);

        let mut slices = Vec::new();
        for column in client.get(layout.slices_table(), &self.path, &ColumnRange::between(start, end))? {
            let (slice_step, slice_start) = Slice::parse_index_column(&column.name)
                .ok_or_else(|| corrupted(layout.slices_table(), &self.path, "bad slice index column"))?;
            let mut slice = Slice::new(slice_step, slice_start);

            let partition = slice.data_partition(&self.path);
            let last = client.get(layout.datapoints_table(), &partition, &ColumnRange::all().last())?;
            if let Some(column) = last.first() {
                let timestamp = parse_timestamp_column(&column.name).ok_or_else(|| {
                    corrupted(layout.datapoints_table(), &partition, "bad timestamp column")
                })?;
                slice.extend_to(timestamp);
            }
            slices.push(slice);
        }
        Ok(slices)
    }
}

/// Splits sorted interval starts into runs of consecutive intervals.
fn contiguous_runs(intervals: &BTreeSet<u64>, width: u64) -> Vec<Vec<u64>> {
    let mut runs: Vec<Vec<u64>> = Vec::new();
    for &interval in intervals {
        match runs.last_mut() {
            Some(run) if run.last().is_some_and(|&prev| prev.checked_add(width) == Some(interval)) => {
                run.push(interval);
            }
            _ => runs.push(vec![interval]),
        }
    }
    runs
}

fn corrupted(table: &str, partition: &str, reason: &str) -> SliceTreeError {
    ColumnStoreError::Corrupted {
        location: format!("{table}/{partition}"),
        reason: reason.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SliceCachingBehavior;
    use crate::column::{ClusterConfig, MemoryColumnStore};
    use crate::layout::initialize_table_layout;
    use crate::schema::{AggregationMethod, Retention};
    use serde_json::json;

    fn context(behavior: SliceCachingBehavior, max_gap: u64) -> (Arc<MemoryColumnStore>, Arc<TreeContext>) {
        let store = Arc::new(MemoryColumnStore::new());
        let (client, layout) = initialize_table_layout(
            store.clone(),
            "metrics",
            ClusterConfig::new(["localhost"]),
            "SimpleStrategy",
            &json!({"replication_factor": 1}),
            "dc1",
        )
        .unwrap();
        let context = TreeContext::new(client, layout, SliceCache::new(behavior), max_gap);
        (store, Arc::new(context))
    }

    fn node(context: &Arc<TreeContext>, retentions: &[(u64, u64)], xff: f64) -> MetricNode {
        let definition = NodeDefinition::new(
            retentions.iter().copied().map(Retention::from).collect(),
            xff,
            AggregationMethod::Average,
        )
        .unwrap();
        let mut metadata = Metadata::new();
        definition.merge_into(&mut metadata);
        context.write_metadata_row("a.b.c", &metadata).unwrap();
        MetricNode::new("a.b.c".to_string(), definition, context.clone())
    }

    #[test]
    fn test_write_then_read() {
        let (_, context) = context(SliceCachingBehavior::Latest, 3600);
        let node = node(&context, &[(60, 100)], 0.0);

        node.write(&[(120, 1.0), (185, 2.0), (300, 4.0)]).unwrap();

        let data = node.read(120, 360).unwrap();
        assert_eq!(data.from, 120);
        assert_eq!(data.until, 360);
        assert_eq!(data.values, vec![Some(1.0), Some(2.0), None, Some(4.0)]);
        assert_eq!(data.known(), 3);
    }

    #[test]
    fn test_last_write_wins_after_alignment() {
        let (_, context) = context(SliceCachingBehavior::None, 3600);
        let node = node(&context, &[(60, 100)], 0.0);

        node.write(&[(60, 1.0), (119, 2.0)]).unwrap();
        node.write(&[(90, 3.0)]).unwrap();

        assert_eq!(node.read(60, 120).unwrap().values, vec![Some(3.0)]);
        assert_eq!(node.slices(60).unwrap().len(), 1);
    }

    #[test]
    fn test_rejects_non_finite_values() {
        let (store, context) = context(SliceCachingBehavior::Latest, 3600);
        let node = node(&context, &[(60, 100)], 0.0);
        store.reset_counters();

        let err = node.write(&[(60, 1.0), (120, f64::NAN)]).unwrap_err();
        assert!(matches!(err, SliceTreeError::Validation(ValidationError::InvalidValue { timestamp: 120, .. })));
        assert_eq!(store.writes(), 0);
    }

    #[test]
    fn test_gap_boundary() {
        let (_, context) = context(SliceCachingBehavior::None, 600);
        let node = node(&context, &[(60, 1000)], 0.0);

        // Slice ends at 120; 720 - 120 == 600 stays in the slice.
        node.write(&[(60, 1.0), (720, 2.0)]).unwrap();
        assert_eq!(node.slices(60).unwrap(), vec![Slice { step: 60, start: 60, end: 780 }]);

        // 1440 - 780 == 660 opens a new slice.
        node.write(&[(1440, 3.0)]).unwrap();
        let slices = node.slices(60).unwrap();
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[1], Slice { step: 60, start: 1440, end: 1500 });
    }

    #[test]
    fn test_backfill_before_first_slice() {
        let (_, context) = context(SliceCachingBehavior::All, 60);
        let node = node(&context, &[(60, 1000)], 0.0);

        node.write(&[(6000, 1.0)]).unwrap();
        node.write(&[(600, 2.0), (660, 3.0)]).unwrap();

        let slices = node.slices(60).unwrap();
        assert_eq!(slices.iter().map(|s| s.start).collect::<Vec<_>>(), vec![600, 6000]);
        assert_eq!(node.read(600, 720).unwrap().values, vec![Some(2.0), Some(3.0)]);
    }

    #[test]
    fn test_rollup_respects_xff() {
        let (_, context) = context(SliceCachingBehavior::Latest, 3600);
        let node = node(&context, &[(60, 100), (300, 100)], 0.4);

        // 2 of 5 points in [0, 300): ratio 0.4 meets the factor.
        node.write(&[(0, 1.0), (60, 3.0)]).unwrap();
        // 1 of 5 points in [300, 600): below the factor.
        node.write(&[(300, 10.0)]).unwrap();

        let coarse = node.read_archive(300, 0, 600).unwrap();
        assert_eq!(coarse.values, vec![Some(2.0), None]);
    }

    #[test]
    fn test_rollup_cascades() {
        let (_, context) = context(SliceCachingBehavior::None, 3600);
        let node = node(&context, &[(60, 100), (120, 100), (240, 100)], 0.5);

        node.write(&[(0, 2.0), (60, 4.0), (120, 6.0)]).unwrap();

        assert_eq!(node.read_archive(120, 0, 240).unwrap().values, vec![Some(3.0), Some(6.0)]);
        assert_eq!(node.read_archive(240, 0, 240).unwrap().values, vec![Some(4.5)]);
    }

    #[test]
    fn test_read_rejects_bad_arguments() {
        let (_, context) = context(SliceCachingBehavior::Latest, 3600);
        let node = node(&context, &[(60, 100)], 0.0);

        assert!(matches!(
            node.read(120, 120).unwrap_err(),
            SliceTreeError::Validation(ValidationError::InvalidTimeRange { .. })
        ));
        assert!(matches!(
            node.read_archive(300, 0, 600).unwrap_err(),
            SliceTreeError::Validation(ValidationError::UnknownArchive { step: 300 })
        ));
    }

    #[test]
    fn test_write_metadata_validates_and_refreshes() {
        let (_, context) = context(SliceCachingBehavior::Latest, 3600);
        let mut node = node(&context, &[(60, 100)], 0.0);

        let mut metadata = node.read_metadata().unwrap();
        metadata.insert("aggregationMethod".to_string(), json!("max"));
        metadata.insert("owner".to_string(), json!("ops"));
        node.write_metadata(metadata).unwrap();
        assert_eq!(node.definition().aggregation_method, AggregationMethod::Max);
        assert_eq!(node.read_metadata().unwrap()["owner"], json!("ops"));

        let mut broken = node.read_metadata().unwrap();
        broken.remove("retentions");
        assert!(node.write_metadata(broken).is_err());
        assert!(node.read_metadata().unwrap().contains_key("retentions"));
    }

    #[test]
    fn test_prune_drops_only_expired_slices() {
        let (_, context) = context(SliceCachingBehavior::Latest, 60);
        let node = node(&context, &[(60, 10)], 0.0);

        node.write(&[(0, 1.0), (60, 1.0)]).unwrap();
        node.write(&[(1200, 2.0)]).unwrap();
        node.write(&[(1800, 3.0)]).unwrap();
        assert_eq!(node.slices(60).unwrap().len(), 3);

        // Window at now=1860 starts at 1260: [0,120) and [1200,1260) expire.
        assert_eq!(node.prune(1860).unwrap(), 2);
        let slices = node.slices(60).unwrap();
        assert_eq!(slices, vec![Slice { step: 60, start: 1800, end: 1860 }]);
        assert_eq!(node.read(0, 1860).unwrap().known(), 1);
    }

    #[test]
    fn test_contiguous_runs() {
        let intervals: BTreeSet<u64> = [0, 300, 600, 1500, 1800].into_iter().collect();
        assert_eq!(contiguous_runs(&intervals, 300), vec![vec![0, 300, 600], vec![1500, 1800]]);
    }
}
