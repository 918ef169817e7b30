//! Keyspace and table layout.
//!
//! [`initialize_table_layout`] makes sure the keyspace and the tables the
//! tree needs exist, creating whatever is missing. It is safe to run on
//! every startup: existing keyspaces and tables are reused untouched.
//!
//! The metric namespace (metadata and branch index) is shared by every
//! datacenter. Slice bookkeeping and datapoints carry the sanitized local
//! datacenter name so that several datacenters can share a keyspace:
//!
//! | Table | Contents |
//! |---|---|
//! | `metadata` | one JSON metadata column per metric |
//! | `nodes` | branch index, child names per branch |
//! | `slices_<dc>` | slice index, one column per slice |
//! | `datapoints_<dc>` | one partition per slice, one column per point |

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::column::{ClusterConfig, ColumnStore, ColumnStoreClient, KeyspaceDefinition, ReplicationStrategy};
use crate::error::{ConfigError, Result};

/// Prefix of fully qualified strategy class names.
const STRATEGY_CLASS_PREFIX: &str = "org.apache.cassandra.locator.";

/// Table holding per-metric metadata rows.
pub const METADATA_TABLE: &str = "metadata";

/// Table holding the branch index.
pub const NODES_TABLE: &str = "nodes";

/// Replaces every character that is not an ASCII letter, digit or `_`
/// with `_`.
///
/// # Examples
///
/// ```rust
/// use slicetree::layout::sanitize_identifier;
///
/// assert_eq!(sanitize_identifier("east coast!"), "east_coast_");
/// assert_eq!(sanitize_identifier("dc1"), "dc1");
/// ```
pub fn sanitize_identifier(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Table names used by one datacenter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    keyspace: String,
    datacenter: String,
    slices: String,
    datapoints: String,
}

impl TableLayout {
    /// Derives the table names for `local_dc_name`, sanitizing it first.
    pub fn new(keyspace: impl Into<String>, local_dc_name: &str) -> Self {
        let datacenter = sanitize_identifier(local_dc_name);
        Self {
            keyspace: keyspace.into(),
            slices: format!("slices_{datacenter}"),
            datapoints: format!("datapoints_{datacenter}"),
            datacenter,
        }
    }

    /// The keyspace holding the tables.
    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    /// The sanitized datacenter name.
    pub fn datacenter(&self) -> &str {
        &self.datacenter
    }

    /// Metadata table (shared by all datacenters).
    pub fn metadata_table(&self) -> &str {
        METADATA_TABLE
    }

    /// Branch index table (shared by all datacenters).
    pub fn nodes_table(&self) -> &str {
        NODES_TABLE
    }

    /// Slice index table.
    pub fn slices_table(&self) -> &str {
        &self.slices
    }

    /// Datapoint table.
    pub fn datapoints_table(&self) -> &str {
        &self.datapoints
    }

    /// Every table of the layout.
    pub fn tables(&self) -> [&str; 4] {
        [
            self.metadata_table(),
            self.nodes_table(),
            self.slices_table(),
            self.datapoints_table(),
        ]
    }
}

/// Builds a replication strategy from its class name and options.
///
/// Option values must be positive integers, given either as JSON numbers
/// or as numeric strings (`{"replication_factor": "3"}`).
///
/// # Errors
///
/// - [`ConfigError::UnknownReplicationStrategy`] for an unsupported class
/// - [`ConfigError::InvalidStrategyOptions`] if the options are not an
///   object of positive integers or lack what the strategy needs
pub fn parse_replication_strategy(
    name: &str,
    options: &Value,
) -> std::result::Result<ReplicationStrategy, ConfigError> {
    let object = options
        .as_object()
        .ok_or_else(|| ConfigError::InvalidStrategyOptions {
            reason: format!("expected a JSON object, got {options}"),
        })?;

    let mut counts = BTreeMap::new();
    for (key, value) in object {
        counts.insert(key.clone(), replica_count(key, value)?);
    }

    let class = name.trim();
    let class = class.strip_prefix(STRATEGY_CLASS_PREFIX).unwrap_or(class);
    match class {
        "SimpleStrategy" => {
            if let Some(extra) = counts.keys().find(|key| *key != "replication_factor") {
                return Err(ConfigError::InvalidStrategyOptions {
                    reason: format!("SimpleStrategy does not accept option '{extra}'"),
                });
            }
            let replication_factor = counts.get("replication_factor").copied().ok_or_else(|| {
                ConfigError::InvalidStrategyOptions {
                    reason: "SimpleStrategy requires replication_factor".to_string(),
                }
            })?;
            Ok(ReplicationStrategy::Simple { replication_factor })
        }
        "NetworkTopologyStrategy" => {
            if counts.is_empty() {
                return Err(ConfigError::InvalidStrategyOptions {
                    reason: "NetworkTopologyStrategy requires at least one datacenter".to_string(),
                });
            }
            Ok(ReplicationStrategy::NetworkTopology {
                datacenters: counts,
            })
        }
        _ => Err(ConfigError::UnknownReplicationStrategy {
            name: name.to_string(),
        }),
    }
}

fn replica_count(key: &str, value: &Value) -> std::result::Result<u32, ConfigError> {
    let parsed = match value {
        Value::Number(number) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(text) => text.trim().parse::<u32>().ok(),
        _ => None,
    };
    parsed
        .filter(|count| *count > 0)
        .ok_or_else(|| ConfigError::InvalidStrategyOptions {
            reason: format!("option '{key}' must be a positive integer, got {value}"),
        })
}

/// Connects to the cluster and makes sure the keyspace and tables exist.
///
/// # Arguments
///
/// * `store` - The column store backend
/// * `keyspace` - Keyspace to use (created if missing)
/// * `cluster` - Contact points, credentials and retry policy
/// * `replication_strategy` - Strategy class name for a new keyspace
/// * `strategy_options` - Strategy options as a JSON object
/// * `local_dc_name` - Datacenter name, sanitized into the table names
///
/// # Errors
///
/// - [`ConfigError`] for an empty keyspace or server list, or invalid
///   replication settings; nothing is sent to the store in that case
/// - a store error if the backend refuses the session or a schema call
pub fn initialize_table_layout(
    store: Arc<dyn ColumnStore>,
    keyspace: &str,
    cluster: ClusterConfig,
    replication_strategy: &str,
    strategy_options: &Value,
    local_dc_name: &str,
) -> Result<(ColumnStoreClient, TableLayout)> {
    let replication = parse_replication_strategy(replication_strategy, strategy_options)?;
    let client = ColumnStoreClient::connect(store, keyspace, cluster)?;
    let layout = TableLayout::new(keyspace, local_dc_name);

    match client.describe_keyspace()? {
        Some(existing) if existing.replication != replication => {
            warn!(
                keyspace,
                existing = %existing.replication,
                configured = %replication,
                "keyspace exists with a different replication strategy; leaving it unchanged"
            );
        }
        Some(_) => debug!(keyspace, "keyspace already exists"),
        None => {
            client.create_keyspace(&KeyspaceDefinition {
                name: keyspace.to_string(),
                replication: replication.clone(),
            })?;
            info!(keyspace, replication = %replication, "created keyspace");
        }
    }

    let existing = client.list_tables()?;
    for table in layout.tables() {
        if existing.iter().any(|name| name == table) {
            continue;
        }
        client.create_table(table)?;
        info!(keyspace, table, "created table");
    }

    Ok((client, layout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::MemoryColumnStore;
    use crate::error::{ErrorKind, SliceTreeError};
    use serde_json::json;

    fn cluster() -> ClusterConfig {
        ClusterConfig::new(["127.0.0.1"])
    }

    #[test]
    fn test_sanitize_identifier() {
        assert_eq!(sanitize_identifier("east coast!"), "east_coast_");
        assert_eq!(sanitize_identifier("us-east-1"), "us_east_1");
        assert_eq!(sanitize_identifier("dc_1"), "dc_1");
        assert_eq!(sanitize_identifier("zürich"), "z_rich");
    }

    #[test]
    fn test_table_names_follow_datacenter() {
        let layout = TableLayout::new("metrics", "east coast!");
        assert_eq!(layout.datacenter(), "east_coast_");
        assert_eq!(
            layout.tables(),
            ["metadata", "nodes", "slices_east_coast_", "datapoints_east_coast_"]
        );
    }

    #[test]
    fn test_parse_replication_strategy() {
        let simple = parse_replication_strategy("SimpleStrategy", &json!({"replication_factor": "3"}))
            .unwrap();
        assert_eq!(
            simple,
            ReplicationStrategy::Simple {
                replication_factor: 3
            }
        );

        let qualified = parse_replication_strategy(
            "org.apache.cassandra.locator.NetworkTopologyStrategy",
            &json!({"dc1": 3, "dc2": "2"}),
        )
        .unwrap();
        match qualified {
            ReplicationStrategy::NetworkTopology { datacenters } => {
                assert_eq!(datacenters.get("dc1"), Some(&3));
                assert_eq!(datacenters.get("dc2"), Some(&2));
            }
            other => panic!("unexpected strategy {other:?}"),
        }
    }

    #[test]
    fn test_parse_replication_strategy_rejects_bad_options() {
        let bad = [
            ("SimpleStrategy", json!([1, 2])),
            ("SimpleStrategy", json!({})),
            ("SimpleStrategy", json!({"replication_factor": 0})),
            ("SimpleStrategy", json!({"replication_factor": "three"})),
            ("SimpleStrategy", json!({"replication_factor": 1, "dc1": 1})),
            ("NetworkTopologyStrategy", json!({})),
            ("NetworkTopologyStrategy", json!({"dc1": -1})),
        ];
        for (name, options) in bad {
            assert!(
                matches!(
                    parse_replication_strategy(name, &options),
                    Err(ConfigError::InvalidStrategyOptions { .. })
                ),
                "{name} {options} should be rejected"
            );
        }

        assert!(matches!(
            parse_replication_strategy("LocalStrategy", &json!({})),
            Err(ConfigError::UnknownReplicationStrategy { .. })
        ));
    }

    #[test]
    fn test_initialize_creates_keyspace_and_tables() {
        let store = Arc::new(MemoryColumnStore::new());
        let (client, layout) = initialize_table_layout(
            store.clone(),
            "metrics",
            cluster(),
            "SimpleStrategy",
            &json!({"replication_factor": 1}),
            "dc1",
        )
        .unwrap();

        assert_eq!(client.keyspace(), "metrics");
        assert_eq!(
            store.list_tables("metrics").unwrap(),
            vec!["datapoints_dc1", "metadata", "nodes", "slices_dc1"]
        );
        assert_eq!(layout.slices_table(), "slices_dc1");
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let store = Arc::new(MemoryColumnStore::new());
        for _ in 0..2 {
            initialize_table_layout(
                store.clone(),
                "metrics",
                cluster(),
                "SimpleStrategy",
                &json!({"replication_factor": 1}),
                "dc1",
            )
            .unwrap();
        }

        // A second datacenter reuses the keyspace and shares the metadata table.
        initialize_table_layout(
            store.clone(),
            "metrics",
            cluster(),
            "SimpleStrategy",
            &json!({"replication_factor": 5}),
            "dc2",
        )
        .unwrap();

        assert_eq!(store.list_tables("metrics").unwrap().len(), 7);
        let definition = store.describe_keyspace("metrics").unwrap().unwrap();
        assert_eq!(
            definition.replication,
            ReplicationStrategy::Simple {
                replication_factor: 1
            }
        );
    }

    #[test]
    fn test_initialize_rejects_bad_settings_before_connecting() {
        let store = Arc::new(MemoryColumnStore::new());
        store.inject_failure(crate::error::ColumnStoreError::Unavailable {
            reason: "must not be reached".to_string(),
        });

        let err = initialize_table_layout(
            store.clone(),
            "metrics",
            cluster(),
            "SimpleStrategy",
            &json!("replication_factor=1"),
            "dc1",
        )
        .unwrap_err();
        assert!(matches!(err, SliceTreeError::Configuration(_)));

        let err = initialize_table_layout(
            store.clone(),
            "",
            cluster(),
            "SimpleStrategy",
            &json!({"replication_factor": 1}),
            "dc1",
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(store.pending_failures(), 1);
    }
}
