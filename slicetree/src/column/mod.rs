//! Wide-column store seam.
//!
//! The metric tree never talks to a database directly. It goes through the
//! [`ColumnStore`] trait, which models the small slice of a wide-column
//! database the engine needs: keyspaces with a replication strategy, tables,
//! and partitions holding lexicographically ordered columns.
//!
//! [`ColumnStoreClient`] wraps a backend with cluster settings and a bounded
//! retry policy, and converts backend failures into [`SliceTreeError`]s.
//!
//! Two backends ship with the crate:
//!
//! - [`MemoryColumnStore`] keeps everything in process and supports fault
//!   injection and round-trip accounting
//! - [`FileColumnStore`] persists partitions as JSON files under a local
//!   data directory
//!
//! [`SliceTreeError`]: crate::error::SliceTreeError

mod client;
mod file;
mod memory;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ColumnStoreError;

pub use client::{ClusterConfig, ColumnStoreClient, RetryPolicy};
pub use file::FileColumnStore;
pub use memory::MemoryColumnStore;

/// Result type for backend calls.
pub type StoreResult<T> = std::result::Result<T, ColumnStoreError>;

/// A named cell within a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name; columns sort lexicographically by name.
    pub name: String,
    /// Raw column value.
    pub value: Vec<u8>,
}

impl Column {
    /// Creates a column.
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Selects a contiguous run of columns from a partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnRange {
    /// First column name to include, or the beginning of the partition.
    pub start: Option<String>,
    /// First column name to exclude, or the end of the partition.
    pub end: Option<String>,
    /// Return columns in descending name order.
    pub reversed: bool,
    /// Maximum number of columns to return.
    pub limit: Option<usize>,
}

impl ColumnRange {
    /// Every column in the partition.
    pub fn all() -> Self {
        Self::default()
    }

    /// Columns with `start <= name < end`.
    pub fn between(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: Some(start.into()),
            end: Some(end.into()),
            ..Self::default()
        }
    }

    /// A single named column.
    pub fn single(name: &str) -> Self {
        // '\0' sorts before every other character, so this is the
        // smallest name greater than `name`.
        Self::between(name, format!("{name}\0"))
    }

    /// The last column of the range, read in reverse.
    #[must_use]
    pub fn last(mut self) -> Self {
        self.reversed = true;
        self.limit = Some(1);
        self
    }

    /// Whether `name` falls inside the bounds (ignores order and limit).
    pub fn contains(&self, name: &str) -> bool {
        self.start.as_deref().is_none_or(|start| name >= start)
            && self.end.as_deref().is_none_or(|end| name < end)
    }

    /// Applies the range to an ordered row.
    pub fn select(&self, row: &BTreeMap<String, Vec<u8>>) -> Vec<Column> {
        let matching = row.iter().filter(|(name, _)| self.contains(name));
        let limit = self.limit.unwrap_or(usize::MAX);

        let to_column = |(name, value): (&String, &Vec<u8>)| Column::new(name.clone(), value.clone());
        if self.reversed {
            matching.rev().take(limit).map(to_column).collect()
        } else {
            matching.take(limit).map(to_column).collect()
        }
    }
}

/// How a keyspace's data is replicated across the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "class")]
pub enum ReplicationStrategy {
    /// A fixed number of replicas, placed without datacenter awareness.
    #[serde(rename = "SimpleStrategy")]
    Simple {
        /// Number of replicas.
        replication_factor: u32,
    },
    /// Per-datacenter replica counts.
    #[serde(rename = "NetworkTopologyStrategy")]
    NetworkTopology {
        /// Datacenter name to replica count.
        datacenters: BTreeMap<String, u32>,
    },
}

impl fmt::Display for ReplicationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple { replication_factor } => {
                write!(f, "SimpleStrategy(replication_factor={replication_factor})")
            }
            Self::NetworkTopology { datacenters } => {
                write!(f, "NetworkTopologyStrategy(")?;
                for (i, (dc, count)) in datacenters.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{dc}={count}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Definition of a keyspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyspaceDefinition {
    /// Keyspace name.
    pub name: String,
    /// Replication settings.
    pub replication: ReplicationStrategy,
}

/// Username/password pair presented when connecting.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Login name.
    pub username: String,
    /// Secret.
    pub password: String,
}

impl Credentials {
    /// Creates a credential pair.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A wide-column database backend.
///
/// All calls block. Implementations must report slow requests as
/// [`ColumnStoreError::Timeout`] instead of waiting forever, and must treat
/// keyspace and table creation as "create if not exists".
pub trait ColumnStore: Send + Sync + fmt::Debug {
    /// Opens a session against the given contact points.
    ///
    /// # Errors
    ///
    /// Fails if the cluster is unreachable or rejects the credentials.
    fn connect(&self, servers: &[String], credentials: Option<&Credentials>) -> StoreResult<()>;

    /// Returns the keyspace definition, if the keyspace exists.
    ///
    /// # Errors
    ///
    /// Fails on backend errors.
    fn describe_keyspace(&self, keyspace: &str) -> StoreResult<Option<KeyspaceDefinition>>;

    /// Creates a keyspace unless it already exists.
    ///
    /// # Errors
    ///
    /// Fails on backend errors.
    fn create_keyspace(&self, definition: &KeyspaceDefinition) -> StoreResult<()>;

    /// Lists the tables of a keyspace.
    ///
    /// # Errors
    ///
    /// Fails if the keyspace does not exist.
    fn list_tables(&self, keyspace: &str) -> StoreResult<Vec<String>>;

    /// Creates a table unless it already exists.
    ///
    /// # Errors
    ///
    /// Fails if the keyspace does not exist.
    fn create_table(&self, keyspace: &str, table: &str) -> StoreResult<()>;

    /// Reads the columns of a partition selected by `range`.
    ///
    /// A missing partition reads as empty.
    ///
    /// # Errors
    ///
    /// Fails if the keyspace or table does not exist.
    fn get(
        &self,
        keyspace: &str,
        table: &str,
        partition: &str,
        range: &ColumnRange,
    ) -> StoreResult<Vec<Column>>;

    /// Inserts or overwrites columns of a partition.
    ///
    /// # Errors
    ///
    /// Fails if the keyspace or table does not exist.
    fn insert(
        &self,
        keyspace: &str,
        table: &str,
        partition: &str,
        columns: &[Column],
    ) -> StoreResult<()>;

    /// Deletes named columns from a partition. Missing columns are ignored.
    ///
    /// # Errors
    ///
    /// Fails if the keyspace or table does not exist.
    fn remove_columns(
        &self,
        keyspace: &str,
        table: &str,
        partition: &str,
        names: &[String],
    ) -> StoreResult<()>;

    /// Deletes a whole partition. A missing partition is ignored.
    ///
    /// # Errors
    ///
    /// Fails if the keyspace or table does not exist.
    fn remove_partition(&self, keyspace: &str, table: &str, partition: &str) -> StoreResult<()>;
}
