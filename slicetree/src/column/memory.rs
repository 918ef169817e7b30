//! In-process column store backend.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use super::{Column, ColumnRange, ColumnStore, Credentials, KeyspaceDefinition, StoreResult};
use crate::error::ColumnStoreError;

type Row = BTreeMap<String, Vec<u8>>;

#[derive(Debug)]
struct MemoryKeyspace {
    definition: KeyspaceDefinition,
    tables: HashMap<String, HashMap<String, Row>>,
}

/// A column store that lives entirely in memory.
///
/// Useful for tests and for embedding the tree without a cluster. Besides
/// the [`ColumnStore`] contract it offers:
///
/// - required credentials ([`MemoryColumnStore::with_credentials`])
/// - queued failures returned by the next calls ([`MemoryColumnStore::inject_failure`])
/// - read and write counters to observe round trips
#[derive(Debug, Default)]
pub struct MemoryColumnStore {
    keyspaces: RwLock<HashMap<String, MemoryKeyspace>>,
    failures: Mutex<VecDeque<ColumnStoreError>>,
    credentials: Option<Credentials>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemoryColumnStore {
    /// Creates an empty store that accepts any (or no) credentials.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store that only accepts the given credentials.
    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            credentials: Some(credentials),
            ..Self::default()
        }
    }

    /// Queues a failure; each call pops one queued failure before doing
    /// any work.
    pub fn inject_failure(&self, error: ColumnStoreError) {
        self.failures.lock().push_back(error);
    }

    /// Number of queued failures not yet returned.
    pub fn pending_failures(&self) -> usize {
        self.failures.lock().len()
    }

    /// Number of successful `get` calls.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of successful `insert`/`remove_*` calls.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Resets the read and write counters.
    pub fn reset_counters(&self) {
        self.reads.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
    }

    fn take_failure(&self) -> StoreResult<()> {
        match self.failures.lock().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn with_table<T>(
        &self,
        keyspace: &str,
        table: &str,
        f: impl FnOnce(&mut HashMap<String, Row>) -> T,
    ) -> StoreResult<T> {
        self.take_failure()?;
        let mut keyspaces = self.keyspaces.write();
        let space = keyspaces
            .get_mut(keyspace)
            .ok_or_else(|| ColumnStoreError::UnknownKeyspace {
                keyspace: keyspace.to_string(),
            })?;
        let partitions =
            space
                .tables
                .get_mut(table)
                .ok_or_else(|| ColumnStoreError::UnknownTable {
                    keyspace: keyspace.to_string(),
                    table: table.to_string(),
                })?;
        Ok(f(partitions))
    }
}

impl ColumnStore for MemoryColumnStore {
    fn connect(&self, _servers: &[String], credentials: Option<&Credentials>) -> StoreResult<()> {
        self.take_failure()?;
        match (&self.credentials, credentials) {
            (None, _) => Ok(()),
            (Some(required), Some(given)) if required == given => Ok(()),
            (Some(_), given) => Err(ColumnStoreError::Unauthorized {
                username: given.map(|c| c.username.clone()).unwrap_or_default(),
            }),
        }
    }

    fn describe_keyspace(&self, keyspace: &str) -> StoreResult<Option<KeyspaceDefinition>> {
        self.take_failure()?;
        Ok(self
            .keyspaces
            .read()
            .get(keyspace)
            .map(|space| space.definition.clone()))
    }

    fn create_keyspace(&self, definition: &KeyspaceDefinition) -> StoreResult<()> {
        self.take_failure()?;
        self.keyspaces
            .write()
            .entry(definition.name.clone())
            .or_insert_with(|| MemoryKeyspace {
                definition: definition.clone(),
                tables: HashMap::new(),
            });
        Ok(())
    }

    fn list_tables(&self, keyspace: &str) -> StoreResult<Vec<String>> {
        self.take_failure()?;
        let keyspaces = self.keyspaces.read();
        let space = keyspaces
            .get(keyspace)
            .ok_or_else(|| ColumnStoreError::UnknownKeyspace {
                keyspace: keyspace.to_string(),
            })?;
        let mut tables: Vec<String> = space.tables.keys().cloned().collect();
        tables.sort();
        Ok(tables)
    }

    fn create_table(&self, keyspace: &str, table: &str) -> StoreResult<()> {
        self.take_failure()?;
        let mut keyspaces = self.keyspaces.write();
        let space = keyspaces
            .get_mut(keyspace)
            .ok_or_else(|| ColumnStoreError::UnknownKeyspace {
                keyspace: keyspace.to_string(),
            })?;
        space.tables.entry(table.to_string()).or_default();
        Ok(())
    }

    fn get(
        &self,
        keyspace: &str,
        table: &str,
        partition: &str,
        range: &ColumnRange,
    ) -> StoreResult<Vec<Column>> {
        let columns = self.with_table(keyspace, table, |partitions| {
            partitions
                .get(partition)
                .map(|row| range.select(row))
                .unwrap_or_default()
        })?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(columns)
    }

    fn insert(
        &self,
        keyspace: &str,
        table: &str,
        partition: &str,
        columns: &[Column],
    ) -> StoreResult<()> {
        self.with_table(keyspace, table, |partitions| {
            let row = partitions.entry(partition.to_string()).or_default();
            for column in columns {
                row.insert(column.name.clone(), column.value.clone());
            }
        })?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn remove_columns(
        &self,
        keyspace: &str,
        table: &str,
        partition: &str,
        names: &[String],
    ) -> StoreResult<()> {
        self.with_table(keyspace, table, |partitions| {
            if let Some(row) = partitions.get_mut(partition) {
                for name in names {
                    row.remove(name);
                }
                if row.is_empty() {
                    partitions.remove(partition);
                }
            }
        })?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn remove_partition(&self, keyspace: &str, table: &str, partition: &str) -> StoreResult<()> {
        self.with_table(keyspace, table, |partitions| {
            partitions.remove(partition);
        })?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
