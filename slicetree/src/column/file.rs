//! Directory-backed column store backend.
//!
//! # File Layout
//!
//! ```text
//! root/
//! └── <keyspace>/
//!     ├── keyspace.json              <- KeyspaceDefinition
//!     └── <table>/
//!         └── <hex(partition)>.json  <- {column name: hex(value)}
//! ```
//!
//! Partition files are rewritten whole through a temporary file and a
//! rename, so a reader never sees a half-written partition.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use super::{Column, ColumnRange, ColumnStore, Credentials, KeyspaceDefinition, StoreResult};
use crate::error::ColumnStoreError;

/// Name of the keyspace definition file.
const KEYSPACE_FILE: &str = "keyspace.json";

/// How long a call waits for the write lock before reporting a timeout.
const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// On-disk form of a partition.
type PartitionFile = BTreeMap<String, String>;

/// A single-node column store persisted under a local directory.
#[derive(Debug)]
pub struct FileColumnStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl FileColumnStore {
    /// Opens (creating if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`ColumnStoreError::Io`] if the directory cannot be created.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, ColumnStoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| io_error(&root, e))?;
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn keyspace_dir(&self, keyspace: &str) -> StoreResult<PathBuf> {
        let dir = self.root.join(keyspace);
        if dir.join(KEYSPACE_FILE).is_file() {
            Ok(dir)
        } else {
            Err(ColumnStoreError::UnknownKeyspace {
                keyspace: keyspace.to_string(),
            })
        }
    }

    fn table_dir(&self, keyspace: &str, table: &str) -> StoreResult<PathBuf> {
        let dir = self.keyspace_dir(keyspace)?.join(table);
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(ColumnStoreError::UnknownTable {
                keyspace: keyspace.to_string(),
                table: table.to_string(),
            })
        }
    }

    fn partition_path(table_dir: &Path, partition: &str) -> PathBuf {
        table_dir.join(format!("{}.json", hex::encode(partition.as_bytes())))
    }

    fn read_partition(path: &Path) -> StoreResult<BTreeMap<String, Vec<u8>>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(io_error(path, e)),
        };

        let encoded: PartitionFile =
            serde_json::from_str(&content).map_err(|source| ColumnStoreError::Serde {
                location: path.display().to_string(),
                source,
            })?;

        encoded
            .into_iter()
            .map(|(name, value)| {
                hex::decode(&value)
                    .map(|bytes| (name, bytes))
                    .map_err(|e| ColumnStoreError::Corrupted {
                        location: path.display().to_string(),
                        reason: format!("column value is not hex: {e}"),
                    })
            })
            .collect()
    }

    fn write_partition(path: &Path, row: &BTreeMap<String, Vec<u8>>) -> StoreResult<()> {
        if row.is_empty() {
            return match fs::remove_file(path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => Err(io_error(path, e)),
                _ => Ok(()),
            };
        }

        let encoded: PartitionFile = row
            .iter()
            .map(|(name, value)| (name.clone(), hex::encode(value)))
            .collect();
        let content =
            serde_json::to_string(&encoded).map_err(|source| ColumnStoreError::Serde {
                location: path.display().to_string(),
                source,
            })?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(|e| io_error(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| io_error(path, e))
    }

    /// Runs a read-modify-write of one partition under the store lock.
    fn modify_partition(
        &self,
        operation: &'static str,
        keyspace: &str,
        table: &str,
        partition: &str,
        f: impl FnOnce(&mut BTreeMap<String, Vec<u8>>),
    ) -> StoreResult<()> {
        let started = Instant::now();
        let _guard = self
            .lock
            .try_lock_for(LOCK_TIMEOUT)
            .ok_or_else(|| ColumnStoreError::Timeout {
                operation,
                elapsed: started.elapsed(),
            })?;

        let path = Self::partition_path(&self.table_dir(keyspace, table)?, partition);
        let mut row = Self::read_partition(&path)?;
        f(&mut row);
        Self::write_partition(&path, &row)
    }
}

fn io_error(path: &Path, source: io::Error) -> ColumnStoreError {
    ColumnStoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl ColumnStore for FileColumnStore {
    fn connect(&self, servers: &[String], credentials: Option<&Credentials>) -> StoreResult<()> {
        if !self.root.is_dir() {
            return Err(ColumnStoreError::Unavailable {
                reason: format!("data directory '{}' is missing", self.root.display()),
            });
        }
        debug!(
            root = %self.root.display(),
            servers = ?servers,
            authenticated = credentials.is_some(),
            "opened file column store"
        );
        Ok(())
    }

    fn describe_keyspace(&self, keyspace: &str) -> StoreResult<Option<KeyspaceDefinition>> {
        let path = self.root.join(keyspace).join(KEYSPACE_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| ColumnStoreError::Serde {
                location: path.display().to_string(),
                source,
            })
    }

    fn create_keyspace(&self, definition: &KeyspaceDefinition) -> StoreResult<()> {
        let _guard = self.lock.lock();
        let dir = self.root.join(&definition.name);
        let path = dir.join(KEYSPACE_FILE);
        if path.is_file() {
            return Ok(());
        }

        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        let content = serde_json::to_string_pretty(definition).map_err(|source| {
            ColumnStoreError::Serde {
                location: path.display().to_string(),
                source,
            }
        })?;
        fs::write(&path, content).map_err(|e| io_error(&path, e))
    }

    fn list_tables(&self, keyspace: &str) -> StoreResult<Vec<String>> {
        let dir = self.keyspace_dir(keyspace)?;
        let entries = fs::read_dir(&dir).map_err(|e| io_error(&dir, e))?;

        let mut tables = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&dir, e))?;
            if entry.path().is_dir() {
                tables.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        tables.sort();
        Ok(tables)
    }

    fn create_table(&self, keyspace: &str, table: &str) -> StoreResult<()> {
        let dir = self.keyspace_dir(keyspace)?.join(table);
        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))
    }

    fn get(
        &self,
        keyspace: &str,
        table: &str,
        partition: &str,
        range: &ColumnRange,
    ) -> StoreResult<Vec<Column>> {
        let path = Self::partition_path(&self.table_dir(keyspace, table)?, partition);
        let row = Self::read_partition(&path)?;
        Ok(range.select(&row))
    }

    fn insert(
        &self,
        keyspace: &str,
        table: &str,
        partition: &str,
        columns: &[Column],
    ) -> StoreResult<()> {
        self.modify_partition("insert", keyspace, table, partition, |row| {
            for column in columns {
                row.insert(column.name.clone(), column.value.clone());
            }
        })
    }

    fn remove_columns(
        &self,
        keyspace: &str,
        table: &str,
        partition: &str,
        names: &[String],
    ) -> StoreResult<()> {
        self.modify_partition("remove_columns", keyspace, table, partition, |row| {
            for name in names {
                row.remove(name);
            }
        })
    }

    fn remove_partition(&self, keyspace: &str, table: &str, partition: &str) -> StoreResult<()> {
        self.modify_partition("remove_partition", keyspace, table, partition, BTreeMap::clear)
    }
}
