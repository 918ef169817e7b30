//! Retrying client over a [`ColumnStore`] backend.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::{Column, ColumnRange, ColumnStore, Credentials, KeyspaceDefinition, StoreResult};
use crate::error::{ConfigError, Result, SliceTreeError};

/// Bounded exponential backoff for transient column store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `0` disables retrying.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub initial_backoff: Duration,
    /// Upper bound for a single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    /// 3 retries, 50ms initial backoff, 2s cap.
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Sets the maximum number of retries.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the initial backoff.
    #[must_use]
    pub fn with_initial_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }
}

/// Connection settings for a column store cluster.
#[derive(Debug, Clone, Default)]
pub struct ClusterConfig {
    /// Contact points (`host` or `host:port`).
    pub servers: Vec<String>,
    /// Optional login.
    pub credentials: Option<Credentials>,
    /// Retry behavior for transient failures.
    pub retry: RetryPolicy,
}

impl ClusterConfig {
    /// Creates a config for the given contact points with default retries
    /// and no credentials.
    pub fn new<I, S>(servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            servers: servers.into_iter().map(Into::into).collect(),
            credentials: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Sets the credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// A connected session bound to one keyspace.
///
/// Every call goes through the retry policy: transient failures are retried
/// with exponential backoff, permanent ones are returned immediately.
/// Cloning is cheap and shares the backend.
#[derive(Debug, Clone)]
pub struct ColumnStoreClient {
    store: Arc<dyn ColumnStore>,
    keyspace: String,
    config: ClusterConfig,
}

impl ColumnStoreClient {
    /// Connects to the cluster.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::MissingSetting`] if `keyspace` or the server list is empty
    /// - [`ConfigError::InvalidServerList`] if a server entry is blank
    /// - a store error if the backend refuses the session
    pub fn connect(
        store: Arc<dyn ColumnStore>,
        keyspace: impl Into<String>,
        config: ClusterConfig,
    ) -> Result<Self> {
        let keyspace = keyspace.into();
        if keyspace.trim().is_empty() {
            return Err(ConfigError::MissingSetting { name: "KEYSPACE" }.into());
        }
        if config.servers.is_empty() {
            return Err(ConfigError::MissingSetting { name: "SERVERS" }.into());
        }
        if config.servers.iter().any(|s| s.trim().is_empty()) {
            return Err(ConfigError::InvalidServerList {
                servers: config.servers.join(","),
            }
            .into());
        }

        let client = Self {
            store,
            keyspace,
            config,
        };
        client.with_retry("connect", || {
            client
                .store
                .connect(&client.config.servers, client.config.credentials.as_ref())
        })?;
        debug!(
            keyspace = %client.keyspace,
            servers = ?client.config.servers,
            "connected to column store"
        );
        Ok(client)
    }

    /// The keyspace this client reads and writes.
    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    /// The cluster settings used to connect.
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// The underlying backend.
    pub fn backend(&self) -> &Arc<dyn ColumnStore> {
        &self.store
    }

    /// Describes this client's keyspace.
    ///
    /// # Errors
    ///
    /// Returns a store error on backend failure.
    pub fn describe_keyspace(&self) -> Result<Option<KeyspaceDefinition>> {
        self.with_retry("describe_keyspace", || {
            self.store.describe_keyspace(&self.keyspace)
        })
    }

    /// Creates a keyspace unless it exists.
    ///
    /// # Errors
    ///
    /// Returns a store error on backend failure.
    pub fn create_keyspace(&self, definition: &KeyspaceDefinition) -> Result<()> {
        self.with_retry("create_keyspace", || self.store.create_keyspace(definition))
    }

    /// Lists the tables of this client's keyspace.
    ///
    /// # Errors
    ///
    /// Returns a store error on backend failure.
    pub fn list_tables(&self) -> Result<Vec<String>> {
        self.with_retry("list_tables", || self.store.list_tables(&self.keyspace))
    }

    /// Creates a table unless it exists.
    ///
    /// # Errors
    ///
    /// Returns a store error on backend failure.
    pub fn create_table(&self, table: &str) -> Result<()> {
        self.with_retry("create_table", || self.store.create_table(&self.keyspace, table))
    }

    /// Reads a range of columns.
    ///
    /// # Errors
    ///
    /// Returns a store error on backend failure.
    pub fn get(&self, table: &str, partition: &str, range: &ColumnRange) -> Result<Vec<Column>> {
        self.with_retry("get", || {
            self.store.get(&self.keyspace, table, partition, range)
        })
    }

    /// Reads one column's value.
    ///
    /// # Errors
    ///
    /// Returns a store error on backend failure.
    pub fn get_column(&self, table: &str, partition: &str, name: &str) -> Result<Option<Vec<u8>>> {
        let columns = self.get(table, partition, &ColumnRange::single(name))?;
        Ok(columns.into_iter().next().map(|column| column.value))
    }

    /// Writes columns.
    ///
    /// # Errors
    ///
    /// Returns a store error on backend failure.
    pub fn insert(&self, table: &str, partition: &str, columns: &[Column]) -> Result<()> {
        if columns.is_empty() {
            return Ok(());
        }
        self.with_retry("insert", || {
            self.store.insert(&self.keyspace, table, partition, columns)
        })
    }

    /// Deletes columns.
    ///
    /// # Errors
    ///
    /// Returns a store error on backend failure.
    pub fn remove_columns(&self, table: &str, partition: &str, names: &[String]) -> Result<()> {
        self.with_retry("remove_columns", || {
            self.store.remove_columns(&self.keyspace, table, partition, names)
        })
    }

    /// Deletes a partition.
    ///
    /// # Errors
    ///
    /// Returns a store error on backend failure.
    pub fn remove_partition(&self, table: &str, partition: &str) -> Result<()> {
        self.with_retry("remove_partition", || {
            self.store.remove_partition(&self.keyspace, table, partition)
        })
    }

    /// Runs `call`, retrying transient failures per the retry policy.
    fn with_retry<T>(
        &self,
        operation: &'static str,
        mut call: impl FnMut() -> StoreResult<T>,
    ) -> Result<T> {
        let policy = self.config.retry;
        let mut backoff = policy.initial_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match call() {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !error.is_transient() {
                return Err(SliceTreeError::PermanentStore { source: error });
            }
            if attempt > policy.max_retries {
                return Err(SliceTreeError::TransientStore {
                    attempts: attempt,
                    source: error,
                });
            }

            warn!(
                operation,
                attempt,
                backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "retrying column store request"
            );
            std::thread::sleep(backoff);
            backoff = (backoff * 2).min(policy.max_backoff);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::MemoryColumnStore;
    use crate::error::{ColumnStoreError, ErrorKind};

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(max_retries)
            .with_initial_backoff(Duration::from_millis(1))
    }

    fn connected(store: &Arc<MemoryColumnStore>, retry: RetryPolicy) -> ColumnStoreClient {
        ColumnStoreClient::connect(
            store.clone(),
            "metrics",
            ClusterConfig::new(["127.0.0.1"]).with_retry(retry),
        )
        .unwrap()
    }

    #[test]
    fn test_connect_rejects_empty_settings() {
        let store = Arc::new(MemoryColumnStore::new());

        let err = ColumnStoreClient::connect(store.clone(), "", ClusterConfig::new(["a"]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err = ColumnStoreClient::connect(store.clone(), "metrics", ClusterConfig::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err = ColumnStoreClient::connect(store, "metrics", ClusterConfig::new(["a", " "]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let store = Arc::new(MemoryColumnStore::new());
        let client = connected(&store, fast_retry(3));

        store.inject_failure(ColumnStoreError::Unavailable {
            reason: "replica down".to_string(),
        });
        store.inject_failure(ColumnStoreError::Timeout {
            operation: "describe_keyspace",
            elapsed: Duration::from_millis(10),
        });

        assert_eq!(client.describe_keyspace().unwrap(), None);
        assert_eq!(store.pending_failures(), 0);
    }

    #[test]
    fn test_exhausted_retries_surface_transient_error() {
        let store = Arc::new(MemoryColumnStore::new());
        let client = connected(&store, fast_retry(2));

        for _ in 0..5 {
            store.inject_failure(ColumnStoreError::Unavailable {
                reason: "replica down".to_string(),
            });
        }

        match client.describe_keyspace().unwrap_err() {
            SliceTreeError::TransientStore { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected TransientStore, got {other:?}"),
        }
        assert_eq!(store.pending_failures(), 2);
    }

    #[test]
    fn test_permanent_failures_are_not_retried() {
        let store = Arc::new(MemoryColumnStore::new());
        let client = connected(&store, fast_retry(3));

        store.inject_failure(ColumnStoreError::Unauthorized {
            username: "carbon".to_string(),
        });
        store.inject_failure(ColumnStoreError::Unavailable {
            reason: "never reached".to_string(),
        });

        let err = client.describe_keyspace().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermanentStore);
        assert_eq!(store.pending_failures(), 1);
    }
}
