//! Error types for the slicetree metric store.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// The main error type for all slicetree operations.
///
/// Variants follow the failure taxonomy the host daemon cares about:
/// configuration problems at construction, malformed arguments, missing
/// nodes or keys, duplicate creation, and column store failures split into
/// retryable and permanent ones. [`SliceTreeError::Operation`] wraps any of
/// them with the adapter operation and metric path that triggered it.
#[derive(Error, Debug)]
pub enum SliceTreeError {
    /// Bad or missing settings.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Malformed retention, xFilesFactor, aggregation, path or datapoint.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A node or metadata key does not exist.
    #[error("not found: {0}")]
    NotFound(#[from] NotFoundError),

    /// A node with this path already exists.
    #[error("metric '{path}' already exists")]
    AlreadyExists {
        /// The conflicting metric path.
        path: String,
    },

    /// The column store failed in a way that may succeed on a later attempt.
    #[error("transient column store failure after {attempts} attempt(s): {source}")]
    TransientStore {
        /// How many attempts were made before giving up.
        attempts: u32,
        /// The last failure reported by the backend.
        #[source]
        source: ColumnStoreError,
    },

    /// The column store failed in a way retrying cannot fix.
    #[error("column store failure: {source}")]
    PermanentStore {
        /// The failure reported by the backend.
        #[source]
        source: ColumnStoreError,
    },

    /// An error annotated with the operation and metric it occurred under.
    #[error("{operation} failed for metric '{metric}': {source}")]
    Operation {
        /// The adapter operation name (e.g. `write`, `set_metadata`).
        operation: &'static str,
        /// The metric path the operation was called with.
        metric: String,
        /// The underlying error.
        #[source]
        source: Box<SliceTreeError>,
    },
}

/// Coarse classification of a [`SliceTreeError`], independent of wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`SliceTreeError::Configuration`].
    Configuration,
    /// See [`SliceTreeError::Validation`].
    Validation,
    /// See [`SliceTreeError::NotFound`].
    NotFound,
    /// See [`SliceTreeError::AlreadyExists`].
    AlreadyExists,
    /// See [`SliceTreeError::TransientStore`].
    TransientStore,
    /// See [`SliceTreeError::PermanentStore`].
    PermanentStore,
}

impl SliceTreeError {
    /// Returns the kind of the innermost error, looking through
    /// [`SliceTreeError::Operation`] wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::TransientStore { .. } => ErrorKind::TransientStore,
            Self::PermanentStore { .. } => ErrorKind::PermanentStore,
            Self::Operation { source, .. } => source.kind(),
        }
    }

    /// Whether the caller may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientStore
    }

    /// Wraps this error with the operation and metric it occurred under.
    #[must_use]
    pub fn in_operation(self, operation: &'static str, metric: impl Into<String>) -> Self {
        Self::Operation {
            operation,
            metric: metric.into(),
            source: Box::new(self),
        }
    }

    /// Renders the error followed by its full `source()` chain, one cause
    /// per line.
    pub fn trace(&self) -> String {
        let mut out = self.to_string();
        let mut current = std::error::Error::source(self);
        while let Some(cause) = current {
            out.push_str("\n  caused by: ");
            out.push_str(&cause.to_string());
            current = cause.source();
        }
        out
    }
}

impl From<ColumnStoreError> for SliceTreeError {
    fn from(source: ColumnStoreError) -> Self {
        if source.is_transient() {
            Self::TransientStore {
                attempts: 1,
                source,
            }
        } else {
            Self::PermanentStore { source }
        }
    }
}

/// Errors in host-supplied settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required setting is missing or blank.
    #[error("setting {name} must not be empty")]
    MissingSetting {
        /// The setting name as the host spells it.
        name: &'static str,
    },

    /// The server list contains an empty entry.
    #[error("server list '{servers}' contains an empty entry")]
    InvalidServerList {
        /// The raw server list.
        servers: String,
    },

    /// Strategy options are not valid JSON.
    #[error("strategy options are not valid JSON: {source}")]
    StrategyOptionsParse {
        /// The JSON parse error.
        #[source]
        source: serde_json::Error,
    },

    /// Strategy options parsed, but their shape is wrong.
    #[error("invalid strategy options: {reason}")]
    InvalidStrategyOptions {
        /// What is wrong with the options.
        reason: String,
    },

    /// The replication strategy name is not recognized.
    #[error("unknown replication strategy '{name}'")]
    UnknownReplicationStrategy {
        /// The strategy name as given.
        name: String,
    },

    /// The slice caching behavior name is not recognized.
    #[error("unknown slice caching behavior '{value}' (expected none, latest or all)")]
    UnknownCachingBehavior {
        /// The behavior as given.
        value: String,
    },

    /// A numeric setting could not be interpreted.
    #[error("setting {name} has invalid value '{value}'")]
    InvalidNumber {
        /// The setting name as the host spells it.
        name: &'static str,
        /// The raw value.
        value: String,
    },

    /// Only one of username and password was supplied.
    #[error("USERNAME and PASSWORD must be supplied together")]
    IncompleteCredentials,

    /// A settings file could not be read.
    #[error("failed to read settings file '{path}': {source}")]
    SettingsRead {
        /// The settings file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A settings document could not be parsed.
    #[error("failed to parse settings: {source}")]
    SettingsParse {
        /// The JSON parse error.
        #[source]
        source: serde_json::Error,
    },
}

/// Errors in caller-supplied arguments.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// The metric path is malformed.
    #[error("invalid metric path '{path}': {reason}")]
    InvalidMetricPath {
        /// The rejected path.
        path: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// No retention archives were given.
    #[error("at least one retention archive must be configured")]
    NoRetentions,

    /// A retention archive has a zero step or count.
    #[error("retention {index} ({step}:{count}) must have a positive step and count")]
    InvalidRetention {
        /// Position in the retention list.
        index: usize,
        /// Seconds per point.
        step: u64,
        /// Number of points.
        count: u64,
    },

    /// Retention steps do not strictly increase.
    #[error("retentions must be ordered by strictly increasing step")]
    RetentionsNotOrdered,

    /// A coarser step is not a multiple of the finer one before it.
    #[error("retention step {coarse} is not a multiple of the preceding step {fine}")]
    StepNotMultiple {
        /// The finer step.
        fine: u64,
        /// The coarser step.
        coarse: u64,
    },

    /// The time step does not match the first retention.
    #[error("time step {time_step} does not match first retention step {first_step}")]
    TimeStepMismatch {
        /// The declared time step.
        time_step: u64,
        /// The first retention's step.
        first_step: u64,
    },

    /// xFilesFactor outside `[0, 1]`.
    #[error("xFilesFactor {value} must be between 0 and 1")]
    InvalidXFilesFactor {
        /// The rejected value.
        value: f64,
    },

    /// The aggregation method name is not recognized.
    #[error("unknown aggregation method '{name}'")]
    UnknownAggregationMethod {
        /// The method as given.
        name: String,
    },

    /// A datapoint value is NaN or infinite.
    #[error("datapoint at {timestamp} has non-finite value {value}")]
    InvalidValue {
        /// The datapoint timestamp.
        timestamp: u64,
        /// The rejected value.
        value: f64,
    },

    /// A time range is empty or reversed.
    #[error("invalid time range: from {from} >= until {until}")]
    InvalidTimeRange {
        /// Range start.
        from: u64,
        /// Range end (exclusive).
        until: u64,
    },

    /// The requested archive step is not configured on the node.
    #[error("metric has no archive with step {step}")]
    UnknownArchive {
        /// The requested step.
        step: u64,
    },

    /// A metadata mapping does not describe a valid node.
    #[error("invalid metadata: {source}")]
    InvalidMetadata {
        /// The decode error.
        #[source]
        source: serde_json::Error,
    },

    /// A find pattern is malformed.
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The rejected pattern.
        pattern: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}

/// Something that was looked up does not exist.
#[derive(Error, Debug)]
pub enum NotFoundError {
    /// No node exists at the path.
    #[error("metric '{path}' does not exist")]
    Node {
        /// The metric path.
        path: String,
    },

    /// The node exists but its metadata lacks the key.
    #[error("metric '{path}' has no metadata key '{key}'")]
    MetadataKey {
        /// The metric path.
        path: String,
        /// The missing key.
        key: String,
    },
}

/// Failures reported by a [`crate::column::ColumnStore`] backend.
#[derive(Error, Debug)]
pub enum ColumnStoreError {
    /// No replica could serve the request.
    #[error("column store unavailable: {reason}")]
    Unavailable {
        /// Description from the backend.
        reason: String,
    },

    /// The request did not complete in time.
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        /// The store operation that timed out.
        operation: &'static str,
        /// How long the backend waited.
        elapsed: Duration,
    },

    /// Credentials were rejected or missing.
    #[error("authentication failed for user '{username}'")]
    Unauthorized {
        /// The user that was rejected (empty if none was given).
        username: String,
    },

    /// The keyspace has not been created.
    #[error("keyspace '{keyspace}' does not exist")]
    UnknownKeyspace {
        /// The keyspace name.
        keyspace: String,
    },

    /// The table has not been created.
    #[error("table '{keyspace}.{table}' does not exist")]
    UnknownTable {
        /// The keyspace name.
        keyspace: String,
        /// The table name.
        table: String,
    },

    /// Stored data has an unexpected shape.
    #[error("corrupted data in {location}: {reason}")]
    Corrupted {
        /// Where the bad data was found.
        location: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Filesystem access failed in a file-backed store.
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// The file or directory involved.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A stored document could not be encoded or decoded.
    #[error("failed to encode or decode '{location}': {source}")]
    Serde {
        /// The document involved.
        location: String,
        /// The JSON error.
        #[source]
        source: serde_json::Error,
    },
}

impl ColumnStoreError {
    /// Whether the failure is expected to clear up on its own.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable { .. } | Self::Timeout { .. } => true,
            Self::Io { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
            ),
            Self::Unauthorized { .. }
            | Self::UnknownKeyspace { .. }
            | Self::UnknownTable { .. }
            | Self::Corrupted { .. }
            | Self::Serde { .. } => false,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configuration => "configuration",
            Self::Validation => "validation",
            Self::NotFound => "not found",
            Self::AlreadyExists => "already exists",
            Self::TransientStore => "transient store",
            Self::PermanentStore => "permanent store",
        };
        f.write_str(name)
    }
}

/// Type alias for `Result<T, SliceTreeError>`.
pub type Result<T> = std::result::Result<T, SliceTreeError>;
