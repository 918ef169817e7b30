//! Database settings as handed over by the host daemon.
//!
//! The host passes its settings as a flat mapping with upper-case keys.
//! [`DatabaseSettings`] deserializes that mapping (from JSON) and derives the
//! typed values the store needs.
//!
//! ```rust
//! use slicetree::config::DatabaseSettings;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = DatabaseSettings::from_json_str(
//!     r#"{
//!         "LOCAL_DATA_DIR": "/var/lib/carbon",
//!         "KEYSPACE": "metrics",
//!         "SERVERS": "10.0.0.1, 10.0.0.2:9160",
//!         "MAX_SLICE_GAP": "600"
//!     }"#,
//! )?;
//! assert_eq!(settings.server_list()?, vec!["10.0.0.1", "10.0.0.2:9160"]);
//! assert_eq!(settings.max_slice_gap_secs()?, 600);
//! # Ok(())
//! # }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::SliceCachingBehavior;
use crate::column::{ClusterConfig, Credentials, RetryPolicy};
use crate::error::ConfigError;
use crate::tree::{DEFAULT_MAX_SLICE_GAP, TreeOptions};

type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// A setting that may be given as a JSON number or a numeric string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumberSetting {
    /// A JSON number.
    Number(i64),
    /// A string expected to hold a number.
    Text(String),
}

impl NumberSetting {
    fn to_u64(&self, name: &'static str) -> ConfigResult<u64> {
        let parsed = match self {
            Self::Number(n) => u64::try_from(*n).ok(),
            Self::Text(text) => text.trim().parse::<u64>().ok(),
        };
        parsed.ok_or_else(|| ConfigError::InvalidNumber {
            name,
            value: match self {
                Self::Number(n) => n.to_string(),
                Self::Text(text) => text.clone(),
            },
        })
    }
}

impl Default for NumberSetting {
    fn default() -> Self {
        Self::Number(i64::try_from(DEFAULT_MAX_SLICE_GAP).unwrap_or(i64::MAX))
    }
}

fn default_replication_strategy() -> String {
    "SimpleStrategy".to_string()
}

fn default_strategy_options() -> String {
    r#"{"replication_factor": "1"}"#.to_string()
}

fn default_local_dc_name() -> String {
    "datacenter1".to_string()
}

fn default_caching_behavior() -> String {
    SliceCachingBehavior::default().to_string()
}

fn default_max_retries() -> u32 {
    RetryPolicy::default().max_retries
}

fn default_retry_backoff_ms() -> u64 {
    50
}

/// Settings of one database instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DatabaseSettings {
    /// Root directory of the local (file-backed) store.
    pub local_data_dir: PathBuf,
    /// Keyspace holding the metric tables.
    pub keyspace: String,
    /// Comma-separated contact points.
    pub servers: String,
    /// Replication strategy class for a new keyspace.
    #[serde(default = "default_replication_strategy")]
    pub replication_strategy: String,
    /// Replication strategy options as a JSON object string.
    #[serde(default = "default_strategy_options")]
    pub strategy_options: String,
    /// Local datacenter name; part of the table names.
    #[serde(default = "default_local_dc_name")]
    pub local_dc_name: String,
    /// Login name; must be given together with `password`.
    #[serde(default)]
    pub username: Option<String>,
    /// Password; must be given together with `username`.
    #[serde(default)]
    pub password: Option<String>,
    /// Initial slice caching behavior (`none`, `latest` or `all`).
    #[serde(default = "default_caching_behavior")]
    pub default_slice_caching_behavior: String,
    /// Seconds of missing data tolerated before a new slice starts.
    #[serde(default)]
    pub max_slice_gap: NumberSetting,
    /// Retries of a transient column store failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Initial retry backoff in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl DatabaseSettings {
    /// Creates settings with defaults for everything but the required keys.
    pub fn new(
        local_data_dir: impl Into<PathBuf>,
        keyspace: impl Into<String>,
        servers: impl Into<String>,
    ) -> Self {
        Self {
            local_data_dir: local_data_dir.into(),
            keyspace: keyspace.into(),
            servers: servers.into(),
            replication_strategy: default_replication_strategy(),
            strategy_options: default_strategy_options(),
            local_dc_name: default_local_dc_name(),
            username: None,
            password: None,
            default_slice_caching_behavior: default_caching_behavior(),
            max_slice_gap: NumberSetting::default(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }

    /// Parses and validates settings from a JSON object.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::SettingsParse`] if the JSON is malformed or a
    ///   required key is missing
    /// - any error of [`DatabaseSettings::validate`]
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let settings: Self =
            serde_json::from_str(json).map_err(|source| ConfigError::SettingsParse { source })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads settings from a JSON file.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::SettingsRead`] if the file cannot be read
    /// - any error of [`DatabaseSettings::from_json_str`]
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::SettingsRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    /// Checks every setting that can be checked without a cluster.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.local_data_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingSetting {
                name: "LOCAL_DATA_DIR",
            });
        }
        if self.keyspace.trim().is_empty() {
            return Err(ConfigError::MissingSetting { name: "KEYSPACE" });
        }
        self.server_list()?;
        self.strategy_options()?;
        self.credentials()?;
        self.caching_behavior()?;
        self.max_slice_gap_secs()?;
        Ok(())
    }

    /// The contact points, whitespace trimmed.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::MissingSetting`] if no server is configured
    /// - [`ConfigError::InvalidServerList`] if an entry is empty
    pub fn server_list(&self) -> ConfigResult<Vec<String>> {
        if self.servers.trim().is_empty() {
            return Err(ConfigError::MissingSetting { name: "SERVERS" });
        }
        let servers: Vec<String> = self
            .servers
            .split(',')
            .map(|server| server.trim().to_string())
            .collect();
        if servers.iter().any(String::is_empty) {
            return Err(ConfigError::InvalidServerList {
                servers: self.servers.clone(),
            });
        }
        Ok(servers)
    }

    /// The strategy options as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::StrategyOptionsParse`] if the string is not
    /// valid JSON. Its shape is checked when the keyspace is initialized.
    pub fn strategy_options(&self) -> ConfigResult<Value> {
        serde_json::from_str(&self.strategy_options)
            .map_err(|source| ConfigError::StrategyOptionsParse { source })
    }

    /// Credentials, if both username and password are set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::IncompleteCredentials`] if only one is set.
    pub fn credentials(&self) -> ConfigResult<Option<Credentials>> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Ok(Some(Credentials::new(username, password))),
            (None, None) => Ok(None),
            _ => Err(ConfigError::IncompleteCredentials),
        }
    }

    /// The initial slice caching behavior.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownCachingBehavior`] for an unknown value.
    pub fn caching_behavior(&self) -> ConfigResult<SliceCachingBehavior> {
        self.default_slice_caching_behavior.parse()
    }

    /// The maximum slice gap in seconds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidNumber`] for a negative or non-numeric
    /// value.
    pub fn max_slice_gap_secs(&self) -> ConfigResult<u64> {
        self.max_slice_gap.to_u64("MAX_SLICE_GAP")
    }

    /// The retry policy for column store calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(self.max_retries)
            .with_initial_backoff(Duration::from_millis(self.retry_backoff_ms))
    }

    /// Cluster connection settings.
    ///
    /// # Errors
    ///
    /// See [`DatabaseSettings::server_list`] and
    /// [`DatabaseSettings::credentials`].
    pub fn cluster_config(&self) -> ConfigResult<ClusterConfig> {
        Ok(ClusterConfig::new(self.server_list()?)
            .with_credentials(self.credentials()?)
            .with_retry(self.retry_policy()))
    }

    /// Tree tuning derived from the settings.
    ///
    /// # Errors
    ///
    /// See [`DatabaseSettings::caching_behavior`] and
    /// [`DatabaseSettings::max_slice_gap_secs`].
    pub fn tree_options(&self) -> ConfigResult<TreeOptions> {
        Ok(TreeOptions {
            caching_behavior: self.caching_behavior()?,
            max_slice_gap: self.max_slice_gap_secs()?,
        })
    }
}
