//! Node definition types: retention archives, aggregation methods and the
//! definition persisted with every metric.
//!
//! A metric's definition is stored inside its metadata row under the keys
//! `timeStep`, `retentions`, `xFilesFactor` and `aggregationMethod`, so the
//! host daemon can read and change them through the generic metadata calls.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, ValidationError};

/// Metadata key holding the node's time step.
pub const TIME_STEP_KEY: &str = "timeStep";
/// Metadata key holding the node's retention archives.
pub const RETENTIONS_KEY: &str = "retentions";
/// Metadata key holding the node's xFilesFactor.
pub const X_FILES_FACTOR_KEY: &str = "xFilesFactor";
/// Metadata key holding the node's aggregation method.
pub const AGGREGATION_METHOD_KEY: &str = "aggregationMethod";

/// A metric's metadata: the definition keys plus arbitrary caller keys.
pub type Metadata = Map<String, Value>;

/// One retention archive: a sample interval and how many samples to keep.
///
/// Serialized as a two-element array `[step, count]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(u64, u64)", into = "(u64, u64)")]
pub struct Retention {
    /// Seconds between samples.
    pub step: u64,
    /// Number of samples retained at this resolution.
    pub count: u64,
}

impl Retention {
    /// Creates a retention archive definition.
    pub fn new(step: u64, count: u64) -> Self {
        Self { step, count }
    }

    /// Total time span covered by this archive, in seconds.
    pub fn span(&self) -> u64 {
        self.step.saturating_mul(self.count)
    }

    /// Oldest timestamp still inside this archive's window at `now`.
    pub fn window_start(&self, now: u64) -> u64 {
        now.saturating_sub(self.span())
    }
}

impl From<(u64, u64)> for Retention {
    fn from((step, count): (u64, u64)) -> Self {
        Self { step, count }
    }
}

impl From<Retention> for (u64, u64) {
    fn from(retention: Retention) -> Self {
        (retention.step, retention.count)
    }
}

impl fmt::Display for Retention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.step, self.count)
    }
}

/// How finer points are combined into a coarser archive point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMethod {
    /// Arithmetic mean.
    Average,
    /// Sum.
    Sum,
    /// Minimum.
    Min,
    /// Maximum.
    Max,
    /// Most recent value.
    Last,
}

impl AggregationMethod {
    /// All methods, in their canonical order.
    pub const ALL: [Self; 5] = [Self::Average, Self::Sum, Self::Min, Self::Max, Self::Last];

    /// Canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Average => "average",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Last => "last",
        }
    }

    /// Aggregates the known values of one coarse interval, in timestamp order.
    ///
    /// Returns `None` for an empty slice; callers must leave the coarse
    /// point absent rather than inventing a value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use slicetree::schema::AggregationMethod;
    ///
    /// let values = [1.0, 2.0, 4.0];
    /// assert_eq!(AggregationMethod::Sum.apply(&values), Some(7.0));
    /// assert_eq!(AggregationMethod::Last.apply(&values), Some(4.0));
    /// assert_eq!(AggregationMethod::Average.apply(&[]), None);
    /// ```
    #[allow(clippy::cast_precision_loss)] // interval point counts are far below 2^52
    pub fn apply(self, values: &[f64]) -> Option<f64> {
        let last = *values.last()?;

        let value = match self {
            Self::Average => values.iter().sum::<f64>() / values.len() as f64,
            Self::Sum => values.iter().sum(),
            Self::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Last => last,
        };
        Some(value)
    }
}

impl FromStr for AggregationMethod {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|method| method.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ValidationError::UnknownAggregationMethod {
                name: s.to_string(),
            })
    }
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The storage policy of one metric.
///
/// # Example
///
/// ```rust
/// use slicetree::schema::{AggregationMethod, NodeDefinition, Retention};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let definition = NodeDefinition::new(
///     vec![Retention::new(60, 1440), Retention::new(300, 2016)],
///     0.5,
///     AggregationMethod::Average,
/// )?;
/// assert_eq!(definition.time_step, 60);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDefinition {
    /// Seconds per sample of the finest archive.
    pub time_step: u64,
    /// Archives ordered from finest to coarsest.
    pub retentions: Vec<Retention>,
    /// Minimum fraction of known finer points needed to roll up.
    pub x_files_factor: f64,
    /// How finer points are combined during rollup.
    pub aggregation_method: AggregationMethod,
}

impl NodeDefinition {
    /// Creates a validated definition whose time step is the first
    /// retention's step.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the retentions or xFilesFactor are
    /// invalid.
    pub fn new(
        retentions: Vec<Retention>,
        x_files_factor: f64,
        aggregation_method: AggregationMethod,
    ) -> Result<Self> {
        let time_step = retentions
            .first()
            .map(|r| r.step)
            .ok_or(ValidationError::NoRetentions)?;
        let definition = Self {
            time_step,
            retentions,
            x_files_factor,
            aggregation_method,
        };
        definition.validate()?;
        Ok(definition)
    }

    /// Validates the definition.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if any invariant is broken.
    pub fn validate(&self) -> Result<()> {
        let first = self.retentions.first().ok_or(ValidationError::NoRetentions)?;

        for (index, retention) in self.retentions.iter().enumerate() {
            if retention.step == 0 || retention.count == 0 {
                return Err(ValidationError::InvalidRetention {
                    index,
                    step: retention.step,
                    count: retention.count,
                }
                .into());
            }
        }

        for window in self.retentions.windows(2) {
            let (fine, coarse) = (window[0].step, window[1].step);
            if coarse <= fine {
                return Err(ValidationError::RetentionsNotOrdered.into());
            }
            if coarse % fine != 0 {
                return Err(ValidationError::StepNotMultiple { fine, coarse }.into());
            }
        }

        if self.time_step != first.step {
            return Err(ValidationError::TimeStepMismatch {
                time_step: self.time_step,
                first_step: first.step,
            }
            .into());
        }

        if !(0.0..=1.0).contains(&self.x_files_factor) {
            return Err(ValidationError::InvalidXFilesFactor {
                value: self.x_files_factor,
            }
            .into());
        }

        Ok(())
    }

    /// Returns the archive with the given step, if configured.
    pub fn archive(&self, step: u64) -> Option<&Retention> {
        self.retentions.iter().find(|r| r.step == step)
    }

    /// Decodes and validates the definition held in a metadata mapping.
    ///
    /// Keys other than the definition keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the keys are missing, malformed or
    /// describe an invalid definition.
    pub fn from_metadata(metadata: &Metadata) -> Result<Self> {
        let definition: Self = serde_json::from_value(Value::Object(metadata.clone()))
            .map_err(|source| ValidationError::InvalidMetadata { source })?;
        definition.validate()?;
        Ok(definition)
    }

    /// Writes the definition keys into `metadata`, replacing earlier values.
    pub fn merge_into(&self, metadata: &mut Metadata) {
        metadata.insert(TIME_STEP_KEY.to_string(), Value::from(self.time_step));
        metadata.insert(
            RETENTIONS_KEY.to_string(),
            Value::Array(
                self.retentions
                    .iter()
                    .map(|r| Value::from(vec![r.step, r.count]))
                    .collect(),
            ),
        );
        metadata.insert(
            X_FILES_FACTOR_KEY.to_string(),
            Value::from(self.x_files_factor),
        );
        metadata.insert(
            AGGREGATION_METHOD_KEY.to_string(),
            Value::from(self.aggregation_method.as_str()),
        );
    }
}
