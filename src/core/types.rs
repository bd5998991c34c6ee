//! Core domain types shared by the server and the client.

use crate::core::{Result, TallyError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A dimension value.
///
/// Dimensions characterize a measurement and are either turned into indexed
/// tags or stored alongside the values, depending on collector configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Null,
}

impl Scalar {
    /// Null and empty strings carry no information and are skipped downstream.
    pub fn is_blank(&self) -> bool {
        match self {
            Scalar::Null => true,
            Scalar::Str(s) => s.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Str(s) => f.write_str(s),
            Scalar::Null => Ok(()),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Str(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Str(s)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Scalar::Int(i)
    }
}

impl From<i32> for Scalar {
    fn from(i: i32) -> Self {
        Scalar::Int(i64::from(i))
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

/// Dimension map. Keys are kept sorted so that serialization is canonical.
pub type Dimensions = BTreeMap<String, Scalar>;

/// The canonical serialization of a dimension map, used as a merge key.
pub fn fingerprint(dimensions: &Dimensions) -> Result<String> {
    serde_json::to_string(dimensions).map_err(TallyError::from)
}

/// A measurement as received by the server.
///
/// This is also the wire shape produced by the client: `values` arrive as
/// already-reduced scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Logical stream name, e.g. `client_results`
    #[serde(default)]
    pub name: String,
    /// Time of the measurement; assigned by the server when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<DateTime<Utc>>,
    /// Numeric facts
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
    /// Descriptive key/value pairs
    #[serde(default)]
    pub dimensions: Dimensions,
}

impl Measurement {
    /// Create a measurement stamped with the current time.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ts: Some(Utc::now()),
            values: BTreeMap::new(),
            dimensions: Dimensions::new(),
        }
    }

    /// Add a value.
    #[must_use]
    pub fn value(mut self, key: impl Into<String>, value: f64) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    /// Add a dimension.
    #[must_use]
    pub fn dimension(mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.dimensions.insert(key.into(), value.into());
        self
    }

    /// Set the timestamp.
    #[must_use]
    pub fn at(mut self, ts: DateTime<Utc>) -> Self {
        self.ts = Some(ts);
        self
    }

    /// Structural validation applied at the ingestion boundary.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(TallyError::validation("Missing name"));
        }
        if self.values.is_empty() {
            return Err(TallyError::validation(format!(
                "Need at least one value for '{}'",
                self.name
            )));
        }
        Ok(())
    }

    /// The timestamp, or `now` when none was supplied.
    pub fn timestamp_or(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.ts.unwrap_or(now)
    }
}
