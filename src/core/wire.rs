//! Protobuf messages of the streaming insert call.
//!
//! The client opens one `Insert` stream per measurement name, sends an
//! [`InsertRow`] per measurement and receives a single [`InsertReport`] when it
//! closes the stream.

use crate::core::{Dimensions, Measurement, Result, TallyError};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Method path of the client-streaming insert call.
pub const INSERT_PATH: &str = "/tally.Ingest/Insert";

/// One inserted measurement on the wire.
#[derive(Clone, PartialEq, prost::Message)]
pub struct InsertRow {
    /// Stream the row belongs to
    #[prost(string, tag = "1")]
    pub stream: String,
    /// Measurement time in nanoseconds since the Unix epoch
    #[prost(int64, tag = "2")]
    pub ts_nanos: i64,
    /// JSON-encoded dimensions
    #[prost(bytes = "vec", tag = "3")]
    pub dimensions: Vec<u8>,
    /// Reduced values
    #[prost(map = "string, double", tag = "4")]
    pub values: HashMap<String, f64>,
}

/// Server summary returned when an insert stream is closed.
#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct InsertReport {
    /// Rows handed to the collector
    #[prost(uint64, tag = "1")]
    pub succeeded: u64,
    /// Rows that could not be decoded or failed validation
    #[prost(uint64, tag = "2")]
    pub errored: u64,
}

impl InsertRow {
    /// Build a row from reduced client values.
    pub fn new(
        stream: &str,
        ts: DateTime<Utc>,
        dimensions: &Dimensions,
        values: HashMap<String, f64>,
    ) -> Result<Self> {
        Ok(Self {
            stream: stream.to_string(),
            ts_nanos: ts.timestamp_nanos_opt().unwrap_or_default(),
            dimensions: serde_json::to_vec(dimensions)?,
            values,
        })
    }

    /// Decode into a measurement. A zero timestamp is left for the server to
    /// assign.
    pub fn into_measurement(self) -> Result<Measurement> {
        let dimensions: Dimensions = if self.dimensions.is_empty() {
            Dimensions::new()
        } else {
            serde_json::from_slice(&self.dimensions).map_err(|e| {
                TallyError::validation(format!("Invalid dimensions for '{}': {}", self.stream, e))
            })?
        };
        let ts = (self.ts_nanos != 0).then(|| DateTime::from_timestamp_nanos(self.ts_nanos));

        Ok(Measurement {
            name: self.stream,
            ts,
            values: self.values.into_iter().collect(),
            dimensions,
        })
    }
}
