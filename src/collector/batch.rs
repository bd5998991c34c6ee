//! Points and the batches the collector commits downstream.

use crate::core::{Measurement, Scalar};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Prefix of the field that shadows an indexed dimension.
pub const SHADOW_PREFIX: &str = "_";

/// A single row for the downstream store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Point {
    /// Measurement name
    pub name: String,
    /// Measurement time
    pub ts: DateTime<Utc>,
    /// Indexed dimensions, stringified
    pub tags: BTreeMap<String, String>,
    /// Values, unindexed dimensions and shadows of indexed dimensions
    pub fields: BTreeMap<String, Scalar>,
}

impl Point {
    /// Classify a measurement's dimensions into tags and fields.
    ///
    /// Indexed dimensions become a tag and a `_`-prefixed shadow field; all
    /// other dimensions become plain fields. Blank dimensions are dropped.
    pub fn from_measurement(
        measurement: Measurement,
        indexed: &BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let ts = measurement.timestamp_or(now);
        let mut tags = BTreeMap::new();
        let mut fields: BTreeMap<String, Scalar> = measurement
            .values
            .into_iter()
            .map(|(key, value)| (key, Scalar::Float(value)))
            .collect();

        for (key, value) in measurement.dimensions {
            if value.is_blank() {
                continue;
            }
            if indexed.contains(&key) {
                tags.insert(key.clone(), value.to_string());
                fields.insert(format!("{}{}", SHADOW_PREFIX, key), value);
            } else {
                fields.insert(key, value);
            }
        }

        Self {
            name: measurement.name,
            ts,
            tags,
            fields,
        }
    }
}

/// Points accumulated between two commits.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Batch {
    points: Vec<Point>,
}

impl Batch {
    /// Create an empty batch with room for `capacity` points.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
        }
    }

    /// Append a point.
    pub fn push(&mut self, point: Point) {
        self.points.push(point);
    }

    /// Number of points in the batch.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the batch holds no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The accumulated points, in arrival order.
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Consume the batch.
    pub fn into_points(self) -> Vec<Point> {
        self.points
    }
}
