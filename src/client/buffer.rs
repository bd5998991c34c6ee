//! Client-side measurement representation.

use crate::core::{Dimensions, Scalar, Value};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Reducible values keyed by name.
pub type Values = BTreeMap<String, Value>;

/// Caller-supplied context for a submission.
pub type Fields = BTreeMap<String, Field>;

/// An entry of the context passed to [`Submitter::submit`](super::Submitter::submit).
///
/// Context entries are usually dimensions, but a [`Value`] is accepted too and
/// is reported as a value rather than a dimension.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Dimension(Scalar),
    Metric(Value),
}

impl From<Scalar> for Field {
    fn from(s: Scalar) -> Self {
        Field::Dimension(s)
    }
}

impl From<Value> for Field {
    fn from(v: Value) -> Self {
        Field::Metric(v)
    }
}

impl From<&str> for Field {
    fn from(s: &str) -> Self {
        Field::Dimension(Scalar::from(s))
    }
}

impl From<String> for Field {
    fn from(s: String) -> Self {
        Field::Dimension(Scalar::from(s))
    }
}

impl From<bool> for Field {
    fn from(b: bool) -> Self {
        Field::Dimension(Scalar::from(b))
    }
}

impl From<i64> for Field {
    fn from(i: i64) -> Self {
        Field::Dimension(Scalar::from(i))
    }
}

impl From<i32> for Field {
    fn from(i: i32) -> Self {
        Field::Dimension(Scalar::from(i))
    }
}

impl From<f64> for Field {
    fn from(v: f64) -> Self {
        Field::Dimension(Scalar::from(v))
    }
}

/// Split context into dimensions and the values hidden among them.
pub(crate) fn split_fields(values: &mut Values, fields: Fields) -> Dimensions {
    let mut dimensions = Dimensions::new();
    for (key, field) in fields {
        match field {
            Field::Dimension(scalar) => {
                dimensions.insert(key, scalar);
            },
            Field::Metric(value) => {
                values.insert(key, value);
            },
        }
    }
    dimensions
}

/// A measurement reduced in the client buffer, awaiting the next flush.
///
/// Serializes to the ingestion wire shape, with each value reported as its
/// reduced scalar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferedMeasurement {
    pub name: String,
    pub ts: DateTime<Utc>,
    pub values: Values,
    pub dimensions: Dimensions,
}

impl BufferedMeasurement {
    /// Merge newly submitted values into this measurement.
    ///
    /// Each incoming value is merged with the buffered value of the same name.
    /// The timestamp advances to the later of the two.
    pub fn absorb(&mut self, ts: DateTime<Utc>, values: Values) {
        for (key, value) in values {
            let prior = self.values.get(&key).copied();
            if let Some(prior) = prior.filter(|p| p.kind() != value.kind()) {
                tracing::trace!(
                    "Merging {} into {} for '{}.{}'",
                    value.kind(),
                    prior.kind(),
                    self.name,
                    key
                );
            }
            self.values.insert(key, value.merge(prior));
        }
        if ts > self.ts {
            self.ts = ts;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_split_fields_moves_metrics_to_values() {
        let mut values = Values::from([("a".to_string(), Value::Sum(1.0))]);
        let fields = Fields::from([
            ("host".to_string(), Field::from("h1")),
            ("latency".to_string(), Field::from(Value::avg(20.0))),
        ]);

        let dimensions = split_fields(&mut values, fields);

        assert_eq!(dimensions, Dimensions::from([("host".to_string(), Scalar::from("h1"))]));
        assert_eq!(values.len(), 2);
        assert_eq!(values["latency"].get(), 20.0);
    }

    #[test]
    fn test_absorb_merges_and_advances_timestamp() {
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap();
        let mut m = BufferedMeasurement {
            name: "m".to_string(),
            ts: late,
            values: Values::from([("x".to_string(), Value::Sum(1.0))]),
            dimensions: Dimensions::new(),
        };

        m.absorb(
            early,
            Values::from([
                ("x".to_string(), Value::Sum(2.0)),
                ("y".to_string(), Value::Max(7.0)),
            ]),
        );

        assert_eq!(m.ts, late);
        assert_eq!(m.values["x"].get(), 3.0);
        assert_eq!(m.values["y"].get(), 7.0);
    }

    #[test]
    fn test_wire_shape() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let m = BufferedMeasurement {
            name: "m".to_string(),
            ts,
            values: Values::from([("avg".to_string(), Value::weighted_avg(2.0, 4.0))]),
            dimensions: Dimensions::from([("host".to_string(), Scalar::from("h1"))]),
        };

        assert_eq!(
            serde_json::to_value(&m).unwrap(),
            serde_json::json!({
                "name": "m",
                "ts": "2024-01-01T00:00:00Z",
                "values": {"avg": 2.0},
                "dimensions": {"host": "h1"}
            })
        );
    }
}
