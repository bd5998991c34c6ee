//! Reducible numeric values.
//!
//! A [`Value`] is a quantity that knows how to combine with another quantity
//! reported under the same name and dimensions. Merging never fails: a merge
//! between kinds that do not match degrades to a defined fallback instead of
//! an error.

use serde::{Serialize, Serializer};

/// A numeric quantity with a commutative, associative merge rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// Reduced by addition.
    Sum(f64),
    /// Reduced by keeping the lowest value.
    Min(f64),
    /// Reduced by keeping the highest value.
    Max(f64),
    /// Reduced by the weighted arithmetic mean of all samples.
    Average {
        /// Sum of `sample * weight` over all samples
        total: f64,
        /// Sum of all weights
        weight: f64,
    },
}

impl Value {
    /// An average seeded with a single sample of weight 1.
    pub fn avg(value: f64) -> Self {
        Self::weighted_avg(value, 1.0)
    }

    /// An average seeded with a single sample of the given weight.
    pub fn weighted_avg(value: f64, weight: f64) -> Self {
        Value::Average {
            total: value * weight,
            weight,
        }
    }

    /// The current reduced scalar.
    pub fn get(&self) -> f64 {
        match *self {
            Value::Sum(v) | Value::Min(v) | Value::Max(v) => v,
            Value::Average { weight, .. } if weight == 0.0 => 0.0,
            Value::Average { total, weight } => total / weight,
        }
    }

    /// Combines this value with a previously reduced one.
    ///
    /// Merging with `None` is the identity. `Min` and `Max` keep whichever
    /// operand is extremal, so merging them with another kind may return the
    /// other operand unchanged. An `Average` treats any other kind as one
    /// more sample of weight 1.
    #[must_use]
    pub fn merge(self, other: Option<Value>) -> Value {
        let Some(other) = other else {
            return self;
        };

        match (self, other) {
            (Value::Sum(a), b) => Value::Sum(a + b.get()),
            (Value::Min(a), b) => {
                if a < b.get() {
                    self
                } else {
                    b
                }
            },
            (Value::Max(a), b) => {
                if a > b.get() {
                    self
                } else {
                    b
                }
            },
            (
                Value::Average { total, weight },
                Value::Average {
                    total: other_total,
                    weight: other_weight,
                },
            ) => Value::Average {
                total: total + other_total,
                weight: weight + other_weight,
            },
            (Value::Average { total, weight }, b) => Value::Average {
                total: total + b.get(),
                weight: weight + 1.0,
            },
        }
    }

    /// Short name of the reduction kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Sum(_) => "sum",
            Value::Min(_) => "min",
            Value::Max(_) => "max",
            Value::Average { .. } => "avg",
        }
    }
}

/// Values go over the wire as their reduced scalar only; an average loses its
/// weight and cannot be merged with weight-preserving semantics afterwards.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.get())
    }
}
