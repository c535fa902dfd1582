use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Every measure carries a textual value; the store stores it verbatim.
pub const MEASURE_VALUE_TYPE: &str = "VARCHAR";

/// Resolution of a point's `time` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TimeUnit {
    #[default]
    Milliseconds,
    Seconds,
    Microseconds,
    Nanoseconds,
}

impl TimeUnit {
    /// Returns the wire representation used in records.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Milliseconds => "MILLISECONDS",
            Self::Seconds => "SECONDS",
            Self::Microseconds => "MICROSECONDS",
            Self::Nanoseconds => "NANOSECONDS",
        }
    }

    /// Parses a wire string. Unrecognized or empty input falls back to
    /// milliseconds, the store's default resolution.
    pub fn parse_or_default(value: &str) -> Self {
        match value {
            "SECONDS" => Self::Seconds,
            "MICROSECONDS" => Self::Microseconds,
            "NANOSECONDS" => Self::Nanoseconds,
            _ => Self::Milliseconds,
        }
    }
}

/// One timestamped named measurement plus dimensional tags.
///
/// Exactly one measure per point; an event that yields several measures
/// expands into several points sharing dimensions and time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Point {
    pub dimensions: HashMap<String, String>,
    pub time: i64,
    pub time_unit: TimeUnit,
    pub measure_name: String,
    pub measure_value: String,
}

impl Point {
    /// Creates a point from a shared base and one measure.
    pub fn new(
        dimensions: HashMap<String, String>,
        time: i64,
        time_unit: TimeUnit,
        measure_name: impl Into<String>,
        measure_value: impl Into<String>,
    ) -> Self {
        Self {
            dimensions,
            time,
            time_unit,
            measure_name: measure_name.into(),
            measure_value: measure_value.into(),
        }
    }

    /// The point's time normalized to milliseconds since the epoch.
    pub fn time_millis(&self) -> i64 {
        match self.time_unit {
            TimeUnit::Milliseconds => self.time,
            TimeUnit::Seconds => self.time.saturating_mul(1_000),
            TimeUnit::Microseconds => self.time / 1_000,
            TimeUnit::Nanoseconds => self.time / 1_000_000,
        }
    }

    /// Serializes the point into the wire form the store accepts.
    ///
    /// Dimensions are emitted sorted by name so the wire output is stable
    /// for a given point.
    pub fn to_record(&self) -> Record {
        let mut dimensions: Vec<Dimension> = self
            .dimensions
            .iter()
            .map(|(name, value)| Dimension {
                name: name.clone(),
                value: value.clone(),
            })
            .collect();
        dimensions.sort_by(|a, b| a.name.cmp(&b.name));

        Record {
            dimensions,
            measure_name: self.measure_name.clone(),
            measure_value: self.measure_value.clone(),
            measure_value_type: MEASURE_VALUE_TYPE.to_string(),
            time: self.time.to_string(),
            time_unit: self.time_unit.as_str().to_string(),
        }
    }
}

/// A single dimension name/value pair in wire form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

/// A point in the wire form required by the store's write API.
///
/// The same encoding is used for transmission and for the checkpointed
/// mirror of the pending-record buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Record {
    pub dimensions: Vec<Dimension>,
    pub measure_name: String,
    pub measure_value: String,
    pub measure_value_type: String,
    pub time: String,
    pub time_unit: String,
}
