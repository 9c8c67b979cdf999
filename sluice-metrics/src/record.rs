use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// The maximum number of dimensions a single metric can carry.
pub const MAX_DIMENSIONS: usize = 10;

/// The unit of a metric value.
///
/// Serialized with the names understood by the remote ingestion service, for instance
/// `"Bytes/Second"` for [`MetricUnit::BytesPerSecond`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricUnit {
    /// Duration in seconds.
    Seconds,
    /// Duration in microseconds.
    Microseconds,
    /// Duration in milliseconds.
    Milliseconds,
    /// Size in bytes.
    Bytes,
    /// Size in kilobytes.
    Kilobytes,
    /// Size in megabytes.
    Megabytes,
    /// Size in gigabytes.
    Gigabytes,
    /// Size in terabytes.
    Terabytes,
    /// Size in bits.
    Bits,
    /// Size in kilobits.
    Kilobits,
    /// Size in megabits.
    Megabits,
    /// Size in gigabits.
    Gigabits,
    /// Size in terabits.
    Terabits,
    /// A ratio in percent.
    Percent,
    /// A plain count, the default.
    #[default]
    Count,
    /// Throughput in bytes per second.
    #[serde(rename = "Bytes/Second")]
    BytesPerSecond,
    /// Throughput in kilobytes per second.
    #[serde(rename = "Kilobytes/Second")]
    KilobytesPerSecond,
    /// Throughput in megabytes per second.
    #[serde(rename = "Megabytes/Second")]
    MegabytesPerSecond,
    /// Throughput in gigabytes per second.
    #[serde(rename = "Gigabytes/Second")]
    GigabytesPerSecond,
    /// Throughput in terabytes per second.
    #[serde(rename = "Terabytes/Second")]
    TerabytesPerSecond,
    /// Throughput in bits per second.
    #[serde(rename = "Bits/Second")]
    BitsPerSecond,
    /// Throughput in kilobits per second.
    #[serde(rename = "Kilobits/Second")]
    KilobitsPerSecond,
    /// Throughput in megabits per second.
    #[serde(rename = "Megabits/Second")]
    MegabitsPerSecond,
    /// Throughput in gigabits per second.
    #[serde(rename = "Gigabits/Second")]
    GigabitsPerSecond,
    /// Throughput in terabits per second.
    #[serde(rename = "Terabits/Second")]
    TerabitsPerSecond,
    /// Events per second.
    #[serde(rename = "Count/Second")]
    CountPerSecond,
    /// A value without unit.
    None,
}

impl MetricUnit {
    /// All units in their canonical order.
    pub const ALL: [MetricUnit; 27] = [
        Self::Seconds,
        Self::Microseconds,
        Self::Milliseconds,
        Self::Bytes,
        Self::Kilobytes,
        Self::Megabytes,
        Self::Gigabytes,
        Self::Terabytes,
        Self::Bits,
        Self::Kilobits,
        Self::Megabits,
        Self::Gigabits,
        Self::Terabits,
        Self::Percent,
        Self::Count,
        Self::BytesPerSecond,
        Self::KilobytesPerSecond,
        Self::MegabytesPerSecond,
        Self::GigabytesPerSecond,
        Self::TerabytesPerSecond,
        Self::BitsPerSecond,
        Self::KilobitsPerSecond,
        Self::MegabitsPerSecond,
        Self::GigabitsPerSecond,
        Self::TerabitsPerSecond,
        Self::CountPerSecond,
        Self::None,
    ];

    /// Returns the name of the unit as sent to the remote service.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Seconds => "Seconds",
            Self::Microseconds => "Microseconds",
            Self::Milliseconds => "Milliseconds",
            Self::Bytes => "Bytes",
            Self::Kilobytes => "Kilobytes",
            Self::Megabytes => "Megabytes",
            Self::Gigabytes => "Gigabytes",
            Self::Terabytes => "Terabytes",
            Self::Bits => "Bits",
            Self::Kilobits => "Kilobits",
            Self::Megabits => "Megabits",
            Self::Gigabits => "Gigabits",
            Self::Terabits => "Terabits",
            Self::Percent => "Percent",
            Self::Count => "Count",
            Self::BytesPerSecond => "Bytes/Second",
            Self::KilobytesPerSecond => "Kilobytes/Second",
            Self::MegabytesPerSecond => "Megabytes/Second",
            Self::GigabytesPerSecond => "Gigabytes/Second",
            Self::TerabytesPerSecond => "Terabytes/Second",
            Self::BitsPerSecond => "Bits/Second",
            Self::KilobitsPerSecond => "Kilobits/Second",
            Self::MegabitsPerSecond => "Megabits/Second",
            Self::GigabitsPerSecond => "Gigabits/Second",
            Self::TerabitsPerSecond => "Terabits/Second",
            Self::CountPerSecond => "Count/Second",
            Self::None => "None",
        }
    }
}

impl fmt::Display for MetricUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error returned when parsing an unknown [`MetricUnit`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown metric unit {0:?}")]
pub struct ParseMetricUnitError(String);

impl FromStr for MetricUnit {
    type Err = ParseMetricUnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|unit| unit.as_str() == s)
            .ok_or_else(|| ParseMetricUnitError(s.to_owned()))
    }
}

/// A name and value pair that further qualifies a metric.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    /// The name of the dimension.
    #[serde(rename = "Name")]
    pub name: String,
    /// The value of the dimension.
    #[serde(rename = "Value")]
    pub value: String,
}

impl Dimension {
    /// Creates a new dimension.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Returned when a metric would exceed [`MAX_DIMENSIONS`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("a metric can have at most {MAX_DIMENSIONS} dimensions")]
pub struct DimensionLimitError;

/// Returns the current time as fractional seconds since the UNIX epoch.
pub(crate) fn now_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// A single validated metric datum.
///
/// Name, value, unit and timestamp are fixed once the record is built. Dimensions can only be
/// appended, and only up to [`MAX_DIMENSIONS`].
///
/// The serialized form is the datum shape of the remote ingestion service:
///
/// ```json
/// {"MetricName": "temperature", "Value": 21.5, "Unit": "Count", "Timestamp": 1700000000.0, "Dimensions": []}
/// ```
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricRecord {
    metric_name: String,
    value: f64,
    unit: MetricUnit,
    timestamp: f64,
    dimensions: Vec<Dimension>,
}

impl MetricRecord {
    /// Creates a record with unit [`MetricUnit::Count`], the current time and no dimensions.
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            metric_name: name.into(),
            value,
            unit: MetricUnit::default(),
            timestamp: now_timestamp(),
            dimensions: Vec::new(),
        }
    }

    /// Sets the unit of the value.
    pub fn with_unit(mut self, unit: MetricUnit) -> Self {
        self.unit = unit;
        self
    }

    /// Sets the timestamp in seconds since the UNIX epoch.
    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Replaces all dimensions.
    pub fn with_dimensions(
        mut self,
        dimensions: Vec<Dimension>,
    ) -> Result<Self, DimensionLimitError> {
        if dimensions.len() > MAX_DIMENSIONS {
            return Err(DimensionLimitError);
        }
        self.dimensions = dimensions;
        Ok(self)
    }

    /// Appends a dimension.
    ///
    /// Fails without modifying the record if it already carries [`MAX_DIMENSIONS`] dimensions.
    pub fn add_dimension(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), DimensionLimitError> {
        if self.dimensions.len() >= MAX_DIMENSIONS {
            return Err(DimensionLimitError);
        }
        self.dimensions.push(Dimension::new(name, value));
        Ok(())
    }

    /// The name of the metric.
    pub fn name(&self) -> &str {
        &self.metric_name
    }

    /// The measured value.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// The unit of [`value`](Self::value).
    pub fn unit(&self) -> MetricUnit {
        self.unit
    }

    /// Seconds since the UNIX epoch.
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Dimensions in insertion order.
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_names() {
        assert_eq!(MetricUnit::ALL.len(), 27);
        for unit in MetricUnit::ALL {
            assert_eq!(unit.as_str().parse::<MetricUnit>(), Ok(unit));
            let json = serde_json::to_string(&unit).unwrap();
            assert_eq!(json, format!("\"{}\"", unit.as_str()));
        }
    }

    #[test]
    fn test_unit_unknown() {
        let error = "Furlongs".parse::<MetricUnit>().unwrap_err();
        assert_eq!(error.to_string(), "unknown metric unit \"Furlongs\"");
        assert!("count".parse::<MetricUnit>().is_err());
    }

    #[test]
    fn test_record_defaults() {
        let before = now_timestamp();
        let record = MetricRecord::new("requests", 3.0);

        assert_eq!(record.name(), "requests");
        assert_eq!(record.unit(), MetricUnit::Count);
        assert!(record.timestamp() >= before);
        assert!(record.dimensions().is_empty());
    }

    #[test]
    fn test_dimension_limit() {
        let mut record = MetricRecord::new("requests", 1.0);
        for i in 0..MAX_DIMENSIONS {
            record.add_dimension(format!("d{i}"), "x").unwrap();
        }

        assert_eq!(record.add_dimension("coreName", "edge"), Err(DimensionLimitError));
        assert_eq!(record.dimensions().len(), MAX_DIMENSIONS);
        assert_eq!(record.dimensions()[0], Dimension::new("d0", "x"));
    }

    #[test]
    fn test_with_dimensions_limit() {
        let dimensions = vec![Dimension::new("a", "b"); MAX_DIMENSIONS + 1];
        assert!(MetricRecord::new("x", 1.0).with_dimensions(dimensions).is_err());
    }

    #[test]
    fn test_serialize_datum() {
        let mut record = MetricRecord::new("throughput", 12.5)
            .with_unit(MetricUnit::BytesPerSecond)
            .with_timestamp(1700000000.25);
        record.add_dimension("coreName", "edge-1").unwrap();

        insta::assert_json_snapshot!(record, @r###"
        {
          "MetricName": "throughput",
          "Value": 12.5,
          "Unit": "Bytes/Second",
          "Timestamp": 1700000000.25,
          "Dimensions": [
            {
              "Name": "coreName",
              "Value": "edge-1"
            }
          ]
        }
        "###);
    }
}
