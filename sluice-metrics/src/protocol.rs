use serde_json::{Map, Value};

use crate::record::{Dimension, MAX_DIMENSIONS, MetricRecord, MetricUnit};

const FIELD_REQUEST: &str = "request";
const FIELD_NAMESPACE: &str = "namespace";
const FIELD_METRIC_DATA: &str = "metricData";
const FIELD_METRIC_NAME: &str = "metricName";
const FIELD_METRIC_VALUE: &str = "value";
const FIELD_METRIC_UNIT: &str = "unit";
const FIELD_METRIC_TIMESTAMP: &str = "timestamp";
const FIELD_DIMENSIONS: &str = "dimensions";
const FIELD_DIMENSION_NAME: &str = "name";
const FIELD_DIMENSION_VALUE: &str = "value";

/// An error raised while validating a metric submission.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// The submission is `null` or an empty object.
    #[error("input is empty")]
    Empty,
    /// The submission or one of its fields is not a JSON object.
    #[error("mandatory field ({0}) is not a dict in the input")]
    NotAnObject(&'static str),
    /// A mandatory field is missing.
    #[error("mandatory field ({0}) is absent in the input")]
    MissingField(&'static str),
    /// A string field has the wrong type or is empty.
    #[error("mandatory field ({0}) is not a non-empty string")]
    InvalidString(&'static str),
    /// The metric value is not a number.
    #[error("mandatory field ({0}) is not a number")]
    NotANumber(&'static str),
    /// The unit is not one of the known units.
    #[error("field (unit) is not a valid value: {0}")]
    InvalidUnit(String),
    /// The timestamp is not a number.
    #[error("field (timestamp) is not a number, must be in (seconds)")]
    InvalidTimestamp,
    /// The dimensions are not an array.
    #[error("field (dimensions) is not of type list in the input")]
    DimensionsNotAList,
    /// There are more than [`MAX_DIMENSIONS`] dimensions.
    #[error("more than ({MAX_DIMENSIONS}) entries present in field (dimensions)")]
    TooManyDimensions,
    /// A dimension lacks its name or value.
    #[error("mandatory field ({0}) is absent in the dimension")]
    MissingDimensionField(&'static str),
}

impl RequestError {
    /// Returns the error class reported in status messages.
    pub fn class(&self) -> &'static str {
        "InvalidRequest"
    }
}

/// A validated metric submission.
///
/// Submissions have the following shape, where `unit`, `timestamp` and `dimensions` are optional:
///
/// ```json
/// {
///   "request": {
///     "namespace": "greengrass/edge",
///     "metricData": {
///       "metricName": "temperature",
///       "value": 21.5,
///       "unit": "Count",
///       "timestamp": 1700000000,
///       "dimensions": [{"name": "room", "value": "kitchen"}]
///     }
///   }
/// }
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct PutMetricRequest {
    /// The namespace the metric is published to.
    pub namespace: String,
    /// The parsed metric.
    pub record: MetricRecord,
}

impl PutMetricRequest {
    /// Parses and validates a submission.
    pub fn parse(event: &Value) -> Result<Self, RequestError> {
        let event = match event {
            Value::Null => return Err(RequestError::Empty),
            Value::Object(map) if map.is_empty() => return Err(RequestError::Empty),
            Value::Object(map) => map,
            _ => return Err(RequestError::NotAnObject(FIELD_REQUEST)),
        };

        let request = match event.get(FIELD_REQUEST) {
            None | Some(Value::Null) => return Err(RequestError::MissingField(FIELD_REQUEST)),
            Some(Value::Object(request)) => request,
            Some(_) => return Err(RequestError::NotAnObject(FIELD_REQUEST)),
        };

        let namespace = required(request, FIELD_NAMESPACE)?;
        let metric_data = required(request, FIELD_METRIC_DATA)?;

        let namespace = match namespace {
            Value::String(namespace) if !namespace.is_empty() => namespace.clone(),
            _ => return Err(RequestError::InvalidString(FIELD_NAMESPACE)),
        };

        let record = parse_metric_data(metric_data)?;
        Ok(Self { namespace, record })
    }
}

/// Returns a field that must be present and non-null.
fn required<'a>(
    map: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a Value, RequestError> {
    match map.get(field) {
        None | Some(Value::Null) => Err(RequestError::MissingField(field)),
        Some(value) => Ok(value),
    }
}

fn parse_metric_data(metric_data: &Value) -> Result<MetricRecord, RequestError> {
    let Value::Object(datum) = metric_data else {
        return Err(RequestError::NotAnObject(FIELD_METRIC_DATA));
    };

    let name = match required(datum, FIELD_METRIC_NAME)? {
        Value::String(name) if !name.is_empty() => name.clone(),
        _ => return Err(RequestError::InvalidString(FIELD_METRIC_NAME)),
    };

    let value = required(datum, FIELD_METRIC_VALUE)?
        .as_f64()
        .ok_or(RequestError::NotANumber(FIELD_METRIC_VALUE))?;

    let unit = match datum.get(FIELD_METRIC_UNIT) {
        None | Some(Value::Null) => MetricUnit::default(),
        Some(Value::String(unit)) if unit.is_empty() => MetricUnit::default(),
        Some(Value::String(unit)) => unit
            .parse()
            .map_err(|_| RequestError::InvalidUnit(unit.clone()))?,
        Some(other) => return Err(RequestError::InvalidUnit(other.to_string())),
    };

    let mut record = MetricRecord::new(name, value).with_unit(unit);

    match datum.get(FIELD_METRIC_TIMESTAMP) {
        None | Some(Value::Null) => (),
        Some(timestamp) => {
            let timestamp = timestamp.as_f64().ok_or(RequestError::InvalidTimestamp)?;
            record = record.with_timestamp(timestamp);
        }
    }

    let dimensions = parse_dimensions(datum.get(FIELD_DIMENSIONS))?;
    record
        .with_dimensions(dimensions)
        .map_err(|_| RequestError::TooManyDimensions)
}

fn parse_dimensions(dimensions: Option<&Value>) -> Result<Vec<Dimension>, RequestError> {
    let dimensions = match dimensions {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(dimensions)) => dimensions,
        Some(_) => return Err(RequestError::DimensionsNotAList),
    };

    if dimensions.len() > MAX_DIMENSIONS {
        return Err(RequestError::TooManyDimensions);
    }

    dimensions
        .iter()
        .map(|dimension| {
            let name = dimension_field(dimension, FIELD_DIMENSION_NAME)?;
            let value = dimension_field(dimension, FIELD_DIMENSION_VALUE)?;
            Ok(Dimension::new(name, value))
        })
        .collect()
}

/// Reads a dimension field, stringifying non-string scalars.
fn dimension_field(dimension: &Value, field: &'static str) -> Result<String, RequestError> {
    match dimension.get(field) {
        None | Some(Value::Null) => Err(RequestError::MissingDimensionField(field)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn parse(event: Value) -> Result<PutMetricRequest, RequestError> {
        PutMetricRequest::parse(&event)
    }

    #[test]
    fn test_parse_full() {
        let request = parse(json!({
            "request": {
                "namespace": "greengrass/edge",
                "metricData": {
                    "metricName": "temperature",
                    "value": 21.5,
                    "unit": "Percent",
                    "timestamp": 1700000000,
                    "dimensions": [
                        {"name": "room", "value": "kitchen"},
                        {"name": "floor", "value": 2}
                    ]
                }
            }
        }))
        .unwrap();

        assert_eq!(request.namespace, "greengrass/edge");
        let record = &request.record;
        assert_eq!(record.name(), "temperature");
        assert_eq!(record.value(), 21.5);
        assert_eq!(record.unit(), MetricUnit::Percent);
        assert_eq!(record.timestamp(), 1700000000.0);
        similar_asserts::assert_eq!(
            record.dimensions().to_vec(),
            vec![Dimension::new("room", "kitchen"), Dimension::new("floor", "2")]
        );
    }

    #[test]
    fn test_parse_defaults() {
        let request = parse(json!({
            "request": {
                "namespace": "ns",
                "metricData": {"metricName": "m", "value": 1, "unit": ""}
            }
        }))
        .unwrap();

        assert_eq!(request.record.unit(), MetricUnit::Count);
        assert!(request.record.timestamp() > 0.0);
        assert!(request.record.dimensions().is_empty());
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(parse(Value::Null), Err(RequestError::Empty));
        assert_eq!(parse(json!({})), Err(RequestError::Empty));
        assert_eq!(
            parse(json!([1])),
            Err(RequestError::NotAnObject(FIELD_REQUEST))
        );
    }

    #[test]
    fn test_missing_fields() {
        assert_eq!(
            parse(json!({"foo": 1})),
            Err(RequestError::MissingField("request"))
        );
        assert_eq!(
            parse(json!({"request": {"metricData": {}}})),
            Err(RequestError::MissingField("namespace"))
        );
        assert_eq!(
            parse(json!({"request": {"namespace": "ns"}})),
            Err(RequestError::MissingField("metricData"))
        );
        assert_eq!(
            parse(json!({"request": {"namespace": "ns", "metricData": {"value": 1}}})),
            Err(RequestError::MissingField("metricName"))
        );
        assert_eq!(
            parse(json!({"request": {"namespace": "ns", "metricData": {"metricName": "m"}}})),
            Err(RequestError::MissingField("value"))
        );
    }

    #[test]
    fn test_invalid_values() {
        let with_datum = |datum: Value| {
            parse(json!({"request": {"namespace": "ns", "metricData": datum}}))
        };

        assert_eq!(
            with_datum(json!("m")),
            Err(RequestError::NotAnObject("metricData"))
        );
        assert_eq!(
            with_datum(json!({"metricName": "m", "value": "12"})),
            Err(RequestError::NotANumber("value"))
        );
        assert_eq!(
            with_datum(json!({"metricName": "m", "value": 1, "unit": "Furlongs"})),
            Err(RequestError::InvalidUnit("Furlongs".to_owned()))
        );
        assert_eq!(
            with_datum(json!({"metricName": "m", "value": 1, "timestamp": "now"})),
            Err(RequestError::InvalidTimestamp)
        );
        assert_eq!(
            with_datum(json!({"metricName": "m", "value": 1, "dimensions": {}})),
            Err(RequestError::DimensionsNotAList)
        );
        assert_eq!(
            with_datum(json!({"metricName": "m", "value": 1, "dimensions": [{"name": "a"}]})),
            Err(RequestError::MissingDimensionField("value"))
        );
        assert_eq!(
            with_datum(json!({"metricName": "", "value": 1})),
            Err(RequestError::InvalidString("metricName"))
        );
    }

    #[test]
    fn test_too_many_dimensions() {
        let dimensions: Vec<_> = (0..11)
            .map(|i| json!({"name": format!("d{i}"), "value": "v"}))
            .collect();

        let error = parse(json!({
            "request": {
                "namespace": "ns",
                "metricData": {"metricName": "m", "value": 1, "dimensions": dimensions}
            }
        }))
        .unwrap_err();

        assert_eq!(error, RequestError::TooManyDimensions);
        assert_eq!(
            error.to_string(),
            "more than (10) entries present in field (dimensions)"
        );
    }
}
