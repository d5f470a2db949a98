use std::collections::BTreeMap;

use serde_json::{Map, Number, Value};

use crate::{error::DecodeError, types::MetricValue};

/// Nested object some devices publish for an RGB sensor; flattened to
/// `color_r`, `color_g` and `color_b`.
pub const COLOR_KEY: &str = "color";

/// One decoded payload. Keeps the original JSON object for export alongside
/// the metric values extracted from it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorRecord {
    values: BTreeMap<String, MetricValue>,
    raw: Map<String, Value>,
}

impl SensorRecord {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(payload).map_err(|_| DecodeError::NotUtf8)?;
        match serde_json::from_str::<Value>(text)? {
            Value::Object(raw) => Ok(Self::from_object(raw)),
            _ => Err(DecodeError::NotAnObject),
        }
    }

    pub fn from_object(raw: Map<String, Value>) -> Self {
        let mut values = BTreeMap::new();

        for (key, value) in &raw {
            match value {
                Value::Number(number) => {
                    if let Some(number) = number.as_f64().filter(|n| n.is_finite()) {
                        values.insert(key.clone(), MetricValue::Number(number));
                    }
                }
                Value::String(text) => {
                    values.insert(key.clone(), MetricValue::Text(text.clone()));
                }
                Value::Object(nested) if key == COLOR_KEY => flatten_color(nested, &mut values),
                _ => {}
            }
        }

        Self { values, raw }
    }

    pub fn from_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<MetricValue>,
    {
        let mut raw = Map::new();
        let mut map = BTreeMap::new();

        for (key, value) in values {
            let key = key.into();
            let value = value.into();
            raw.insert(key.clone(), json_value(&value));
            map.insert(key, value);
        }

        Self { values: map, raw }
    }

    pub fn get(&self, metric: &str) -> Option<&MetricValue> {
        self.values.get(metric)
    }

    /// First value present under any of `keys`, in order.
    pub fn first_of(&self, keys: &[&str]) -> Option<&MetricValue> {
        keys.iter().find_map(|key| self.values.get(*key))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetricValue)> {
        self.values.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }
}

fn flatten_color(color: &Map<String, Value>, values: &mut BTreeMap<String, MetricValue>) {
    for channel in ["r", "g", "b"] {
        if let Some(level) = color.get(channel).and_then(Value::as_f64) {
            values.insert(format!("color_{channel}"), MetricValue::Number(level));
        }
    }
}

fn json_value(value: &MetricValue) -> Value {
    match value {
        MetricValue::Number(number) => Number::from_f64(*number)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        MetricValue::Text(text) => Value::String(text.clone()),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn decodes_numbers_and_labels() {
        let record =
            SensorRecord::decode(br#"{"humedad": 42, "ph": 6.1, "calidad_agua": "Buena"}"#)
                .unwrap();

        assert_eq!(record.len(), 3);
        assert_eq!(record.get("humedad"), Some(&MetricValue::Number(42.0)));
        assert_eq!(record.get("ph"), Some(&MetricValue::Number(6.1)));
        assert_eq!(
            record.get("calidad_agua"),
            Some(&MetricValue::Text("Buena".to_string()))
        );
    }

    #[test]
    fn flattens_color_object() {
        let record =
            SensorRecord::decode(br#"{"color": {"r": 255, "g": 12, "b": 0}, "tds": 310}"#)
                .unwrap();

        assert_eq!(record.get("color_r"), Some(&MetricValue::Number(255.0)));
        assert_eq!(record.get("color_g"), Some(&MetricValue::Number(12.0)));
        assert_eq!(record.get("color_b"), Some(&MetricValue::Number(0.0)));
        assert_eq!(record.get("color"), None);
        assert!(record.raw().contains_key("color"));
    }

    #[test]
    fn skips_unsupported_values() {
        let record = SensorRecord::decode(
            br#"{"online": true, "error": null, "samples": [1, 2], "meta": {"fw": "1.2"}}"#,
        )
        .unwrap();

        assert!(record.is_empty());
        assert_eq!(record.raw().len(), 4);
    }

    #[test]
    fn rejects_non_objects() {
        assert!(matches!(
            SensorRecord::decode(b"[1, 2, 3]"),
            Err(DecodeError::NotAnObject)
        ));
        assert!(matches!(
            SensorRecord::decode(b"42"),
            Err(DecodeError::NotAnObject)
        ));
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(matches!(
            SensorRecord::decode(b"{\"humedad\": "),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            SensorRecord::decode(&[0xff, 0xfe, 0x00]),
            Err(DecodeError::NotUtf8)
        ));
    }

    #[test]
    fn first_of_respects_key_order() {
        let record = SensorRecord::from_values([("temperatura", 21.5), ("temperature", 22.0)]);

        assert_eq!(
            record.first_of(&["temperature", "temperatura"]),
            Some(&MetricValue::Number(22.0))
        );
        assert_eq!(
            record.first_of(&["missing", "temperatura"]),
            Some(&MetricValue::Number(21.5))
        );
        assert_eq!(record.first_of(&["missing"]), None);
    }
}
