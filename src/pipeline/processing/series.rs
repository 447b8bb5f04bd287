use serde_json::{Map, Value};

use crate::domain::{RawEvent, SeriesDescriptor};

/// Keys whose non-empty presence marks an event as part of a series
pub const INDICATOR_KEYS: [&str; 7] = [
    "series_id",
    "series",
    "recurring",
    "recurrence",
    "parent_event_id",
    "instance_number",
    "total_instances",
];

/// Recurrence sub-fields in emission order, with the source spellings accepted for each
const RRULE_PARTS: &[(&str, &[&str])] = &[
    ("FREQ", &["frequency", "freq"]),
    ("INTERVAL", &["interval"]),
    ("COUNT", &["count"]),
    ("UNTIL", &["until"]),
    ("BYDAY", &["by_day", "byday", "byDay", "days"]),
];

/// Detects recurring/series events and extracts a normalized descriptor
#[derive(Debug, Default, Clone, Copy)]
pub struct SeriesDetector;

impl SeriesDetector {
    pub fn new() -> Self {
        Self
    }

    /// Whether the record carries any series indicator at all
    pub fn is_series(&self, raw: &RawEvent) -> bool {
        let Some(obj) = raw.as_object() else {
            return false;
        };
        INDICATOR_KEYS
            .iter()
            .any(|key| obj.get(*key).is_some_and(is_present))
            || obj.get("series").is_some_and(Value::is_object)
            || obj.get("recurrence").is_some_and(Value::is_object)
    }

    /// Extract a descriptor, or `None` when the record is not a series or no
    /// identifier (series id, parent event id or recurrence rule) resolves.
    pub fn detect(&self, raw: &RawEvent) -> Option<SeriesDescriptor> {
        if !self.is_series(raw) {
            return None;
        }
        let obj = raw.as_object()?;
        let series_obj = obj.get("series").and_then(Value::as_object);

        let series_id = obj
            .get("series_id")
            .and_then(id_text)
            .or_else(|| series_obj.and_then(|s| s.get("id")).and_then(id_text))
            .unwrap_or_default();
        let parent_event_id = if series_id.is_empty() {
            obj.get("parent_event_id").and_then(id_text).unwrap_or_default()
        } else {
            String::new()
        };

        let recurrence = obj
            .get("recurrence")
            .or_else(|| series_obj.and_then(|s| s.get("recurrence")));
        let recurrence_rule = recurrence.map(recurrence_rule).unwrap_or_default();

        if series_id.is_empty() && parent_event_id.is_empty() && recurrence_rule.is_empty() {
            return None;
        }

        Some(SeriesDescriptor {
            series_id,
            instance_number: count_field(obj, series_obj, "instance_number"),
            total_instances: count_field(obj, series_obj, "total_instances"),
            recurrence_rule,
            parent_event_id,
        })
    }
}

/// Build `FREQ=..;INTERVAL=..;COUNT=..;UNTIL=..;BYDAY=..` from the sub-fields
/// actually present. Absent parts contribute no token.
pub fn recurrence_rule(recurrence: &Value) -> String {
    let Some(obj) = recurrence.as_object() else {
        return String::new();
    };
    RRULE_PARTS
        .iter()
        .filter_map(|(token, keys)| {
            let value = keys.iter().find_map(|key| obj.get(*key).filter(|v| is_present(v)))?;
            let rendered = match value {
                Value::Array(items) => items
                    .iter()
                    .filter_map(id_text)
                    .map(|d| d.to_uppercase())
                    .collect::<Vec<_>>()
                    .join(","),
                other => {
                    let text = id_text(other)?;
                    if *token == "FREQ" || *token == "BYDAY" {
                        text.to_uppercase()
                    } else {
                        text
                    }
                }
            };
            (!rendered.is_empty()).then(|| format!("{}={}", token, rendered))
        })
        .collect::<Vec<_>>()
        .join(";")
}

/// Non-null, non-empty, non-false, non-zero
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(obj) => !obj.is_empty(),
    }
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Integer coercion with a floor (and default) of 1
fn count_field(obj: &Map<String, Value>, series_obj: Option<&Map<String, Value>>, key: &str) -> u32 {
    obj.get(key)
        .or_else(|| series_obj.and_then(|s| s.get(key)))
        .and_then(|v| match v {
            Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        })
        .map(|n| n.clamp(1, u32::MAX as u64) as u32)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_series_id_defaults_counts() {
        let descriptor = SeriesDetector::new().detect(&json!({"series_id": "S1"})).unwrap();
        assert_eq!(descriptor.series_id, "S1");
        assert_eq!(descriptor.instance_number, 1);
        assert_eq!(descriptor.total_instances, 1);
        assert_eq!(descriptor.recurrence_rule, "");
        assert_eq!(descriptor.parent_event_id, "");
    }

    #[test]
    fn test_recurrence_rule_tokens() {
        let raw = json!({"recurrence": {"frequency": "weekly", "interval": 2, "count": 5}});
        let descriptor = SeriesDetector::new().detect(&raw).unwrap();
        assert_eq!(descriptor.recurrence_rule, "FREQ=WEEKLY;INTERVAL=2;COUNT=5");
    }

    #[test]
    fn test_full_recurrence_rule_order() {
        let rule = recurrence_rule(&json!({
            "byday": ["mo", "we"],
            "until": "20241231T000000Z",
            "freq": "daily"
        }));
        assert_eq!(rule, "FREQ=DAILY;UNTIL=20241231T000000Z;BYDAY=MO,WE");
    }

    #[test]
    fn test_empty_record_is_not_a_series() {
        let detector = SeriesDetector::new();
        assert!(!detector.is_series(&json!({})));
        assert!(detector.detect(&json!({})).is_none());
        assert!(detector.detect(&json!({"recurring": false, "series_id": ""})).is_none());
    }

    #[test]
    fn test_indicator_without_identifier_yields_none() {
        let detector = SeriesDetector::new();
        let raw = json!({"instance_number": 3});
        assert!(detector.is_series(&raw));
        assert!(detector.detect(&raw).is_none());
    }

    #[test]
    fn test_nested_series_object_and_parent_fallback() {
        let detector = SeriesDetector::new();
        let nested = detector
            .detect(&json!({"series": {"id": "S9", "instance_number": "4", "total_instances": 10}}))
            .unwrap();
        assert_eq!(nested.series_id, "S9");
        assert_eq!(nested.instance_number, 4);
        assert_eq!(nested.total_instances, 10);

        let parent = detector
            .detect(&json!({"parent_event_id": 812, "instance_number": 0}))
            .unwrap();
        assert_eq!(parent.series_id, "");
        assert_eq!(parent.parent_event_id, "812");
        assert_eq!(parent.instance_number, 1);
        assert_eq!(parent.group_id(), "812");
    }
}
