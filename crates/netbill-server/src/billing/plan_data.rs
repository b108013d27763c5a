//! plan_data access helpers
//!
//! `plan_data` is a per-account JSON object with heterogeneous values:
//! scalars, lists of lists, nested maps. Algorithms read entries
//! defensively and fall back to defaults when a key is missing or has an
//! unexpected shape.

use serde_json::{Map, Value};

/// The opaque per-account parameter map
pub type PlanData = Map<String, Value>;

/// Numeric read tolerating number, integer and numeric-string forms
pub fn get_f64(data: &PlanData, key: &str, default: f64) -> f64 {
    match data.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
        Some(Value::String(s)) => s.parse().unwrap_or(default),
        _ => default,
    }
}

/// String read
pub fn get_str<'a>(data: &'a PlanData, key: &str, default: &'a str) -> &'a str {
    match data.get(key) {
        Some(Value::String(s)) => s.as_str(),
        _ => default,
    }
}

/// List read
pub fn get_array<'a>(data: &'a PlanData, key: &str) -> Option<&'a Vec<Value>> {
    match data.get(key) {
        Some(Value::Array(items)) => Some(items),
        _ => None,
    }
}

/// Numeric value out of a loose JSON scalar
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Parse a plan_data column value; empty text means an empty map
pub fn parse(raw: &str) -> Result<PlanData, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(PlanData::new());
    }
    serde_json::from_str(raw)
}
