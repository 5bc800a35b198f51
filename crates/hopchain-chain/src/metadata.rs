//! Free-form component settings.
//!
//! Connectors and dialers receive a [`Metadata`] map from configuration and
//! pick out the keys they understand. Values are loosely typed: a number may
//! be given as a string and vice versa.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key/value settings for one component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(Map<String, Value>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|n| n != 0),
            Value::String(s) => parse_bool(s),
            _ => None,
        }
    }

    /// Integers are seconds; strings are durations like `500ms`, `10s` or `1m30s`.
    pub fn get_duration(&self, key: &str) -> Option<Duration> {
        match self.get(key)? {
            Value::Number(n) => n.as_u64().map(Duration::from_secs),
            Value::String(s) => parse_duration(s),
            _ => None,
        }
    }
}

impl FromIterator<(String, Value)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "on" => Some(true),
        "0" | "f" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a duration string.
///
/// Accepts a sequence of `<number><unit>` terms (`ns`, `us`, `ms`, `s`, `m`,
/// `h`), e.g. `1.5s` or `1h30m`. A bare integer is taken as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let mut total = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_end == 0 {
            return None;
        }
        let value: f64 = rest[..num_end].parse().ok()?;
        rest = &rest[num_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_end] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return None,
        };
        total += value * scale;
        rest = &rest[unit_end..];
    }
    Duration::try_from_secs_f64(total).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn md(v: Value) -> Metadata {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn loose_typing() {
        let m = md(json!({
            "port": "8080",
            "nodelay": "true",
            "enabled": 1,
            "secure": "off",
        }));
        assert_eq!(m.get_bool("nodelay"), Some(true));
        assert_eq!(m.get_bool("enabled"), Some(true));
        assert_eq!(m.get_bool("secure"), Some(false));
        assert_eq!(m.get_bool("missing"), None);
        assert_eq!(m.get_bool("port"), None);
    }

    #[test]
    fn durations() {
        let m = md(json!({
            "a": 10,
            "b": "500ms",
            "c": "1m30s",
            "d": "1.5s",
            "e": "7",
            "f": "soon",
        }));
        assert_eq!(m.get_duration("a"), Some(Duration::from_secs(10)));
        assert_eq!(m.get_duration("b"), Some(Duration::from_millis(500)));
        assert_eq!(m.get_duration("c"), Some(Duration::from_secs(90)));
        assert_eq!(m.get_duration("d"), Some(Duration::from_millis(1500)));
        assert_eq!(m.get_duration("e"), Some(Duration::from_secs(7)));
        assert_eq!(m.get_duration("f"), None);
    }

    #[test]
    fn deserializes_from_toml_table() {
        let m: Metadata = toml::from_str("handshakeTimeout = \"5s\"\nnodelay = false\n").unwrap();
        assert_eq!(m.get_duration("handshakeTimeout"), Some(Duration::from_secs(5)));
        assert_eq!(m.get_bool("nodelay"), Some(false));
    }
}
