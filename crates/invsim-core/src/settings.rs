//! # Agent Settings
//!
//! The agent's `config` map: bootstrap values from `invconf`, values pushed
//! by the remote service, and the identifiers issued at registration.
//!
//! ## Field Typing
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  The datastore keeps every value as TEXT. Known fields are converted   │
//! │  back on every read, so the engine never sees "30" where it expects 30 │
//! │                                                                         │
//! │    lastupdate  → float        client_id → string                        │
//! │    hbt         → integer      apikey    → string                        │
//! │    backoff     → integer      keypub    → string                        │
//! │    loglevel    → integer      forceHTTPS → bool                         │
//! │                                                                         │
//! │  Unknown fields are kept as-is.                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::{CoreError, CoreResult};
use crate::flatten::value_to_text;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

// =============================================================================
// Field Names
// =============================================================================

/// Well-known settings keys.
pub mod keys {
    pub const API: &str = "api";
    pub const HBT: &str = "hbt";
    pub const BACKOFF: &str = "backoff";
    pub const FORCE_HTTPS: &str = "forceHTTPS";
    pub const CLIENT_ID: &str = "client_id";
    pub const APIKEY: &str = "apikey";
    pub const KEYPUB: &str = "keypub";
    pub const SQLSTORE: &str = "sqlstore";
    pub const LOGFILE: &str = "logfile";
    pub const LOGLEVEL: &str = "loglevel";
    pub const LASTUPDATE: &str = "lastupdate";
}

// =============================================================================
// Field Types
// =============================================================================

/// Storage-independent type of a known settings field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Float,
    Integer,
    Bool,
    Text,
}

impl FieldType {
    /// Returns the declared type of `field`, if it has one.
    pub fn of(field: &str) -> Option<Self> {
        match field {
            keys::LASTUPDATE => Some(Self::Float),
            keys::HBT | keys::BACKOFF | keys::LOGLEVEL => Some(Self::Integer),
            keys::FORCE_HTTPS => Some(Self::Bool),
            keys::CLIENT_ID | keys::APIKEY | keys::KEYPUB => Some(Self::Text),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Integer => "integer",
            Self::Bool => "bool",
            Self::Text => "string",
        }
    }

    /// Converts `value` to this type. `null` stays `null`.
    pub fn coerce(self, field: &str, value: &Value) -> CoreResult<Value> {
        let invalid = || CoreError::InvalidSetting {
            field: field.to_string(),
            expected: self.name().to_string(),
            value: value_to_text(value),
        };

        if value.is_null() {
            return Ok(Value::Null);
        }

        match self {
            Self::Float => {
                let f = match value {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                }
                .ok_or_else(invalid)?;
                Number::from_f64(f).map(Value::Number).ok_or_else(invalid)
            }
            Self::Integer => {
                let i = match value {
                    Value::Number(n) => n.as_i64().or_else(|| integral(n.as_f64()?)),
                    Value::String(s) => {
                        let s = s.trim();
                        s.parse::<i64>()
                            .ok()
                            .or_else(|| integral(s.parse::<f64>().ok()?))
                    }
                    _ => None,
                }
                .ok_or_else(invalid)?;
                Ok(Value::from(i))
            }
            Self::Bool => {
                let b = match value {
                    Value::Bool(b) => Some(*b),
                    Value::Number(n) => n.as_f64().map(|f| f != 0.0),
                    Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                        "true" | "1" | "yes" | "on" => Some(true),
                        "false" | "0" | "no" | "off" | "" => Some(false),
                        _ => None,
                    },
                    _ => None,
                }
                .ok_or_else(invalid)?;
                Ok(Value::Bool(b))
            }
            Self::Text => match value {
                Value::String(_) => Ok(value.clone()),
                Value::Number(_) | Value::Bool(_) => Ok(Value::String(value.to_string())),
                _ => Err(invalid()),
            },
        }
    }
}

fn integral(f: f64) -> Option<i64> {
    (f.fract() == 0.0 && f.is_finite()).then_some(f as i64)
}

// =============================================================================
// Settings
// =============================================================================

/// The agent configuration map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings {
    values: BTreeMap<String, Value>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds settings from a parsed JSON object and applies field typing.
    pub fn from_json(map: Map<String, Value>) -> CoreResult<Self> {
        let mut settings = Self {
            values: map.into_iter().collect(),
        };
        settings.apply_field_types()?;
        Ok(settings)
    }

    /// Builds settings from stored `(property, value)` rows and applies
    /// field typing.
    pub fn from_rows<I>(rows: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut settings = Self {
            values: rows
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect(),
        };
        settings.apply_field_types()?;
        Ok(settings)
    }

    /// Renders every non-null value as a `(property, value)` TEXT row.
    pub fn to_rows(&self) -> Vec<(String, String)> {
        self.values
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), value_to_text(v)))
            .collect()
    }

    /// Converts every known field to its declared type.
    pub fn apply_field_types(&mut self) -> CoreResult<()> {
        for (field, value) in self.values.iter_mut() {
            if let Some(ty) = FieldType::of(field) {
                *value = ty.coerce(field, value)?;
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Raw access
    // -------------------------------------------------------------------------

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Assigns a value. Last write wins.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.get(key).is_some_and(|v| !v.is_null())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    // -------------------------------------------------------------------------
    // Typed accessors
    // -------------------------------------------------------------------------

    fn text(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn api(&self) -> Option<&str> {
        self.text(keys::API)
    }

    /// Heartbeat interval in seconds.
    pub fn hbt(&self) -> Option<i64> {
        self.values.get(keys::HBT).and_then(Value::as_i64)
    }

    /// Base re-registration delay in seconds.
    pub fn backoff(&self) -> Option<i64> {
        self.values.get(keys::BACKOFF).and_then(Value::as_i64)
    }

    pub fn force_https(&self) -> bool {
        self.values
            .get(keys::FORCE_HTTPS)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn client_id(&self) -> Option<&str> {
        self.text(keys::CLIENT_ID)
    }

    pub fn apikey(&self) -> Option<&str> {
        self.text(keys::APIKEY)
    }

    pub fn keypub(&self) -> Option<&str> {
        self.text(keys::KEYPUB)
    }

    pub fn sqlstore(&self) -> Option<&str> {
        self.text(keys::SQLSTORE)
    }

    pub fn logfile(&self) -> Option<&str> {
        self.text(keys::LOGFILE)
    }

    pub fn loglevel(&self) -> Option<i64> {
        self.values.get(keys::LOGLEVEL).and_then(Value::as_i64)
    }

    pub fn lastupdate(&self) -> Option<f64> {
        self.values.get(keys::LASTUPDATE).and_then(Value::as_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_typing_from_rows() {
        let settings = Settings::from_rows(rows(&[
            ("lastupdate", "1700000000.5"),
            ("hbt", "30"),
            ("backoff", "2"),
            ("forceHTTPS", "false"),
            ("client_id", "C1"),
            ("api", "inv.example.com"),
        ]))
        .unwrap();

        assert_eq!(settings.lastupdate(), Some(1_700_000_000.5));
        assert_eq!(settings.hbt(), Some(30));
        assert_eq!(settings.backoff(), Some(2));
        assert!(!settings.force_https());
        assert_eq!(settings.client_id(), Some("C1"));
        assert_eq!(settings.api(), Some("inv.example.com"));
    }

    #[test]
    fn test_typing_from_json() {
        let map = json!({"hbt": 30.0, "forceHTTPS": 1, "client_id": 42})
            .as_object()
            .cloned()
            .unwrap();
        let settings = Settings::from_json(map).unwrap();

        assert_eq!(settings.hbt(), Some(30));
        assert!(settings.force_https());
        assert_eq!(settings.client_id(), Some("42"));
    }

    #[test]
    fn test_invalid_integer_is_rejected() {
        let err = Settings::from_rows(rows(&[("hbt", "soon")])).unwrap_err();
        assert!(matches!(err, CoreError::InvalidSetting { ref field, .. } if field == "hbt"));

        let err = Settings::from_rows(rows(&[("hbt", "2.5")])).unwrap_err();
        assert!(matches!(err, CoreError::InvalidSetting { .. }));
    }

    #[test]
    fn test_rows_round_trip_keeps_types() {
        let mut settings = Settings::new();
        settings.set("hbt", json!(45));
        settings.set("forceHTTPS", json!(true));
        settings.set("lastupdate", json!(12.25));
        settings.set("client_id", Value::Null);

        let rows = settings.to_rows();
        assert!(!rows.iter().any(|(k, _)| k == "client_id"));

        let reloaded = Settings::from_rows(rows).unwrap();
        assert_eq!(reloaded.hbt(), Some(45));
        assert!(reloaded.force_https());
        assert_eq!(reloaded.lastupdate(), Some(12.25));
    }

    #[test]
    fn test_last_write_wins() {
        let mut settings = Settings::new();
        settings.set("hbt", json!(30));
        settings.set("hbt", json!(45));
        assert_eq!(settings.hbt(), Some(45));
    }

    #[test]
    fn test_identifiers() {
        let mut settings = Settings::new();
        assert!(settings.client_id().is_none());
        settings.set("client_id", json!("X"));
        settings.set("apikey", json!("K"));
        assert_eq!(settings.client_id(), Some("X"));
        assert_eq!(settings.apikey(), Some("K"));
    }
}
