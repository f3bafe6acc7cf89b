//! # Inventory API Protocol
//!
//! Wire format of the remote inventory service (version `v1`).
//!
//! ## Request
//! ```text
//! POST /v1/<action>
//! {
//!   "meta": {
//!     "_cid":      "<client id or null>",
//!     "apikey":    "<api key, or keypub before registration>",
//!     "action":    "init | post | rconf | hbt",
//!     "serial":    "<device serial>",
//!     "timestamp": 1700000000
//!   },
//!   "data": { ... }
//! }
//! ```
//!
//! ## Response
//! ```text
//! 200      {"data": {...}}
//! non-200  {"errors": [{"code": "0x0003", "type": "UnauthorizedAPI", "message": "..."}]}
//!          or an unstructured body
//! ```

use chrono::{DateTime, Utc};
use invsim_core::Settings;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Protocol version segment of every endpoint path.
pub const API_VERSION: &str = "v1";

/// Structured error codes the agent reacts to.
pub mod codes {
    /// Credentials rejected: drop them and register again.
    pub const UNAUTHORIZED_API: &str = "0x0003";
    /// Device already registered: the response still carries identifiers.
    pub const EXISTS_INVENTORY: &str = "0x000B";
}

// =============================================================================
// Actions
// =============================================================================

/// Remote service action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Registration with the full inventory.
    Init,
    /// Fetch the service's view of this device's modules.
    Post,
    /// Fetch remote configuration.
    Rconf,
    /// Heartbeat.
    Heartbeat,
    /// Inventory change push. Not implemented by the agent.
    Update,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Init => "init",
            Action::Post => "post",
            Action::Rconf => "rconf",
            Action::Heartbeat => "hbt",
            Action::Update => "update",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Request Envelope
// =============================================================================

/// Request metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(rename = "_cid")]
    pub client_id: Option<String>,
    pub apikey: Option<String>,
    pub action: String,
    pub serial: String,
    pub timestamp: i64,
}

/// Request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub meta: Meta,
    pub data: Value,
}

impl Envelope {
    /// Builds an envelope from the agent settings.
    ///
    /// The API key falls back to `keypub` until registration issued one.
    pub fn new(
        action: Action,
        settings: &Settings,
        serial: &str,
        data: Value,
        now: DateTime<Utc>,
    ) -> Self {
        let apikey = settings
            .apikey()
            .filter(|k| !k.is_empty())
            .or_else(|| settings.keypub())
            .map(str::to_string);

        Envelope {
            meta: Meta {
                client_id: settings.client_id().map(str::to_string),
                apikey,
                action: action.as_str().to_string(),
                serial: serial.to_string(),
                timestamp: now.timestamp(),
            },
            data,
        }
    }
}

// =============================================================================
// Response
// =============================================================================

/// One structured error from the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorEntry {
    #[serde(default)]
    pub code: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub message: String,
}

impl fmt::Display for ApiErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}: {}", self.code, self.kind, self.message)
    }
}

/// One `{attribute, value}` row of a remote configuration block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub attribute: String,
    #[serde(default)]
    pub value: Value,
}

/// Response body: parsed JSON when possible, raw text otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

impl ResponseBody {
    pub fn parse(text: String) -> Self {
        match serde_json::from_str(&text) {
            Ok(value) => ResponseBody::Json(value),
            Err(_) => ResponseBody::Text(text),
        }
    }
}

impl fmt::Display for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Json(v) => write!(f, "{v}"),
            ResponseBody::Text(t) => f.write_str(t),
        }
    }
}

/// Outcome of one logical request.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: ResponseBody,
}

impl ApiResponse {
    pub fn new(status: u16, body: ResponseBody) -> Self {
        Self { status, body }
    }

    /// JSON response helper.
    pub fn json(status: u16, body: Value) -> Self {
        Self::new(status, ResponseBody::Json(body))
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }

    /// The `data` block of a JSON body.
    pub fn data(&self) -> Option<&Value> {
        match &self.body {
            ResponseBody::Json(v) => v.get("data"),
            ResponseBody::Text(_) => None,
        }
    }

    /// The `data.config` rows of an `rconf` or `hbt` answer.
    pub fn config_entries(&self) -> Option<Vec<ConfigEntry>> {
        let rows = self.data()?.get("config")?;
        serde_json::from_value(rows.clone()).ok()
    }

    /// Structured errors, in the order the service sent them.
    pub fn errors(&self) -> Vec<ApiErrorEntry> {
        match &self.body {
            ResponseBody::Json(v) => v
                .get("errors")
                .and_then(|e| serde_json::from_value(e.clone()).ok())
                .unwrap_or_default(),
            ResponseBody::Text(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_falls_back_to_keypub() {
        let mut settings = Settings::new();
        settings.set("keypub", json!("PUB"));
        let now = Utc::now();

        let env = Envelope::new(Action::Init, &settings, "ABC123", json!({}), now);
        assert_eq!(env.meta.apikey.as_deref(), Some("PUB"));
        assert_eq!(env.meta.client_id, None);
        assert_eq!(env.meta.action, "init");

        settings.set("client_id", json!("C1"));
        settings.set("apikey", json!("KEY"));
        let env = Envelope::new(Action::Heartbeat, &settings, "ABC123", Value::Null, now);
        assert_eq!(env.meta.apikey.as_deref(), Some("KEY"));
        assert_eq!(env.meta.client_id.as_deref(), Some("C1"));
        assert_eq!(env.meta.action, "hbt");
    }

    #[test]
    fn test_envelope_wire_names() {
        let env = Envelope::new(
            Action::Rconf,
            &Settings::new(),
            "ABC123",
            json!({}),
            Utc::now(),
        );
        let wire = serde_json::to_value(&env).unwrap();
        assert!(wire["meta"].get("_cid").is_some());
        assert_eq!(wire["meta"]["serial"], json!("ABC123"));
        assert!(wire["meta"]["timestamp"].is_i64());
    }

    #[test]
    fn test_response_errors() {
        let resp = ApiResponse::json(
            401,
            json!({"errors": [{"code": "0x0003", "type": "UnauthorizedAPI", "message": "no"}]}),
        );
        let errors = resp.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].to_string(), "0x0003 | UnauthorizedAPI: no");

        let text = ApiResponse::new(502, ResponseBody::parse("<html>bad gateway</html>".into()));
        assert!(text.errors().is_empty());
        assert!(text.is_server_error());
        assert!(text.data().is_none());
    }
}
