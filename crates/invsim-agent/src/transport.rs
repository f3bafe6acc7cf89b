//! # HTTP Transport
//!
//! Carries one logical request at a time to the inventory service.
//!
//! ## Scheme Fallback
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    One logical request                                  │
//! │                                                                         │
//! │  POST https://<api>/v1/<action>                                        │
//! │       │                                                                 │
//! │       ├── 200 / other status ──────────────────────► return            │
//! │       │                                                                 │
//! │       └── 404                                                          │
//! │            │                                                            │
//! │            ├── forceHTTPS set, or already http ────► return 404        │
//! │            │                                                            │
//! │            └── switch to http (sticky) and retry ONCE                  │
//! │                     │                                                   │
//! │                     └── whatever comes back ───────► return            │
//! │                                                                         │
//! │  At most two requests per logical call.                                │
//! │  Certificate failure: TransportTrust, which stops the process.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The actual wire I/O sits behind [`Dispatch`] so the engine can be driven
//! by a scripted dispatcher in tests.

use async_trait::async_trait;
use chrono::Utc;
use invsim_core::Settings;
use reqwest::header::{HeaderValue, CACHE_CONTROL};
use serde_json::Value;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::error::{AgentError, AgentResult};
use crate::protocol::{Action, ApiResponse, Envelope, ResponseBody, API_VERSION};

// =============================================================================
// Scheme
// =============================================================================

/// URL scheme used to reach the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Https,
    Http,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Https => "https",
            Scheme::Http => "http",
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, Scheme::Https)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Dispatch
// =============================================================================

/// Sends one envelope to one URL.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn send(&self, url: &Url, envelope: &Envelope) -> AgentResult<ApiResponse>;
}

/// Configuration for the reqwest dispatcher.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Whole-request timeout.
    pub timeout: Duration,
    /// Connection timeout.
    pub connect_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Real HTTP dispatcher.
#[derive(Debug, Clone)]
pub struct ReqwestDispatch {
    client: reqwest::Client,
}

impl ReqwestDispatch {
    pub fn new(config: HttpConfig) -> AgentResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(0)
            .user_agent(concat!("invsim/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AgentError::Configuration(format!("HTTP client: {e}")))?;

        Ok(ReqwestDispatch { client })
    }
}

#[async_trait]
impl Dispatch for ReqwestDispatch {
    async fn send(&self, url: &Url, envelope: &Envelope) -> AgentResult<ApiResponse> {
        let response = self
            .client
            .post(url.clone())
            .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
            .json(envelope)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| AgentError::Connectivity {
                status: Some(status),
                message: e.to_string(),
            })?;

        Ok(ApiResponse::new(status, ResponseBody::parse(text)))
    }
}

fn classify_send_error(err: reqwest::Error) -> AgentError {
    if mentions_certificate(&err) {
        return AgentError::TransportTrust(error_chain(&err));
    }
    AgentError::Connectivity {
        status: None,
        message: error_chain(&err),
    }
}

/// True if any error in the source chain is about certificate validation.
pub(crate) fn mentions_certificate(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.to_string().to_ascii_lowercase().contains("certificate") {
            return true;
        }
        current = e.source();
    }
    false
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut current = err.source();
    while let Some(e) = current {
        parts.push(e.to_string());
        current = e.source();
    }
    parts.join(": ")
}

// =============================================================================
// Transport
// =============================================================================

/// Protocol-level client: builds envelopes and applies the fallback policy.
#[derive(Clone)]
pub struct Transport {
    dispatch: Arc<dyn Dispatch>,
    scheme: Scheme,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("scheme", &self.scheme)
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// New transport starting on https.
    pub fn new(dispatch: Arc<dyn Dispatch>) -> Self {
        Transport {
            dispatch,
            scheme: Scheme::Https,
        }
    }

    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Scheme the next request will use.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// `<scheme>://<api>/v1/<action>`
    pub fn endpoint(&self, api: &str, action: Action) -> AgentResult<Url> {
        let host = api.trim().trim_end_matches('/');
        let url = Url::parse(&format!(
            "{}://{}/{}/{}",
            self.scheme, host, API_VERSION, action
        ))?;
        Ok(url)
    }

    /// Sends one logical request, applying the one-shot scheme fallback.
    pub async fn request(
        &mut self,
        settings: &Settings,
        serial: &str,
        action: Action,
        data: Value,
    ) -> AgentResult<ApiResponse> {
        let api = settings
            .api()
            .ok_or_else(|| AgentError::Configuration("api is not set".to_string()))?;
        let envelope = Envelope::new(action, settings, serial, data, Utc::now());

        let url = self.endpoint(api, action)?;
        debug!(%url, %action, serial, "Sending request");
        let response = self.dispatch.send(&url, &envelope).await?;

        if response.status != 404 || !self.scheme.is_secure() || settings.force_https() {
            return Ok(response);
        }

        warn!(serial, %action, "API answered 404 over https, retrying over http");
        self.scheme = Scheme::Http;
        let url = self.endpoint(api, action)?;
        self.dispatch.send(&url, &envelope).await
    }

    /// Registration with the full inventory.
    pub async fn init(
        &mut self,
        settings: &Settings,
        serial: &str,
        inventory: Value,
    ) -> AgentResult<ApiResponse> {
        self.request(settings, serial, Action::Init, inventory).await
    }

    /// Server view of this device's modules.
    pub async fn post(&mut self, settings: &Settings, serial: &str) -> AgentResult<ApiResponse> {
        self.request(settings, serial, Action::Post, Value::Object(Default::default()))
            .await
    }

    /// Remote configuration.
    pub async fn rconf(&mut self, settings: &Settings, serial: &str) -> AgentResult<ApiResponse> {
        self.request(settings, serial, Action::Rconf, Value::Object(Default::default()))
            .await
    }

    /// Heartbeat. Identifiers travel in the meta block only.
    pub async fn heartbeat(
        &mut self,
        settings: &Settings,
        serial: &str,
    ) -> AgentResult<ApiResponse> {
        self.request(settings, serial, Action::Heartbeat, Value::Null)
            .await
    }

    /// Inventory change push. The service side is not defined yet, so
    /// nothing is sent.
    pub async fn update(&mut self, _settings: &Settings, serial: &str) -> AgentResult<()> {
        debug!(serial, "Inventory update is not supported, nothing sent");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
