//! Scripted dispatcher for tests.
//!
//! Responses are queued per action (`init`, `post`, `rconf`, `hbt`) and
//! consumed in order; when a queue is empty the action's default response
//! is used, then the responder closure. Every call is recorded.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use url::Url;

use crate::error::{AgentError, AgentResult};
use crate::protocol::{ApiResponse, Envelope, ResponseBody};
use crate::transport::Dispatch;

type Responder = Box<dyn Fn(&str, &Envelope) -> Option<ApiResponse> + Send + Sync>;

enum ScriptItem {
    Respond(ApiResponse),
    Fail(AgentError),
}

/// One dispatched request.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub url: String,
    pub action: String,
    pub envelope: Envelope,
}

#[derive(Default)]
struct Inner {
    queues: HashMap<String, VecDeque<ScriptItem>>,
    defaults: HashMap<String, ApiResponse>,
    responder: Option<Responder>,
    calls: Vec<RecordedCall>,
}

/// In-memory [`Dispatch`] driven by a script.
#[derive(Default)]
pub struct ScriptedDispatch {
    inner: Mutex<Inner>,
}

impl ScriptedDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// A well-behaved service: empty remote config, registration issuing
    /// `client_id`/`apikey`, no server-side modules.
    pub fn standard(client_id: &str, apikey: &str) -> Self {
        let dispatch = Self::new();
        dispatch.set_default("rconf", ok(json!({"config": []})));
        dispatch.set_default(
            "init",
            ok(json!({"identifiers": {"client_id": client_id, "apikey": apikey}})),
        );
        dispatch.set_default("post", ok(json!({"computer": {"modules": {}}})));
        dispatch.set_default("hbt", ok(json!({"config": []})));
        dispatch
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a response for the next call of `action`.
    pub fn push(&self, action: &str, response: ApiResponse) {
        self.lock()
            .queues
            .entry(action.to_string())
            .or_default()
            .push_back(ScriptItem::Respond(response));
    }

    /// Queues a transport failure for the next call of `action`.
    pub fn push_error(&self, action: &str, error: AgentError) {
        self.lock()
            .queues
            .entry(action.to_string())
            .or_default()
            .push_back(ScriptItem::Fail(error));
    }

    /// Response used whenever the queue for `action` is empty.
    pub fn set_default(&self, action: &str, response: ApiResponse) {
        self.lock().defaults.insert(action.to_string(), response);
    }

    /// Fallback computed from the request.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&str, &Envelope) -> Option<ApiResponse> + Send + Sync + 'static,
    {
        self.lock().responder = Some(Box::new(responder));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.lock().calls.iter().map(|c| c.url.clone()).collect()
    }

    /// Number of calls made for `action`.
    pub fn count(&self, action: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.action == action)
            .count()
    }
}

#[async_trait]
impl Dispatch for ScriptedDispatch {
    async fn send(&self, url: &Url, envelope: &Envelope) -> AgentResult<ApiResponse> {
        let action = url
            .path_segments()
            .and_then(|mut s| s.next_back())
            .unwrap_or_default()
            .to_string();

        let mut inner = self.lock();
        inner.calls.push(RecordedCall {
            url: url.to_string(),
            action: action.clone(),
            envelope: envelope.clone(),
        });

        if let Some(item) = inner.queues.get_mut(&action).and_then(VecDeque::pop_front) {
            return match item {
                ScriptItem::Respond(response) => Ok(response),
                ScriptItem::Fail(error) => Err(error),
            };
        }

        if let Some(response) = inner.defaults.get(&action) {
            return Ok(response.clone());
        }

        if let Some(response) = inner.responder.as_ref().and_then(|r| r(&action, envelope)) {
            return Ok(response);
        }

        Ok(ApiResponse::new(
            501,
            ResponseBody::Text(format!("no scripted response for {action}")),
        ))
    }
}

/// `200 {"data": <data>}`
pub fn ok(data: Value) -> ApiResponse {
    ApiResponse::json(200, json!({ "data": data }))
}

/// Error response carrying one structured error and an optional data block.
pub fn api_error(status: u16, code: &str, kind: &str, data: Option<Value>) -> ApiResponse {
    let mut body = json!({
        "errors": [{"code": code, "type": kind, "message": format!("{kind} ({code})")}]
    });
    if let Some(data) = data {
        body["data"] = data;
    }
    ApiResponse::json(status, body)
}
