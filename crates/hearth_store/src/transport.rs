use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, StoreError};

pub use reqwest::Method;

#[derive(Debug, Clone)]
pub struct StoreRequest {
    pub method: Method,
    /// Path below the server root, e.g. `/_db/hearth/_api/document/user/1`.
    pub path: String,
    pub query: Vec<(&'static str, String)>,
    pub body: Option<Value>,
    pub bearer: Option<Arc<str>>,
}

impl StoreRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            bearer: None,
        }
    }

    pub fn query(mut self, k: &'static str, v: impl Into<String>) -> Self {
        self.query.push((k, v.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone)]
pub struct StoreResponse {
    pub status: u16,
    /// Parsed JSON body; `Null` when empty, a JSON string when the body was not JSON.
    pub body: Value,
}

impl StoreResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Short description of the body for error messages.
    pub fn body_text(&self) -> String {
        let msg = self
            .body
            .get("errorMessage")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| match &self.body {
                Value::String(s) => s.clone(),
                v => v.to_string(),
            });
        if msg.chars().count() > 300 {
            msg.chars().take(300).collect::<String>() + "..."
        } else {
            msg
        }
    }

    pub fn into_http_error(self) -> StoreError {
        let body = self.body_text();
        StoreError::Http {
            status: self.status,
            body,
        }
    }
}

/// One request in, one response out. Status codes are data, not errors:
/// only failing to talk to the store at all is an `Err`.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, req: StoreRequest) -> Result<StoreResponse>;
}

pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Transport(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, req: StoreRequest) -> Result<StoreResponse> {
        let url = format!("{}{}", self.base_url, req.path);
        let mut rb = self.http.request(req.method, url);
        if !req.query.is_empty() {
            rb = rb.query(&req.query);
        }
        if let Some(tok) = req.bearer.as_deref() {
            rb = rb.bearer_auth(tok);
        }
        if let Some(body) = req.body.as_ref() {
            rb = rb.json(body);
        }

        let resp = rb
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        let status = resp.status().as_u16();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        Ok(StoreResponse { status, body })
    }
}
