use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cursor::Cursor;
use crate::error::{Result, StoreError};
use crate::id::DocumentId;
use crate::token::BearerToken;
use crate::transport::{Method, StoreRequest, StoreResponse, Transport};

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub database: String,
    pub username: String,
    pub password: String,
    /// Reconnect this long before the token's `exp`.
    pub token_margin: Duration,
    /// Cadence for "no token yet" and "reconnect failed" retries.
    pub token_poll: Duration,
    pub cursor_batch: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: "hearth".to_string(),
            username: "root".to_string(),
            password: String::new(),
            token_margin: Duration::from_secs(120),
            token_poll: Duration::from_secs(5),
            cursor_batch: 100,
        }
    }
}

/// Authenticated access to one database on the store.
///
/// The bearer token lives in a `watch` channel: the refresh loop swaps it with
/// one `send_replace`, every request path just borrows the current value.
pub struct DatabaseManager {
    cfg: StoreConfig,
    transport: Arc<dyn Transport>,
    token: watch::Sender<Option<Arc<BearerToken>>>,
}

impl DatabaseManager {
    pub fn new(cfg: StoreConfig, transport: Arc<dyn Transport>) -> Self {
        let (token, _) = watch::channel(None);
        Self {
            cfg,
            transport,
            token,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.cfg
    }

    pub fn token(&self) -> Option<Arc<BearerToken>> {
        self.token.borrow().clone()
    }

    /// Exchange credentials for a fresh token, then check the database answers.
    pub async fn connect(&self) -> Result<()> {
        let req = StoreRequest::new(Method::POST, "/_open/auth").json(json!({
            "username": self.cfg.username,
            "password": self.cfg.password,
        }));
        let resp = self.transport.send(req).await?;
        if !resp.is_success() {
            return Err(StoreError::Authentication(format!(
                "auth endpoint returned {}: {}",
                resp.status,
                resp.body_text()
            )));
        }
        let raw = resp
            .body
            .get("jwt")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::Authentication("auth response has no jwt".to_string()))?;
        let token = BearerToken::parse(raw)
            .map_err(|e| StoreError::Authentication(format!("unusable token: {e}")))?;
        let exp = token.expires_at_unix();
        self.token.send_replace(Some(Arc::new(token)));

        let resp = self
            .request(Method::GET, "/_api/database/current", Vec::new(), None)
            .await?;
        if !resp.is_success() {
            return Err(StoreError::Authentication(format!(
                "database {} not accessible: {}",
                self.cfg.database,
                resp.body_text()
            )));
        }

        debug!(database = %self.cfg.database, exp, "store token refreshed");
        Ok(())
    }

    /// Forever: keep a token that is at least `token_margin` from expiry.
    ///
    /// Failures are logged and retried on the poll cadence; requests in the
    /// meantime keep using the stale token.
    pub async fn token_refresh_loop(self: Arc<Self>) {
        loop {
            let Some(token) = self.token() else {
                tokio::time::sleep(self.cfg.token_poll).await;
                continue;
            };

            let now_ms = chrono::Utc::now().timestamp_millis();
            let remaining = token.refresh_delay(now_ms, self.cfg.token_margin);
            if !remaining.is_zero() {
                tokio::time::sleep(remaining).await;
            }

            match self.connect().await {
                Ok(()) => {
                    let Some(t) = self.token() else {
                        continue;
                    };
                    info!(exp = t.expires_at_unix(), "store token renewed");
                    let now_ms = chrono::Utc::now().timestamp_millis();
                    if t.refresh_delay(now_ms, self.cfg.token_margin).is_zero() {
                        // Lifetime shorter than the margin: renew on the poll cadence.
                        warn!(exp = t.expires_at_unix(), "store token expires inside the safety margin");
                        tokio::time::sleep(self.cfg.token_poll).await;
                    }
                }
                Err(e) => {
                    warn!(err = %e, retry_s = self.cfg.token_poll.as_secs_f64(), "store token renewal failed");
                    tokio::time::sleep(self.cfg.token_poll).await;
                }
            }
        }
    }

    fn db_path(&self, api_path: &str) -> String {
        format!("/_db/{}{}", self.cfg.database, api_path)
    }

    /// One authenticated round trip against the database.
    pub async fn request(
        &self,
        method: Method,
        api_path: &str,
        query: Vec<(&'static str, String)>,
        body: Option<Value>,
    ) -> Result<StoreResponse> {
        let Some(token) = self.token() else {
            return Err(StoreError::Authentication(
                "no token available; connect first".to_string(),
            ));
        };

        let mut req = StoreRequest::new(method, self.db_path(api_path));
        req.query = query;
        req.body = body;
        req.bearer = Some(token.raw().clone());

        let resp = self.transport.send(req).await?;
        if resp.status == 401 {
            return Err(StoreError::Authentication(resp.body_text()));
        }
        Ok(resp)
    }

    pub async fn collection_exists(&self, name: &str) -> Result<bool> {
        let resp = self
            .request(Method::GET, &format!("/_api/collection/{name}"), Vec::new(), None)
            .await?;
        match resp.status {
            404 => Ok(false),
            s if (200..300).contains(&s) => Ok(true),
            _ => Err(resp.into_http_error()),
        }
    }

    pub async fn create_collection(&self, name: &str, edge: bool) -> Result<()> {
        let mut schema = json!({ "name": name });
        if edge {
            schema["type"] = json!(3);
        }
        let resp = self
            .request(Method::POST, "/_api/collection", Vec::new(), Some(schema))
            .await?;
        if !resp.is_success() {
            return Err(resp.into_http_error());
        }
        Ok(())
    }

    pub async fn collection_count(&self, name: &str) -> Result<u64> {
        let resp = self
            .request(
                Method::GET,
                &format!("/_api/collection/{name}/count"),
                Vec::new(),
                None,
            )
            .await?;
        if resp.status == 404 {
            return Err(StoreError::NotFound(format!("collection {name}")));
        }
        if !resp.is_success() {
            return Err(resp.into_http_error());
        }
        resp.body
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| StoreError::Decode("count response has no count".to_string()))
    }

    /// Insert and return the stored body, server-assigned `_id`/`_key` included.
    pub async fn insert_document(&self, collection: &str, data: Value) -> Result<Value> {
        let resp = self
            .request(
                Method::POST,
                &format!("/_api/document/{collection}"),
                vec![("returnNew", "true".to_string())],
                Some(data),
            )
            .await?;
        match resp.status {
            201 | 202 => {}
            404 => return Err(StoreError::NotFound(format!("collection {collection}"))),
            409 => {
                return Err(StoreError::Validation(format!(
                    "document already exists in {collection}"
                )));
            }
            _ => return Err(resp.into_http_error()),
        }
        match resp.body {
            Value::Object(mut m) => m
                .remove("new")
                .ok_or_else(|| StoreError::Decode("insert response has no new body".to_string())),
            _ => Err(StoreError::Decode("insert response is not an object".to_string())),
        }
    }

    /// Fetch-by-id without proxy resolution.
    pub async fn get_document(&self, id: &DocumentId) -> Result<Value> {
        let resp = self
            .request(Method::GET, &format!("/_api/document/{id}"), Vec::new(), None)
            .await?;
        if resp.status == 404 {
            return Err(StoreError::NotFound(format!("document {id}")));
        }
        if !resp.is_success() {
            return Err(resp.into_http_error());
        }
        Ok(resp.body)
    }

    /// Merge-update. Null-valued keys remove the field (`keepNull=false`).
    pub async fn patch_document(&self, id: &DocumentId, patch: Value) -> Result<()> {
        let resp = self
            .request(
                Method::PATCH,
                &format!("/_api/document/{id}"),
                vec![("keepNull", "false".to_string())],
                Some(patch),
            )
            .await?;
        check_write(id, resp)
    }

    pub async fn replace_document(&self, id: &DocumentId, data: Value) -> Result<()> {
        let resp = self
            .request(
                Method::PUT,
                &format!("/_api/document/{id}"),
                Vec::new(),
                Some(data),
            )
            .await?;
        check_write(id, resp)
    }

    pub async fn delete_document(&self, id: &DocumentId) -> Result<()> {
        let resp = self
            .request(Method::DELETE, &format!("/_api/document/{id}"), Vec::new(), None)
            .await?;
        check_write(id, resp)
    }

    /// Start a query; the caller owns the cursor and must close it.
    pub async fn open_cursor(&self, statement: &str, bindings: Value) -> Result<Cursor<'_>> {
        let mut body = json!({
            "query": statement,
            "batchSize": self.cfg.cursor_batch.max(1),
        });
        if bindings.as_object().is_some_and(|m| !m.is_empty()) {
            body["bindVars"] = bindings;
        }
        let resp = self
            .request(Method::POST, "/_api/cursor", Vec::new(), Some(body))
            .await?;
        if resp.status != 201 {
            return Err(StoreError::Query(format!(
                "{} ({})",
                resp.body_text(),
                resp.status
            )));
        }
        Cursor::from_first_batch(self, resp.body)
    }

    /// Run a query to completion. The cursor is closed on every path.
    pub async fn query(&self, statement: &str, bindings: Value) -> Result<Vec<Value>> {
        let mut cursor = self.open_cursor(statement, bindings).await?;
        let mut out = Vec::new();
        let res = loop {
            match cursor.next().await {
                Ok(Some(doc)) => out.push(doc),
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        if let Err(e) = cursor.close().await {
            warn!(err = %e, "cursor release failed");
        }
        res.map(|()| out)
    }
}

fn check_write(id: &DocumentId, resp: StoreResponse) -> Result<()> {
    match resp.status {
        s if (200..300).contains(&s) => Ok(()),
        404 => Err(StoreError::NotFound(format!("document {id}"))),
        _ => Err(resp.into_http_error()),
    }
}
