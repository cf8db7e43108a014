//! In-memory stand-in for the document store, speaking the same HTTP-shaped
//! protocol through the [`Transport`] seam.
//!
//! Queries are not parsed: each statement the code under test issues gets a
//! handler registered with [`FakeStore::on_query`]. A handler runs with the
//! whole state locked, which is how the fake models a statement that the real
//! store executes atomically.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{Map, Value, json};

use crate::error::{Result, StoreError};
use crate::transport::{Method, StoreRequest, StoreResponse, Transport};

/// Built in: every record of one collection, in insertion order.
pub const ALL_DOCUMENTS: &str = "FOR doc IN @@collection RETURN doc";

pub type QueryHandler =
    Arc<dyn Fn(&mut FakeState, &Value) -> std::result::Result<Vec<Value>, String> + Send + Sync>;

struct FakeCollection {
    edge: bool,
    docs: Vec<Value>,
}

struct FakeCursor {
    rows: VecDeque<Value>,
    batch: usize,
}

/// Store contents, visible to query handlers and to `with_state`.
pub struct FakeState {
    collections: HashMap<String, FakeCollection>,
    next_key: u64,
    cursors: HashMap<String, FakeCursor>,
    next_cursor: u64,
    tokens: HashSet<String>,
    token_lifetime: Duration,
    issued: u64,
    reject_auth: bool,
    offline: bool,
    auth_count: usize,
    requests: Vec<(Method, String)>,
}

impl FakeState {
    fn split_id(id: &str) -> Option<(&str, &str)> {
        id.split_once('/')
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    pub fn docs(&self, collection: &str) -> &[Value] {
        self.collections
            .get(collection)
            .map(|c| c.docs.as_slice())
            .unwrap_or(&[])
    }

    pub fn docs_mut(&mut self, collection: &str) -> Option<&mut Vec<Value>> {
        self.collections.get_mut(collection).map(|c| &mut c.docs)
    }

    pub fn doc(&self, id: &str) -> Option<&Value> {
        let (coll, key) = Self::split_id(id)?;
        self.docs(coll).iter().find(|d| d["_key"] == key)
    }

    pub fn doc_mut(&mut self, id: &str) -> Option<&mut Value> {
        let (coll, key) = Self::split_id(id)?;
        self.docs_mut(coll)?.iter_mut().find(|d| d["_key"] == key)
    }

    pub fn remove(&mut self, id: &str) -> Option<Value> {
        let (coll, key) = Self::split_id(id)?;
        let docs = self.docs_mut(coll)?;
        let pos = docs.iter().position(|d| d["_key"] == key)?;
        Some(docs.remove(pos))
    }

    /// Insert with store-assigned `_key`/`_id`/`_rev` unless a `_key` is given.
    pub fn insert(&mut self, collection: &str, data: Value) -> std::result::Result<Value, (u16, String)> {
        let Value::Object(mut m) = data else {
            return Err((400, "document must be an object".to_string()));
        };
        let Some(c) = self.collections.get(collection) else {
            return Err((404, format!("collection {collection} not found")));
        };
        if c.edge && !(m.get("_from").is_some_and(Value::is_string) && m.get("_to").is_some_and(Value::is_string)) {
            return Err((400, "edge attribute missing or invalid".to_string()));
        }
        let key = match m.get("_key").and_then(Value::as_str) {
            Some(k) => k.to_string(),
            None => {
                self.next_key += 1;
                self.next_key.to_string()
            }
        };
        let id = format!("{collection}/{key}");
        if self.doc(&id).is_some() {
            return Err((409, "unique constraint violated".to_string()));
        }
        m.insert("_key".to_string(), json!(key));
        m.insert("_id".to_string(), json!(id));
        m.insert("_rev".to_string(), json!(format!("r{}", self.next_key)));
        let doc = Value::Object(m);
        if let Some(c) = self.collections.get_mut(collection) {
            c.docs.push(doc.clone());
        }
        Ok(doc)
    }

    fn token_valid(&self, bearer: Option<&str>) -> bool {
        let Some(tok) = bearer else {
            return false;
        };
        if !self.tokens.contains(tok) {
            return false;
        }
        crate::token::BearerToken::parse(tok)
            .map(|t| !t.is_expired(chrono::Utc::now().timestamp_millis()))
            .unwrap_or(false)
    }

    fn issue_token(&mut self) -> String {
        self.issued += 1;
        let exp = chrono::Utc::now().timestamp() + self.token_lifetime.as_secs() as i64;
        let enc = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let tok = format!(
            "{}.{}.{}",
            enc.encode(br#"{"alg":"HS256","typ":"JWT"}"#),
            enc.encode(json!({ "exp": exp, "iss": "fake", "n": self.issued }).to_string()),
            enc.encode(b"unsigned")
        );
        self.tokens.insert(tok.clone());
        tok
    }
}

pub struct FakeStore {
    state: Mutex<FakeState>,
    handlers: Mutex<HashMap<String, QueryHandler>>,
}

fn normalize(statement: &str) -> String {
    statement.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn error(status: u16, msg: impl Into<String>) -> StoreResponse {
    StoreResponse {
        status,
        body: json!({ "error": true, "code": status, "errorMessage": msg.into() }),
    }
}

fn ok(status: u16, body: Value) -> StoreResponse {
    StoreResponse { status, body }
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        let store = Self {
            state: Mutex::new(FakeState {
                collections: HashMap::new(),
                next_key: 0,
                cursors: HashMap::new(),
                next_cursor: 0,
                tokens: HashSet::new(),
                token_lifetime: Duration::from_secs(3600),
                issued: 0,
                reject_auth: false,
                offline: false,
                auth_count: 0,
                requests: Vec::new(),
            }),
            handlers: Mutex::new(HashMap::new()),
        };
        store.on_query(ALL_DOCUMENTS, |s, binds| {
            let coll = binds
                .get("@collection")
                .and_then(Value::as_str)
                .ok_or("missing bind @collection")?;
            if !s.has_collection(coll) {
                return Err(format!("collection or view not found: {coll}"));
            }
            Ok(s.docs(coll).to_vec())
        });
        Arc::new(store)
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn on_query(
        &self,
        statement: &str,
        handler: impl Fn(&mut FakeState, &Value) -> std::result::Result<Vec<Value>, String>
            + Send
            + Sync
            + 'static,
    ) {
        self.handlers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(normalize(statement), Arc::new(handler));
    }

    pub fn create_collection(&self, name: &str, edge: bool) {
        self.lock()
            .collections
            .entry(name.to_string())
            .or_insert_with(|| FakeCollection {
                edge,
                docs: Vec::new(),
            });
    }

    pub fn insert(&self, collection: &str, data: Value) -> Value {
        match self.lock().insert(collection, data) {
            Ok(doc) => doc,
            Err((status, msg)) => panic!("fake insert into {collection} failed ({status}): {msg}"),
        }
    }

    pub fn doc(&self, id: &str) -> Option<Value> {
        self.lock().doc(id).cloned()
    }

    pub fn reject_auth(&self, reject: bool) {
        self.lock().reject_auth = reject;
    }

    /// Invalidate every token handed out so far.
    pub fn expire_tokens(&self) {
        self.lock().tokens.clear();
    }

    pub fn set_token_lifetime(&self, lifetime: Duration) {
        self.lock().token_lifetime = lifetime;
    }

    /// Authentication attempts, successful or not.
    pub fn auth_count(&self) -> usize {
        self.lock().auth_count
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn requests(&self) -> Vec<(Method, String)> {
        self.lock().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.lock().requests.clear();
    }

    pub fn open_cursors(&self) -> usize {
        self.lock().cursors.len()
    }

    fn run_query(&self, body: &Value) -> StoreResponse {
        let Some(statement) = body.get("query").and_then(Value::as_str) else {
            return error(400, "query is empty");
        };
        let binds = body.get("bindVars").cloned().unwrap_or_else(|| json!({}));
        let batch = body
            .get("batchSize")
            .and_then(Value::as_u64)
            .unwrap_or(1000)
            .max(1) as usize;

        let handler = self
            .handlers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&normalize(statement))
            .cloned();
        let Some(handler) = handler else {
            return error(400, format!("AQL: syntax error near '{statement}'"));
        };

        let mut st = self.lock();
        let mut rows = match handler(&mut st, &binds) {
            Ok(rows) => VecDeque::from(rows),
            Err(msg) => return error(400, msg),
        };
        if rows.len() <= batch {
            return ok(201, json!({ "result": Vec::from(rows), "hasMore": false }));
        }
        let first = rows.drain(..batch).collect::<Vec<_>>();
        st.next_cursor += 1;
        let id = st.next_cursor.to_string();
        st.cursors.insert(id.clone(), FakeCursor { rows, batch });
        ok(201, json!({ "id": id, "result": first, "hasMore": true }))
    }

    fn next_batch(&self, id: &str) -> StoreResponse {
        let mut st = self.lock();
        let Some(c) = st.cursors.get_mut(id) else {
            return error(404, "cursor not found");
        };
        let n = c.batch.min(c.rows.len());
        let result = c.rows.drain(..n).collect::<Vec<_>>();
        let has_more = !c.rows.is_empty();
        if !has_more {
            st.cursors.remove(id);
        }
        ok(200, json!({ "id": id, "result": result, "hasMore": has_more }))
    }

    fn handle_document(&self, method: &Method, rest: &[&str], query: &[(&str, String)], body: Option<Value>) -> StoreResponse {
        let mut st = self.lock();
        match rest {
            [coll] if *method == Method::POST => {
                let return_new = query.iter().any(|(k, v)| *k == "returnNew" && v == "true");
                match st.insert(coll, body.unwrap_or(Value::Null)) {
                    Ok(doc) => {
                        let mut out = json!({ "_id": doc["_id"], "_key": doc["_key"], "_rev": doc["_rev"] });
                        if return_new {
                            out["new"] = doc;
                        }
                        ok(202, out)
                    }
                    Err((status, msg)) => error(status, msg),
                }
            }
            [coll, key] => {
                let id = format!("{coll}/{key}");
                if *method == Method::GET {
                    return match st.doc(&id) {
                        Some(d) => ok(200, d.clone()),
                        None => error(404, "document not found"),
                    };
                }
                if *method == Method::DELETE {
                    return match st.remove(&id) {
                        Some(d) => ok(200, json!({ "_id": d["_id"], "_key": d["_key"] })),
                        None => error(404, "document not found"),
                    };
                }
                let keep_null = !query.iter().any(|(k, v)| *k == "keepNull" && v == "false");
                let Some(Value::Object(incoming)) = body else {
                    return error(400, "body must be an object");
                };
                let Some(Value::Object(doc)) = st.doc_mut(&id) else {
                    return error(404, "document not found");
                };
                if *method == Method::PUT {
                    let system = ["_id", "_key", "_rev"]
                        .iter()
                        .filter_map(|k| doc.get(*k).map(|v| (k.to_string(), v.clone())))
                        .collect::<Map<_, _>>();
                    *doc = incoming;
                    doc.extend(system);
                } else if *method == Method::PATCH {
                    for (k, v) in incoming {
                        if matches!(k.as_str(), "_id" | "_key" | "_rev") {
                            continue;
                        }
                        if v.is_null() && !keep_null {
                            doc.remove(&k);
                        } else {
                            doc.insert(k, v);
                        }
                    }
                } else {
                    return error(405, "method not supported");
                }
                ok(202, json!({ "_id": id }))
            }
            _ => error(404, "unknown path"),
        }
    }

    fn handle_collection(&self, method: &Method, rest: &[&str], body: Option<Value>) -> StoreResponse {
        let mut st = self.lock();
        match rest {
            [] if *method == Method::POST => {
                let body = body.unwrap_or(Value::Null);
                let Some(name) = body.get("name").and_then(Value::as_str) else {
                    return error(400, "collection name missing");
                };
                if st.has_collection(name) {
                    return error(409, "duplicate name");
                }
                let edge = body.get("type").and_then(Value::as_u64) == Some(3);
                st.collections.insert(
                    name.to_string(),
                    FakeCollection {
                        edge,
                        docs: Vec::new(),
                    },
                );
                ok(200, json!({ "name": name, "type": if edge { 3 } else { 2 } }))
            }
            [name] if *method == Method::GET => match st.collections.get(*name) {
                Some(c) => ok(200, json!({ "name": name, "type": if c.edge { 3 } else { 2 } })),
                None => error(404, "collection or view not found"),
            },
            [name, "count"] if *method == Method::GET => match st.collections.get(*name) {
                Some(c) => ok(200, json!({ "name": name, "count": c.docs.len() })),
                None => error(404, "collection or view not found"),
            },
            _ => error(404, "unknown path"),
        }
    }

    fn route(&self, req: StoreRequest) -> StoreResponse {
        if req.path == "/_open/auth" && req.method == Method::POST {
            let mut st = self.lock();
            st.auth_count += 1;
            if st.reject_auth {
                return error(401, "Wrong credentials");
            }
            let jwt = st.issue_token();
            return ok(200, json!({ "jwt": jwt }));
        }

        let Some(after_db) = req.path.strip_prefix("/_db/") else {
            return error(404, "unknown path");
        };
        let (db, api) = after_db.split_once('/').unwrap_or((after_db, ""));
        if !self.lock().token_valid(req.bearer.as_deref()) {
            return error(401, "not authorized to execute this request");
        }
        let segments = api.split('/').filter(|s| !s.is_empty()).collect::<Vec<_>>();
        let method = req.method.clone();
        match segments.as_slice() {
            ["_api", "database", "current"] => ok(200, json!({ "result": { "name": db } })),
            ["_api", "collection", rest @ ..] => self.handle_collection(&method, rest, req.body),
            ["_api", "document", rest @ ..] => {
                self.handle_document(&method, rest, &req.query, req.body)
            }
            ["_api", "cursor"] if method == Method::POST => {
                self.run_query(&req.body.unwrap_or(Value::Null))
            }
            ["_api", "cursor", id] if method == Method::POST => self.next_batch(id),
            ["_api", "cursor", id] if method == Method::DELETE => {
                match self.lock().cursors.remove(*id) {
                    Some(_) => ok(202, json!({ "id": id })),
                    None => error(404, "cursor not found"),
                }
            }
            _ => error(404, "unknown path"),
        }
    }
}

#[async_trait]
impl Transport for FakeStore {
    async fn send(&self, req: StoreRequest) -> Result<StoreResponse> {
        {
            let mut st = self.lock();
            if st.offline {
                return Err(StoreError::Transport("connection refused".to_string()));
            }
            st.requests.push((req.method.clone(), req.path.clone()));
        }
        Ok(self.route(req))
    }
}
