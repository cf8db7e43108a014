//! Engine wired to an in-memory store, plus drivers for a connection and for
//! a character already in the world.

use std::sync::Arc;
use std::time::Duration;

use hearth_store::testing::{FakeState, FakeStore};
use hearth_store::{DatabaseManager, StoreConfig};
use mudproto::event::Event;
use mudproto::session::SessionId;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::context::{EngineContext, Settings};
use crate::entities::{Handle, object, user};
use crate::hub::session_key;
use crate::queries;
use crate::session::Connection;

fn bind<'a>(binds: &'a Value, name: &str) -> Result<&'a str, String> {
    binds
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing bind @{name}"))
}

fn drain_field(s: &mut FakeState, coll: &str, field: &str) -> Vec<Value> {
    let Some(docs) = s.docs_mut(coll) else {
        return Vec::new();
    };
    let now = chrono::Utc::now().timestamp_millis();
    let mut rows = Vec::new();
    for doc in docs.iter_mut() {
        let items = match doc.get(field) {
            Some(Value::Array(items)) if !items.is_empty() => items.clone(),
            _ => continue,
        };
        doc[field] = json!([]);
        doc["last_activity"] = json!(now);
        rows.push(json!([doc["_id"], items, doc.get("proxy").cloned().unwrap_or(Value::Null)]));
    }
    rows
}

fn push_field(s: &mut FakeState, field: &str, binds: &Value) -> Result<Vec<Value>, String> {
    let id = bind(binds, "id")?;
    let item = binds.get("item").cloned().ok_or("missing bind @item")?;
    let Some(doc) = s.doc_mut(id) else {
        return Ok(Vec::new());
    };
    if let Some(Value::Array(items)) = doc.get_mut(field) {
        items.push(item);
    } else {
        doc[field] = json!([item]);
    }
    Ok(vec![json!(id)])
}

fn name_of(doc: &Value, field: &str) -> String {
    doc.get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase()
}

/// Handlers standing in for every statement in [`queries`].
pub fn register_queries(fake: &FakeStore) {
    fake.on_query(queries::DRAIN_SESSION_INPUT, |s, _| Ok(drain_field(s, "session", "input")));
    fake.on_query(queries::DRAIN_PENDING_COMMANDS, |s, _| {
        Ok(drain_field(s, "object", "pending_commands"))
    });
    fake.on_query(queries::PUSH_SESSION_INPUT, |s, b| push_field(s, "input", b));
    fake.on_query(queries::PUSH_PENDING_COMMAND, |s, b| push_field(s, "pending_commands", b));
    fake.on_query(queries::FIND_USER, |s, b| {
        let wanted = bind(b, "username")?;
        Ok(s.docs("user")
            .iter()
            .filter(|d| name_of(d, "username") == wanted)
            .take(1)
            .cloned()
            .collect())
    });
    fake.on_query(queries::CLAIM_SUPERUSER, |s, b| {
        let id = bind(b, "id")?;
        let level = b.get("level").and_then(Value::as_i64).ok_or("missing bind @level")?;
        let held = s
            .docs("user")
            .iter()
            .any(|u| u.get("level").and_then(Value::as_i64).is_some_and(|l| l >= level));
        if held {
            return Ok(Vec::new());
        }
        let Some(doc) = s.doc_mut(id) else {
            return Ok(Vec::new());
        };
        doc["level"] = json!(level);
        Ok(vec![json!(id)])
    });
    fake.on_query(queries::USER_CHARACTERS, |s, b| {
        let user = bind(b, "user")?;
        let mut v = s
            .docs("object")
            .iter()
            .filter(|d| d.get("user_id").and_then(Value::as_str) == Some(user))
            .cloned()
            .collect::<Vec<_>>();
        v.sort_by_key(|d| d.get("name").and_then(Value::as_str).unwrap_or_default().to_string());
        Ok(v)
    });
    fake.on_query(queries::FIND_CHARACTER, |s, b| {
        let wanted = bind(b, "name")?;
        Ok(s.docs("object")
            .iter()
            .filter(|d| d["proxy"] == json!("character") && name_of(d, "name") == wanted)
            .take(1)
            .cloned()
            .collect())
    });
    fake.on_query(queries::CONTENTS, |s, b| {
        let container = bind(b, "container")?;
        Ok(s.docs("location")
            .iter()
            .filter(|e| e.get("_to").and_then(Value::as_str) == Some(container))
            .map(|e| {
                let from = e.get("_from").and_then(Value::as_str).unwrap_or_default();
                json!({
                    "object": s.doc(from).cloned().unwrap_or(Value::Null),
                    "kind": e.get("proxy").cloned().unwrap_or(Value::Null),
                })
            })
            .collect())
    });
    fake.on_query(queries::FIRST_ROOM, |s, _| {
        let mut rooms = s
            .docs("object")
            .iter()
            .filter(|d| d["proxy"] == json!("room"))
            .cloned()
            .collect::<Vec<_>>();
        rooms.sort_by_key(|d| d["_key"].as_str().unwrap_or_default().to_string());
        Ok(rooms.into_iter().take(1).collect())
    });
}

pub async fn engine_with(settings: Settings) -> (Arc<FakeStore>, Arc<EngineContext>) {
    let fake = FakeStore::new();
    register_queries(&fake);
    let db = Arc::new(DatabaseManager::new(StoreConfig::default(), fake.clone()));
    db.connect().await.unwrap();
    let ctx = EngineContext::new(db, settings).unwrap();
    ctx.initialize().await.unwrap();
    (fake, Arc::new(ctx))
}

pub async fn engine() -> (Arc<FakeStore>, Arc<EngineContext>) {
    engine_with(Settings::default()).await
}

fn text_of(ev: &Event) -> Option<String> {
    match ev {
        Event::Text { data } => Some(data.clone()),
        _ => None,
    }
}

/// A connection driven line by line, with everything it was sent.
pub struct Probe {
    pub conn: Connection,
    pub sid: SessionId,
    rx: mpsc::Receiver<Event>,
    pub inbound: mpsc::Receiver<String>,
    seen: Vec<Event>,
}

impl Probe {
    pub async fn connect(ctx: &Arc<EngineContext>) -> Self {
        let sid = SessionId::random().unwrap();
        let handle = ctx
            .collection("session")
            .unwrap()
            .create_proxy(json!({ "input": [] }), Some(&session_key(sid)))
            .await
            .unwrap();
        let (otx, rx) = mpsc::channel(256);
        let (itx, inbound) = mpsc::channel(256);
        ctx.hub().register(sid, otx.clone(), itx).await;
        let mut conn = Connection::new(ctx.clone(), sid, handle, otx);
        conn.start().await.unwrap();
        Self {
            conn,
            sid,
            rx,
            inbound,
            seen: Vec::new(),
        }
    }

    pub async fn line(&mut self, line: &str) {
        self.conn.dispatch(line).await.unwrap();
    }

    pub fn events(&mut self) -> &[Event] {
        while let Ok(ev) = self.rx.try_recv() {
            self.seen.push(ev);
        }
        &self.seen
    }

    pub fn texts(&mut self) -> Vec<String> {
        self.events().iter().filter_map(text_of).collect()
    }

    pub fn last_text(&mut self) -> String {
        self.texts().pop().unwrap_or_default()
    }

    /// Sign in through the login parser, creating the account if needed.
    pub async fn sign_in(&mut self, name: &str, password: &str) {
        let ctx = self.conn.context().clone();
        let existing = user::find_user(&ctx, name).await.unwrap().is_some();
        self.line(name).await;
        if !existing {
            self.line("yes").await;
            self.line(password).await;
        }
        self.line(password).await;
        assert!(self.conn.state().user.is_some(), "signed in as {name}");
    }
}

/// A character standing in the starting room, with its output captured.
pub struct Player {
    pub sid: SessionId,
    pub user: Handle,
    pub session: Handle,
    pub character: Handle,
    rx: mpsc::Receiver<Event>,
    _inbound: mpsc::Receiver<String>,
}

impl Player {
    pub async fn next_text(&mut self) -> String {
        loop {
            let ev = tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
                .await
                .expect("timed out waiting for output")
                .expect("outbound queue closed");
            if let Some(t) = text_of(&ev) {
                return t;
            }
        }
    }

    pub fn try_text(&mut self) -> Option<String> {
        while let Ok(ev) = self.rx.try_recv() {
            if let Some(t) = text_of(&ev) {
                return Some(t);
            }
        }
        None
    }
}

pub async fn playing(ctx: &Arc<EngineContext>, username: &str, name: &str) -> Player {
    let u = match user::find_user(ctx, username).await.unwrap() {
        Some(u) => u,
        None => user::create_user(ctx, username, "pw").await.unwrap().0,
    };
    let character = user::create_character(ctx, &u, name).await.unwrap();
    let sid = SessionId::random().unwrap();
    let session = ctx
        .collection("session")
        .unwrap()
        .create_proxy(json!({}), Some(&session_key(sid)))
        .await
        .unwrap();
    let (otx, rx) = mpsc::channel(256);
    let (itx, inbound) = mpsc::channel(256);
    ctx.hub().register(sid, otx, itx).await;
    let room = object::join_play(ctx, &character, &session, &u)
        .await
        .unwrap()
        .unwrap();
    ctx.hub()
        .set_character(sid, Some(name.to_string()), Some(room.id().to_string()))
        .await;
    Player {
        sid,
        user: u,
        session,
        character,
        rx,
        _inbound: inbound,
    }
}
