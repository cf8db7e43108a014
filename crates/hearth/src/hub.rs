use std::collections::HashMap;

use chrono::{DateTime, Utc};
use hearth_store::DocumentId;
use mudproto::event::Event;
use mudproto::session::SessionId;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

/// Session documents are keyed by the connection's id.
pub fn session_key(sid: SessionId) -> String {
    sid.to_string()
}

pub fn session_of(doc: &DocumentId) -> Option<SessionId> {
    if doc.collection() != "session" {
        return None;
    }
    doc.key().parse().ok()
}

struct Link {
    outbound: mpsc::Sender<Event>,
    inbound: mpsc::Sender<String>,
    user: Option<String>,
    character: Option<String>,
    room: Option<String>,
    connected_at: DateTime<Utc>,
}

/// Outcome of handing a line to a connection's task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    Delivered,
    /// The connection's inbound queue is full; the line was not taken.
    Busy(String),
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Online {
    pub session: SessionId,
    pub user: Option<String>,
    pub character: Option<String>,
    pub connected_at: DateTime<Utc>,
}

/// Live connections on this process, and which room each one is listening to.
#[derive(Default)]
pub struct Hub {
    links: Mutex<HashMap<SessionId, Link>>,
}

impl Hub {
    pub async fn register(
        &self,
        sid: SessionId,
        outbound: mpsc::Sender<Event>,
        inbound: mpsc::Sender<String>,
    ) {
        let link = Link {
            outbound,
            inbound,
            user: None,
            character: None,
            room: None,
            connected_at: Utc::now(),
        };
        self.links.lock().await.insert(sid, link);
    }

    pub async fn unregister(&self, sid: SessionId) -> bool {
        self.links.lock().await.remove(&sid).is_some()
    }

    pub async fn len(&self) -> usize {
        self.links.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn set_user(&self, sid: SessionId, user: Option<String>) {
        if let Some(l) = self.links.lock().await.get_mut(&sid) {
            l.user = user;
        }
    }

    pub async fn set_character(&self, sid: SessionId, character: Option<String>, room: Option<String>) {
        if let Some(l) = self.links.lock().await.get_mut(&sid) {
            l.character = character;
            l.room = room;
        }
    }

    /// Queue an event for one connection without waiting. `false` when it is
    /// gone or its outbound queue is full; a full queue drops the event.
    pub async fn send(&self, sid: SessionId, ev: Event) -> bool {
        let tx = self.links.lock().await.get(&sid).map(|l| l.outbound.clone());
        match tx {
            Some(tx) => offer(sid, &tx, ev),
            None => false,
        }
    }

    pub async fn send_to_session(&self, doc: &DocumentId, ev: Event) -> bool {
        match session_of(doc) {
            Some(sid) => self.send(sid, ev).await,
            None => false,
        }
    }

    /// Everyone listening to `room`, except `except`. Listeners whose
    /// outbound queue is full miss the event.
    pub async fn send_room(&self, room: &str, except: Option<SessionId>, ev: Event) -> usize {
        let targets = self
            .links
            .lock()
            .await
            .iter()
            .filter(|(sid, l)| l.room.as_deref() == Some(room) && Some(**sid) != except)
            .map(|(sid, l)| (*sid, l.outbound.clone()))
            .collect::<Vec<_>>();
        targets
            .into_iter()
            .filter(|(sid, tx)| offer(*sid, tx, ev.clone()))
            .count()
    }

    /// Hand a line to the connection's own task, which owns its parser stack.
    /// Never waits on a connection that is not keeping up.
    pub async fn route_line(&self, doc: &DocumentId, line: String) -> Routed {
        let Some(sid) = session_of(doc) else {
            return Routed::Offline;
        };
        let tx = self.links.lock().await.get(&sid).map(|l| l.inbound.clone());
        let Some(tx) = tx else {
            debug!(session = %doc, "line for a session not connected here");
            return Routed::Offline;
        };
        match tx.try_send(line) {
            Ok(()) => Routed::Delivered,
            Err(TrySendError::Full(line)) => Routed::Busy(line),
            Err(TrySendError::Closed(_)) => Routed::Offline,
        }
    }

    pub async fn online(&self) -> Vec<Online> {
        let mut v = self
            .links
            .lock()
            .await
            .iter()
            .map(|(sid, l)| Online {
                session: *sid,
                user: l.user.clone(),
                character: l.character.clone(),
                connected_at: l.connected_at,
            })
            .collect::<Vec<_>>();
        v.sort_by_key(|o| o.connected_at);
        v
    }
}

fn offer(sid: SessionId, tx: &mpsc::Sender<Event>, ev: Event) -> bool {
    match tx.try_send(ev) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(session = %sid, "outbound queue full, dropping event");
            false
        }
        Err(TrySendError::Closed(_)) => false,
    }
}
