//! Events cross the transport boundary as `(event, payload)` pairs; the same
//! pair, serialized as a two-element JSON array, is what sits in a session's
//! persisted `input` queue.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::ProtoError;

pub const COMMAND: &str = "Command";
pub const TEXT: &str = "Text";
pub const GMCP: &str = "GMCP";
pub const TABLE: &str = "Table";

/// An event name plus an untyped payload. Unknown names are legal here; it is
/// up to the receiver's event registry to accept or reject them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(String, Value)", into = "(String, Value)")]
pub struct Envelope {
    pub event: String,
    pub payload: Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    /// `Command {data: line}`: the shape a typed line arrives in.
    pub fn command(line: &str) -> Self {
        Event::Command {
            data: line.to_string(),
        }
        .into_envelope()
    }
}

impl From<(String, Value)> for Envelope {
    fn from((event, payload): (String, Value)) -> Self {
        Self { event, payload }
    }
}

impl From<Envelope> for (String, Value) {
    fn from(e: Envelope) -> Self {
        (e.event, e.payload)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Command {
        data: String,
    },
    Text {
        data: String,
    },
    Gmcp {
        cmd: String,
        data: Value,
    },
    Table {
        title: String,
        columns: Vec<String>,
        rows: Vec<Vec<String>>,
    },
}

impl Event {
    pub fn text(data: impl Into<String>) -> Self {
        Event::Text { data: data.into() }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::Command { .. } => COMMAND,
            Event::Text { .. } => TEXT,
            Event::Gmcp { .. } => GMCP,
            Event::Table { .. } => TABLE,
        }
    }

    pub fn into_envelope(self) -> Envelope {
        let name = self.name();
        let payload = match self {
            Event::Command { data } | Event::Text { data } => json!({ "data": data }),
            Event::Gmcp { cmd, data } => json!({ "cmd": cmd, "data": data }),
            Event::Table {
                title,
                columns,
                rows,
            } => json!({ "title": title, "columns": columns, "rows": rows }),
        };
        Envelope::new(name, payload)
    }
}

fn str_field(payload: &Value, name: &str) -> Result<String, ProtoError> {
    payload
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProtoError::Malformed(format!("missing string field {name:?}")))
}

impl TryFrom<Envelope> for Event {
    type Error = ProtoError;

    fn try_from(e: Envelope) -> Result<Self, Self::Error> {
        let p = &e.payload;
        match e.event.as_str() {
            COMMAND => Ok(Event::Command {
                data: str_field(p, "data")?,
            }),
            TEXT => Ok(Event::Text {
                data: str_field(p, "data")?,
            }),
            GMCP => Ok(Event::Gmcp {
                cmd: str_field(p, "cmd")?,
                data: p.get("data").cloned().unwrap_or(Value::Null),
            }),
            TABLE => {
                let columns = p
                    .get("columns")
                    .cloned()
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(|err| ProtoError::Malformed(format!("table columns: {err}")))?
                    .unwrap_or_default();
                let rows = p
                    .get("rows")
                    .cloned()
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(|err| ProtoError::Malformed(format!("table rows: {err}")))?
                    .unwrap_or_default();
                Ok(Event::Table {
                    title: str_field(p, "title").unwrap_or_default(),
                    columns,
                    rows,
                })
            }
            other => Err(ProtoError::UnknownEvent(other.to_string())),
        }
    }
}
