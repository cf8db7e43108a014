//! `mudproto`: the small vocabulary shared by the engine and whatever carries
//! its connections.
//!
//! - [`session`]: opaque per-connection ids,
//! - [`event`]: the `(event, payload)` envelope and the typed events the engine emits,
//! - [`line`]: CRLF/LF line framing plus plain-text rendering of outbound events.

pub mod event;
pub mod line;
pub mod session;

#[derive(Debug, Clone)]
pub enum ProtoError {
    UnknownEvent(String),
    Malformed(String),
}

impl std::fmt::Display for ProtoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtoError::UnknownEvent(e) => write!(f, "unknown event: {e:?}"),
            ProtoError::Malformed(s) => write!(f, "malformed event: {s}"),
        }
    }
}

impl std::error::Error for ProtoError {}
