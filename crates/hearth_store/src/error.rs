use thiserror::Error;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Everything the data-access layer can fail with.
///
/// The first five variants are the domain taxonomy callers branch on; the rest
/// describe a store or network that misbehaved.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// No token has been obtained yet, or the store rejected the one we sent.
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The record has no `proxy` tag, or the tag is not registered.
    #[error("document {id} cannot be resolved: {}", unknown_proxy_reason(.tag))]
    UnknownProxy { id: String, tag: Option<String> },

    /// Malformed statement or bindings, or a cursor that went away mid-stream.
    #[error("query failed: {0}")]
    Query(String),

    /// Domain-level rejection: duplicate identity, unusable credential, bad shape.
    #[error("{0}")]
    Validation(String),

    #[error("store returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("store unreachable: {0}")]
    Transport(String),

    #[error("malformed store response: {0}")]
    Decode(String),

    #[error("invalid document id {0:?}")]
    InvalidId(String),
}

fn unknown_proxy_reason(tag: &Option<String>) -> String {
    match tag {
        Some(t) => format!("proxy {t:?} is not registered"),
        None => "record has no proxy tag".to_string(),
    }
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, StoreError::Authentication(_))
    }
}
