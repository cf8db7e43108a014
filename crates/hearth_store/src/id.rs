use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Immutable `collection/key` address of a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId {
    full: String,
    split: usize,
}

impl DocumentId {
    pub fn new(collection: &str, key: &str) -> Result<Self, StoreError> {
        Self::parse(&format!("{collection}/{key}"))
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        let s = s.trim();
        let Some(split) = s.find('/') else {
            return Err(StoreError::InvalidId(s.to_string()));
        };
        let (collection, key) = (&s[..split], &s[split + 1..]);
        if !valid_part(collection) || !valid_part(key) {
            return Err(StoreError::InvalidId(s.to_string()));
        }
        Ok(Self {
            full: s.to_string(),
            split,
        })
    }

    pub fn collection(&self) -> &str {
        &self.full[..self.split]
    }

    pub fn key(&self) -> &str {
        &self.full[self.split + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.full
    }
}

fn valid_part(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 254
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"_-:.@()+,=;$!*'%".contains(&b))
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

impl FromStr for DocumentId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DocumentId {
    type Error = StoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        id.full
    }
}

#[cfg(test)]
mod tests {
    use super::DocumentId;

    #[test]
    fn parses_collection_and_key() {
        let id: DocumentId = "object/123".parse().unwrap();
        assert_eq!(id.collection(), "object");
        assert_eq!(id.key(), "123");
        assert_eq!(id.to_string(), "object/123");
        assert_eq!(DocumentId::new("session", "ab-12").unwrap().as_str(), "session/ab-12");
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(DocumentId::parse("").is_err());
        assert!(DocumentId::parse("object").is_err());
        assert!(DocumentId::parse("/1").is_err());
        assert!(DocumentId::parse("object/").is_err());
        assert!(DocumentId::parse("object/1/2").is_err());
        assert!(DocumentId::parse("obj ect/1").is_err());
    }

    #[test]
    fn serde_uses_plain_string() {
        let id = DocumentId::parse("user/7").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"user/7\"");
        let back: DocumentId = serde_json::from_str("\"user/7\"").unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<DocumentId>("\"nope\"").is_err());
    }
}
