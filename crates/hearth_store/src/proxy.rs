//! Tag-driven hydration of records into typed handles.
//!
//! Every resolvable record carries a string `proxy` field. The registry maps
//! that tag to a constructor of the caller's behavior trait object (`B` is
//! typically `dyn SomeTrait`). There is no fallback type: a missing or
//! unregistered tag is always [`StoreError::UnknownProxy`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::client::DatabaseManager;
use crate::error::{Result, StoreError};
use crate::id::DocumentId;

pub const PROXY_FIELD: &str = "proxy";

pub type ProxyConstructor<B> = fn() -> Arc<B>;

/// Tag → constructor. Built once at boot, read-only afterwards.
pub struct ProxyRegistry<B: ?Sized> {
    ctors: HashMap<String, ProxyConstructor<B>>,
}

pub struct ProxyRegistryBuilder<B: ?Sized> {
    ctors: HashMap<String, ProxyConstructor<B>>,
}

impl<B: ?Sized> ProxyRegistry<B> {
    pub fn builder() -> ProxyRegistryBuilder<B> {
        ProxyRegistryBuilder {
            ctors: HashMap::new(),
        }
    }

    pub fn construct(&self, tag: &str) -> Option<Arc<B>> {
        self.ctors.get(tag).map(|ctor| ctor())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.ctors.contains_key(tag)
    }

    pub fn tags(&self) -> Vec<&str> {
        let mut v = self.ctors.keys().map(String::as_str).collect::<Vec<_>>();
        v.sort_unstable();
        v
    }

    pub fn len(&self) -> usize {
        self.ctors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ctors.is_empty()
    }
}

impl<B: ?Sized> ProxyRegistryBuilder<B> {
    /// Registering the same tag twice is a boot-time bug, not an override.
    pub fn register(mut self, tag: &str, ctor: ProxyConstructor<B>) -> Result<Self> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(StoreError::Validation("proxy tag must not be empty".to_string()));
        }
        if self.ctors.insert(tag.to_string(), ctor).is_some() {
            return Err(StoreError::Validation(format!(
                "proxy tag {tag:?} registered twice"
            )));
        }
        Ok(self)
    }

    pub fn build(self) -> ProxyRegistry<B> {
        ProxyRegistry { ctors: self.ctors }
    }
}

/// The data client plus the registry: everything needed to turn a record
/// into a handle. Cheap to clone.
pub struct ProxyStore<B: ?Sized> {
    db: Arc<DatabaseManager>,
    registry: Arc<ProxyRegistry<B>>,
}

impl<B: ?Sized> Clone for ProxyStore<B> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl<B: ?Sized + Send + Sync + 'static> ProxyStore<B> {
    pub fn new(db: Arc<DatabaseManager>, registry: Arc<ProxyRegistry<B>>) -> Self {
        Self { db, registry }
    }

    pub fn db(&self) -> &Arc<DatabaseManager> {
        &self.db
    }

    pub fn registry(&self) -> &ProxyRegistry<B> {
        &self.registry
    }

    /// Hydrate a record already in hand. Reads only `_id` and `proxy`.
    pub fn get_proxy(&self, record: &Value) -> Result<DocumentProxy<B>> {
        let raw_id = record
            .get("_id")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::Decode("record has no _id".to_string()))?;
        let id = DocumentId::parse(raw_id)?;
        let tag = record.get(PROXY_FIELD).and_then(Value::as_str);
        self.handle(id, tag)
    }

    /// Build a handle from an id and a tag obtained elsewhere (e.g. a drain result).
    pub fn handle(&self, id: DocumentId, tag: Option<&str>) -> Result<DocumentProxy<B>> {
        let Some(tag) = tag.map(str::trim).filter(|t| !t.is_empty()) else {
            return Err(StoreError::UnknownProxy {
                id: id.to_string(),
                tag: None,
            });
        };
        let Some(behavior) = self.registry.construct(tag) else {
            return Err(StoreError::UnknownProxy {
                id: id.to_string(),
                tag: Some(tag.to_string()),
            });
        };
        Ok(DocumentProxy {
            id,
            tag: tag.to_string(),
            behavior,
            store: self.clone(),
        })
    }

    /// Fetch-by-id and hydrate.
    pub async fn get_document(&self, id: &DocumentId) -> Result<DocumentProxy<B>> {
        let record = self.db.get_document(id).await?;
        self.get_proxy(&record)
    }

    /// Run a query whose rows are full records, hydrating each one.
    pub async fn query_proxy(&self, statement: &str, bindings: Value) -> Result<Vec<DocumentProxy<B>>> {
        self.db
            .query(statement, bindings)
            .await?
            .iter()
            .map(|record| self.get_proxy(record))
            .collect()
    }
}

/// Ephemeral handle on one document: id + behavior + a way back to the store.
///
/// Holds no document content. Any number of handles may point at the same id;
/// they see each other's writes only through the store.
pub struct DocumentProxy<B: ?Sized> {
    id: DocumentId,
    tag: String,
    behavior: Arc<B>,
    store: ProxyStore<B>,
}

impl<B: ?Sized> Clone for DocumentProxy<B> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            tag: self.tag.clone(),
            behavior: self.behavior.clone(),
            store: self.store.clone(),
        }
    }
}

impl<B: ?Sized> fmt::Debug for DocumentProxy<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} ({})>", self.tag, self.id)
    }
}

impl<B: ?Sized> fmt::Display for DocumentProxy<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.id, f)
    }
}

impl<B: ?Sized + Send + Sync + 'static> DocumentProxy<B> {
    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn behavior(&self) -> &Arc<B> {
        &self.behavior
    }

    pub fn store(&self) -> &ProxyStore<B> {
        &self.store
    }

    pub fn db(&self) -> &DatabaseManager {
        &self.store.db
    }

    /// The full stored record, freshly fetched.
    pub async fn document(&self) -> Result<Value> {
        self.store.db.get_document(&self.id).await
    }

    /// One field, `None` when absent. Store failures propagate; they are not
    /// reported as a missing field.
    pub async fn get_field(&self, name: &str) -> Result<Option<Value>> {
        let mut doc = self.document().await?;
        Ok(match doc.get_mut(name).map(Value::take) {
            Some(Value::Null) | None => None,
            Some(v) => Some(v),
        })
    }

    pub async fn get_field_or(&self, name: &str, default: Value) -> Result<Value> {
        Ok(self.get_field(name).await?.unwrap_or(default))
    }

    pub async fn get_field_as<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.get_field(name).await? {
            None => Ok(None),
            Some(v) => serde_json::from_value(v)
                .map(Some)
                .map_err(|e| StoreError::Decode(format!("{}.{name}: {e}", self.id))),
        }
    }

    /// Write one field. `Value::Null` removes the key instead of storing a null.
    pub async fn set_field(&self, name: &str, value: Value) -> Result<()> {
        self.patch(json!({ name: value })).await
    }

    /// Store another handle's id under `name`, or remove the field.
    pub async fn set_reference(&self, name: &str, target: Option<&DocumentProxy<B>>) -> Result<()> {
        let value = match target {
            Some(t) => Value::String(t.id.to_string()),
            None => Value::Null,
        };
        self.set_field(name, value).await
    }

    /// Follow a reference-valued field and hydrate its target.
    pub async fn get_proxy(&self, name: &str) -> Result<Option<DocumentProxy<B>>> {
        let Some(v) = self.get_field(name).await? else {
            return Ok(None);
        };
        let Some(raw) = v.as_str() else {
            return Err(StoreError::Decode(format!(
                "{}.{name} is not a document reference",
                self.id
            )));
        };
        let target = DocumentId::parse(raw)?;
        self.store.get_document(&target).await.map(Some)
    }

    /// Re-type this handle.
    ///
    /// With `save = false` nothing is written: the caller must include the new
    /// tag in its own write, or the stored and in-memory types diverge.
    pub async fn change_proxy(&mut self, tag: &str, save: bool) -> Result<()> {
        let Some(behavior) = self.store.registry.construct(tag) else {
            return Err(StoreError::UnknownProxy {
                id: self.id.to_string(),
                tag: Some(tag.to_string()),
            });
        };
        if save {
            self.set_field(PROXY_FIELD, Value::String(tag.to_string()))
                .await?;
        }
        self.behavior = behavior;
        self.tag = tag.to_string();
        Ok(())
    }

    pub async fn patch(&self, patch: Value) -> Result<()> {
        self.store.db.patch_document(&self.id, patch).await
    }

    pub async fn replace(&self, data: Value) -> Result<()> {
        self.store.db.replace_document(&self.id, data).await
    }

    pub async fn delete(&self) -> Result<()> {
        self.store.db.delete_document(&self.id).await
    }
}
