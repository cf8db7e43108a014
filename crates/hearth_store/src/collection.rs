use serde_json::{Value, json};
use tracing::info;

use crate::error::{Result, StoreError};
use crate::proxy::{DocumentProxy, PROXY_FIELD, ProxyStore};

const ALL_DOCUMENTS: &str = "FOR doc IN @@collection RETURN doc";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    pub name: String,
    pub edge: bool,
    /// Tag stamped on new documents that arrive without one.
    pub default_proxy: Option<String>,
}

impl CollectionSpec {
    pub fn document(name: &str) -> Self {
        Self {
            name: name.to_string(),
            edge: false,
            default_proxy: Some(name.to_string()),
        }
    }

    pub fn edge(name: &str) -> Self {
        Self {
            edge: true,
            ..Self::document(name)
        }
    }

    pub fn untagged(mut self) -> Self {
        self.default_proxy = None;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Created {
    New,
    AlreadyExisted,
}

/// Provisioning and creation for one named collection.
pub struct CollectionManager<B: ?Sized> {
    spec: CollectionSpec,
    store: ProxyStore<B>,
}

impl<B: ?Sized> Clone for CollectionManager<B> {
    fn clone(&self) -> Self {
        Self {
            spec: self.spec.clone(),
            store: self.store.clone(),
        }
    }
}

impl<B: ?Sized + Send + Sync + 'static> CollectionManager<B> {
    pub fn new(store: ProxyStore<B>, spec: CollectionSpec) -> Self {
        Self { spec, store }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &CollectionSpec {
        &self.spec
    }

    pub fn store(&self) -> &ProxyStore<B> {
        &self.store
    }

    /// Create the collection unless it is already there.
    ///
    /// Probe-then-create: two processes booting against an empty store at the
    /// same moment can both see "absent", and the loser's create fails.
    pub async fn create_collection(&self) -> Result<Created> {
        let db = self.store.db();
        if db.collection_exists(&self.spec.name).await? {
            return Ok(Created::AlreadyExisted);
        }
        db.create_collection(&self.spec.name, self.spec.edge).await?;
        info!(collection = %self.spec.name, edge = self.spec.edge, "collection created");
        Ok(Created::New)
    }

    pub async fn count(&self) -> Result<u64> {
        self.store.db().collection_count(&self.spec.name).await
    }

    /// Insert, stamping the default tag when the caller set none. Returns the
    /// stored record with its server-assigned identifiers.
    pub async fn create_document(&self, data: Value, key: Option<&str>) -> Result<Value> {
        let Value::Object(mut m) = data else {
            return Err(StoreError::Validation(format!(
                "new {} document must be an object",
                self.spec.name
            )));
        };
        if let Some(key) = key {
            m.insert("_key".to_string(), json!(key));
        }
        let untagged = !m
            .get(PROXY_FIELD)
            .and_then(Value::as_str)
            .is_some_and(|t| !t.trim().is_empty());
        if untagged {
            if let Some(tag) = self.spec.default_proxy.as_deref() {
                m.insert(PROXY_FIELD.to_string(), json!(tag));
            }
        }
        self.store
            .db()
            .insert_document(&self.spec.name, Value::Object(m))
            .await
    }

    /// `create_document`, hydrated.
    pub async fn create_proxy(&self, data: Value, key: Option<&str>) -> Result<DocumentProxy<B>> {
        let record = self.create_document(data, key).await?;
        self.store.get_proxy(&record)
    }

    pub async fn all(&self) -> Result<Vec<Value>> {
        self.store
            .db()
            .query(ALL_DOCUMENTS, json!({ "@collection": self.spec.name }))
            .await
    }

    pub async fn all_proxy(&self) -> Result<Vec<DocumentProxy<B>>> {
        self.store
            .query_proxy(ALL_DOCUMENTS, json!({ "@collection": self.spec.name }))
            .await
    }
}

/// Provision every collection in `specs`, in order.
pub async fn initialize<B: ?Sized + Send + Sync + 'static>(
    store: &ProxyStore<B>,
    specs: &[CollectionSpec],
) -> Result<Vec<CollectionManager<B>>> {
    let mut out = Vec::with_capacity(specs.len());
    for spec in specs {
        let m = CollectionManager::new(store.clone(), spec.clone());
        m.create_collection().await?;
        out.push(m);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::{CollectionManager, CollectionSpec, Created, initialize};
    use crate::client::{DatabaseManager, StoreConfig};
    use crate::error::StoreError;
    use crate::proxy::{ProxyRegistry, ProxyStore};
    use crate::testing::FakeStore;

    trait Thing: Send + Sync {
        fn kind(&self) -> &'static str;
    }

    struct Rock;
    struct Gem;

    impl Thing for Rock {
        fn kind(&self) -> &'static str {
            "rock"
        }
    }

    impl Thing for Gem {
        fn kind(&self) -> &'static str {
            "gem"
        }
    }

    fn rock() -> Arc<dyn Thing> {
        Arc::new(Rock)
    }

    fn gem() -> Arc<dyn Thing> {
        Arc::new(Gem)
    }

    async fn store() -> (Arc<FakeStore>, ProxyStore<dyn Thing>) {
        let fake = FakeStore::new();
        let cfg = StoreConfig {
            cursor_batch: 2,
            ..StoreConfig::default()
        };
        let db = Arc::new(DatabaseManager::new(cfg, fake.clone()));
        db.connect().await.unwrap();
        let registry = ProxyRegistry::<dyn Thing>::builder()
            .register("rock", rock)
            .unwrap()
            .register("gem", gem)
            .unwrap()
            .build();
        (fake, ProxyStore::new(db, Arc::new(registry)))
    }

    #[tokio::test]
    async fn create_collection_is_idempotent() {
        let (fake, store) = store().await;
        let rocks = CollectionManager::new(store, CollectionSpec::document("rock"));
        assert_eq!(rocks.create_collection().await.unwrap(), Created::New);
        assert_eq!(rocks.create_collection().await.unwrap(), Created::AlreadyExisted);
        assert_eq!(rocks.count().await.unwrap(), 0);

        let creates = fake
            .requests()
            .into_iter()
            .filter(|(m, p)| m == "POST" && p.ends_with("/_api/collection"))
            .count();
        assert_eq!(creates, 1);
    }

    #[tokio::test]
    async fn edge_collections_are_provisioned_as_edges() {
        let (fake, store) = store().await;
        let specs = [CollectionSpec::document("rock"), CollectionSpec::edge("near")];
        let managers = initialize(&store, &specs).await.unwrap();
        assert_eq!(managers.len(), 2);

        let near = &managers[1];
        let err = near.create_document(json!({"proxy": "rock"}), None).await.unwrap_err();
        assert!(matches!(err, StoreError::Http { status: 400, .. }));
        near.create_document(json!({"_from": "rock/1", "_to": "rock/2"}), None)
            .await
            .unwrap();
        assert_eq!(fake.with_state(|s| s.docs("near").len()), 1);
    }

    #[tokio::test]
    async fn default_tag_is_stamped_only_when_missing() {
        let (_fake, store) = store().await;
        let rocks = CollectionManager::new(store, CollectionSpec::document("rock"));
        rocks.create_collection().await.unwrap();

        let plain = rocks.create_proxy(json!({"weight": 3}), None).await.unwrap();
        assert_eq!(plain.behavior().kind(), "rock");
        assert_eq!(plain.get_field("weight").await.unwrap(), Some(json!(3)));

        let shiny = rocks
            .create_proxy(json!({"proxy": "gem"}), Some("ruby"))
            .await
            .unwrap();
        assert_eq!(shiny.behavior().kind(), "gem");
        assert_eq!(shiny.id().as_str(), "rock/ruby");

        let err = rocks.create_document(json!({}), Some("ruby")).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert!(rocks.create_document(json!([1, 2]), None).await.is_err());
    }

    #[tokio::test]
    async fn untagged_collection_records_do_not_hydrate() {
        let (_fake, store) = store().await;
        let raw = CollectionManager::new(store, CollectionSpec::document("scratch").untagged());
        raw.create_collection().await.unwrap();
        let rec = raw.create_document(json!({"x": 1}), None).await.unwrap();
        assert!(rec.get("proxy").is_none());
        assert!(matches!(
            raw.create_proxy(json!({"x": 2}), None).await,
            Err(StoreError::UnknownProxy { tag: None, .. })
        ));
    }

    #[tokio::test]
    async fn all_streams_every_record_through_a_closed_cursor() {
        let (fake, store) = store().await;
        let rocks = CollectionManager::new(store, CollectionSpec::document("rock"));
        rocks.create_collection().await.unwrap();
        for w in 0..5 {
            rocks.create_document(json!({"weight": w}), None).await.unwrap();
        }
        let all = rocks.all_proxy().await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(rocks.all().await.unwrap().len(), 5);
        assert_eq!(rocks.count().await.unwrap(), 5);
        assert_eq!(fake.open_cursors(), 0);
    }
}
