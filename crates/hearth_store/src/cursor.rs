use std::collections::VecDeque;

use futures_util::stream::BoxStream;
use serde_json::Value;

use crate::client::DatabaseManager;
use crate::error::{Result, StoreError};
use crate::transport::Method;

/// One query's server-side result set, consumed batch by batch.
///
/// Finite and not restartable: once exhausted or closed, `next` keeps
/// returning `None`. Close it when done (also on early exit); a cursor that
/// is dropped unclosed stays allocated on the server until it times out.
pub struct Cursor<'a> {
    db: &'a DatabaseManager,
    id: Option<String>,
    batch: VecDeque<Value>,
    next_batch: Option<String>,
    closed: bool,
}

impl<'a> Cursor<'a> {
    pub(crate) fn from_first_batch(db: &'a DatabaseManager, body: Value) -> Result<Self> {
        let mut c = Self {
            db,
            id: None,
            batch: VecDeque::new(),
            next_batch: None,
            closed: false,
        };
        c.id = body.get("id").and_then(id_string);
        c.absorb(body)?;
        Ok(c)
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Items still buffered from the current batch.
    pub fn buffered(&self) -> usize {
        self.batch.len()
    }

    fn absorb(&mut self, body: Value) -> Result<()> {
        let Value::Object(mut m) = body else {
            return Err(StoreError::Decode("cursor batch is not an object".to_string()));
        };
        let result = match m.remove("result") {
            Some(Value::Array(v)) => v,
            Some(Value::Null) | None => Vec::new(),
            Some(_) => return Err(StoreError::Decode("cursor result is not a list".to_string())),
        };
        let has_more = m.get("hasMore").and_then(Value::as_bool).unwrap_or(false);
        self.next_batch = match m.get("nextBatchId").and_then(id_string) {
            Some(b) => Some(b),
            None if has_more => Some(String::new()),
            None => None,
        };
        self.batch = result.into();
        Ok(())
    }

    async fn fetch_next_batch(&mut self) -> Result<bool> {
        let Some(_token) = self.next_batch.take() else {
            return Ok(false);
        };
        let Some(id) = self.id.clone() else {
            return Err(StoreError::Query("cursor has more results but no id".to_string()));
        };
        let resp = self
            .db
            .request(Method::POST, &format!("/_api/cursor/{id}"), Vec::new(), None)
            .await?;
        if !resp.is_success() {
            return Err(StoreError::Query(format!(
                "next batch for cursor {id}: {} ({})",
                resp.body_text(),
                resp.status
            )));
        }
        self.absorb(resp.body)?;
        Ok(true)
    }

    /// Next record, fetching the following batch when the current one runs dry.
    pub async fn next(&mut self) -> Result<Option<Value>> {
        loop {
            if self.closed {
                return Ok(None);
            }
            if let Some(v) = self.batch.pop_front() {
                return Ok(Some(v));
            }
            if !self.fetch_next_batch().await? {
                return Ok(None);
            }
        }
    }

    /// The remaining records as a lazy stream. The cursor is not closed for you.
    pub fn results(&mut self) -> BoxStream<'_, Result<Value>> {
        Box::pin(futures_util::stream::try_unfold(self, |c| async move {
            Ok::<_, StoreError>(c.next().await?.map(|v| (v, c)))
        }))
    }

    /// Release the server-side result set. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.batch.clear();
        self.next_batch = None;
        let Some(id) = self.id.as_deref() else {
            return Ok(());
        };
        let resp = self
            .db
            .request(Method::DELETE, &format!("/_api/cursor/{id}"), Vec::new(), None)
            .await?;
        // The store drops exhausted cursors by itself; 404 means already gone.
        if resp.is_success() || resp.status == 404 {
            Ok(())
        } else {
            Err(resp.into_http_error())
        }
    }
}

fn id_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures_util::StreamExt;
    use serde_json::{Value, json};

    use crate::client::{DatabaseManager, StoreConfig};
    use crate::testing::FakeStore;

    const ALL_OBJECTS: &str = "FOR doc IN @@collection RETURN doc";

    async fn seeded(n: usize, batch: usize) -> (Arc<FakeStore>, DatabaseManager) {
        let fake = FakeStore::new();
        fake.create_collection("object", false);
        for i in 0..n {
            fake.insert("object", json!({ "n": i }));
        }
        let cfg = StoreConfig {
            cursor_batch: batch,
            ..StoreConfig::default()
        };
        let db = DatabaseManager::new(cfg, fake.clone());
        db.connect().await.unwrap();
        (fake, db)
    }

    fn ns(docs: &[Value]) -> Vec<u64> {
        docs.iter().map(|d| d["n"].as_u64().unwrap()).collect()
    }

    #[tokio::test]
    async fn streams_across_batches_in_order() {
        let (fake, db) = seeded(7, 3).await;
        let docs = db
            .query(ALL_OBJECTS, json!({"@collection": "object"}))
            .await
            .unwrap();
        assert_eq!(ns(&docs), vec![0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(fake.open_cursors(), 0);
    }

    #[tokio::test]
    async fn early_close_releases_server_side_cursor() {
        let (fake, db) = seeded(10, 2).await;
        let mut c = db
            .open_cursor(ALL_OBJECTS, json!({"@collection": "object"}))
            .await
            .unwrap();
        assert_eq!(fake.open_cursors(), 1);

        let first = c.next().await.unwrap().unwrap();
        assert_eq!(first["n"], json!(0));
        c.close().await.unwrap();
        assert_eq!(fake.open_cursors(), 0);

        // Not restartable, and closing again is harmless.
        assert!(c.next().await.unwrap().is_none());
        c.close().await.unwrap();
    }

    #[tokio::test]
    async fn single_batch_cursor_needs_no_release() {
        let (fake, db) = seeded(2, 10).await;
        let mut c = db
            .open_cursor(ALL_OBJECTS, json!({"@collection": "object"}))
            .await
            .unwrap();
        assert!(c.id().is_none());
        assert_eq!(c.buffered(), 2);
        fake.clear_requests();
        c.close().await.unwrap();
        assert!(fake.requests().is_empty());
    }

    #[tokio::test]
    async fn results_stream_is_lazy() {
        let (fake, db) = seeded(6, 2).await;
        let mut c = db
            .open_cursor(ALL_OBJECTS, json!({"@collection": "object"}))
            .await
            .unwrap();
        fake.clear_requests();
        let firsts = c.results().take(2).collect::<Vec<_>>().await;
        assert_eq!(firsts.len(), 2);
        // The first batch covered both items: no further fetch happened.
        assert!(fake.requests().is_empty());

        let rest = c
            .results()
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(ns(&rest), vec![2, 3, 4, 5]);
        c.close().await.unwrap();
    }
}
