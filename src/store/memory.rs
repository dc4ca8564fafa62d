use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{RwLock, broadcast};

use super::{
    Change, ChangeFeed, Document, DocumentStore, Query, StoreError, Update, empty_body,
    ensure_object,
};

/// In-process document store.
///
/// A single write lock covers check-and-apply, which gives every [`Update`]
/// the same atomicity the Postgres adapter gets from row locks.
pub struct MemoryStore {
    /// collection -> id -> document
    collections: RwLock<HashMap<String, HashMap<String, Document>>>,
    feed: ChangeFeed,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_feed(ChangeFeed::default())
    }

    pub fn with_feed(feed: ChangeFeed) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            feed,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn create(
        &self,
        collection: &str,
        id: &str,
        body: Value,
    ) -> Result<Document, StoreError> {
        ensure_object(collection, id, &body)?;

        let document = {
            let mut collections = self.collections.write().await;
            let docs = collections.entry(collection.to_string()).or_default();
            if docs.contains_key(id) {
                return Err(StoreError::already_exists(collection, id));
            }
            let document = Document {
                id: id.to_string(),
                version: 1,
                body,
            };
            docs.insert(id.to_string(), document.clone());
            document
        };

        self.feed.publish(Change::new(collection, id)).await;
        Ok(document)
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        update: Update,
    ) -> Result<Document, StoreError> {
        let document = {
            let mut collections = self.collections.write().await;
            let docs = collections.entry(collection.to_string()).or_default();

            let (mut body, version) = match docs.get(id) {
                Some(existing) => (existing.body.clone(), existing.version),
                None if update.upsert => (empty_body(), 0),
                None => return Err(StoreError::not_found(collection, id)),
            };

            update.apply_to(&mut body, version)?;

            let document = Document {
                id: id.to_string(),
                version: version + 1,
                body,
            };
            docs.insert(id.to_string(), document.clone());
            document
        };

        self.feed.publish(Change::new(collection, id)).await;
        Ok(document)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let removed = {
            let mut collections = self.collections.write().await;
            collections
                .get_mut(collection)
                .and_then(|docs| docs.remove(id))
                .is_some()
        };

        if removed {
            self.feed.publish(Change::new(collection, id)).await;
        }
        Ok(removed)
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let collections = self.collections.read().await;
        let docs = collections
            .get(&query.collection)
            .map(|docs| docs.values().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        Ok(query.evaluate(docs))
    }

    fn changes(&self) -> broadcast::Receiver<Change> {
        self.feed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Direction, watch};
    use futures_util::StreamExt;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn create_twice_is_refused() {
        let store = MemoryStore::new();
        store.create("requests", "r1", json!({ "a": 1 })).await.unwrap();

        let err = store.create("requests", "r1", json!({ "a": 2 })).await.unwrap_err();

        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn update_bumps_version_and_missing_doc_is_not_found() {
        let store = MemoryStore::new();
        store.create("requests", "r1", json!({ "status": "pending" })).await.unwrap();

        let updated = store
            .update("requests", "r1", Update::new().expect_version(1).set("status", "in_progress"))
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.body["status"], json!("in_progress"));

        let err = store
            .update("requests", "missing", Update::new().set("status", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn upsert_creates_from_empty_body() {
        let store = MemoryStore::new();

        let doc = store
            .update("users", "p1", Update::new().set("ratingCount", 1).upsert())
            .await
            .unwrap();

        assert_eq!(doc.version, 1);
        assert_eq!(doc.body, json!({ "ratingCount": 1 }));
    }

    #[tokio::test]
    async fn concurrent_appends_are_all_kept() {
        let store = Arc::new(MemoryStore::new());
        store.create("requests", "r1", json!({ "responses": [] })).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .update("requests", "r1", Update::new().append("responses", json!({ "n": i })))
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let doc = store.get("requests", "r1").await.unwrap().unwrap();
        assert_eq!(doc.body["responses"].as_array().map(Vec::len), Some(20));
        assert_eq!(doc.version, 21);
    }

    #[tokio::test]
    async fn watch_emits_full_snapshots_on_change() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let query = Query::collection("requests")
            .where_eq("status", "pending")
            .order_by("createdAt", Direction::Desc);
        let mut snapshots = watch(store.clone(), query);

        let first = snapshots.next().await.unwrap().unwrap();
        assert!(first.is_empty());

        store
            .create("requests", "r1", json!({ "status": "pending", "createdAt": 1 }))
            .await
            .unwrap();
        let second = snapshots.next().await.unwrap().unwrap();
        assert_eq!(second.len(), 1);

        store
            .create("requests", "r2", json!({ "status": "pending", "createdAt": 2 }))
            .await
            .unwrap();
        let third = snapshots.next().await.unwrap().unwrap();
        let ids: Vec<&str> = third.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["r2", "r1"]);
    }
}
