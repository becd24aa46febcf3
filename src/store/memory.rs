// ---------------------------------------------------------------------------
// In-process collections — the MEM backend
// ---------------------------------------------------------------------------
// One RwLock per collection; writers go through the same handle readers use.
// Single-worker only (enforced at startup), so this state is authoritative.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::{Document, Query, collections, matches, set_path};

type CollectionHandle = Arc<RwLock<Vec<Document>>>;

pub struct MemoryStore {
    collections: RwLock<HashMap<String, CollectionHandle>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        let mut map = HashMap::new();
        for name in collections::ALL_STATIC {
            map.insert((*name).to_string(), Arc::new(RwLock::new(Vec::new())));
        }
        Arc::new(Self {
            collections: RwLock::new(map),
        })
    }

    /// Fetch or create a collection handle; `crud_data_*` collections appear
    /// on first touch.
    pub async fn create_collection(&self, name: &str) -> CollectionHandle {
        {
            let read = self.collections.read().await;
            if let Some(handle) = read.get(name) {
                return Arc::clone(handle);
            }
        }
        let mut write = self.collections.write().await;
        Arc::clone(
            write
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(RwLock::new(Vec::new()))),
        )
    }

    pub async fn list_collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn find_one(&self, collection: &str, query: &Query) -> Option<Document> {
        let handle = self.create_collection(collection).await;
        let docs = handle.read().await;
        docs.iter().find(|doc| matches(doc, query)).cloned()
    }

    pub async fn find_list(
        &self,
        collection: &str,
        query: &Query,
        skip: u64,
        limit: Option<u64>,
    ) -> Vec<Document> {
        let handle = self.create_collection(collection).await;
        let docs = handle.read().await;
        let iter = docs
            .iter()
            .filter(|doc| matches(doc, query))
            .skip(skip as usize);
        match limit {
            Some(n) => iter.take(n as usize).cloned().collect(),
            None => iter.cloned().collect(),
        }
    }

    pub async fn insert_one(&self, collection: &str, doc: Document) {
        let handle = self.create_collection(collection).await;
        handle.write().await.push(doc);
    }

    pub async fn update_one(&self, collection: &str, query: &Query, set: &Query) -> u64 {
        let handle = self.create_collection(collection).await;
        let mut docs = handle.write().await;
        if let Some(doc) = docs.iter_mut().find(|doc| matches(doc, query)) {
            for (path, value) in set {
                set_path(doc, path, value.clone());
            }
            1
        } else {
            0
        }
    }

    pub async fn replace_one(&self, collection: &str, query: &Query, new_doc: Document) -> u64 {
        let handle = self.create_collection(collection).await;
        let mut docs = handle.write().await;
        if let Some(doc) = docs.iter_mut().find(|doc| matches(doc, query)) {
            *doc = new_doc;
            1
        } else {
            0
        }
    }

    pub async fn delete_one(&self, collection: &str, query: &Query) -> u64 {
        let handle = self.create_collection(collection).await;
        let mut docs = handle.write().await;
        if let Some(pos) = docs.iter().position(|doc| matches(doc, query)) {
            docs.remove(pos);
            1
        } else {
            0
        }
    }

    pub async fn delete_many(&self, collection: &str, query: &Query) -> u64 {
        let handle = self.create_collection(collection).await;
        let mut docs = handle.write().await;
        let before = docs.len();
        docs.retain(|doc| !matches(doc, query));
        (before - docs.len()) as u64
    }

    pub async fn count(&self, collection: &str, query: &Query) -> u64 {
        let handle = self.create_collection(collection).await;
        let docs = handle.read().await;
        docs.iter().filter(|doc| matches(doc, query)).count() as u64
    }

    /// Serialize every collection (dynamic ones included) for the snapshot.
    pub async fn dump_data(&self) -> Map<String, Value> {
        let handles: Vec<(String, CollectionHandle)> = {
            let read = self.collections.read().await;
            read.iter()
                .map(|(name, handle)| (name.clone(), Arc::clone(handle)))
                .collect()
        };

        let mut out = Map::new();
        for (name, handle) in handles {
            let docs = handle.read().await;
            out.insert(name, Value::Array(docs.clone()));
        }
        out
    }

    /// Clear existing state and load a snapshot produced by `dump_data`.
    pub async fn load_data(&self, data: Map<String, Value>) {
        let mut write = self.collections.write().await;
        write.clear();
        for name in collections::ALL_STATIC {
            write.insert((*name).to_string(), Arc::new(RwLock::new(Vec::new())));
        }
        for (name, docs) in data {
            let rows = docs.as_array().cloned().unwrap_or_default();
            write.insert(name, Arc::new(RwLock::new(rows)));
        }
    }

    pub async fn clear(&self) {
        let mut write = self.collections.write().await;
        write.clear();
        for name in collections::ALL_STATIC {
            write.insert((*name).to_string(), Arc::new(RwLock::new(Vec::new())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::query;
    use serde_json::json;

    #[tokio::test]
    async fn crud_and_cursor_semantics() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .insert_one("apis", json!({"api_name": format!("a{i}"), "api_version": "v1"}))
                .await;
        }

        let all = store.find_list("apis", &Query::new(), 0, None).await;
        assert_eq!(all.len(), 5);

        let page = store.find_list("apis", &Query::new(), 2, Some(2)).await;
        assert_eq!(page.len(), 2);
        assert_eq!(page[0]["api_name"], "a2");

        let one = store
            .find_one("apis", &query(&[("api_name", json!("a3"))]))
            .await;
        assert!(one.is_some());

        let modified = store
            .update_one(
                "apis",
                &query(&[("api_name", json!("a3"))]),
                &query(&[("api_description", json!("updated"))]),
            )
            .await;
        assert_eq!(modified, 1);
        let updated = store
            .find_one("apis", &query(&[("api_name", json!("a3"))]))
            .await
            .unwrap();
        assert_eq!(updated["api_description"], "updated");

        assert_eq!(
            store
                .delete_one("apis", &query(&[("api_name", json!("a0"))]))
                .await,
            1
        );
        assert_eq!(store.count("apis", &Query::new()).await, 4);
    }

    #[tokio::test]
    async fn dump_and_load_include_dynamic_collections() {
        let store = MemoryStore::new();
        store
            .insert_one(
                "api_builder_tables",
                json!({
                    "_id": "tbl-1",
                    "table_name": "Products",
                    "collection_name": "crud_data_products",
                    "schema": {"name": {"type": "string", "required": true}},
                }),
            )
            .await;
        store
            .insert_one("crud_data_products", json!({"_id": "p-1", "name": "Laptop"}))
            .await;

        let snapshot = store.dump_data().await;
        assert!(snapshot.contains_key("api_builder_tables"));
        assert!(snapshot.contains_key("crud_data_products"));

        let restored = MemoryStore::new();
        restored.load_data(snapshot).await;
        let names = restored.list_collection_names().await;
        assert!(names.contains(&"crud_data_products".to_string()));
        assert!(
            restored
                .find_one("crud_data_products", &query(&[("_id", json!("p-1"))]))
                .await
                .is_some()
        );
        assert!(
            restored
                .find_one("api_builder_tables", &query(&[("_id", json!("tbl-1"))]))
                .await
                .is_some()
        );
    }
}
