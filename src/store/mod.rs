// ---------------------------------------------------------------------------
// Config store — dual backend behind one collection interface
// ---------------------------------------------------------------------------
// The memory backend keeps per-collection vectors under async locks; the
// external adapter forwards to MongoDB. Dispatcher code is written against
// the `Collection`/`Cursor` capability and never sees the backend.

pub mod external;
pub mod memory;
pub mod snapshot;

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::store::external::ExternalStore;
use crate::store::memory::MemoryStore;

pub type Document = Value;
pub type Query = Map<String, Value>;

/// Well-known collection names. Dynamic `crud_data_*` collections are created
/// on demand next to these.
pub mod collections {
    pub const APIS: &str = "apis";
    pub const ENDPOINTS: &str = "endpoints";
    pub const USERS: &str = "users";
    pub const ROLES: &str = "roles";
    pub const GROUPS: &str = "groups";
    pub const SUBSCRIPTIONS: &str = "subscriptions";
    pub const ROUTINGS: &str = "routings";
    pub const CREDIT_DEFS: &str = "credit_defs";
    pub const USER_CREDITS: &str = "user_credits";
    pub const SECURITY_SETTINGS: &str = "security_settings";
    pub const TABLE_REGISTRY: &str = "api_builder_tables";

    pub const ALL_STATIC: &[&str] = &[
        APIS,
        ENDPOINTS,
        USERS,
        ROLES,
        GROUPS,
        SUBSCRIPTIONS,
        ROUTINGS,
        CREDIT_DEFS,
        USER_CREDITS,
        SECURITY_SETTINGS,
        TABLE_REGISTRY,
    ];
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} backend unavailable (chaos outage window)")]
    Outage(&'static str),

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("document serialization error: {0}")]
    Serialization(String),
}

/// Build an equality query from key/value pairs. Dotted keys descend into
/// nested objects.
pub fn query(pairs: &[(&str, Value)]) -> Query {
    let mut map = Map::new();
    for (key, value) in pairs {
        map.insert((*key).to_string(), value.clone());
    }
    map
}

#[derive(Clone)]
pub enum StoreBackend {
    Memory(Arc<MemoryStore>),
    External(Arc<ExternalStore>),
}

impl StoreBackend {
    pub fn collection(&self, name: &str) -> Collection {
        Collection {
            backend: self.clone(),
            name: name.to_string(),
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, StoreBackend::Memory(_))
    }

    pub fn memory(&self) -> Option<&Arc<MemoryStore>> {
        match self {
            StoreBackend::Memory(store) => Some(store),
            StoreBackend::External(_) => None,
        }
    }

    pub async fn list_collection_names(&self) -> Result<Vec<String>, StoreError> {
        match self {
            StoreBackend::Memory(store) => Ok(store.list_collection_names().await),
            StoreBackend::External(store) => store.list_collection_names().await,
        }
    }
}

/// One named collection of JSON documents.
#[derive(Clone)]
pub struct Collection {
    backend: StoreBackend,
    name: String,
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn find_one(&self, query: &Query) -> Result<Option<Document>, StoreError> {
        match &self.backend {
            StoreBackend::Memory(store) => Ok(store.find_one(&self.name, query).await),
            StoreBackend::External(store) => store.find_one(&self.name, query).await,
        }
    }

    pub fn find(&self, query: Query) -> Cursor {
        Cursor {
            collection: self.clone(),
            query,
            skip: 0,
            limit: None,
        }
    }

    pub async fn insert_one(&self, doc: Document) -> Result<(), StoreError> {
        match &self.backend {
            StoreBackend::Memory(store) => {
                store.insert_one(&self.name, doc).await;
                Ok(())
            }
            StoreBackend::External(store) => store.insert_one(&self.name, doc).await,
        }
    }

    /// `$set`-style partial update of the first matching document. Dotted
    /// keys in the patch descend into nested objects.
    pub async fn update_one(&self, query: &Query, set: &Query) -> Result<u64, StoreError> {
        match &self.backend {
            StoreBackend::Memory(store) => Ok(store.update_one(&self.name, query, set).await),
            StoreBackend::External(store) => store.update_one(&self.name, query, set).await,
        }
    }

    /// Replace the first matching document wholesale.
    pub async fn replace_one(&self, query: &Query, doc: Document) -> Result<u64, StoreError> {
        match &self.backend {
            StoreBackend::Memory(store) => Ok(store.replace_one(&self.name, query, doc).await),
            StoreBackend::External(store) => store.replace_one(&self.name, query, doc).await,
        }
    }

    pub async fn delete_one(&self, query: &Query) -> Result<u64, StoreError> {
        match &self.backend {
            StoreBackend::Memory(store) => Ok(store.delete_one(&self.name, query).await),
            StoreBackend::External(store) => store.delete_one(&self.name, query).await,
        }
    }

    pub async fn delete_many(&self, query: &Query) -> Result<u64, StoreError> {
        match &self.backend {
            StoreBackend::Memory(store) => Ok(store.delete_many(&self.name, query).await),
            StoreBackend::External(store) => store.delete_many(&self.name, query).await,
        }
    }

    pub async fn count(&self, query: &Query) -> Result<u64, StoreError> {
        match &self.backend {
            StoreBackend::Memory(store) => Ok(store.count(&self.name, query).await),
            StoreBackend::External(store) => store.count(&self.name, query).await,
        }
    }
}

/// Lazy query cursor with the skip/limit/to_list capability both backends
/// implement.
pub struct Cursor {
    collection: Collection,
    query: Query,
    skip: u64,
    limit: Option<u64>,
}

impl Cursor {
    pub fn skip(mut self, n: u64) -> Self {
        self.skip = n;
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub async fn to_list(self) -> Result<Vec<Document>, StoreError> {
        match &self.collection.backend {
            StoreBackend::Memory(store) => Ok(store
                .find_list(&self.collection.name, &self.query, self.skip, self.limit)
                .await),
            StoreBackend::External(store) => {
                store
                    .find_list(&self.collection.name, &self.query, self.skip, self.limit)
                    .await
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Query matching over JSON documents
// ---------------------------------------------------------------------------

/// Look up a (possibly dotted) path inside a document.
pub fn get_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Set a (possibly dotted) path, creating intermediate objects.
pub fn set_path(doc: &mut Value, path: &str, value: Value) {
    let parts: Vec<&str> = path.split('.').collect();
    let mut current = doc;
    for (i, part) in parts.iter().enumerate() {
        if i == parts.len() - 1 {
            if let Some(obj) = current.as_object_mut() {
                obj.insert((*part).to_string(), value);
            }
            return;
        }
        let obj = match current.as_object_mut() {
            Some(obj) => obj,
            None => return,
        };
        current = obj
            .entry((*part).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

/// Equality match of every query key against the document.
pub fn matches(doc: &Value, query: &Query) -> bool {
    query
        .iter()
        .all(|(key, expected)| get_path(doc, key) == Some(expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dotted_path_lookup_and_match() {
        let doc = json!({"username": "alice", "users_credits": {"ai": {"available_credits": 5}}});
        assert_eq!(
            get_path(&doc, "users_credits.ai.available_credits"),
            Some(&json!(5))
        );
        assert!(matches(&doc, &query(&[("username", json!("alice"))])));
        assert!(!matches(&doc, &query(&[("username", json!("bob"))])));
        assert!(matches(
            &doc,
            &query(&[("users_credits.ai.available_credits", json!(5))])
        ));
    }

    #[test]
    fn dotted_set_creates_intermediate_objects() {
        let mut doc = json!({"username": "alice"});
        set_path(&mut doc, "users_credits.ai.available_credits", json!(4));
        assert_eq!(
            doc,
            json!({"username": "alice", "users_credits": {"ai": {"available_credits": 4}}})
        );
    }
}
