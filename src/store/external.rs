// ---------------------------------------------------------------------------
// External document store adapter (MongoDB)
// ---------------------------------------------------------------------------
// Forwards the collection capability to the driver. Every operation consults
// the chaos state first and fails fast during a mongo outage window instead
// of blocking the dispatcher.

use std::sync::Arc;

use futures_util::TryStreamExt;
use mongodb::bson::{self, doc};

use crate::chaos::ChaosState;

use super::{Document, Query, StoreError};

pub struct ExternalStore {
    db: mongodb::Database,
    chaos: Arc<ChaosState>,
}

impl ExternalStore {
    pub async fn connect(
        uri: &str,
        db_name: &str,
        chaos: Arc<ChaosState>,
    ) -> Result<Arc<Self>, StoreError> {
        let client = mongodb::Client::with_uri_str(uri)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        tracing::info!("external store connected (db={})", db_name);
        Ok(Arc::new(Self {
            db: client.database(db_name),
            chaos,
        }))
    }

    fn guard(&self) -> Result<(), StoreError> {
        if self.chaos.should_fail("mongo") {
            self.chaos.burn("mongo");
            return Err(StoreError::Outage("mongo"));
        }
        Ok(())
    }

    fn coll(&self, name: &str) -> mongodb::Collection<bson::Document> {
        self.db.collection::<bson::Document>(name)
    }

    fn to_bson(value: &Query) -> Result<bson::Document, StoreError> {
        bson::to_document(value).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn doc_to_bson(value: &Document) -> Result<bson::Document, StoreError> {
        bson::to_document(value).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn from_bson(mut doc: bson::Document) -> Result<Document, StoreError> {
        doc.remove("_id");
        serde_json::to_value(&doc).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    pub async fn list_collection_names(&self) -> Result<Vec<String>, StoreError> {
        self.guard()?;
        self.db
            .list_collection_names()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    pub async fn find_one(
        &self,
        collection: &str,
        query: &Query,
    ) -> Result<Option<Document>, StoreError> {
        self.guard()?;
        let found = self
            .coll(collection)
            .find_one(Self::to_bson(query)?)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        found.map(Self::from_bson).transpose()
    }

    pub async fn find_list(
        &self,
        collection: &str,
        query: &Query,
        skip: u64,
        limit: Option<u64>,
    ) -> Result<Vec<Document>, StoreError> {
        self.guard()?;
        let coll = self.coll(collection);
        let mut find = coll.find(Self::to_bson(query)?).skip(skip);
        if let Some(n) = limit {
            find = find.limit(n as i64);
        }
        let cursor = find
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let docs: Vec<bson::Document> = cursor
            .try_collect()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        docs.into_iter().map(Self::from_bson).collect()
    }

    pub async fn insert_one(&self, collection: &str, doc: Document) -> Result<(), StoreError> {
        self.guard()?;
        self.coll(collection)
            .insert_one(Self::doc_to_bson(&doc)?)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    pub async fn update_one(
        &self,
        collection: &str,
        query: &Query,
        set: &Query,
    ) -> Result<u64, StoreError> {
        self.guard()?;
        let result = self
            .coll(collection)
            .update_one(
                Self::to_bson(query)?,
                doc! { "$set": Self::to_bson(set)? },
            )
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(result.modified_count)
    }

    pub async fn replace_one(
        &self,
        collection: &str,
        query: &Query,
        doc: Document,
    ) -> Result<u64, StoreError> {
        self.guard()?;
        let result = self
            .coll(collection)
            .replace_one(Self::to_bson(query)?, Self::doc_to_bson(&doc)?)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(result.modified_count)
    }

    pub async fn delete_one(&self, collection: &str, query: &Query) -> Result<u64, StoreError> {
        self.guard()?;
        let result = self
            .coll(collection)
            .delete_one(Self::to_bson(query)?)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(result.deleted_count)
    }

    pub async fn delete_many(&self, collection: &str, query: &Query) -> Result<u64, StoreError> {
        self.guard()?;
        let result = self
            .coll(collection)
            .delete_many(Self::to_bson(query)?)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(result.deleted_count)
    }

    pub async fn count(&self, collection: &str, query: &Query) -> Result<u64, StoreError> {
        self.guard()?;
        self.coll(collection)
            .count_documents(Self::to_bson(query)?)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    /// Liveness ping for readiness probes; bounded so chaos windows and dead
    /// backends cannot stall the caller.
    pub async fn ping(&self) -> bool {
        if self.chaos.should_fail("mongo") {
            self.chaos.burn("mongo");
            return false;
        }
        let ping = self.db.run_command(doc! { "ping": 1 });
        matches!(
            tokio::time::timeout(std::time::Duration::from_secs(2), ping).await,
            Ok(Ok(_))
        )
    }
}
