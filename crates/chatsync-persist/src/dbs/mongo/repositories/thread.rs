use futures::TryStreamExt;
use mongodb::{bson::doc, Client, Collection};

use crate::dbs::mongo::models::MongoThread;
use crate::error::Result;

pub const THREADS_COLLECTION: &str = "threads";

#[derive(Clone)]
pub struct MongoThreadRepository {
    collection: Collection<MongoThread>,
}

impl MongoThreadRepository {
    pub fn new(client: &Client, db_name: &str) -> Self {
        let collection = client.database(db_name).collection(THREADS_COLLECTION);
        Self { collection }
    }

    pub fn collection(&self) -> &Collection<MongoThread> {
        &self.collection
    }

    /// Insert or replace a thread keyed by its client id
    pub async fn upsert_thread(&self, thread: MongoThread) -> Result<()> {
        self.collection
            .replace_one(doc! { "_id": &thread.id }, &thread)
            .upsert(true)
            .await?;
        Ok(())
    }

    /// Get thread by ID
    pub async fn get_thread(&self, thread_id: &str) -> Result<Option<MongoThread>> {
        Ok(self.collection.find_one(doc! { "_id": thread_id }).await?)
    }

    /// List threads for a user, most recently updated first
    pub async fn list_threads(&self, user_id: &str) -> Result<Vec<MongoThread>> {
        let threads = self
            .collection
            .find(doc! { "user_id": user_id })
            .sort(doc! { "updated_at": -1 })
            .await?
            .try_collect()
            .await?;
        Ok(threads)
    }

    /// Delete thread; returns whether a document was removed
    pub async fn delete_thread(&self, thread_id: &str) -> Result<bool> {
        let result = self.collection.delete_one(doc! { "_id": thread_id }).await?;
        Ok(result.deleted_count > 0)
    }
}
