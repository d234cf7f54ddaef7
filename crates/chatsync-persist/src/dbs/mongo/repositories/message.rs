use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{bson, bson::doc, bson::Document, Client, Collection};

use crate::dbs::mongo::models::MongoMessage;
use crate::error::Result;

pub const MESSAGES_COLLECTION: &str = "messages";

#[derive(Clone)]
pub struct MongoMessageRepository {
    collection: Collection<MongoMessage>,
}

impl MongoMessageRepository {
    pub fn new(client: &Client, db_name: &str) -> Self {
        let collection = client.database(db_name).collection(MESSAGES_COLLECTION);
        Self { collection }
    }

    pub fn collection(&self) -> &Collection<MongoMessage> {
        &self.collection
    }

    /// Insert or replace a message keyed by its client id
    pub async fn upsert_message(&self, message: MongoMessage) -> Result<()> {
        self.collection
            .replace_one(doc! { "_id": &message.id }, &message)
            .upsert(true)
            .await?;
        Ok(())
    }

    /// Get all messages for a thread
    pub async fn get_messages(&self, thread_id: &str) -> Result<Vec<MongoMessage>> {
        let messages = self
            .collection
            .find(doc! { "thread_id": thread_id })
            .sort(doc! { "created_at": 1, "_id": 1 })
            .await?
            .try_collect()
            .await?;
        Ok(messages)
    }

    /// Delete messages of a thread created after a timestamp
    pub async fn delete_messages_after(
        &self,
        thread_id: &str,
        after: DateTime<Utc>,
        inclusive: bool,
    ) -> Result<u64> {
        let op = if inclusive { "$gte" } else { "$gt" };
        let mut range = Document::new();
        range.insert(op, bson::DateTime::from_chrono(after));
        let filter = doc! { "thread_id": thread_id, "created_at": range };
        let result = self.collection.delete_many(filter).await?;
        Ok(result.deleted_count)
    }

    pub async fn delete_thread_messages(&self, thread_id: &str) -> Result<u64> {
        let result = self.collection.delete_many(doc! { "thread_id": thread_id }).await?;
        Ok(result.deleted_count)
    }
}
