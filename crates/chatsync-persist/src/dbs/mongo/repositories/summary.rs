use futures::TryStreamExt;
use mongodb::{bson::doc, Client, Collection};

use crate::dbs::mongo::models::MongoSummary;
use crate::error::Result;

pub const SUMMARIES_COLLECTION: &str = "message_summaries";

#[derive(Clone)]
pub struct MongoSummaryRepository {
    collection: Collection<MongoSummary>,
}

impl MongoSummaryRepository {
    pub fn new(client: &Client, db_name: &str) -> Self {
        let collection = client.database(db_name).collection(SUMMARIES_COLLECTION);
        Self { collection }
    }

    pub fn collection(&self) -> &Collection<MongoSummary> {
        &self.collection
    }

    pub async fn upsert_summary(&self, summary: MongoSummary) -> Result<()> {
        self.collection
            .replace_one(doc! { "_id": &summary.id }, &summary)
            .upsert(true)
            .await?;
        Ok(())
    }

    pub async fn get_summaries(&self, thread_id: &str) -> Result<Vec<MongoSummary>> {
        let summaries = self
            .collection
            .find(doc! { "thread_id": thread_id })
            .sort(doc! { "created_at": 1 })
            .await?
            .try_collect()
            .await?;
        Ok(summaries)
    }

    pub async fn delete_thread_summaries(&self, thread_id: &str) -> Result<u64> {
        let result = self.collection.delete_many(doc! { "thread_id": thread_id }).await?;
        Ok(result.deleted_count)
    }
}
