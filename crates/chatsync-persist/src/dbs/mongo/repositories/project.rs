use futures::TryStreamExt;
use mongodb::{bson::doc, Client, Collection};

use crate::dbs::mongo::models::MongoProject;
use crate::error::Result;

pub const PROJECTS_COLLECTION: &str = "projects";

#[derive(Clone)]
pub struct MongoProjectRepository {
    collection: Collection<MongoProject>,
}

impl MongoProjectRepository {
    pub fn new(client: &Client, db_name: &str) -> Self {
        let collection = client.database(db_name).collection(PROJECTS_COLLECTION);
        Self { collection }
    }

    pub fn collection(&self) -> &Collection<MongoProject> {
        &self.collection
    }

    pub async fn upsert_project(&self, project: MongoProject) -> Result<()> {
        self.collection
            .replace_one(doc! { "_id": &project.id }, &project)
            .upsert(true)
            .await?;
        Ok(())
    }

    pub async fn list_projects(&self, user_id: &str) -> Result<Vec<MongoProject>> {
        let projects = self
            .collection
            .find(doc! { "user_id": user_id })
            .sort(doc! { "created_at": 1 })
            .await?
            .try_collect()
            .await?;
        Ok(projects)
    }

    pub async fn delete_project(&self, project_id: &str) -> Result<bool> {
        let result = self.collection.delete_one(doc! { "_id": project_id }).await?;
        Ok(result.deleted_count > 0)
    }
}
