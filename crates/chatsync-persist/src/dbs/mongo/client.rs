use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::Client;

use chatsync_types::{
    ChangePayload, EntityKind, Message, MessageSummary, Project, Thread,
};
use crate::dbs::mongo::models::{MongoMessage, MongoProject, MongoSummary, MongoThread};
use crate::dbs::mongo::repositories::{
    MongoMessageRepository, MongoProjectRepository, MongoSummaryRepository, MongoThreadRepository,
};
use crate::dbs::mongo::watch::watch_collection;
use crate::error::{PersistError, Result};
use crate::trait_client::{ChangeStream, RemoteStore};

/// [`RemoteStore`] backed by MongoDB, with realtime updates from change streams.
///
/// Change streams require a replica set or sharded cluster.
pub struct MongoRemoteStore {
    thread_repo: MongoThreadRepository,
    message_repo: MongoMessageRepository,
    summary_repo: MongoSummaryRepository,
    project_repo: MongoProjectRepository,
}

impl MongoRemoteStore {
    /// Connect to MongoDB and create client
    pub async fn connect(mongodb_uri: &str, database: &str) -> Result<Self> {
        let client = Client::with_uri_str(mongodb_uri)
            .await
            .map_err(|e| PersistError::Connection(e.to_string()))?;

        tracing::info!("Connected to MongoDB database '{}'", database);

        Ok(Self::from_client(&client, database))
    }

    pub fn from_client(client: &Client, database: &str) -> Self {
        Self {
            thread_repo: MongoThreadRepository::new(client, database),
            message_repo: MongoMessageRepository::new(client, database),
            summary_repo: MongoSummaryRepository::new(client, database),
            project_repo: MongoProjectRepository::new(client, database),
        }
    }
}

#[async_trait]
impl RemoteStore for MongoRemoteStore {
    async fn upsert_thread(&self, thread: Thread) -> Result<()> {
        self.thread_repo.upsert_thread(thread.into()).await
    }

    async fn list_threads(&self, user_id: &str) -> Result<Vec<Thread>> {
        let threads = self.thread_repo.list_threads(user_id).await?;
        Ok(threads.into_iter().map(Into::into).collect())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let messages = self.message_repo.delete_thread_messages(thread_id).await?;
        let summaries = self.summary_repo.delete_thread_summaries(thread_id).await?;
        self.thread_repo.delete_thread(thread_id).await?;
        tracing::debug!(
            "Deleted thread {} with {} messages and {} summaries",
            thread_id,
            messages,
            summaries
        );
        Ok(())
    }

    async fn upsert_message(&self, message: Message) -> Result<()> {
        self.message_repo.upsert_message(message.into()).await
    }

    async fn get_messages(&self, thread_id: &str) -> Result<Vec<Message>> {
        let messages = self.message_repo.get_messages(thread_id).await?;
        Ok(messages.into_iter().map(Into::into).collect())
    }

    async fn delete_messages_after(
        &self,
        thread_id: &str,
        after: DateTime<Utc>,
        inclusive: bool,
    ) -> Result<()> {
        let deleted = self
            .message_repo
            .delete_messages_after(thread_id, after, inclusive)
            .await?;
        tracing::debug!("Deleted {} trailing messages from thread {}", deleted, thread_id);
        Ok(())
    }

    async fn upsert_summary(&self, summary: MessageSummary) -> Result<()> {
        let owner = self
            .thread_repo
            .get_thread(&summary.thread_id)
            .await?
            .map(|t| t.user_id)
            .ok_or_else(|| PersistError::ThreadNotFound(summary.thread_id.clone()))?;
        self.summary_repo
            .upsert_summary(MongoSummary::from_summary(summary, owner))
            .await
    }

    async fn get_summaries(&self, thread_id: &str) -> Result<Vec<MessageSummary>> {
        let summaries = self.summary_repo.get_summaries(thread_id).await?;
        Ok(summaries.into_iter().map(Into::into).collect())
    }

    async fn upsert_project(&self, project: Project) -> Result<()> {
        self.project_repo.upsert_project(project.into()).await
    }

    async fn list_projects(&self, user_id: &str) -> Result<Vec<Project>> {
        let projects = self.project_repo.list_projects(user_id).await?;
        Ok(projects.into_iter().map(Into::into).collect())
    }

    async fn delete_project(&self, project_id: &str) -> Result<()> {
        if self.project_repo.delete_project(project_id).await? {
            Ok(())
        } else {
            Err(PersistError::ProjectNotFound(project_id.to_string()))
        }
    }

    async fn subscribe(&self, user_id: &str) -> Result<ChangeStream> {
        let streams = vec![
            watch_collection(self.thread_repo.collection(), user_id, EntityKind::Thread, |t: MongoThread| {
                ChangePayload::Thread(t.into())
            })
            .await?,
            watch_collection(self.message_repo.collection(), user_id, EntityKind::Message, |m: MongoMessage| {
                ChangePayload::Message(m.into())
            })
            .await?,
            watch_collection(self.summary_repo.collection(), user_id, EntityKind::Summary, |s: MongoSummary| {
                ChangePayload::Summary(s.into())
            })
            .await?,
            watch_collection(self.project_repo.collection(), user_id, EntityKind::Project, |p: MongoProject| {
                ChangePayload::Project(p.into())
            })
            .await?,
        ];

        tracing::info!("Opened MongoDB change streams for user {}", user_id);
        Ok(Box::pin(futures::stream::select_all(streams)))
    }
}
