use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::pin::Pin;

use chatsync_types::{Message, MessageSummary, Project, RemoteChange, Thread};
use crate::error::Result;

/// Realtime change notifications for one user.
pub type ChangeStream = Pin<Box<dyn Stream<Item = RemoteChange> + Send>>;

/// Authoritative remote store for threads, messages, summaries and projects.
///
/// Records are keyed by the identifiers the client generated; implementations
/// must store them as-is. All writes are upserts so a retried write is harmless.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create or replace a thread
    async fn upsert_thread(&self, thread: Thread) -> Result<()>;

    /// List threads owned by a user, most recently updated first
    async fn list_threads(&self, user_id: &str) -> Result<Vec<Thread>>;

    /// Delete a thread together with its messages and summaries
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;

    /// Create or replace a message
    async fn upsert_message(&self, message: Message) -> Result<()>;

    /// All messages of a thread, oldest first
    async fn get_messages(&self, thread_id: &str) -> Result<Vec<Message>>;

    /// Delete messages created after `after` (or at it, when `inclusive`)
    async fn delete_messages_after(
        &self,
        thread_id: &str,
        after: DateTime<Utc>,
        inclusive: bool,
    ) -> Result<()>;

    /// Create or replace a message summary
    async fn upsert_summary(&self, summary: MessageSummary) -> Result<()>;

    /// All summaries of a thread, oldest first
    async fn get_summaries(&self, thread_id: &str) -> Result<Vec<MessageSummary>>;

    /// Create or replace a project
    async fn upsert_project(&self, project: Project) -> Result<()>;

    /// List projects owned by a user
    async fn list_projects(&self, user_id: &str) -> Result<Vec<Project>>;

    /// Delete a project record (member threads are handled by the caller)
    async fn delete_project(&self, project_id: &str) -> Result<()>;

    /// Open the realtime change subscription for a user
    async fn subscribe(&self, user_id: &str) -> Result<ChangeStream>;
}
