use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use chatsync_types::{
    ChangePayload, EntityKind, Message, MessageSummary, Project, RemoteChange, Thread,
};
use crate::error::{PersistError, Result};
use crate::trait_client::{ChangeStream, RemoteStore};

/// Realtime fan-out entry: owning user plus the change itself
type OwnedChange = (String, RemoteChange);

#[derive(Default)]
struct Collections {
    threads: HashMap<String, Thread>,
    messages: HashMap<String, Message>,
    summaries: HashMap<String, MessageSummary>,
    projects: HashMap<String, Project>,
}

/// Process-local remote store.
///
/// Behaves like the real backend from the client's point of view: writes are
/// upserts keyed by client ids and every write is echoed on the realtime
/// subscription of the owning user. Used by tests and local development; failures
/// can be injected with [`InMemoryRemoteStore::fail_next`].
pub struct InMemoryRemoteStore {
    data: Mutex<Collections>,
    changes: Mutex<broadcast::Sender<OwnedChange>>,
    failures: Mutex<VecDeque<PersistError>>,
    writes: Mutex<u64>,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(1024);
        Self {
            data: Mutex::new(Collections::default()),
            changes: Mutex::new(changes),
            failures: Mutex::new(VecDeque::new()),
            writes: Mutex::new(0),
        }
    }

    /// Make the next write fail with `error`. Calls queue up.
    pub fn fail_next(&self, error: PersistError) {
        self.failures.lock().push_back(error);
    }

    /// Number of write calls received, failed ones included.
    pub fn write_count(&self) -> u64 {
        *self.writes.lock()
    }

    /// Publish a change as if another client had written it.
    pub fn inject_change(&self, user_id: &str, change: RemoteChange) {
        let _ = self.changes.lock().send((user_id.to_string(), change));
    }

    /// End every open realtime subscription, as a dropped connection would.
    /// Later subscriptions work normally.
    pub fn disconnect_subscribers(&self) {
        let (changes, _) = broadcast::channel(1024);
        *self.changes.lock() = changes;
    }

    fn begin_write(&self) -> Result<()> {
        *self.writes.lock() += 1;
        match self.failures.lock().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn publish(&self, user_id: String, change: RemoteChange) {
        // No subscribers is fine
        let _ = self.changes.lock().send((user_id, change));
    }

    fn thread_owner(data: &Collections, thread_id: &str) -> String {
        data.threads
            .get(thread_id)
            .map(|t| t.user_id.clone())
            .unwrap_or_default()
    }
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

fn upsert_change(existed: bool, payload: ChangePayload) -> RemoteChange {
    if existed {
        RemoteChange::updated(payload)
    } else {
        RemoteChange::inserted(payload)
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn upsert_thread(&self, thread: Thread) -> Result<()> {
        self.begin_write()?;
        let existed = self
            .data
            .lock()
            .threads
            .insert(thread.id.clone(), thread.clone())
            .is_some();
        self.publish(thread.user_id.clone(), upsert_change(existed, ChangePayload::Thread(thread)));
        Ok(())
    }

    async fn list_threads(&self, user_id: &str) -> Result<Vec<Thread>> {
        let data = self.data.lock();
        let mut threads: Vec<Thread> = data
            .threads
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        threads.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(threads)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.begin_write()?;
        let owner = {
            let mut data = self.data.lock();
            let owner = Self::thread_owner(&data, thread_id);
            data.threads.remove(thread_id);
            data.messages.retain(|_, m| m.thread_id != thread_id);
            data.summaries.retain(|_, s| s.thread_id != thread_id);
            owner
        };
        self.publish(owner, RemoteChange::deleted(EntityKind::Thread, thread_id));
        Ok(())
    }

    async fn upsert_message(&self, message: Message) -> Result<()> {
        self.begin_write()?;
        let existed = self
            .data
            .lock()
            .messages
            .insert(message.id.clone(), message.clone())
            .is_some();
        self.publish(
            message.user_id.clone(),
            upsert_change(existed, ChangePayload::Message(message)),
        );
        Ok(())
    }

    async fn get_messages(&self, thread_id: &str) -> Result<Vec<Message>> {
        let data = self.data.lock();
        let mut messages: Vec<Message> = data
            .messages
            .values()
            .filter(|m| m.thread_id == thread_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Ok(messages)
    }

    async fn delete_messages_after(
        &self,
        thread_id: &str,
        after: DateTime<Utc>,
        inclusive: bool,
    ) -> Result<()> {
        self.begin_write()?;
        let removed: Vec<(String, String)> = {
            let mut data = self.data.lock();
            let doomed: Vec<String> = data
                .messages
                .values()
                .filter(|m| {
                    m.thread_id == thread_id
                        && (m.created_at > after || (inclusive && m.created_at == after))
                })
                .map(|m| m.id.clone())
                .collect();
            doomed
                .into_iter()
                .filter_map(|id| data.messages.remove(&id).map(|m| (m.user_id, id)))
                .collect()
        };
        for (owner, id) in removed {
            self.publish(owner, RemoteChange::deleted(EntityKind::Message, id));
        }
        Ok(())
    }

    async fn upsert_summary(&self, summary: MessageSummary) -> Result<()> {
        self.begin_write()?;
        let (existed, owner) = {
            let mut data = self.data.lock();
            let owner = Self::thread_owner(&data, &summary.thread_id);
            let existed = data.summaries.insert(summary.id.clone(), summary.clone()).is_some();
            (existed, owner)
        };
        self.publish(owner, upsert_change(existed, ChangePayload::Summary(summary)));
        Ok(())
    }

    async fn get_summaries(&self, thread_id: &str) -> Result<Vec<MessageSummary>> {
        let data = self.data.lock();
        let mut summaries: Vec<MessageSummary> = data
            .summaries
            .values()
            .filter(|s| s.thread_id == thread_id)
            .cloned()
            .collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(summaries)
    }

    async fn upsert_project(&self, project: Project) -> Result<()> {
        self.begin_write()?;
        let existed = self
            .data
            .lock()
            .projects
            .insert(project.id.clone(), project.clone())
            .is_some();
        self.publish(
            project.user_id.clone(),
            upsert_change(existed, ChangePayload::Project(project)),
        );
        Ok(())
    }

    async fn list_projects(&self, user_id: &str) -> Result<Vec<Project>> {
        let data = self.data.lock();
        let mut projects: Vec<Project> = data
            .projects
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        projects.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(projects)
    }

    async fn delete_project(&self, project_id: &str) -> Result<()> {
        self.begin_write()?;
        let removed = self.data.lock().projects.remove(project_id);
        match removed {
            Some(project) => {
                self.publish(project.user_id, RemoteChange::deleted(EntityKind::Project, project_id));
                Ok(())
            }
            None => Err(PersistError::ProjectNotFound(project_id.to_string())),
        }
    }

    async fn subscribe(&self, user_id: &str) -> Result<ChangeStream> {
        let user_id = user_id.to_string();
        let stream = BroadcastStream::new(self.changes.lock().subscribe()).filter_map(move |item| {
            let change = match item {
                Ok((owner, change)) if owner == user_id => Some(change),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!("Realtime subscriber lagged: {}", e);
                    None
                }
            };
            futures::future::ready(change)
        });
        Ok(Box::pin(stream))
    }
}
