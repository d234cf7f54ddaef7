//! Bridge to the remote store.
//!
//! Local mutations are queued as [`RemoteWrite`]s and applied in order by a
//! single writer task. Transient failures are retried with exponential backoff;
//! permanent or exhausted failures become `sync_warning` events.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use chatsync_persist::{ChangeStream, PersistError, RemoteStore};
use chatsync_types::{
    ChangePayload, EntityKind, Message, MessageSummary, Project, RemoteChange, RetryConfig,
    SyncEvent, SyncWarning, Thread,
};
use crate::event_bus::EventBus;

/// One queued remote mutation
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteWrite {
    UpsertThread(Thread),
    DeleteThread(String),
    UpsertMessage(Message),
    DeleteMessagesAfter {
        thread_id: String,
        after: DateTime<Utc>,
        inclusive: bool,
    },
    UpsertSummary(MessageSummary),
    UpsertProject(Project),
    DeleteProject(String),
}

impl RemoteWrite {
    pub fn operation(&self) -> &'static str {
        match self {
            RemoteWrite::UpsertThread(_) => "upsert_thread",
            RemoteWrite::DeleteThread(_) => "delete_thread",
            RemoteWrite::UpsertMessage(_) => "upsert_message",
            RemoteWrite::DeleteMessagesAfter { .. } => "delete_messages_after",
            RemoteWrite::UpsertSummary(_) => "upsert_summary",
            RemoteWrite::UpsertProject(_) => "upsert_project",
            RemoteWrite::DeleteProject(_) => "delete_project",
        }
    }

    /// Entity kind and id the write targets
    pub fn target(&self) -> (EntityKind, &str) {
        match self {
            RemoteWrite::UpsertThread(thread) => (EntityKind::Thread, thread.id.as_str()),
            RemoteWrite::DeleteThread(id) => (EntityKind::Thread, id.as_str()),
            RemoteWrite::UpsertMessage(message) => (EntityKind::Message, message.id.as_str()),
            RemoteWrite::DeleteMessagesAfter { thread_id, .. } => {
                (EntityKind::Message, thread_id.as_str())
            }
            RemoteWrite::UpsertSummary(summary) => (EntityKind::Summary, summary.id.as_str()),
            RemoteWrite::UpsertProject(project) => (EntityKind::Project, project.id.as_str()),
            RemoteWrite::DeleteProject(id) => (EntityKind::Project, id.as_str()),
        }
    }

    async fn apply(&self, remote: &dyn RemoteStore) -> chatsync_persist::Result<()> {
        match self {
            RemoteWrite::UpsertThread(thread) => remote.upsert_thread(thread.clone()).await,
            RemoteWrite::DeleteThread(id) => remote.delete_thread(id).await,
            RemoteWrite::UpsertMessage(message) => remote.upsert_message(message.clone()).await,
            RemoteWrite::DeleteMessagesAfter {
                thread_id,
                after,
                inclusive,
            } => remote.delete_messages_after(thread_id, *after, *inclusive).await,
            RemoteWrite::UpsertSummary(summary) => remote.upsert_summary(summary.clone()).await,
            RemoteWrite::UpsertProject(project) => remote.upsert_project(project.clone()).await,
            RemoteWrite::DeleteProject(id) => remote.delete_project(id).await,
        }
    }
}

/// Apply `write`, retrying transient failures per `retry`.
pub async fn write_with_retry(
    remote: &dyn RemoteStore,
    write: &RemoteWrite,
    retry: &RetryConfig,
) -> Result<u32, SyncWarning> {
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let error = match write.apply(remote).await {
            Ok(()) => return Ok(attempt),
            Err(e) => e,
        };

        let transient = error.is_transient();
        if transient && attempt < max_attempts {
            let delay = retry.delay_for(attempt);
            warn!(
                operation = write.operation(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Remote write failed, retrying: {}",
                error
            );
            tokio::time::sleep(delay).await;
            continue;
        }

        return Err(warning_for(write, &error, !transient, attempt));
    }
}

fn warning_for(write: &RemoteWrite, error: &PersistError, permanent: bool, attempts: u32) -> SyncWarning {
    let (entity, id) = write.target();
    SyncWarning {
        operation: write.operation().to_string(),
        entity,
        id: id.to_string(),
        message: error.to_string(),
        permanent,
        attempts,
    }
}

/// Queue feeding the single writer task.
pub(crate) struct Outbox {
    sender: mpsc::UnboundedSender<RemoteWrite>,
    handle: JoinHandle<()>,
}

impl Outbox {
    /// Start the writer. With `after`, nothing is written until that outbox
    /// has drained; writes queued meanwhile wait in order.
    pub fn spawn(
        remote: Arc<dyn RemoteStore>,
        retry: RetryConfig,
        bus: EventBus,
        after: Option<Outbox>,
    ) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<RemoteWrite>();

        let handle = tokio::spawn(async move {
            if let Some(previous) = after {
                previous.drain().await;
            }
            while let Some(write) = receiver.recv().await {
                match write_with_retry(remote.as_ref(), &write, &retry).await {
                    Ok(attempts) => {
                        debug!(operation = write.operation(), attempts, "Remote write applied");
                    }
                    Err(warning) => {
                        error!("Remote write abandoned: {}", warning);
                        bus.emit(SyncEvent::SyncWarning(warning));
                    }
                }
            }
            debug!("Outbox writer stopped");
        });

        Self { sender, handle }
    }

    pub fn enqueue(&self, write: RemoteWrite) {
        if self.sender.send(write).is_err() {
            warn!("Outbox writer is gone; dropping remote write");
        }
    }

    /// Close the queue and wait until every pending write was attempted
    pub async fn drain(self) {
        drop(self.sender);
        if let Err(e) = self.handle.await {
            warn!("Outbox writer ended abnormally: {}", e);
        }
    }

    /// Close the queue and let pending writes finish in the background
    pub fn detach(self) {
        drop(self.sender);
    }
}

/// Initial snapshot of a user's data as a batch of remote inserts.
///
/// Read failures are logged and skipped; the cache keeps whatever was read.
pub async fn hydrate(remote: &dyn RemoteStore, user_id: &str) -> Vec<RemoteChange> {
    let mut changes = Vec::new();

    let threads = match remote.list_threads(user_id).await {
        Ok(threads) => threads,
        Err(e) => {
            warn!(user_id, "Failed to list threads during hydration: {}", e);
            Vec::new()
        }
    };
    match remote.list_projects(user_id).await {
        Ok(projects) => changes.extend(
            projects
                .into_iter()
                .map(|p| RemoteChange::inserted(ChangePayload::Project(p))),
        ),
        Err(e) => warn!(user_id, "Failed to list projects during hydration: {}", e),
    }

    for thread in threads {
        let thread_id = thread.id.clone();
        changes.push(RemoteChange::inserted(ChangePayload::Thread(thread)));

        match remote.get_messages(&thread_id).await {
            Ok(messages) => changes.extend(
                messages
                    .into_iter()
                    .map(|m| RemoteChange::inserted(ChangePayload::Message(m))),
            ),
            Err(e) => warn!(thread_id = %thread_id, "Failed to load messages: {}", e),
        }
        match remote.get_summaries(&thread_id).await {
            Ok(summaries) => changes.extend(
                summaries
                    .into_iter()
                    .map(|s| RemoteChange::inserted(ChangePayload::Summary(s))),
            ),
            Err(e) => warn!(thread_id = %thread_id, "Failed to load summaries: {}", e),
        }
    }

    info!(user_id, records = changes.len(), "Hydrated local store");
    changes
}

/// Keep a realtime subscription for `user_id` alive and feed it to `apply`.
///
/// `first` is a stream the caller already opened. When the stream ends, or
/// `first` is `None`, the listener resubscribes with `retry` backoff and then
/// replays a fresh [`hydrate`] snapshot so changes missed while disconnected
/// are merged. Stops once `apply` returns `false`.
pub fn spawn_realtime<F>(
    remote: Arc<dyn RemoteStore>,
    user_id: String,
    retry: RetryConfig,
    first: Option<ChangeStream>,
    apply: F,
) -> JoinHandle<()>
where
    F: Fn(Vec<RemoteChange>) -> bool + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut pending = first;
        let mut attempt = 0u32;

        loop {
            let mut stream = match pending.take() {
                Some(stream) => stream,
                None => {
                    attempt += 1;
                    tokio::time::sleep(retry.delay_for(attempt)).await;
                    let stream = match remote.subscribe(&user_id).await {
                        Ok(stream) => stream,
                        Err(e) => {
                            warn!(user_id = %user_id, attempt, "Realtime resubscribe failed: {}", e);
                            continue;
                        }
                    };
                    info!(user_id = %user_id, attempt, "Realtime subscription restored");
                    attempt = 0;
                    if !apply(hydrate(remote.as_ref(), &user_id).await) {
                        break;
                    }
                    stream
                }
            };

            while let Some(change) = stream.next().await {
                debug!(entity = %change.entity(), operation = ?change.operation, "Realtime change");
                if !apply(vec![change]) {
                    debug!("Realtime listener stopped");
                    return;
                }
            }
            warn!(user_id = %user_id, "Realtime stream ended, resubscribing");
        }
        debug!("Realtime listener stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsync_persist::InMemoryRemoteStore;

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 5,
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let store = InMemoryRemoteStore::new();
        store.fail_next(PersistError::Unavailable("503".to_string()));
        store.fail_next(PersistError::Unavailable("503".to_string()));

        let write = RemoteWrite::UpsertThread(Thread::new("t1", "u1"));
        let attempts = write_with_retry(&store, &write, &fast_retry(5)).await.unwrap();

        assert_eq!(attempts, 3);
        assert_eq!(store.list_threads("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let store = InMemoryRemoteStore::new();
        store.fail_next(PersistError::Rejected("forbidden".to_string()));

        let write = RemoteWrite::UpsertThread(Thread::new("t1", "u1"));
        let warning = write_with_retry(&store, &write, &fast_retry(5)).await.unwrap_err();

        assert!(warning.permanent);
        assert_eq!(warning.attempts, 1);
        assert_eq!(warning.entity, EntityKind::Thread);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let store = InMemoryRemoteStore::new();
        for _ in 0..3 {
            store.fail_next(PersistError::Connection("reset".to_string()));
        }

        let write = RemoteWrite::DeleteThread("t1".to_string());
        let warning = write_with_retry(&store, &write, &fast_retry(3)).await.unwrap_err();

        assert!(!warning.permanent);
        assert_eq!(warning.attempts, 3);
        assert_eq!(warning.operation, "delete_thread");
    }

    #[tokio::test]
    async fn test_outbox_applies_writes_in_order() {
        let store = Arc::new(InMemoryRemoteStore::new());
        let outbox = Outbox::spawn(store.clone(), fast_retry(1), EventBus::new(8), None);

        outbox.enqueue(RemoteWrite::UpsertThread(Thread::new("t1", "u1")));
        outbox.enqueue(RemoteWrite::UpsertThread(Thread::new("t1", "u1").with_title("Second")));
        outbox.drain().await;

        let threads = store.list_threads("u1").await.unwrap();
        assert_eq!(threads[0].metadata.title.as_deref(), Some("Second"));
    }

    #[tokio::test]
    async fn test_chained_outbox_waits_for_previous_writes() {
        let store = Arc::new(InMemoryRemoteStore::new());
        store.fail_next(PersistError::Unavailable("503".to_string()));
        let retry = RetryConfig {
            max_attempts: 2,
            base_delay_ms: 50,
            max_delay_ms: 50,
        };

        let first = Outbox::spawn(store.clone(), retry.clone(), EventBus::new(8), None);
        first.enqueue(RemoteWrite::UpsertThread(Thread::new("t1", "u1").with_title("First")));
        let second = Outbox::spawn(store.clone(), retry, EventBus::new(8), Some(first));
        second.enqueue(RemoteWrite::UpsertThread(Thread::new("t1", "u1").with_title("Second")));
        second.drain().await;

        // The first write was still backing off when the second was queued
        let threads = store.list_threads("u1").await.unwrap();
        assert_eq!(threads[0].metadata.title.as_deref(), Some("Second"));
        assert_eq!(store.write_count(), 3);
    }

    #[tokio::test]
    async fn test_realtime_resubscribes_after_stream_ends() {
        let store = Arc::new(InMemoryRemoteStore::new());
        let first = store.subscribe("u1").await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel::<RemoteChange>();

        let handle = spawn_realtime(store.clone(), "u1".to_string(), fast_retry(1), Some(first), move |changes| {
            changes.into_iter().all(|change| tx.send(change).is_ok())
        });

        store.disconnect_subscribers();
        store.upsert_thread(Thread::new("t1", "u1")).await.unwrap();

        // Arrives through the replayed snapshot or the new stream
        let change = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.entity(), EntityKind::Thread);

        store.upsert_thread(Thread::new("t2", "u1")).await.unwrap();
        let seen = tokio::time::timeout(std::time::Duration::from_secs(1), async {
            loop {
                match rx.recv().await {
                    Some(RemoteChange { payload: ChangePayload::Thread(thread), .. }) if thread.id == "t2" => break true,
                    Some(_) => continue,
                    None => break false,
                }
            }
        })
        .await
        .unwrap();
        assert!(seen);
        handle.abort();
    }

    #[tokio::test]
    async fn test_hydrate_collects_user_data() {
        let store = InMemoryRemoteStore::new();
        store.upsert_thread(Thread::new("t1", "u1")).await.unwrap();
        store
            .upsert_message(Message::user("t1", "hello").with_user_id("u1"))
            .await
            .unwrap();
        store.upsert_project(Project::new("u1", "Work")).await.unwrap();
        store.upsert_thread(Thread::new("t2", "someone-else")).await.unwrap();

        let changes = hydrate(&store, "u1").await;

        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0].entity(), EntityKind::Project);
    }
}
