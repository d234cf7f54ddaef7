use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use chatsync_persist::RemoteStore;
use chatsync_types::{
    Message, MessageSummary, Project, ProjectPatch, RemoteChange, SessionId, StreamingBroadcast,
    StreamingState, SyncConfig, SyncEvent, Thread, ThreadPatch, Topic,
};
use crate::builder::SyncEngineBuilder;
use crate::error::{Result, SyncError};
use crate::event_bus::{EventBus, HandlerId, Subscription};
use crate::local_store::{LocalStore, MessagePhase};
use crate::reconcile::Reconciler;
use crate::remote_sync::{hydrate, spawn_realtime, Outbox, RemoteWrite};
use crate::streaming::{BroadcastFeed, BroadcastTransport, StreamingChannel};

/// What happens to a project's threads when the project is deleted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectDeletion {
    /// Delete every member thread with its messages
    CascadeThreads,
    /// Move member threads to another existing project
    ReassignTo(String),
}

#[derive(Default)]
struct Background {
    outbox: Option<Outbox>,
    realtime: Option<JoinHandle<()>>,
    broadcasts: Option<JoinHandle<()>>,
    sweeper: Option<JoinHandle<()>>,
}

impl Background {
    fn stop_listeners(&mut self) {
        for handle in [self.realtime.take(), self.broadcasts.take(), self.sweeper.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }

    /// Abort listeners; the outbox is handed back so pending writes can finish
    fn stop(&mut self) -> Option<Outbox> {
        self.stop_listeners();
        self.outbox.take()
    }
}

struct EngineInner {
    config: SyncConfig,
    store: Mutex<LocalStore>,
    bus: EventBus,
    remote: Arc<dyn RemoteStore>,
    streaming: StreamingChannel,
    background: Mutex<Background>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        if let Some(outbox) = self.background.get_mut().stop() {
            outbox.detach();
        }
    }
}

/// Local-first synchronization session for one user on one device.
///
/// Reads come straight from the local store. Mutations apply locally, notify
/// subscribers, then persist through the outbox. Remote changes and streaming
/// frames from other sessions are merged by the reconciler. Cloning is cheap
/// and clones share the session.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        transport: Arc<dyn BroadcastTransport>,
        config: SyncConfig,
    ) -> Self {
        Self::with_session(remote, transport, config, SessionId::generate())
    }

    pub fn with_session(
        remote: Arc<dyn RemoteStore>,
        transport: Arc<dyn BroadcastTransport>,
        config: SyncConfig,
        session_id: SessionId,
    ) -> Self {
        let bus = EventBus::new(config.event_capacity);
        Self {
            inner: Arc::new(EngineInner {
                store: Mutex::new(LocalStore::new()),
                bus,
                remote,
                streaming: StreamingChannel::new(session_id, transport),
                background: Mutex::new(Background::default()),
                config,
            }),
        }
    }

    pub fn builder() -> SyncEngineBuilder {
        SyncEngineBuilder::new()
    }

    pub fn session_id(&self) -> SessionId {
        self.inner.streaming.session_id().clone()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn user_id(&self) -> Option<String> {
        self.inner.store.lock().user_id().map(str::to_string)
    }

    // ---- events ----

    pub fn on<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&SyncEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.bus.on(topic, handler)
    }

    pub fn off(&self, topic: Topic, id: HandlerId) -> bool {
        self.inner.bus.off(topic, id)
    }

    /// Async stream of every event
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.bus.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.bus
    }

    // ---- lifecycle ----

    /// Attach the session to `user_id`: hydrate the cache, subscribe to
    /// realtime changes and streaming frames, start the stale-stream sweeper.
    ///
    /// Calling it again restarts the listeners. Re-initializing the same user
    /// keeps the running outbox; otherwise the new outbox starts writing only
    /// once the previous one has drained. Switching users clears the previous
    /// user's data first.
    pub async fn initialize(&self, user_id: &str) -> Result<()> {
        let same_user = self.user_id().as_deref() == Some(user_id);
        {
            let mut background = self.inner.background.lock();
            background.stop_listeners();
            if !same_user || background.outbox.is_none() {
                let previous = background.outbox.take();
                background.outbox = Some(Outbox::spawn(
                    Arc::clone(&self.inner.remote),
                    self.inner.config.retry.clone(),
                    self.inner.bus.clone(),
                    previous,
                ));
            }
        }

        self.reconcile(|rec| {
            if rec.store().user_id() != Some(user_id) {
                rec.reset(Some(user_id.to_string()));
            }
        });
        info!(user_id, session_id = %self.session_id(), "Initializing sync engine");

        // Subscribe before reading so nothing written meanwhile is missed
        let stream = match self.inner.remote.subscribe(user_id).await {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!(user_id, "Realtime subscription failed, retrying in background: {}", e);
                None
            }
        };
        let weak = Arc::downgrade(&self.inner);
        let realtime = spawn_realtime(
            Arc::clone(&self.inner.remote),
            user_id.to_string(),
            self.inner.config.retry.clone(),
            stream,
            move |changes| match weak.upgrade() {
                Some(inner) => {
                    SyncEngine { inner }.apply_remote_batch(changes);
                    true
                }
                None => false,
            },
        );

        let snapshot = hydrate(self.inner.remote.as_ref(), user_id).await;
        self.apply_remote_batch(snapshot);

        let feed = match self.inner.streaming.incoming().await {
            Ok(feed) => Some(feed),
            Err(e) => {
                warn!("Streaming channel unavailable, retrying in background: {:#}", e);
                None
            }
        };
        let broadcasts = self.spawn_broadcast_listener(feed);
        let sweeper = self.spawn_sweeper();

        let mut background = self.inner.background.lock();
        background.stop_listeners();
        background.realtime = Some(realtime);
        background.broadcasts = Some(broadcasts);
        background.sweeper = Some(sweeper);
        Ok(())
    }

    /// Wipe the cache, tombstones and streams included, and stop listening.
    ///
    /// Writes already queued still reach the remote store, ahead of any
    /// written after the next `initialize`.
    pub fn clear_local_data(&self) {
        self.inner.background.lock().stop_listeners();
        self.reconcile(|rec| rec.reset(None));
        info!(session_id = %self.session_id(), "Local data cleared");
    }

    /// Session teardown: end this session's streams with their partial
    /// content, stop listening and flush pending writes.
    pub async fn shutdown(&self) {
        let own = self.reconcile(|rec| rec.own_streams());
        for (thread_id, message_id) in own {
            let partial = self
                .inner
                .store
                .lock()
                .message(&message_id)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            if let Err(e) = self.end_streaming(&thread_id, &message_id, &partial) {
                warn!(message_id = %message_id, "Failed to end stream on shutdown: {}", e);
            }
        }

        if let Some(outbox) = self.stop_background() {
            outbox.drain().await;
        }
        info!(session_id = %self.session_id(), "Sync engine shut down");
    }

    fn stop_background(&self) -> Option<Outbox> {
        self.inner.background.lock().stop()
    }

    /// Feed streaming frames to the reconciler. An ended or missing feed is
    /// reopened with the retry backoff.
    fn spawn_broadcast_listener(&self, first: Option<BroadcastFeed>) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let channel = self.inner.streaming.clone();
        let retry = self.inner.config.retry.clone();
        tokio::spawn(async move {
            let mut pending = first;
            let mut attempt = 0u32;

            loop {
                let mut feed = match pending.take() {
                    Some(feed) => feed,
                    None => {
                        attempt += 1;
                        tokio::time::sleep(retry.delay_for(attempt)).await;
                        if weak.strong_count() == 0 {
                            break;
                        }
                        match channel.incoming().await {
                            Ok(feed) => {
                                info!(attempt, "Streaming channel reconnected");
                                attempt = 0;
                                feed
                            }
                            Err(e) => {
                                warn!(attempt, "Streaming channel reconnect failed: {:#}", e);
                                continue;
                            }
                        }
                    }
                };

                while let Some(frame) = feed.next().await {
                    let Some(inner) = weak.upgrade() else {
                        debug!("Streaming listener stopped");
                        return;
                    };
                    SyncEngine { inner }.apply_streaming_broadcast(frame);
                }
                warn!("Streaming feed ended, reconnecting");
            }
            debug!("Streaming listener stopped");
        })
    }

    fn spawn_sweeper(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                SyncEngine { inner }.expire_stale_streams(Instant::now());
            }
        })
    }

    // ---- plumbing ----

    /// Run one reconciliation under the lock, then emit its events unlocked
    fn reconcile<R>(&self, op: impl FnOnce(&mut Reconciler<'_>) -> R) -> R {
        let (result, events) = {
            let mut store = self.inner.store.lock();
            let mut rec = Reconciler::new(
                &mut *store,
                self.inner.streaming.session_id(),
                &self.inner.config.placeholder_title,
            );
            let result = op(&mut rec);
            (result, rec.finish())
        };
        for event in events {
            self.inner.bus.emit(event);
        }
        result
    }

    /// Like `reconcile`, for operations that need an initialized session
    fn mutate<R>(&self, op: impl FnOnce(&mut Reconciler<'_>) -> Result<R>) -> Result<R> {
        self.reconcile(|rec| {
            if rec.store().user_id().is_none() {
                return Err(SyncError::NotInitialized);
            }
            op(rec)
        })
    }

    fn enqueue(&self, writes: impl IntoIterator<Item = RemoteWrite>) {
        let background = self.inner.background.lock();
        match &background.outbox {
            Some(outbox) => writes.into_iter().for_each(|w| outbox.enqueue(w)),
            None => warn!("No outbox running; remote writes dropped"),
        }
    }

    // ---- reads ----

    pub fn get_threads(&self) -> Vec<Thread> {
        self.inner.store.lock().threads()
    }

    pub fn get_thread(&self, thread_id: &str) -> Option<Thread> {
        self.inner.store.lock().thread(thread_id)
    }

    pub fn get_messages_by_thread_id(&self, thread_id: &str) -> Vec<Message> {
        self.inner.store.lock().messages(thread_id)
    }

    pub fn get_projects(&self) -> Vec<Project> {
        self.inner.store.lock().projects()
    }

    pub fn get_message_summaries_with_role(&self, thread_id: &str) -> Vec<MessageSummary> {
        self.inner.store.lock().summaries(thread_id)
    }

    pub fn get_streaming_state(&self, thread_id: &str) -> Option<StreamingState> {
        self.inner.store.lock().streaming_state(thread_id)
    }

    pub fn message_phase(&self, message_id: &str) -> Option<MessagePhase> {
        self.inner.store.lock().phase(message_id).cloned()
    }

    // ---- threads ----

    /// Create a thread; an existing id returns the cached thread unchanged
    pub fn create_thread(&self, thread: Thread) -> Result<Thread> {
        let created = self.mutate(|rec| {
            if let Some(existing) = rec.store().thread(&thread.id) {
                return Ok((existing, false));
            }
            if let Some(project_id) = &thread.project_id {
                if rec.store().project(project_id).is_none() {
                    return Err(SyncError::ProjectNotFound(project_id.clone()));
                }
            }
            Ok((rec.create_thread(thread), true))
        })?;

        let (thread, is_new) = created;
        if is_new {
            info!(thread_id = %thread.id, "Thread created");
            self.enqueue([RemoteWrite::UpsertThread(thread.clone())]);
        }
        Ok(thread)
    }

    pub fn update_thread(&self, thread_id: &str, patch: ThreadPatch) -> Result<Thread> {
        let updated = self.mutate(|rec| rec.patch_thread(thread_id, patch))?;
        match updated {
            Some(thread) => {
                self.enqueue([RemoteWrite::UpsertThread(thread.clone())]);
                Ok(thread)
            }
            None => self
                .get_thread(thread_id)
                .ok_or_else(|| SyncError::ThreadNotFound(thread_id.to_string())),
        }
    }

    /// Title from the async summarization step; never regresses to the
    /// placeholder, and the latest generated title wins.
    pub fn apply_generated_title(&self, thread_id: &str, title: &str) -> Result<Thread> {
        let updated = self.mutate(|rec| rec.set_generated_title(thread_id, title))?;
        match updated {
            Some(thread) => {
                debug!(thread_id, title, "Applied generated title");
                self.enqueue([RemoteWrite::UpsertThread(thread.clone())]);
                Ok(thread)
            }
            None => self
                .get_thread(thread_id)
                .ok_or_else(|| SyncError::ThreadNotFound(thread_id.to_string())),
        }
    }

    /// Delete a thread with its messages, summaries and streaming state
    pub fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.mutate(|rec| {
            if rec.store().thread(thread_id).is_none() {
                return Err(SyncError::ThreadNotFound(thread_id.to_string()));
            }
            rec.delete_thread(thread_id);
            Ok(())
        })?;
        info!(thread_id, "Thread deleted");
        self.enqueue([RemoteWrite::DeleteThread(thread_id.to_string())]);
        Ok(())
    }

    // ---- messages ----

    /// Append a finalized message. The thread is created on first use.
    pub fn create_message(&self, message: Message) -> Result<Message> {
        let (message, writes) = self.mutate(|rec| {
            let mut message = message;
            if message.user_id.is_empty() {
                message.user_id = rec.store().user_id().unwrap_or_default().to_string();
            }
            let thread_id = message.thread_id.clone();

            let created_thread = rec.ensure_thread(&thread_id).is_some();
            let message = rec.create_message(message)?;
            let thread = rec
                .touch_thread(&thread_id, message.created_at)
                .or_else(|| created_thread.then(|| rec.store().thread(&thread_id)).flatten());

            let mut writes = Vec::with_capacity(2);
            if let Some(thread) = thread {
                writes.push(RemoteWrite::UpsertThread(thread));
            }
            writes.push(RemoteWrite::UpsertMessage(message.clone()));
            Ok((message, writes))
        })?;

        debug!(message_id = %message.id, thread_id = %message.thread_id, "Message created");
        self.enqueue(writes);
        Ok(message)
    }

    /// Replace a message, e.g. to attach artifacts after finalization.
    /// Content follows the merge rule and never shrinks.
    pub fn update_message(&self, message: Message) -> Result<Message> {
        let message_id = message.id.clone();
        let (updated, current) = self.mutate(|rec| {
            let updated = rec.replace_message(message)?;
            let current = rec.store().message(&message_id).cloned();
            Ok((updated, current))
        })?;

        if let Some(updated) = updated {
            self.enqueue([RemoteWrite::UpsertMessage(updated)]);
        }
        current.ok_or(SyncError::MessageNotFound(message_id))
    }

    /// Remove every message of the thread created after `after` (or at it, when
    /// `inclusive`). Late copies of removed messages are dropped.
    pub fn delete_trailing_messages(
        &self,
        thread_id: &str,
        after: DateTime<Utc>,
        inclusive: bool,
    ) -> Result<usize> {
        let removed = self.mutate(|rec| Ok(rec.truncate_thread(thread_id, after, inclusive)))?;

        info!(thread_id, removed = removed.len(), %after, inclusive, "Trailing messages deleted");
        self.enqueue([RemoteWrite::DeleteMessagesAfter {
            thread_id: thread_id.to_string(),
            after,
            inclusive,
        }]);
        Ok(removed.len())
    }

    // ---- summaries ----

    pub fn create_message_summary(&self, summary: MessageSummary) -> Result<()> {
        let stored = summary.clone();
        self.mutate(|rec| rec.add_summary(summary))?;
        self.enqueue([RemoteWrite::UpsertSummary(stored)]);
        Ok(())
    }

    // ---- projects ----

    pub fn create_project(&self, project: Project) -> Result<Project> {
        let project = self.mutate(|rec| Ok(rec.create_project(project)))?;
        info!(project_id = %project.id, "Project created");
        self.enqueue([RemoteWrite::UpsertProject(project.clone())]);
        Ok(project)
    }

    pub fn update_project(&self, project_id: &str, patch: ProjectPatch) -> Result<Project> {
        let updated = self.mutate(|rec| rec.patch_project(project_id, patch))?;
        match updated {
            Some(project) => {
                self.enqueue([RemoteWrite::UpsertProject(project.clone())]);
                Ok(project)
            }
            None => self
                .inner
                .store
                .lock()
                .project(project_id)
                .cloned()
                .ok_or_else(|| SyncError::ProjectNotFound(project_id.to_string())),
        }
    }

    /// Delete a project. Member threads are deleted or moved, never orphaned.
    pub fn delete_project(&self, project_id: &str, mode: ProjectDeletion) -> Result<()> {
        let writes = self.mutate(|rec| {
            if rec.store().project(project_id).is_none() {
                return Err(SyncError::ProjectNotFound(project_id.to_string()));
            }
            if let ProjectDeletion::ReassignTo(target) = &mode {
                if target == project_id || rec.store().project(target).is_none() {
                    return Err(SyncError::InvalidReassignment {
                        project: project_id.to_string(),
                        target: target.clone(),
                    });
                }
            }

            let members = rec.store().project_threads(project_id);
            let mut writes = Vec::with_capacity(members.len() + 1);
            for thread_id in members {
                match &mode {
                    ProjectDeletion::CascadeThreads => {
                        rec.delete_thread(&thread_id);
                        writes.push(RemoteWrite::DeleteThread(thread_id));
                    }
                    ProjectDeletion::ReassignTo(target) => {
                        let patch = ThreadPatch::new().project(Some(target.clone()));
                        if let Some(thread) = rec.patch_thread(&thread_id, patch)? {
                            writes.push(RemoteWrite::UpsertThread(thread));
                        }
                    }
                }
            }
            rec.delete_project(project_id);
            writes.push(RemoteWrite::DeleteProject(project_id.to_string()));
            Ok(writes)
        })?;

        info!(project_id, ?mode, "Project deleted");
        self.enqueue(writes);
        Ok(())
    }

    // ---- streaming ----

    /// Announce generation of `message_id` by this session
    pub fn start_streaming(&self, thread_id: &str, message_id: &str) -> Result<()> {
        let created_at = Utc::now();
        let new_thread = self.mutate(|rec| {
            let thread = rec.ensure_thread(thread_id);
            rec.begin_stream(thread_id, message_id, created_at, Instant::now())?;
            Ok(thread)
        })?;
        if let Some(thread) = new_thread {
            self.enqueue([RemoteWrite::UpsertThread(thread)]);
        }

        let created_at = self
            .inner
            .store
            .lock()
            .message(message_id)
            .map_or(created_at, |m| m.created_at);
        self.inner.streaming.announce_start(thread_id, message_id, created_at);
        Ok(())
    }

    /// Push the latest accumulated content. Returns `false` when the update was
    /// dropped because the message is closed or the content would shrink.
    pub fn update_streaming_content(&self, thread_id: &str, message_id: &str, content: &str) -> Result<bool> {
        let session_id = self.session_id();
        let now = Instant::now();
        let (applied, created_at) = self.mutate(|rec| {
            let applied = rec.stream_update(thread_id, message_id, content, &session_id, Utc::now(), now);
            let created_at = rec.store().message(message_id).map(|m| m.created_at);
            Ok((applied, created_at))
        })?;

        if applied {
            self.inner.streaming.push_update(
                thread_id,
                message_id,
                content,
                created_at.unwrap_or_else(Utc::now),
            );
        }
        Ok(applied)
    }

    /// Finish generation with `final_content`, announce it and persist the
    /// message. Returns the finalized message, or `None` if it was deleted.
    pub fn end_streaming(&self, thread_id: &str, message_id: &str, final_content: &str) -> Result<Option<Message>> {
        let finalized =
            self.mutate(|rec| Ok(rec.finish_stream(thread_id, message_id, final_content, Utc::now())))?;

        if let Some(message) = &finalized {
            self.inner
                .streaming
                .announce_end(thread_id, message_id, &message.content, message.created_at);
            self.enqueue([RemoteWrite::UpsertMessage(message.clone())]);
            debug!(message_id, chars = message.content_len(), "Stream finalized");
        }
        Ok(finalized)
    }

    /// Force-finalize streams with no update for the quiet period.
    /// Streams of this session are also announced as ended and persisted.
    pub fn expire_stale_streams(&self, now: Instant) -> usize {
        let Some(cutoff) = now.checked_sub(self.inner.config.quiet_period()) else {
            return 0;
        };
        let expired = self.reconcile(|rec| rec.expire_streams(cutoff));

        let mut writes = Vec::new();
        for (message, own) in &expired {
            if *own {
                self.inner.streaming.announce_end(
                    &message.thread_id,
                    &message.id,
                    &message.content,
                    message.created_at,
                );
                writes.push(RemoteWrite::UpsertMessage(message.clone()));
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Force-finalized quiet streams");
            self.enqueue(writes);
        }
        expired.len()
    }

    // ---- inbound ----

    /// Merge a change delivered by the remote store. Ignored while no user is
    /// attached, so a late delivery cannot refill a cleared cache.
    pub fn apply_remote_change(&self, change: RemoteChange) -> bool {
        self.reconcile(|rec| rec.store().user_id().is_some() && rec.apply_remote(change))
    }

    fn apply_remote_batch(&self, changes: Vec<RemoteChange>) {
        if changes.is_empty() {
            return;
        }
        self.reconcile(|rec| {
            if rec.store().user_id().is_none() {
                return;
            }
            for change in changes {
                rec.apply_remote(change);
            }
        });
    }

    /// Merge a frame from the streaming channel; own echoes are ignored
    pub fn apply_streaming_broadcast(&self, broadcast: StreamingBroadcast) -> bool {
        let now = Instant::now();
        self.reconcile(|rec| rec.store().user_id().is_some() && rec.apply_broadcast(broadcast, now))
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("session_id", self.inner.streaming.session_id())
            .field("user_id", &self.user_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::LocalTransport;
    use chatsync_persist::InMemoryRemoteStore;
    use chatsync_types::ChangePayload;

    fn engine() -> SyncEngine {
        SyncEngine::new(
            Arc::new(InMemoryRemoteStore::new()),
            Arc::new(LocalTransport::default()),
            SyncConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_mutations_require_initialize() {
        let engine = engine();
        let result = engine.create_message(Message::user("t1", "hi"));
        assert!(matches!(result, Err(SyncError::NotInitialized)));
        assert!(engine.get_threads().is_empty());
    }

    #[tokio::test]
    async fn test_inbound_changes_are_ignored_without_a_user() {
        let engine = engine();
        engine.initialize("u1").await.unwrap();
        engine.clear_local_data();

        let late = Message::assistant("t1", "late copy").with_id("a1");
        assert!(!engine.apply_remote_change(RemoteChange::inserted(ChangePayload::Message(late))));
        assert!(!engine.apply_streaming_broadcast(StreamingBroadcast::Update {
            session_id: SessionId::from("other"),
            thread_id: "t1".to_string(),
            message_id: "a2".to_string(),
            content: "partial".to_string(),
            created_at: Utc::now(),
        }));

        assert!(engine.get_threads().is_empty());
        assert!(engine.get_messages_by_thread_id("t1").is_empty());
        assert!(engine.get_streaming_state("t1").is_none());
        assert_eq!(engine.message_phase("a2"), None);
    }

    #[tokio::test]
    async fn test_first_message_creates_thread() {
        let engine = engine();
        engine.initialize("u1").await.unwrap();

        let message = engine.create_message(Message::user("t1", "hello")).unwrap();

        assert_eq!(message.user_id, "u1");
        let thread = engine.get_thread("t1").unwrap();
        assert_eq!(thread.user_id, "u1");
        assert_eq!(thread.display_title("New Chat"), "New Chat");
        assert_eq!(engine.get_messages_by_thread_id("t1").len(), 1);
        assert_eq!(engine.message_phase(&message.id), Some(MessagePhase::Finalized));
    }

    #[tokio::test]
    async fn test_create_thread_is_idempotent() {
        let engine = engine();
        engine.initialize("u1").await.unwrap();

        engine.create_thread(Thread::new("t1", "")).unwrap();
        engine.apply_generated_title("t1", "Trip").unwrap();
        let again = engine.create_thread(Thread::new("t1", "")).unwrap();

        assert_eq!(again.metadata.title.as_deref(), Some("Trip"));
    }

    #[tokio::test]
    async fn test_reassign_to_missing_project_is_rejected() {
        let engine = engine();
        engine.initialize("u1").await.unwrap();
        let project = engine.create_project(Project::new("", "Work")).unwrap();

        let result = engine.delete_project(&project.id, ProjectDeletion::ReassignTo("nope".to_string()));
        assert!(matches!(result, Err(SyncError::InvalidReassignment { .. })));

        let result = engine.delete_project(&project.id, ProjectDeletion::ReassignTo(project.id.clone()));
        assert!(matches!(result, Err(SyncError::InvalidReassignment { .. })));
        assert_eq!(engine.get_projects().len(), 1);
    }

    #[tokio::test]
    async fn test_update_after_end_is_dropped() {
        let engine = engine();
        engine.initialize("u1").await.unwrap();

        engine.start_streaming("t1", "a1").unwrap();
        assert!(engine.update_streaming_content("t1", "a1", "Hel").unwrap());
        engine.end_streaming("t1", "a1", "Hello").unwrap();

        assert!(!engine.update_streaming_content("t1", "a1", "Hello, stale world").unwrap());
        assert_eq!(engine.get_messages_by_thread_id("t1")[0].content, "Hello");
        assert!(engine.get_streaming_state("t1").is_none());
    }
}
