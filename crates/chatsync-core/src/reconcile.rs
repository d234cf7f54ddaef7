//! Merge rules for everything that reaches the local store.
//!
//! Each message id moves through Absent -> Streaming -> Finalized, with
//! Deleted reachable from any state and terminal. A [`Reconciler`] wraps one
//! operation: it mutates the store and records what became observably
//! different, then [`Reconciler::finish`] turns that record into at most one
//! event per topic and thread.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::debug;

use chatsync_types::{
    ChangeOperation, ChangePayload, EntityKind, Message, MessageRole, MessageSummary, Project,
    ProjectPatch, RemoteChange, SessionId, StreamingBroadcast, StreamingState, SyncEvent, Thread,
    ThreadPatch,
};
use crate::error::{Result, SyncError};
use crate::local_store::{LocalStore, MessagePhase};

#[derive(Debug, Default)]
struct ChangeSet {
    threads: bool,
    projects: bool,
    message_threads: BTreeSet<String>,
    summary_threads: BTreeSet<String>,
    streaming: Vec<StreamingState>,
}

impl ChangeSet {
    fn stream(&mut self, state: StreamingState) {
        // Latest state per message wins within one operation
        self.streaming.retain(|s| s.message_id != state.message_id);
        self.streaming.push(state);
    }
}

pub(crate) struct Reconciler<'a> {
    store: &'a mut LocalStore,
    session_id: &'a SessionId,
    placeholder: &'a str,
    changes: ChangeSet,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a mut LocalStore, session_id: &'a SessionId, placeholder: &'a str) -> Self {
        Self {
            store,
            session_id,
            placeholder,
            changes: ChangeSet::default(),
        }
    }

    pub fn store(&self) -> &LocalStore {
        self.store
    }

    fn user_id(&self) -> String {
        self.store.user_id.clone().unwrap_or_default()
    }

    /// Events describing everything this operation changed
    pub fn finish(self) -> Vec<SyncEvent> {
        let Reconciler { store, changes, .. } = self;
        let mut events = Vec::new();

        if changes.threads {
            events.push(SyncEvent::ThreadsUpdated {
                threads: store.threads(),
            });
        }
        for thread_id in changes.message_threads {
            let messages = store.messages(&thread_id);
            events.push(SyncEvent::MessagesUpdated { thread_id, messages });
        }
        for state in changes.streaming {
            events.push(SyncEvent::StreamingBroadcast {
                thread_id: state.thread_id.clone(),
                message_id: state.message_id.clone(),
                state,
            });
        }
        for thread_id in changes.summary_threads {
            events.push(SyncEvent::SummariesUpdated { thread_id });
        }
        if changes.projects {
            events.push(SyncEvent::ProjectsUpdated {
                projects: store.projects(),
            });
        }

        events
    }

    // ---- threads ----

    /// Insert a locally created thread
    pub fn create_thread(&mut self, mut thread: Thread) -> Thread {
        if thread.user_id.is_empty() {
            thread.user_id = self.user_id();
        }
        self.store.deleted_threads.remove(&thread.id);
        self.store.threads.insert(thread.id.clone(), thread.clone());
        self.changes.threads = true;
        thread
    }

    /// Placeholder thread for a first message; `None` if it already exists
    pub fn ensure_thread(&mut self, thread_id: &str) -> Option<Thread> {
        if self.store.threads.contains_key(thread_id) || self.store.deleted_threads.contains(thread_id) {
            return None;
        }
        let thread = Thread::new(thread_id, self.user_id());
        Some(self.create_thread(thread))
    }

    /// Bump `updated_at` after a new message
    pub fn touch_thread(&mut self, thread_id: &str, at: DateTime<Utc>) -> Option<Thread> {
        let thread = self.store.threads.get_mut(thread_id)?;
        if at <= thread.updated_at {
            return None;
        }
        thread.updated_at = at;
        self.changes.threads = true;
        Some(thread.clone())
    }

    /// Apply a local patch; `Some` carries the new thread if anything changed
    pub fn patch_thread(&mut self, thread_id: &str, patch: ThreadPatch) -> Result<Option<Thread>> {
        if let Some(Some(project_id)) = &patch.project_id {
            if !self.store.projects.contains_key(project_id) {
                return Err(SyncError::ProjectNotFound(project_id.clone()));
            }
        }
        let placeholder = self.placeholder;
        let thread = self
            .store
            .threads
            .get_mut(thread_id)
            .ok_or_else(|| SyncError::ThreadNotFound(thread_id.to_string()))?;

        if !thread.apply_patch(patch, placeholder) {
            return Ok(None);
        }
        self.changes.threads = true;
        Ok(Some(thread.clone()))
    }

    /// Title from the summarization step. The placeholder never comes back and
    /// the latest generated title wins.
    pub fn set_generated_title(&mut self, thread_id: &str, title: &str) -> Result<Option<Thread>> {
        let placeholder = self.placeholder;
        let thread = self
            .store
            .threads
            .get_mut(thread_id)
            .ok_or_else(|| SyncError::ThreadNotFound(thread_id.to_string()))?;

        if !thread.set_title(title, placeholder) {
            return Ok(None);
        }
        self.changes.threads = true;
        Ok(Some(thread.clone()))
    }

    /// Delete a thread with its messages, summaries and streams.
    ///
    /// The thread id stays tombstoned, as do its message ids. Returns whether
    /// the thread was known locally.
    pub fn delete_thread(&mut self, thread_id: &str) -> bool {
        let existed = self.store.threads.remove(thread_id).is_some();
        self.store.deleted_threads.insert(thread_id.to_string());

        let message_ids: Vec<String> = self
            .store
            .thread_messages
            .remove(thread_id)
            .map(|ids| ids.into_iter().collect())
            .unwrap_or_default();
        for id in &message_ids {
            self.clear_stream(id);
            self.store.phases.insert(id.clone(), MessagePhase::Deleted);
            self.store.messages.remove(id);
        }

        let summaries_before = self.store.summaries.len();
        self.store.summaries.retain(|_, s| s.thread_id != thread_id);

        if existed {
            self.changes.threads = true;
        }
        if !message_ids.is_empty() {
            self.changes.message_threads.insert(thread_id.to_string());
        }
        if summaries_before != self.store.summaries.len() {
            self.changes.summary_threads.insert(thread_id.to_string());
        }
        debug!(thread_id, messages = message_ids.len(), "Thread deleted locally");
        existed
    }

    // ---- messages ----

    /// Local `create_message`: Absent -> Finalized
    pub fn create_message(&mut self, message: Message) -> Result<Message> {
        if self.store.deleted_threads.contains(&message.thread_id) {
            return Err(SyncError::ThreadNotFound(message.thread_id.clone()));
        }
        match self.store.phases.get(&message.id).cloned() {
            Some(MessagePhase::Deleted) => Err(SyncError::MessageNotFound(message.id.clone())),
            Some(_) => {
                let id = message.id.clone();
                self.merge_final(message);
                self.store
                    .messages
                    .get(&id)
                    .cloned()
                    .ok_or(SyncError::MessageNotFound(id))
            }
            None => {
                self.store.phases.insert(message.id.clone(), MessagePhase::Finalized);
                self.changes.message_threads.insert(message.thread_id.clone());
                self.store.insert_message(message.clone());
                Ok(message)
            }
        }
    }

    /// Local full replacement of a known message through the merge rule
    pub fn replace_message(&mut self, message: Message) -> Result<Option<Message>> {
        match self.store.phases.get(&message.id).cloned() {
            None | Some(MessagePhase::Deleted) => {
                Err(SyncError::MessageNotFound(message.id.clone()))
            }
            Some(_) => {
                let id = message.id.clone();
                let thread_id = message.thread_id.clone();
                let Some(existing) = self.store.messages.get_mut(&id) else {
                    return Err(SyncError::MessageNotFound(id));
                };
                if !existing.absorb(message) {
                    return Ok(None);
                }
                self.changes.message_threads.insert(thread_id);
                Ok(Some(existing.clone()))
            }
        }
    }

    /// Remove messages after `after`. Their ids stay tombstoned so late copies
    /// are dropped; records this session never saw are left to the remote
    /// store's own delete notifications. Returns the removed ids.
    pub fn truncate_thread(&mut self, thread_id: &str, after: DateTime<Utc>, inclusive: bool) -> Vec<String> {
        let doomed: Vec<String> = self
            .store
            .thread_messages
            .get(thread_id)
            .map(|ids| {
                ids.iter()
                    .filter(|id| {
                        self.store.messages.get(*id).map_or(false, |m| {
                            if inclusive {
                                m.created_at >= after
                            } else {
                                m.created_at > after
                            }
                        })
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        for id in &doomed {
            self.clear_stream(id);
            self.store.tombstone_message(id);
            self.store.summaries.retain(|_, s| &s.message_id != id);
        }
        if !doomed.is_empty() {
            self.changes.message_threads.insert(thread_id.to_string());
            self.changes.summary_threads.insert(thread_id.to_string());
        }
        doomed
    }

    fn delete_message(&mut self, message_id: &str) -> bool {
        self.clear_stream(message_id);
        let before = self.store.summaries.len();
        self.store.summaries.retain(|_, s| s.message_id != message_id);
        match self.store.tombstone_message(message_id) {
            Some(removed) => {
                if before != self.store.summaries.len() {
                    self.changes.summary_threads.insert(removed.thread_id.clone());
                }
                self.changes.message_threads.insert(removed.thread_id);
                true
            }
            None => false,
        }
    }

    /// Whether a record for an unseen id may be created in `thread_id`
    fn accepts_new(&self, thread_id: &str) -> bool {
        if self.store.deleted_threads.contains(thread_id) {
            debug!(thread_id, "Dropping record for deleted thread");
            return false;
        }
        true
    }

    /// Merge a persisted copy: Absent/Streaming/Finalized -> Finalized
    fn merge_final(&mut self, message: Message) -> bool {
        let id = message.id.clone();
        let thread_id = message.thread_id.clone();

        match self.store.phases.get(&id).cloned() {
            Some(MessagePhase::Deleted) => {
                debug!(message_id = %id, "Dropping update for deleted message");
                false
            }
            None => {
                if !self.accepts_new(&thread_id) {
                    return false;
                }
                self.store.phases.insert(id, MessagePhase::Finalized);
                self.store.insert_message(message);
                self.changes.message_threads.insert(thread_id);
                true
            }
            Some(MessagePhase::Streaming { .. }) => {
                if let Some(existing) = self.store.messages.get_mut(&id) {
                    existing.absorb(message);
                } else {
                    self.store.insert_message(message);
                }
                self.store.phases.insert(id.clone(), MessagePhase::Finalized);
                self.close_stream(&id);
                self.changes.message_threads.insert(thread_id);
                true
            }
            Some(MessagePhase::Finalized) => {
                let changed = match self.store.messages.get_mut(&id) {
                    Some(existing) => existing.absorb(message),
                    None => {
                        self.store.insert_message(message);
                        true
                    }
                };
                if changed {
                    self.changes.message_threads.insert(thread_id);
                }
                changed
            }
        }
    }

    // ---- streaming ----

    /// Local `start_streaming`: Absent -> Streaming owned by this session
    pub fn begin_stream(
        &mut self,
        thread_id: &str,
        message_id: &str,
        created_at: DateTime<Utc>,
        now: Instant,
    ) -> Result<()> {
        match self.store.phases.get(message_id).cloned() {
            Some(MessagePhase::Streaming { .. }) => Ok(()),
            Some(_) => Err(SyncError::StreamClosed(message_id.to_string())),
            None => {
                if self.store.deleted_threads.contains(thread_id) {
                    return Err(SyncError::ThreadNotFound(thread_id.to_string()));
                }
                let session_id = self.session_id.clone();
                self.open_stream(thread_id, message_id, "", created_at, session_id, now);
                Ok(())
            }
        }
    }

    /// Monotonic merge of one streaming frame.
    ///
    /// Shorter content than held is dropped; it still counts as a sign of life
    /// for the quiet-period sweep.
    pub fn stream_update(
        &mut self,
        thread_id: &str,
        message_id: &str,
        content: &str,
        session_id: &SessionId,
        created_at: DateTime<Utc>,
        now: Instant,
    ) -> bool {
        match self.store.phases.get(message_id).cloned() {
            Some(MessagePhase::Deleted) | Some(MessagePhase::Finalized) => {
                debug!(message_id, "Dropping streaming update for closed message");
                false
            }
            Some(MessagePhase::Streaming { .. }) => {
                if let Some(MessagePhase::Streaming { last_update, .. }) =
                    self.store.phases.get_mut(message_id)
                {
                    *last_update = now;
                }
                let Some(message) = self.store.messages.get_mut(message_id) else {
                    return false;
                };
                if content.chars().count() < message.content_len() || content == message.content {
                    return false;
                }
                message.content = content.to_string();
                if let Some(state) = self.store.streaming.get_mut(message_id) {
                    state.content = content.to_string();
                    let state = state.clone();
                    self.changes.stream(state);
                }
                true
            }
            None => {
                if !self.accepts_new(thread_id) {
                    return false;
                }
                self.open_stream(thread_id, message_id, content, created_at, session_id.clone(), now);
                true
            }
        }
    }

    /// Streaming -> Finalized with `content` merged by the tie-break rule.
    ///
    /// Returns the finalized message, or `None` when it was deleted or
    /// refused.
    pub fn finish_stream(
        &mut self,
        thread_id: &str,
        message_id: &str,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Option<Message> {
        let existing = self.store.messages.get(message_id).cloned();
        let incoming = match existing {
            Some(current) => Message {
                content: content.to_string(),
                ..current
            },
            None => Message::new(thread_id, MessageRole::Assistant, content)
                .with_id(message_id)
                .with_user_id(self.user_id())
                .with_created_at(created_at),
        };
        self.merge_final(incoming);

        match self.store.phases.get(message_id) {
            Some(MessagePhase::Finalized) => self.store.messages.get(message_id).cloned(),
            _ => None,
        }
    }

    /// Force-finalize streams quiet since `cutoff`.
    ///
    /// Returns the finalized messages with a flag telling whether this session
    /// was producing them.
    pub fn expire_streams(&mut self, cutoff: Instant) -> Vec<(Message, bool)> {
        let mut finalized = Vec::new();
        for id in self.store.stale_streams(cutoff) {
            let own = matches!(
                self.store.phases.get(&id),
                Some(MessagePhase::Streaming { session_id, .. }) if session_id == self.session_id
            );
            let Some(current) = self.store.messages.get(&id).cloned() else {
                self.store.phases.insert(id.clone(), MessagePhase::Finalized);
                self.store.streaming.remove(&id);
                continue;
            };
            debug!(message_id = %id, own, "Force-finalizing quiet stream");
            if let Some(message) =
                self.finish_stream(&current.thread_id, &id, &current.content, current.created_at)
            {
                finalized.push((message, own));
            }
        }
        finalized
    }

    /// Streams this session is producing, as `(thread_id, message_id)`
    pub fn own_streams(&self) -> Vec<(String, String)> {
        self.store.own_streams(self.session_id)
    }

    fn open_stream(
        &mut self,
        thread_id: &str,
        message_id: &str,
        content: &str,
        created_at: DateTime<Utc>,
        session_id: SessionId,
        now: Instant,
    ) {
        let draft = Message::new(thread_id, MessageRole::Assistant, content)
            .with_id(message_id)
            .with_user_id(self.user_id())
            .with_created_at(created_at);
        let state = StreamingState {
            thread_id: thread_id.to_string(),
            message_id: message_id.to_string(),
            content: content.to_string(),
            is_streaming: true,
            session_id: session_id.clone(),
        };

        self.store.insert_message(draft);
        self.store.phases.insert(
            message_id.to_string(),
            MessagePhase::Streaming {
                last_update: now,
                session_id,
            },
        );
        self.store.streaming.insert(message_id.to_string(), state.clone());
        self.changes.message_threads.insert(thread_id.to_string());
        self.changes.stream(state);
    }

    /// Finalization: publish a closing state, then drop it
    fn close_stream(&mut self, message_id: &str) {
        if let Some(mut state) = self.store.streaming.remove(message_id) {
            state.is_streaming = false;
            if let Some(message) = self.store.messages.get(message_id) {
                state.content = message.content.clone();
            }
            self.changes.stream(state);
        }
    }

    /// Deletion: drop the state without a closing event
    fn clear_stream(&mut self, message_id: &str) {
        if self.store.streaming.remove(message_id).is_some() {
            self.changes.streaming.retain(|s| s.message_id != message_id);
        }
    }

    // ---- summaries ----

    pub fn add_summary(&mut self, summary: MessageSummary) -> Result<()> {
        if !self.store.threads.contains_key(&summary.thread_id) {
            return Err(SyncError::ThreadNotFound(summary.thread_id.clone()));
        }
        if matches!(self.store.phases.get(&summary.message_id), Some(MessagePhase::Deleted)) {
            return Err(SyncError::MessageNotFound(summary.message_id.clone()));
        }
        self.merge_summary(summary);
        Ok(())
    }

    fn merge_summary(&mut self, summary: MessageSummary) -> bool {
        if self.store.deleted_threads.contains(&summary.thread_id)
            || matches!(self.store.phases.get(&summary.message_id), Some(MessagePhase::Deleted))
        {
            return false;
        }
        if self.store.summaries.get(&summary.id) == Some(&summary) {
            return false;
        }
        self.changes.summary_threads.insert(summary.thread_id.clone());
        self.store.summaries.insert(summary.id.clone(), summary);
        true
    }

    fn delete_summary(&mut self, summary_id: &str) -> bool {
        match self.store.summaries.remove(summary_id) {
            Some(removed) => {
                self.changes.summary_threads.insert(removed.thread_id);
                true
            }
            None => false,
        }
    }

    // ---- projects ----

    pub fn create_project(&mut self, mut project: Project) -> Project {
        if project.user_id.is_empty() {
            project.user_id = self.user_id();
        }
        self.store.deleted_projects.remove(&project.id);
        self.store.projects.insert(project.id.clone(), project.clone());
        self.changes.projects = true;
        project
    }

    pub fn patch_project(&mut self, project_id: &str, patch: ProjectPatch) -> Result<Option<Project>> {
        let project = self
            .store
            .projects
            .get_mut(project_id)
            .ok_or_else(|| SyncError::ProjectNotFound(project_id.to_string()))?;
        if !project.apply_patch(patch) {
            return Ok(None);
        }
        self.changes.projects = true;
        Ok(Some(project.clone()))
    }

    /// Drop a project record; member threads are the caller's business
    pub fn delete_project(&mut self, project_id: &str) -> bool {
        self.store.deleted_projects.insert(project_id.to_string());
        let existed = self.store.projects.remove(project_id).is_some();
        if existed {
            self.changes.projects = true;
        }
        existed
    }

    fn merge_project(&mut self, project: Project) -> bool {
        if self.store.deleted_projects.contains(&project.id) {
            return false;
        }
        let changed = match self.store.projects.get_mut(&project.id) {
            Some(existing) => existing.absorb(project),
            None => {
                self.store.projects.insert(project.id.clone(), project);
                true
            }
        };
        self.changes.projects |= changed;
        changed
    }

    fn merge_thread(&mut self, thread: Thread) -> bool {
        if self.store.deleted_threads.contains(&thread.id) {
            debug!(thread_id = %thread.id, "Dropping update for deleted thread");
            return false;
        }
        let changed = match self.store.threads.get_mut(&thread.id) {
            Some(existing) => existing.absorb(thread),
            None => {
                self.store.threads.insert(thread.id.clone(), thread);
                true
            }
        };
        self.changes.threads |= changed;
        changed
    }

    // ---- inbound ----

    /// Merge one change from the remote store. Returns whether local state changed.
    pub fn apply_remote(&mut self, change: RemoteChange) -> bool {
        if change.operation == ChangeOperation::Delete {
            let (kind, id) = match &change.payload {
                ChangePayload::Removed { kind, id } => (*kind, id.clone()),
                ChangePayload::Thread(t) => (EntityKind::Thread, t.id.clone()),
                ChangePayload::Message(m) => (EntityKind::Message, m.id.clone()),
                ChangePayload::Summary(s) => (EntityKind::Summary, s.id.clone()),
                ChangePayload::Project(p) => (EntityKind::Project, p.id.clone()),
            };
            return self.apply_remote_delete(kind, &id);
        }

        match change.payload {
            ChangePayload::Thread(thread) => self.merge_thread(thread),
            ChangePayload::Message(message) => self.merge_final(message),
            ChangePayload::Summary(summary) => self.merge_summary(summary),
            ChangePayload::Project(project) => self.merge_project(project),
            ChangePayload::Removed { kind, id } => self.apply_remote_delete(kind, &id),
        }
    }

    fn apply_remote_delete(&mut self, kind: EntityKind, id: &str) -> bool {
        match kind {
            EntityKind::Thread => self.delete_thread(id),
            EntityKind::Message => self.delete_message(id),
            EntityKind::Summary => self.delete_summary(id),
            EntityKind::Project => self.delete_project(id),
        }
    }

    /// Merge a frame from another session
    pub fn apply_broadcast(&mut self, broadcast: StreamingBroadcast, now: Instant) -> bool {
        if broadcast.session_id() == self.session_id {
            return false;
        }
        match broadcast {
            StreamingBroadcast::Start {
                session_id,
                thread_id,
                message_id,
                created_at,
            } => self.stream_update(&thread_id, &message_id, "", &session_id, created_at, now),
            StreamingBroadcast::Update {
                session_id,
                thread_id,
                message_id,
                content,
                created_at,
            } => self.stream_update(&thread_id, &message_id, &content, &session_id, created_at, now),
            StreamingBroadcast::End {
                thread_id,
                message_id,
                content,
                created_at,
                ..
            } => {
                if matches!(self.store.phases.get(&message_id), Some(MessagePhase::Deleted)) {
                    return false;
                }
                if !self.store.phases.contains_key(&message_id)
                    && !self.accepts_new(&thread_id)
                {
                    return false;
                }
                let before = self.store.messages.get(&message_id).cloned();
                let was_streaming = self
                    .store
                    .phases
                    .get(&message_id)
                    .map_or(false, MessagePhase::is_streaming);
                let after = self.finish_stream(&thread_id, &message_id, &content, created_at);
                was_streaming || before != after
            }
        }
    }

    // ---- bulk ----

    /// Forget all cached data, tombstones included
    pub fn reset(&mut self, user_id: Option<String>) {
        let had_threads = !self.store.threads.is_empty();
        let had_projects = !self.store.projects.is_empty();
        let threads: Vec<String> = self.store.thread_messages.keys().cloned().collect();

        self.store.reset(user_id);

        self.changes = ChangeSet::default();
        self.changes.threads = had_threads;
        self.changes.projects = had_projects;
        self.changes.message_threads.extend(threads);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const PLACEHOLDER: &str = "New Chat";

    fn store_for(user: &str) -> LocalStore {
        let mut store = LocalStore::new();
        store.user_id = Some(user.to_string());
        store
    }

    fn remote(message: Message) -> RemoteChange {
        RemoteChange::inserted(ChangePayload::Message(message))
    }

    #[test]
    fn test_remote_echo_of_local_message_is_silent() {
        let mut store = store_for("u1");
        let me = SessionId::from("me");
        let message = Message::user("t1", "hello").with_id("m1").with_user_id("u1");

        let mut rec = Reconciler::new(&mut store, &me, PLACEHOLDER);
        rec.create_message(message.clone()).unwrap();
        assert_eq!(rec.finish().len(), 1);

        let mut rec = Reconciler::new(&mut store, &me, PLACEHOLDER);
        assert!(!rec.apply_remote(remote(message)));
        assert!(rec.finish().is_empty());
        assert_eq!(store.messages("t1").len(), 1);
    }

    #[test]
    fn test_events_are_batched_per_thread() {
        let mut store = store_for("u1");
        let me = SessionId::from("me");

        let mut rec = Reconciler::new(&mut store, &me, PLACEHOLDER);
        for i in 0..3 {
            rec.apply_remote(remote(Message::user("t1", format!("m{}", i)).with_id(format!("m{}", i))));
        }
        rec.apply_remote(remote(Message::user("t2", "other").with_id("x")));
        let events = rec.finish();

        let message_events: Vec<&SyncEvent> = events
            .iter()
            .filter(|e| matches!(e, SyncEvent::MessagesUpdated { .. }))
            .collect();
        assert_eq!(message_events.len(), 2);
        match message_events[0] {
            SyncEvent::MessagesUpdated { thread_id, messages } => {
                assert_eq!(thread_id, "t1");
                assert_eq!(messages.len(), 3);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_shorter_stream_frame_is_dropped() {
        let mut store = store_for("u1");
        let me = SessionId::from("me");
        let peer = SessionId::from("peer");
        let now = Instant::now();
        let at = Utc::now();

        let mut rec = Reconciler::new(&mut store, &me, PLACEHOLDER);
        assert!(rec.stream_update("t1", "m1", "Hello", &peer, at, now));
        assert!(!rec.stream_update("t1", "m1", "Hel", &peer, at, now));
        assert!(rec.stream_update("t1", "m1", "Hello world", &peer, at, now));

        assert_eq!(store.message("m1").unwrap().content, "Hello world");
    }

    #[test]
    fn test_remote_final_closes_stream() {
        let mut store = store_for("u1");
        let me = SessionId::from("me");
        let peer = SessionId::from("peer");
        let at = Utc::now();

        let mut rec = Reconciler::new(&mut store, &me, PLACEHOLDER);
        rec.stream_update("t1", "m1", "Partial", &peer, at, Instant::now());
        rec.finish();

        let final_copy = Message::assistant("t1", "Partial answer").with_id("m1").with_created_at(at);
        let mut rec = Reconciler::new(&mut store, &me, PLACEHOLDER);
        assert!(rec.apply_remote(remote(final_copy)));
        let events = rec.finish();

        assert_eq!(store.phase("m1"), Some(&MessagePhase::Finalized));
        assert!(store.streaming_state("t1").is_none());
        assert!(events.iter().any(|e| matches!(
            e,
            SyncEvent::StreamingBroadcast { state, .. } if !state.is_streaming
        )));
    }

    #[test]
    fn test_truncation_only_blocks_removed_ids() {
        let mut store = store_for("u1");
        let me = SessionId::from("me");
        let base = Utc::now() - Duration::seconds(60);
        let removed = Message::assistant("t1", "old").with_id("a2").with_created_at(base + Duration::seconds(5));

        let mut rec = Reconciler::new(&mut store, &me, PLACEHOLDER);
        rec.apply_remote(remote(removed.clone()));
        assert_eq!(rec.truncate_thread("t1", base, false), vec!["a2".to_string()]);
        assert!(!rec.apply_remote(remote(removed)));

        // Written by another session inside the same range and still held remotely
        let concurrent = Message::user("t1", "from the phone").with_id("p1").with_created_at(base + Duration::seconds(6));
        assert!(rec.apply_remote(remote(concurrent)));
        rec.finish();

        let ids: Vec<String> = store.messages("t1").into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["p1"]);
    }

    #[test]
    fn test_project_tombstone_blocks_late_echo() {
        let mut store = store_for("u1");
        let me = SessionId::from("me");
        let project = Project::new("u1", "Research");

        let mut rec = Reconciler::new(&mut store, &me, PLACEHOLDER);
        rec.create_project(project.clone());
        assert!(rec.delete_project(&project.id));
        assert!(!rec.apply_remote(RemoteChange::updated(ChangePayload::Project(project))));
        assert!(store.projects().is_empty());
    }
}
