use std::collections::{HashMap, HashSet};
use std::time::Instant;

use chatsync_types::{Message, MessageSummary, Project, SessionId, StreamingState, Thread};

/// Lifecycle of one message id.
///
/// A message with no entry is Absent. `Deleted` entries outlive the message
/// itself and act as tombstones for late updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePhase {
    Streaming {
        last_update: Instant,
        session_id: SessionId,
    },
    Finalized,
    Deleted,
}

impl MessagePhase {
    pub fn is_streaming(&self) -> bool {
        matches!(self, MessagePhase::Streaming { .. })
    }
}

/// In-process cache of one user's conversations.
///
/// Reads are plain lookups. Mutation happens only through the reconciler,
/// which keeps the phase map, tombstones and streaming states consistent.
#[derive(Debug, Default)]
pub struct LocalStore {
    pub(crate) user_id: Option<String>,
    pub(crate) threads: HashMap<String, Thread>,
    pub(crate) messages: HashMap<String, Message>,
    pub(crate) thread_messages: HashMap<String, HashSet<String>>,
    pub(crate) phases: HashMap<String, MessagePhase>,
    pub(crate) summaries: HashMap<String, MessageSummary>,
    pub(crate) projects: HashMap<String, Project>,
    pub(crate) streaming: HashMap<String, StreamingState>,
    pub(crate) deleted_threads: HashSet<String>,
    pub(crate) deleted_projects: HashSet<String>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Threads, most recently updated first
    pub fn threads(&self) -> Vec<Thread> {
        let mut threads: Vec<Thread> = self.threads.values().cloned().collect();
        threads.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        threads
    }

    pub fn thread(&self, thread_id: &str) -> Option<Thread> {
        self.threads.get(thread_id).cloned()
    }

    /// Messages of a thread ordered by `(created_at, id)`
    pub fn messages(&self, thread_id: &str) -> Vec<Message> {
        let Some(ids) = self.thread_messages.get(thread_id) else {
            return Vec::new();
        };
        let mut messages: Vec<Message> = ids
            .iter()
            .filter_map(|id| self.messages.get(id))
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        messages
    }

    pub fn message(&self, message_id: &str) -> Option<&Message> {
        self.messages.get(message_id)
    }

    pub fn phase(&self, message_id: &str) -> Option<&MessagePhase> {
        self.phases.get(message_id)
    }

    pub fn projects(&self) -> Vec<Project> {
        let mut projects: Vec<Project> = self.projects.values().cloned().collect();
        projects.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        projects
    }

    pub fn project(&self, project_id: &str) -> Option<&Project> {
        self.projects.get(project_id)
    }

    /// Summaries of a thread, oldest first
    pub fn summaries(&self, thread_id: &str) -> Vec<MessageSummary> {
        let mut summaries: Vec<MessageSummary> = self
            .summaries
            .values()
            .filter(|s| s.thread_id == thread_id)
            .cloned()
            .collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        summaries
    }

    /// Active stream of a thread, if any
    pub fn streaming_state(&self, thread_id: &str) -> Option<StreamingState> {
        self.streaming
            .values()
            .filter(|s| s.thread_id == thread_id && s.is_streaming)
            .max_by(|a, b| {
                let created = |s: &StreamingState| self.messages.get(&s.message_id).map(|m| m.created_at);
                created(a).cmp(&created(b)).then_with(|| a.message_id.cmp(&b.message_id))
            })
            .cloned()
    }

    /// Ids of threads belonging to a project
    pub fn project_threads(&self, project_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .threads
            .values()
            .filter(|t| t.project_id.as_deref() == Some(project_id))
            .map(|t| t.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Streams with no update since `cutoff`
    pub(crate) fn stale_streams(&self, cutoff: Instant) -> Vec<String> {
        self.phases
            .iter()
            .filter_map(|(id, phase)| match phase {
                MessagePhase::Streaming { last_update, .. } if *last_update <= cutoff => {
                    Some(id.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Streams this session is producing
    pub(crate) fn own_streams(&self, session_id: &SessionId) -> Vec<(String, String)> {
        self.phases
            .iter()
            .filter_map(|(id, phase)| match phase {
                MessagePhase::Streaming { session_id: owner, .. } if owner == session_id => self
                    .messages
                    .get(id)
                    .map(|m| (m.thread_id.clone(), id.clone())),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn insert_message(&mut self, message: Message) {
        self.thread_messages
            .entry(message.thread_id.clone())
            .or_default()
            .insert(message.id.clone());
        self.messages.insert(message.id.clone(), message);
    }

    /// Drop a message and leave a tombstone behind
    pub(crate) fn tombstone_message(&mut self, message_id: &str) -> Option<Message> {
        self.phases.insert(message_id.to_string(), MessagePhase::Deleted);
        self.streaming.remove(message_id);
        let removed = self.messages.remove(message_id)?;
        if let Some(ids) = self.thread_messages.get_mut(&removed.thread_id) {
            ids.remove(message_id);
        }
        Some(removed)
    }

    /// Forget everything, tombstones included
    pub(crate) fn reset(&mut self, user_id: Option<String>) {
        *self = Self {
            user_id,
            ..Self::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_messages_are_ordered_by_time_then_id() {
        let mut store = LocalStore::new();
        let now = Utc::now();
        store.insert_message(Message::user("t1", "b").with_id("b").with_created_at(now));
        store.insert_message(Message::user("t1", "a").with_id("a").with_created_at(now));
        store.insert_message(
            Message::user("t1", "first").with_id("z").with_created_at(now - Duration::seconds(1)),
        );

        let ids: Vec<String> = store.messages("t1").into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["z", "a", "b"]);
    }

    #[test]
    fn test_tombstone_removes_from_thread_index() {
        let mut store = LocalStore::new();
        store.insert_message(Message::user("t1", "hello").with_id("m1"));

        assert!(store.tombstone_message("m1").is_some());
        assert!(store.messages("t1").is_empty());
        assert_eq!(store.phase("m1"), Some(&MessagePhase::Deleted));
    }

    #[test]
    fn test_reset_forgets_tombstones() {
        let mut store = LocalStore::new();
        store.insert_message(Message::user("t1", "hello").with_id("m1"));
        store.tombstone_message("m1");

        store.reset(Some("u2".to_string()));

        assert!(store.phase("m1").is_none());
        assert_eq!(store.user_id(), Some("u2"));
    }
}
