use serde::{Deserialize, Serialize};
use std::fmt;

use crate::change::EntityKind;
use crate::models::{Message, Project, Thread};
use crate::streaming::StreamingState;

/// Event bus topics exposed to UI consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    MessagesUpdated,
    SummariesUpdated,
    ProjectsUpdated,
    StreamingBroadcast,
    ThreadsUpdated,
    SyncWarning,
}

impl Topic {
    pub const ALL: [Topic; 6] = [
        Topic::MessagesUpdated,
        Topic::SummariesUpdated,
        Topic::ProjectsUpdated,
        Topic::StreamingBroadcast,
        Topic::ThreadsUpdated,
        Topic::SyncWarning,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::MessagesUpdated => "messages_updated",
            Topic::SummariesUpdated => "summaries_updated",
            Topic::ProjectsUpdated => "projects_updated",
            Topic::StreamingBroadcast => "streaming_broadcast",
            Topic::ThreadsUpdated => "threads_updated",
            Topic::SyncWarning => "sync_warning",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload delivered on the event bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// Full, ordered message list of a thread after a change
    MessagesUpdated {
        thread_id: String,
        messages: Vec<Message>,
    },

    /// Summaries of a thread changed; consumers re-query
    SummariesUpdated {
        thread_id: String,
    },

    ProjectsUpdated {
        projects: Vec<Project>,
    },

    /// Streaming state of one in-flight (or just finalized) message
    StreamingBroadcast {
        thread_id: String,
        message_id: String,
        state: StreamingState,
    },

    ThreadsUpdated {
        threads: Vec<Thread>,
    },

    /// A remote write could not be applied
    SyncWarning(SyncWarning),
}

impl SyncEvent {
    pub fn topic(&self) -> Topic {
        match self {
            SyncEvent::MessagesUpdated { .. } => Topic::MessagesUpdated,
            SyncEvent::SummariesUpdated { .. } => Topic::SummariesUpdated,
            SyncEvent::ProjectsUpdated { .. } => Topic::ProjectsUpdated,
            SyncEvent::StreamingBroadcast { .. } => Topic::StreamingBroadcast,
            SyncEvent::ThreadsUpdated { .. } => Topic::ThreadsUpdated,
            SyncEvent::SyncWarning(_) => Topic::SyncWarning,
        }
    }
}

/// Non-fatal report of a remote write that was given up on.
///
/// The local cache keeps the mutation; it is simply ahead of the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWarning {
    pub operation: String,
    pub entity: EntityKind,
    pub id: String,
    pub message: String,
    pub permanent: bool,
    pub attempts: u32,
}

impl fmt::Display for SyncWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} failed after {} attempt(s): {}",
            self.operation, self.entity, self.id, self.attempts, self.message
        )
    }
}
