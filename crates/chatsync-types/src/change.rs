use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{Message, MessageSummary, Project, Thread};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Thread,
    Message,
    Summary,
    Project,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Thread => "thread",
            Self::Message => "message",
            Self::Summary => "summary",
            Self::Project => "project",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum ChangePayload {
    Thread(Thread),
    Message(Message),
    Summary(MessageSummary),
    Project(Project),
    /// Deletions only carry the key of the removed record
    Removed { kind: EntityKind, id: String },
}

/// One notification from the remote realtime subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteChange {
    pub operation: ChangeOperation,
    pub payload: ChangePayload,
}

impl RemoteChange {
    pub fn inserted(payload: ChangePayload) -> Self {
        Self {
            operation: ChangeOperation::Insert,
            payload,
        }
    }

    pub fn updated(payload: ChangePayload) -> Self {
        Self {
            operation: ChangeOperation::Update,
            payload,
        }
    }

    pub fn deleted(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            operation: ChangeOperation::Delete,
            payload: ChangePayload::Removed { kind, id: id.into() },
        }
    }

    pub fn entity(&self) -> EntityKind {
        match &self.payload {
            ChangePayload::Thread(_) => EntityKind::Thread,
            ChangePayload::Message(_) => EntityKind::Message,
            ChangePayload::Summary(_) => EntityKind::Summary,
            ChangePayload::Project(_) => EntityKind::Project,
            ChangePayload::Removed { kind, .. } => *kind,
        }
    }

    /// Owning user of the changed record, when the payload carries one.
    pub fn user_id(&self) -> Option<&str> {
        match &self.payload {
            ChangePayload::Thread(thread) => Some(&thread.user_id),
            ChangePayload::Message(message) => Some(&message.user_id),
            ChangePayload::Project(project) => Some(&project.user_id),
            ChangePayload::Summary(_) | ChangePayload::Removed { .. } => None,
        }
    }
}
