use bson::serde_helpers::chrono_datetime_as_bson_datetime;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chatsync_types::{
    Attachment, Message, MessageArtifacts, MessageRole, MessageSummary, Project, Thread,
    ThreadMetadata,
};

// Client-generated ids are stored verbatim as `_id` strings so that an
// optimistic local record and its stored copy share one identifier.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoThread {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
    pub metadata: ThreadMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoMessage {
    #[serde(rename = "_id")]
    pub id: String,
    pub thread_id: String,
    pub user_id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub artifacts: MessageArtifacts,
}

/// Summaries carry the owning user so realtime filters can scope them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSummary {
    #[serde(rename = "_id")]
    pub id: String,
    pub thread_id: String,
    pub message_id: String,
    #[serde(default)]
    pub user_id: String,
    pub content: String,
    pub role: MessageRole,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoProject {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl From<Thread> for MongoThread {
    fn from(thread: Thread) -> Self {
        Self {
            id: thread.id,
            user_id: thread.user_id,
            created_at: thread.created_at,
            updated_at: thread.updated_at,
            metadata: thread.metadata,
            project_id: thread.project_id,
        }
    }
}

impl From<MongoThread> for Thread {
    fn from(thread: MongoThread) -> Self {
        Self {
            id: thread.id,
            user_id: thread.user_id,
            created_at: thread.created_at,
            updated_at: thread.updated_at,
            metadata: thread.metadata,
            project_id: thread.project_id,
        }
    }
}

impl From<Message> for MongoMessage {
    fn from(msg: Message) -> Self {
        Self {
            id: msg.id,
            thread_id: msg.thread_id,
            user_id: msg.user_id,
            role: msg.role,
            content: msg.content,
            created_at: msg.created_at,
            attachments: msg.attachments,
            model: msg.model,
            artifacts: msg.artifacts,
        }
    }
}

impl From<MongoMessage> for Message {
    fn from(msg: MongoMessage) -> Self {
        Self {
            id: msg.id,
            thread_id: msg.thread_id,
            user_id: msg.user_id,
            role: msg.role,
            content: msg.content,
            created_at: msg.created_at,
            attachments: msg.attachments,
            model: msg.model,
            artifacts: msg.artifacts,
        }
    }
}

impl MongoSummary {
    pub fn from_summary(summary: MessageSummary, user_id: String) -> Self {
        Self {
            id: summary.id,
            thread_id: summary.thread_id,
            message_id: summary.message_id,
            user_id,
            content: summary.content,
            role: summary.role,
            created_at: summary.created_at,
        }
    }
}

impl From<MongoSummary> for MessageSummary {
    fn from(summary: MongoSummary) -> Self {
        Self {
            id: summary.id,
            thread_id: summary.thread_id,
            message_id: summary.message_id,
            content: summary.content,
            role: summary.role,
            created_at: summary.created_at,
        }
    }
}

impl From<Project> for MongoProject {
    fn from(project: Project) -> Self {
        Self {
            id: project.id,
            user_id: project.user_id,
            name: project.name,
            description: project.description,
            prompt: project.prompt,
            created_at: project.created_at,
            updated_at: project.updated_at,
        }
    }
}

impl From<MongoProject> for Project {
    fn from(project: MongoProject) -> Self {
        Self {
            id: project.id,
            user_id: project.user_id,
            name: project.name,
            description: project.description,
            prompt: project.prompt,
            created_at: project.created_at,
            updated_at: project.updated_at,
        }
    }
}
