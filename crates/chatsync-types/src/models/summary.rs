use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use super::MessageRole;

/// Short navigation text generated for a finalized message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: String,
    pub thread_id: String,
    pub message_id: String,
    pub content: String,
    pub role: MessageRole,
    pub created_at: DateTime<Utc>,
}

impl MessageSummary {
    pub fn new(
        thread_id: impl Into<String>,
        message_id: impl Into<String>,
        role: MessageRole,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            message_id: message_id.into(),
            content: content.into(),
            role,
            created_at: Utc::now(),
        }
    }
}
