use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// A single conversation message.
///
/// The identifier is generated by the session that creates the message, so an
/// optimistic local write and its remote echo share the same `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    #[serde(default)]
    pub user_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "MessageArtifacts::is_empty")]
    pub artifacts: MessageArtifacts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Data,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub content_type: String,
    pub url: String,
}

/// Results extracted from a finished generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageArtifacts {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

impl MessageArtifacts {
    pub fn is_empty(&self) -> bool {
        self.citations.is_empty() && self.image_ref.is_none()
    }
}

impl Message {
    pub fn new(thread_id: impl Into<String>, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            user_id: String::new(),
            role,
            content: content.into(),
            created_at: Utc::now(),
            attachments: Vec::new(),
            model: None,
            artifacts: MessageArtifacts::default(),
        }
    }

    pub fn user(thread_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(thread_id, MessageRole::User, content)
    }

    pub fn assistant(thread_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(thread_id, MessageRole::Assistant, content)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn with_artifacts(mut self, artifacts: MessageArtifacts) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Length used by the tie-break rule, in characters.
    pub fn content_len(&self) -> usize {
        self.content.chars().count()
    }

    /// Folds a later-arriving copy of the same message into `self`.
    ///
    /// Content follows the tie-break rule: the longer string wins and, on equal
    /// length, the incoming (later) copy wins. Attachment and citation lists follow
    /// the same rule, scalar optionals are only overwritten by a present value, and
    /// the earliest `created_at` is kept. Returns `true` if anything changed.
    pub fn absorb(&mut self, incoming: Message) -> bool {
        let before = self.clone();

        if incoming.content_len() >= self.content_len() {
            self.content = incoming.content;
        }
        if incoming.attachments.len() >= self.attachments.len() && !incoming.attachments.is_empty() {
            self.attachments = incoming.attachments;
        }
        if incoming.model.is_some() {
            self.model = incoming.model;
        }
        if incoming.artifacts.citations.len() >= self.artifacts.citations.len()
            && !incoming.artifacts.citations.is_empty()
        {
            self.artifacts.citations = incoming.artifacts.citations;
        }
        if incoming.artifacts.image_ref.is_some() {
            self.artifacts.image_ref = incoming.artifacts.image_ref;
        }
        if incoming.created_at < self.created_at {
            self.created_at = incoming.created_at;
        }
        if self.user_id.is_empty() {
            self.user_id = incoming.user_id;
        }

        *self != before
    }

    /// Ordering key for a thread's message list.
    pub fn sort_key(&self) -> (DateTime<Utc>, &str) {
        (self.created_at, self.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longer_content_wins() {
        let mut current = Message::assistant("t1", "Hello wor").with_id("m1");
        let incoming = Message::assistant("t1", "Hello").with_id("m1");

        assert!(!current.absorb(incoming));
        assert_eq!(current.content, "Hello wor");

        let incoming = Message::assistant("t1", "Hello world").with_id("m1");
        assert!(current.absorb(incoming));
        assert_eq!(current.content, "Hello world");
    }

    #[test]
    fn test_equal_length_later_arrival_wins() {
        let mut current = Message::assistant("t1", "abc").with_id("m1");
        let incoming = Message::assistant("t1", "xyz").with_id("m1");

        assert!(current.absorb(incoming));
        assert_eq!(current.content, "xyz");
    }

    #[test]
    fn test_absorb_identical_copy_is_noop() {
        let original = Message::user("t1", "same").with_id("m1");
        let mut current = original.clone();

        assert!(!current.absorb(original.clone()));
        assert_eq!(current, original);
    }

    #[test]
    fn test_absorb_attaches_citations_without_touching_content() {
        let created = Utc::now();
        let mut current = Message::assistant("t1", "The answer").with_id("m1").with_created_at(created);
        let incoming = Message::assistant("t1", "The answer")
            .with_id("m1")
            .with_created_at(created)
            .with_artifacts(MessageArtifacts {
                citations: vec!["https://example.com".to_string()],
                image_ref: None,
            });

        assert!(current.absorb(incoming));
        assert_eq!(current.content, "The answer");
        assert_eq!(current.artifacts.citations.len(), 1);
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&MessageRole::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");

        let role: MessageRole = serde_json::from_str("\"data\"").unwrap();
        assert_eq!(role, MessageRole::Data);
    }
}
