use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::fmt;

/// Identifier of one running session (tab, device, process).
///
/// Stable for the lifetime of the session and unique across sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ephemeral view of a message that is still being generated. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingState {
    pub thread_id: String,
    pub message_id: String,
    pub content: String,
    pub is_streaming: bool,
    pub session_id: SessionId,
}

/// Wire format of the cross-session streaming channel.
///
/// `Update` and `End` always carry the full accumulated content, never a delta,
/// so a receiver that missed earlier frames can catch up from any later one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamingBroadcast {
    /// Generation started for `message_id`
    Start {
        session_id: SessionId,
        thread_id: String,
        message_id: String,
        created_at: DateTime<Utc>,
    },

    /// Latest accumulated content
    Update {
        session_id: SessionId,
        thread_id: String,
        message_id: String,
        content: String,
        created_at: DateTime<Utc>,
    },

    /// Generation finished or was cancelled
    End {
        session_id: SessionId,
        thread_id: String,
        message_id: String,
        content: String,
        created_at: DateTime<Utc>,
    },
}

impl StreamingBroadcast {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::Start { session_id, .. }
            | Self::Update { session_id, .. }
            | Self::End { session_id, .. } => session_id,
        }
    }

    pub fn thread_id(&self) -> &str {
        match self {
            Self::Start { thread_id, .. }
            | Self::Update { thread_id, .. }
            | Self::End { thread_id, .. } => thread_id,
        }
    }

    pub fn message_id(&self) -> &str {
        match self {
            Self::Start { message_id, .. }
            | Self::Update { message_id, .. }
            | Self::End { message_id, .. } => message_id,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Start { created_at, .. }
            | Self::Update { created_at, .. }
            | Self::End { created_at, .. } => *created_at,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::Start { .. } => "",
            Self::Update { content, .. } | Self::End { content, .. } => content,
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, Self::End { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_serialization() {
        let broadcast = StreamingBroadcast::Update {
            session_id: SessionId::from("s1"),
            thread_id: "t1".to_string(),
            message_id: "m1".to_string(),
            content: "Hel".to_string(),
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&broadcast).unwrap();
        assert!(json.contains("\"type\":\"update\""));
        assert!(json.contains("\"session_id\":\"s1\""));

        let decoded: StreamingBroadcast = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.content(), "Hel");
        assert_eq!(decoded.session_id().as_str(), "s1");
    }

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }
}
