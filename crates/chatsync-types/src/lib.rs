pub mod models;
pub mod streaming;
pub mod change;
pub mod events;
pub mod config;

pub use models::{
    Attachment, Message, MessageArtifacts, MessageRole, MessageSummary, Project, ProjectPatch,
    Thread, ThreadMetadata, ThreadPatch,
};
pub use streaming::{SessionId, StreamingBroadcast, StreamingState};
pub use change::{ChangeOperation, ChangePayload, EntityKind, RemoteChange};
pub use events::{SyncEvent, SyncWarning, Topic};
pub use config::{RetryConfig, SyncConfig, DEFAULT_PLACEHOLDER_TITLE};
