pub mod error;
pub mod config;
pub mod local_store;
pub mod event_bus;
pub mod streaming;
pub mod remote_sync;
pub mod builder;
pub mod engine;
mod reconcile;

pub use engine::{ProjectDeletion, SyncEngine};
pub use builder::SyncEngineBuilder;
pub use event_bus::{EventBus, EventHandler, HandlerId, Subscription};
pub use streaming::{BroadcastFeed, BroadcastTransport, LocalTransport, StreamingChannel};
pub use local_store::{LocalStore, MessagePhase};
pub use remote_sync::{write_with_retry, RemoteWrite};
pub use error::{Result, SyncError};
pub use config::LoadSyncConfig;

// Re-export key types from chatsync-types
pub use chatsync_types::{
    Message, MessageRole, MessageSummary, Project, ProjectPatch, RemoteChange, RetryConfig,
    SessionId, StreamingBroadcast, StreamingState, SyncConfig, SyncEvent, SyncWarning, Thread,
    ThreadPatch, Topic,
};
