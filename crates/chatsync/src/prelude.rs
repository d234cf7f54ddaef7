//! Prelude module for convenient imports
//!
//! Import everything you need with:
//! ```rust
//! use chatsync::prelude::*;
//! ```

pub use crate::{
    SyncEngine, SyncEngineBuilder, SyncError, ProjectDeletion, MessagePhase,
    BroadcastTransport, LocalTransport, Subscription,
    Message, MessageRole, MessageSummary, Project, ProjectPatch, Thread, ThreadPatch,
    SessionId, StreamingBroadcast, StreamingState, SyncConfig, RetryConfig,
    SyncEvent, SyncWarning, Topic,
    RemoteStore, InMemoryRemoteStore, PersistError,
};

#[cfg(feature = "relay")]
pub use crate::RelayTransport;
