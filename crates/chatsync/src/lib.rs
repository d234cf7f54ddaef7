//! # Chatsync
//!
//! Local-first conversation store that keeps threads, messages, summaries and
//! projects consistent across browser tabs, devices and a remote database.
//!
//! ## Overview
//!
//! - **Reads never wait**: every view is served from the in-memory store
//! - **Writes are optimistic**: applied locally first, persisted by a single writer in order
//! - **Remote changes converge**: realtime records are merged whatever order they arrive in
//! - **Streams are shared**: assistant output in progress is broadcast to the user's other sessions
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chatsync::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = SyncEngine::builder()
//!         .remote(Arc::new(InMemoryRemoteStore::new()))
//!         .build()?;
//!
//!     let _threads = engine.on(Topic::ThreadsUpdated, |event| {
//!         if let SyncEvent::ThreadsUpdated { threads } = event {
//!             println!("{} threads", threads.len());
//!         }
//!         Ok(())
//!     });
//!
//!     engine.initialize("user-123").await?;
//!
//!     engine.create_thread(Thread::new("t1", "user-123"))?;
//!     engine.create_message(Message::user("t1", "Hello!"))?;
//!
//!     engine.start_streaming("t1", "a1")?;
//!     engine.update_streaming_content("t1", "a1", "Hi")?;
//!     engine.end_streaming("t1", "a1", "Hi there!")?;
//!
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **`chatsync-types`**: records, streaming frames, events and configuration
//! - **`chatsync-persist`**: remote store abstraction with in-memory and MongoDB backends
//! - **`chatsync-core`**: the sync engine, reconciler, outbox and event bus
//! - **`chatsync-relay`**: SSE relay server and HTTP transport (feature `relay`)
//!
//! ## License
//!
//! MIT

pub mod prelude;

pub use chatsync_core::{
    write_with_retry, BroadcastFeed, BroadcastTransport, EventBus, EventHandler, HandlerId,
    LoadSyncConfig, LocalStore, LocalTransport, MessagePhase, ProjectDeletion, RemoteWrite,
    StreamingChannel, Subscription, SyncEngine, SyncEngineBuilder, SyncError,
};

pub use chatsync_types::{
    Attachment, ChangeOperation, ChangePayload, EntityKind, Message, MessageArtifacts,
    MessageRole, MessageSummary, Project, ProjectPatch, RemoteChange, RetryConfig, SessionId,
    StreamingBroadcast, StreamingState, SyncConfig, SyncEvent, SyncWarning, Thread,
    ThreadMetadata, ThreadPatch, Topic, DEFAULT_PLACEHOLDER_TITLE,
};

pub use chatsync_persist::{ChangeStream, InMemoryRemoteStore, PersistError, RemoteStore};

#[cfg(feature = "mongodb")]
pub use chatsync_persist::MongoRemoteStore;

#[cfg(feature = "relay")]
pub use chatsync_relay::RelayTransport;
