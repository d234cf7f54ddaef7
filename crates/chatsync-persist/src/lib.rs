pub mod trait_client;
pub mod memory;
pub mod error;
pub mod dbs;

pub use trait_client::{ChangeStream, RemoteStore};
pub use memory::InMemoryRemoteStore;
pub use error::{PersistError, Result};

#[cfg(feature = "mongodb")]
pub use dbs::mongo::client::MongoRemoteStore;

pub use chatsync_types::{
    ChangeOperation, ChangePayload, EntityKind, Message, MessageRole, MessageSummary, Project,
    RemoteChange, Thread, ThreadMetadata,
};
