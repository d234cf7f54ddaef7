mod message;
mod thread;
mod summary;
mod project;

pub use message::{Attachment, Message, MessageArtifacts, MessageRole};
pub use thread::{Thread, ThreadMetadata, ThreadPatch};
pub use summary::MessageSummary;
pub use project::{Project, ProjectPatch};
