pub mod message;
pub mod project;
pub mod summary;
pub mod thread;

pub use message::MongoMessageRepository;
pub use project::MongoProjectRepository;
pub use summary::MongoSummaryRepository;
pub use thread::MongoThreadRepository;
