pub mod client;
pub mod models;
pub mod repositories;
pub mod watch;

pub use client::MongoRemoteStore;
