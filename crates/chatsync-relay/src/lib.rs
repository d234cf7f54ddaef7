pub mod config;
pub mod error;
pub mod state;
pub mod app;
pub mod handlers;
pub mod routes;
pub mod middleware;
pub mod client;

pub use app::build_router;
pub use client::RelayTransport;
pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::{AppState, BroadcastHub};
