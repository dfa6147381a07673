//! HTTP surface: dispatch endpoints, registry administration and health.

pub mod admin;
pub mod handlers;
pub mod server;

pub use handlers::{CHANNEL_HEADER, RETRIES_HEADER};
pub use server::{create_router, run_server, AppState, RequestId, REQUEST_ID_HEADER};
