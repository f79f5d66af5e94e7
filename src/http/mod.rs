//! HTTP surface: status endpoint, WebSocket upgrade and static files

pub mod routes;

pub use routes::{build_router, AppError};
