//! Plaza - server-authoritative spatial sync for a shared 3D space
//!
//! The server half (`game`, `ws`, `http`) keeps the participant registry and
//! spatial grid behind a single actor and fans events out over WebSockets.
//! The client half (`client`) mirrors remote participants, smooths their
//! motion and picks an interaction target each frame.

pub mod app;
pub mod client;
pub mod config;
pub mod game;
pub mod http;
pub mod util;
pub mod ws;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging for a binary. `RUST_LOG` wins over `log_level`.
pub fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}
