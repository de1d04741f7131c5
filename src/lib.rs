// Library crate for the map update stream server
// This file exposes the public API for integration tests

pub mod cache;
pub mod config;
pub mod event;
pub mod producers;
pub mod shared;
pub mod snapshot;
pub mod stream;

use axum::{middleware, routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

// Re-export commonly used types for easier access in tests
pub use config::{ServerConfig, StreamConfig};
pub use event::{Category, EventBus, MapEvent, Subscription, TenantId};
pub use producers::Producers;
pub use shared::{AppError, AppState, Principal};
pub use snapshot::{Snapshot, SnapshotBuilder};
pub use stream::frames::Frame;
pub use stream::{FrameSink, SessionError, SessionState, SinkError, StreamSession};

/// Builds the HTTP surface
///
/// The update routes sit behind the development identity layer, which trusts
/// the `X-Tenant-Id` header; `/health` is open.
pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/map/updates", get(stream::poll_updates))
        .route("/map/updates/stream", get(stream::stream_updates))
        .layer(middleware::from_fn(shared::dev_principal))
        .route("/health", get(|| async { "OK" }))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}
