//! The caching server.
//!
//! Stateless HTTP handlers over an authoritative [`FileStore`]; every
//! mutating request is re-validated against the permission model before it
//! touches state.

pub mod error;
pub mod handlers;
pub mod store;

use crate::config::ServerConfig;
use axum::routing::get;
use axum::Router;
use error::ApiError;
use std::sync::Arc;
use store::FileStore;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared state for all handlers.
pub struct ServerState {
    pub store: FileStore,
    pub config: ServerConfig,
}

/// Build the sync API router.
pub fn create_router(config: ServerConfig) -> Result<Router, ApiError> {
    let store = FileStore::open(&config)?;
    let state = Arc::new(ServerState { store, config });
    Ok(Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/sync/datasites", get(handlers::list_datasites))
        .route("/sync/manifest/*scope", get(handlers::get_manifest))
        .route("/sync/batch/*scope", get(handlers::get_batch))
        .route(
            "/sync/content/*path",
            get(handlers::get_content)
                .put(handlers::put_content)
                .delete(handlers::delete_content),
        )
        .route("/sync/diff/*path", axum::routing::patch(handlers::patch_diff))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state))
}
