//! Newsroom server - ranked, block-locked collaborative document editing

pub mod api;
pub mod authz;
pub mod collab;
pub mod config;
pub mod error;
pub mod models;
pub mod store;
pub mod websocket;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::collab::Coordinator;

/// Application state shared across handlers
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
}

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>) -> Arc<Self> {
        Arc::new(Self { coordinator })
    }
}

/// Build the HTTP and WebSocket router
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/ws", get(websocket::handler))
        .route(
            "/documents",
            get(api::list_documents).post(api::create_document),
        )
        .route("/documents/:id/save", post(api::save_document))
        .route("/documents/:id/publish", post(api::publish_document))
        .route("/admin/stats", get(api::statistics))
        .route("/admin/sessions/:id", get(api::session_info))
        .route(
            "/admin/sessions/:id/disconnect/:user",
            post(api::force_disconnect),
        )
        .route("/admin/documents/:id/lock", post(api::lock_document))
        .route("/admin/documents/:id/unlock", post(api::unlock_document))
        .route(
            "/admin/documents/:id/blocks/:block/emergency-unlock",
            post(api::emergency_unlock),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
