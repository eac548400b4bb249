//! uReport HTTP front end.
//!
//! Accepts raw uReports on `POST /reports/new`, runs them through the ingest
//! engine and answers known/new with the crash signature and bug links.
//! Bind to 127.0.0.1 by default (internal only).

mod handlers;
mod state;
mod types;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

pub use handlers::{health, new_report};
pub use state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
  let body_limit = state.engine.config().max_ureport_length + 1;
  Router::new()
    .route("/health", get(health))
    .route("/reports/new", post(new_report))
    .layer(DefaultBodyLimit::max(body_limit))
    .layer(CorsLayer::permissive())
    .with_state(state)
}
