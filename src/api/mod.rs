//! HTTP surface of the quick start.
//!
//! - `/`                      — dashboard (JSON)
//! - `/insert-*`, `/delete-*` — form posts that act on the timeline and redirect back
//! - `/oauth2callback`        — sign-in entry point and OAuth redirect target
//! - `/notify-callback`       — Mirror API webhook
//! - `/attachment-proxy`      — authorized attachment download
//! - `/status`                — health check

pub mod cards;
pub mod fanout;
pub mod routes;

use crate::SharedState;
use axum::Router;
use tower_http::trace::TraceLayer;

pub fn router(state: SharedState) -> Router {
    routes::app_router(state).layer(TraceLayer::new_for_http())
}
