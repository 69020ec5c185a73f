use axum::extract::DefaultBodyLimit;
use axum::routing::{any, get};
use axum::Router;

use crate::serve::handlers;
use crate::serve::state::AppState;

/// Only the version check gets a route of its own. Repository names may
/// contain `/`, which the router's segment matching cannot express, so every
/// other endpoint funnels through one wildcard that the dispatcher parses.
///
/// Blob pushes stream entire image layers, so axum's default body cap is
/// lifted on the wildcard; chunk data goes straight to the upload scratch
/// file and is never buffered whole.
pub fn build_router(state: AppState) -> Router {
    let dispatch = any(handlers::oci_dispatch).layer(DefaultBodyLimit::disable());

    Router::new()
        .route("/v2/", get(handlers::v2_base))
        .route("/v2/{*path}", dispatch)
        .with_state(state)
}
