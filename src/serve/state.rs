use std::sync::Arc;
use std::time::Duration;

use crate::oci::OciStorage;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<OciStorage>,
    /// Deadline for producing a response; covers reading the request body and
    /// writing response headers, but not draining a streamed blob body.
    pub request_deadline: Duration,
}

impl AppState {
    pub fn new(registry: Arc<OciStorage>, request_deadline: Duration) -> Self {
        Self {
            registry,
            request_deadline,
        }
    }
}
