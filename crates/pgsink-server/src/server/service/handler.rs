use crate::server::telemetry;
use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    routing::{get, put},
};
use pgsink_core::{Result, WorkItem};
use pgsink_queue::WorkQueue;
use tower_http::trace::TraceLayer;

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct IngestService {
    queue: WorkQueue<WorkItem>,
}

impl IngestService {
    pub const fn new(queue: WorkQueue<WorkItem>) -> Self {
        Self { queue }
    }

    /// Builds the router. Bodies larger than `max_body_bytes` are answered
    /// with 413 before they reach the queue.
    pub fn router(self, max_body_bytes: usize) -> Router {
        Router::new()
            .route("/data", put(put_data))
            .route("/health", get(health))
            .layer(DefaultBodyLimit::max(max_body_bytes))
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }
}

/// Accepts the raw body as one item. The response only confirms that the item
/// is buffered, not that it reached the store.
async fn put_data(State(service): State<IngestService>, body: Bytes) -> Result<&'static str> {
    match service.queue.enqueue(WorkItem::new(body)) {
        Ok(()) => {
            telemetry::increment_accepted();
            Ok("OK")
        }
        Err(e) => {
            telemetry::increment_rejected();
            tracing::warn!("Rejected payload: {e}");
            Err(e)
        }
    }
}

async fn health() -> &'static str {
    "OK"
}
