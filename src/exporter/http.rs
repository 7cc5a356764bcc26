use std::sync::Arc;

use axum::{
    extract::Extension,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use http::{header, StatusCode};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::stats::Stats;

pub(crate) fn build_router(stats: Arc<Stats>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(stats))
}

async fn metrics(Extension(stats): Extension<Arc<Stats>>) -> Response {
    match stats.gather() {
        Ok(text) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], text).into_response(),
        Err(err) => {
            error!(%err, kind = err.kind(), "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "Something went wrong").into_response()
        }
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
