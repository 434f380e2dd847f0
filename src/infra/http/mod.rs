mod convert;
mod middleware;

pub use convert::RequestValidationError;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware as axum_middleware,
    routing::{get, post},
};

use crate::application::convert::ConversionService;

use self::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct HttpState {
    pub conversions: Arc<ConversionService>,
}

/// Build the conversion router: `POST /convert` and a `GET /_health` liveness check.
pub fn build_router(state: HttpState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/convert", post(convert::convert))
        .route("/_health", get(health))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}
