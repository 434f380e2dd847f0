use std::time::Instant;

use axum::{
    body::Body,
    http::{Request, Uri, header::CONTENT_LENGTH},
    middleware::Next,
    response::Response,
};
use tracing::{error, warn};
use url::form_urlencoded;
use uuid::Uuid;

use crate::application::{error::ErrorReport, mapping::OUTPUT_KEY, sink::OutputKind};

/// Per-request facts shared by the handler and the response logger.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub output: OutputKind,
}

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let ctx = RequestContext {
        request_id: Uuid::new_v4().to_string(),
        output: requested_output(request.uri()),
    };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(ctx);
    response
}

/// Output kind named by the `output` query parameter, read the same way the
/// conversion service reads it.
fn requested_output(uri: &Uri) -> OutputKind {
    let value = uri.query().and_then(|query| {
        form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == OUTPUT_KEY)
            .map(|(_, value)| value.into_owned())
    });
    OutputKind::parse(value.as_deref())
}

/// Log rejected and failed conversions with the error chain their handler
/// left in an [`ErrorReport`].
pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let started_at = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let content_length = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();
    let (request_id, output) = match request.extensions().get::<RequestContext>() {
        Some(ctx) => (ctx.request_id.clone(), ctx.output),
        None => (String::new(), OutputKind::Default),
    };

    let mut response = next.run(request).await;
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return response;
    }

    let elapsed_ms = started_at.elapsed().as_millis() as u64;
    let report = response.extensions_mut().remove::<ErrorReport>();
    let source = report.as_ref().map_or("router", |report| report.source);
    let chain = report.map(|report| report.messages).unwrap_or_default();
    let detail = chain.first().map_or("no diagnostic available", String::as_str);

    if status.is_server_error() {
        error!(
            target = "lazypress::http::response",
            status = status.as_u16(),
            method = %method,
            path = %path,
            output = output.as_str(),
            content_length = %content_length,
            elapsed_ms,
            source,
            detail,
            chain = ?chain,
            request_id = %request_id,
            "Conversion failed"
        );
    } else {
        warn!(
            target = "lazypress::http::response",
            status = status.as_u16(),
            method = %method,
            path = %path,
            output = output.as_str(),
            content_length = %content_length,
            elapsed_ms,
            source,
            detail,
            request_id = %request_id,
            "Conversion request rejected"
        );
    }

    response
}
