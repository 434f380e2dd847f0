use std::{
    collections::HashMap,
    io::{self, Write},
    sync::{Arc, Mutex},
};

use axum::{
    Json,
    extract::{Query, State},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use serde_json::json;
use thiserror::Error;

use crate::application::{
    error::HttpError,
    mapping::FILENAME_KEY,
    sink::{FallbackStream, pdf_file_stem},
};

use super::HttpState;

const ACCEPTED_CONTENT_TYPES: [&str; 2] = ["text/plain", "text/html"];
const PDF_CONTENT_TYPE: &str = "application/pdf";

#[derive(Debug, Error)]
pub enum RequestValidationError {
    #[error("content type `{0}` is not text/plain or text/html")]
    UnsupportedContentType(String),
    #[error("content length header is missing or malformed")]
    MissingContentLength,
    #[error("content length is zero")]
    EmptyContent,
}

impl From<RequestValidationError> for HttpError {
    fn from(error: RequestValidationError) -> Self {
        let public_message = match error {
            RequestValidationError::UnsupportedContentType(_) => {
                "Content-Type must be text/plain or text/html"
            }
            RequestValidationError::MissingContentLength => "Content-Length is required",
            RequestValidationError::EmptyContent => "Request body is empty",
        };
        HttpError::from_error(
            "infra::http::convert::validate",
            StatusCode::BAD_REQUEST,
            public_message,
            &error,
        )
    }
}

pub(super) async fn convert(
    State(state): State<HttpState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, HttpError> {
    validate(&headers)?;

    let sink = ResponseSink::default();
    let outcome = state
        .conversions
        .convert(
            &params,
            body.to_vec(),
            Some(FallbackStream::new(Box::new(sink.clone()), None)),
        )
        .await?;

    if let Some(path) = outcome.file_path {
        return Ok(Json(json!({ "file": path.display().to_string() })).into_response());
    }

    let stem = pdf_file_stem(params.get(FILENAME_KEY).map(String::as_str).unwrap_or(""));
    let disposition = HeaderValue::from_str(&format!("attachment; filename={stem}.pdf"))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment; filename=lazypress.pdf"));

    Ok((
        [
            (CONTENT_TYPE, HeaderValue::from_static(PDF_CONTENT_TYPE)),
            (CONTENT_DISPOSITION, disposition),
        ],
        sink.take(),
    )
        .into_response())
}

pub(super) fn validate(headers: &HeaderMap) -> Result<(), RequestValidationError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    let essence = content_type.split(';').next().unwrap_or("").trim();
    if !ACCEPTED_CONTENT_TYPES
        .iter()
        .any(|accepted| essence.eq_ignore_ascii_case(accepted))
    {
        return Err(RequestValidationError::UnsupportedContentType(
            content_type.to_string(),
        ));
    }

    let length = headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .ok_or(RequestValidationError::MissingContentLength)?;
    if length == 0 {
        return Err(RequestValidationError::EmptyContent);
    }

    Ok(())
}

/// In-memory stream the PDF is exported into before it becomes the response
/// body.
#[derive(Clone, Default)]
struct ResponseSink {
    buffer: Arc<Mutex<BytesMut>>,
}

impl ResponseSink {
    fn take(&self) -> Bytes {
        match self.buffer.lock() {
            Ok(mut buffer) => buffer.split().freeze(),
            Err(poisoned) => poisoned.into_inner().split().freeze(),
        }
    }
}

impl Write for ResponseSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| io::Error::other("response buffer poisoned"))?;
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
