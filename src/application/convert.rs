//! Conversion orchestration: parameters → settings → sanitized HTML → sink →
//! rendered PDF → export.

use std::{collections::HashMap, path::PathBuf, time::Instant};

use metrics::counter;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::{
    error::DomainError,
    print::PrintSettings,
    request::{ConversionRequest, ExportError, SinkTarget},
};

use super::{
    mapping::{self, FILENAME_KEY, OUTPUT_KEY, SANITIZE_KEY},
    render::{RenderCoordinator, RenderError},
    sanitize::Sanitizer,
    sink::{FallbackStream, OutputKind, SinkSelector},
};

pub(crate) const METRIC_CONVERSIONS_TOTAL: &str = "lazypress_conversions_total";

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("request body is empty")]
    EmptyBody,
    #[error("request body is empty after sanitization")]
    SanitizedEmpty,
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl ConversionError {
    fn metric_result(&self) -> &'static str {
        match self {
            ConversionError::EmptyBody | ConversionError::SanitizedEmpty => "rejected",
            _ => "failed",
        }
    }
}

/// Summary of a delivered conversion.
#[derive(Debug, Clone)]
pub struct ConversionOutcome {
    pub target: SinkTarget,
    pub file_path: Option<PathBuf>,
    pub bytes: usize,
}

pub struct ConversionService {
    coordinator: RenderCoordinator,
    sanitizer: Sanitizer,
    sinks: SinkSelector,
}

impl ConversionService {
    pub fn new(coordinator: RenderCoordinator, sanitizer: Sanitizer, sinks: SinkSelector) -> Self {
        Self {
            coordinator,
            sanitizer,
            sinks,
        }
    }

    /// Run one conversion end to end and deliver the PDF.
    ///
    /// `fallback` is the caller's own stream; it receives the PDF for
    /// `download` and default outputs and whenever a file sink cannot be
    /// created. Without it only the default output has somewhere to go
    /// (standard output); the others fail with
    /// [`ExportError::NoDestination`] before the engine is launched.
    pub async fn convert(
        &self,
        params: &HashMap<String, String>,
        html: Vec<u8>,
        fallback: Option<FallbackStream>,
    ) -> Result<ConversionOutcome, ConversionError> {
        let started_at = Instant::now();
        let result = self.run(params, html, fallback).await;
        let elapsed_ms = started_at.elapsed().as_millis() as u64;

        match &result {
            Ok(outcome) => {
                counter!(METRIC_CONVERSIONS_TOTAL, "result" => "ok").increment(1);
                info!(
                    target = "application::convert",
                    op = "convert::run",
                    result = "ok",
                    elapsed_ms,
                    sink = ?outcome.target,
                    bytes = outcome.bytes,
                    path = %outcome
                        .file_path
                        .as_ref()
                        .map(|path| path.display().to_string())
                        .unwrap_or_default(),
                    "PDF exported"
                );
            }
            Err(err) => {
                counter!(METRIC_CONVERSIONS_TOTAL, "result" => err.metric_result()).increment(1);
                warn!(
                    target = "application::convert",
                    op = "convert::run",
                    result = err.metric_result(),
                    elapsed_ms,
                    error = %err,
                    "Conversion did not complete"
                );
            }
        }

        result
    }

    async fn run(
        &self,
        params: &HashMap<String, String>,
        html: Vec<u8>,
        fallback: Option<FallbackStream>,
    ) -> Result<ConversionOutcome, ConversionError> {
        let mut request = self.prepare(params, html)?;

        let kind = OutputKind::parse(params.get(OUTPUT_KEY).map(String::as_str));
        let filename = params.get(FILENAME_KEY).map(String::as_str).unwrap_or("");
        let sink = self
            .sinks
            .resolve(kind, filename, fallback)
            .ok_or(ExportError::NoDestination)?;
        request.attach_sink(sink)?;

        let pdf = self
            .coordinator
            .generate(request.settings(), request.html())
            .await?;
        request.complete(pdf);
        let bytes = request.export()?;

        Ok(ConversionOutcome {
            target: request
                .sink_target()
                .ok_or_else(|| DomainError::invariant("sink detached after export"))?,
            file_path: request.file_path().map(|path| path.to_path_buf()),
            bytes,
        })
    }

    /// Build a request from parameters and body: map settings, validate the
    /// body and sanitize every HTML fragment when asked to.
    pub fn prepare(
        &self,
        params: &HashMap<String, String>,
        html: Vec<u8>,
    ) -> Result<ConversionRequest, ConversionError> {
        if html.is_empty() {
            return Err(ConversionError::EmptyBody);
        }

        let mut request = ConversionRequest::new(html);
        load_settings(&mut request, params);

        if request.sanitize_enabled() {
            let cleaned = self.sanitizer.clean_bytes(request.html());
            if cleaned.iter().all(u8::is_ascii_whitespace) {
                return Err(ConversionError::SanitizedEmpty);
            }
            request.replace_html(cleaned);

            let settings = request.settings_mut();
            settings.header_template = settings
                .header_template
                .take()
                .map(|template| self.sanitizer.clean(&template));
            settings.footer_template = settings
                .footer_template
                .take()
                .map(|template| self.sanitizer.clean(&template));
        }

        Ok(request)
    }
}

fn load_settings(request: &mut ConversionRequest, params: &HashMap<String, String>) {
    if let Err(err) = mapping::populate(params, request.settings_mut()) {
        warn!(
            target = "application::convert",
            op = "convert::load_settings",
            result = "defaults",
            key = err.key,
            error = %err,
            "Invalid print parameter; continuing with default settings"
        );
        *request.settings_mut() = PrintSettings::default();
    }

    let sanitize = match params.get(SANITIZE_KEY) {
        None => false,
        Some(raw) => mapping::parse_bool(raw).unwrap_or_else(|reason| {
            warn!(
                target = "application::convert",
                op = "convert::load_settings",
                key = SANITIZE_KEY,
                value = %raw,
                reason = %reason,
                "Unrecognised sanitize flag; sanitization stays off"
            );
            false
        }),
    };
    request.set_sanitize(sanitize);
}
