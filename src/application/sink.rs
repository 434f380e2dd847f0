//! Output sink selection: decides where a produced PDF is delivered.

use std::{
    env,
    fs::File,
    io::{self, Write},
    path::{Path, PathBuf},
};

use metrics::counter;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::request::{Closer, Destination, Sink};

pub const DEFAULT_FILE_STEM: &str = "lazypress";
const PDF_SUFFIX: &str = ".pdf";

pub(crate) const METRIC_SINK_FALLBACK_TOTAL: &str = "lazypress_sink_fallback_total";

/// Output kinds recognised by the `output` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// A uniquely named file in the output directory.
    File,
    /// The caller-supplied stream, typically an HTTP response body.
    Download,
    /// Not implemented yet; delivered like [`OutputKind::Download`].
    S3,
    /// Not implemented yet; delivered like [`OutputKind::Download`].
    Email,
    /// No or unrecognised `output` parameter.
    Default,
}

impl OutputKind {
    pub fn parse(value: Option<&str>) -> Self {
        let Some(value) = value else {
            return OutputKind::Default;
        };
        match value.to_ascii_lowercase().as_str() {
            "file" => OutputKind::File,
            "download" => OutputKind::Download,
            "s3" => OutputKind::S3,
            "email" => OutputKind::Email,
            _ => OutputKind::Default,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutputKind::File => "file",
            OutputKind::Download => "download",
            OutputKind::S3 => "s3",
            OutputKind::Email => "email",
            OutputKind::Default => "default",
        }
    }
}

/// Stream supplied by the caller, used whenever the selected kind writes to
/// "the caller" rather than to a file.
pub struct FallbackStream {
    destination: Destination,
    closer: Option<Box<dyn Closer>>,
}

impl FallbackStream {
    pub fn new(destination: Destination, closer: Option<Box<dyn Closer>>) -> Self {
        Self {
            destination,
            closer,
        }
    }

    fn into_sink(self) -> Sink {
        Sink::stream(self.destination, self.closer)
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to create output file in `{}`: {source}", directory.display())]
    Create {
        directory: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Resolves an [`OutputKind`] into at most one [`Sink`].
#[derive(Debug, Clone, Default)]
pub struct SinkSelector {
    directory: Option<PathBuf>,
}

impl SinkSelector {
    /// `directory` overrides where file sinks are created; when `None` the
    /// user's home directory is used, then the system temp directory.
    pub fn new(directory: Option<PathBuf>) -> Self {
        Self { directory }
    }

    /// Pick the sink for `kind`.
    ///
    /// Every kind except [`OutputKind::Default`] delivers to the caller's
    /// stream when it is not a file. `None` means there is nowhere to
    /// deliver, which the caller reports as
    /// [`ExportError::NoDestination`](crate::domain::request::ExportError::NoDestination).
    pub fn resolve(
        &self,
        kind: OutputKind,
        filename_hint: &str,
        fallback: Option<FallbackStream>,
    ) -> Option<Sink> {
        match kind {
            OutputKind::File => match self.create_file(filename_hint) {
                Ok(sink) => Some(sink),
                Err(err) => {
                    counter!(METRIC_SINK_FALLBACK_TOTAL).increment(1);
                    warn!(
                        target = "application::sink",
                        op = "sink::resolve",
                        result = "fallback",
                        output = kind.as_str(),
                        has_stream = fallback.is_some(),
                        error = %err,
                        "Could not create output file; delivering to the caller stream"
                    );
                    fallback.map(FallbackStream::into_sink)
                }
            },
            OutputKind::Download => fallback.map(FallbackStream::into_sink),
            OutputKind::S3 | OutputKind::Email => {
                warn!(
                    target = "application::sink",
                    op = "sink::resolve",
                    result = "unimplemented",
                    output = kind.as_str(),
                    "Output kind is not implemented yet; delivering as download"
                );
                fallback.map(FallbackStream::into_sink)
            }
            OutputKind::Default => Some(match fallback {
                Some(stream) => stream.into_sink(),
                None => Sink::stdout(Box::new(io::stdout()), Box::new(StdoutCloser)),
            }),
        }
    }

    /// Create a uniquely named, persistent PDF file for `filename_hint`.
    pub fn create_file(&self, filename_hint: &str) -> Result<Sink, SinkError> {
        let directory = self.output_directory();
        let stem = pdf_file_stem(filename_hint);

        let create = || -> io::Result<(File, File, PathBuf)> {
            let named = tempfile::Builder::new()
                .prefix(&stem)
                .suffix(PDF_SUFFIX)
                .tempfile_in(&directory)?;
            let (file, path) = named.keep().map_err(|err| err.error)?;
            let handle = file.try_clone()?;
            Ok((file, handle, path))
        };

        let (file, handle, path) = create().map_err(|source| SinkError::Create {
            directory: directory.clone(),
            source,
        })?;

        info!(
            target = "application::sink",
            op = "sink::create_file",
            result = "ok",
            path = %path.display(),
            "Created output file"
        );

        Ok(Sink::file(
            Box::new(file),
            Box::new(FileCloser { file: Some(handle) }),
            path,
        ))
    }

    fn output_directory(&self) -> PathBuf {
        if let Some(directory) = &self.directory {
            return directory.clone();
        }
        match dirs::home_dir() {
            Some(home) => home,
            None => {
                warn!(
                    target = "application::sink",
                    op = "sink::output_directory",
                    "Home directory unavailable; using the temp directory"
                );
                env::temp_dir()
            }
        }
    }
}

/// Reduce a caller-supplied filename hint to a bare file stem.
///
/// Directory components are dropped, and a trailing `.pdf` or `*.pdf` pattern
/// is stripped so the suffix is never doubled.
pub fn pdf_file_stem(filename_hint: &str) -> String {
    let base = Path::new(filename_hint.trim())
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();

    let lower = base.to_ascii_lowercase();
    let stem = if lower.ends_with("*.pdf") {
        &base[..base.len() - "*.pdf".len()]
    } else if lower.ends_with(PDF_SUFFIX) {
        &base[..base.len() - PDF_SUFFIX.len()]
    } else {
        base
    };
    let stem = stem.replace('*', "");

    if stem.is_empty() {
        DEFAULT_FILE_STEM.to_string()
    } else {
        stem
    }
}

struct FileCloser {
    file: Option<File>,
}

impl Closer for FileCloser {
    fn close(&mut self) -> io::Result<()> {
        match self.file.take() {
            Some(file) => file.sync_all(),
            None => Ok(()),
        }
    }
}

struct StdoutCloser;

impl Closer for StdoutCloser {
    fn close(&mut self) -> io::Result<()> {
        io::stdout().flush()
    }
}
