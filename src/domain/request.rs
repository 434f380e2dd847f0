//! The conversion request entity: input HTML, print settings, produced PDF
//! bytes and the sink they are delivered to.

use std::{
    fmt, io,
    io::Write,
    path::{Path, PathBuf},
};

use thiserror::Error;

use super::{error::DomainError, print::PrintSettings};

/// Writable end of a sink.
pub type Destination = Box<dyn Write + Send>;

/// Releases a sink once the PDF has been written to it.
pub trait Closer: Send {
    fn close(&mut self) -> io::Result<()>;
}

/// Where a [`Sink`] ultimately writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkTarget {
    File,
    Stream,
    Stdout,
}

/// A resolved destination, its optional closer, and the file path when the
/// sink is file-backed.
pub struct Sink {
    destination: Destination,
    closer: Option<Box<dyn Closer>>,
    target: SinkTarget,
    file_path: Option<PathBuf>,
}

impl Sink {
    pub fn file(destination: Destination, closer: Box<dyn Closer>, path: PathBuf) -> Self {
        Self {
            destination,
            closer: Some(closer),
            target: SinkTarget::File,
            file_path: Some(path),
        }
    }

    pub fn stream(destination: Destination, closer: Option<Box<dyn Closer>>) -> Self {
        Self {
            destination,
            closer,
            target: SinkTarget::Stream,
            file_path: None,
        }
    }

    pub fn stdout(destination: Destination, closer: Box<dyn Closer>) -> Self {
        Self {
            destination,
            closer: Some(closer),
            target: SinkTarget::Stdout,
            file_path: None,
        }
    }

    pub fn target(&self) -> SinkTarget {
        self.target
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sink")
            .field("target", &self.target)
            .field("has_closer", &self.closer.is_some())
            .field("file_path", &self.file_path)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no destination was resolved for this conversion")]
    NoDestination,
    #[error("no PDF content has been produced yet")]
    NoContent,
    #[error("destination accepted {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
    #[error("could not export PDF: {0}")]
    Io(#[from] io::Error),
}

/// One HTML-to-PDF conversion, created fresh per inbound request.
#[derive(Debug, Default)]
pub struct ConversionRequest {
    html: Vec<u8>,
    settings: PrintSettings,
    sanitize: bool,
    content: Option<Vec<u8>>,
    sink: Option<Sink>,
}

impl ConversionRequest {
    pub fn new(html: Vec<u8>) -> Self {
        Self {
            html,
            ..Default::default()
        }
    }

    pub fn html(&self) -> &[u8] {
        &self.html
    }

    pub fn replace_html(&mut self, html: Vec<u8>) {
        self.html = html;
    }

    pub fn settings(&self) -> &PrintSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut PrintSettings {
        &mut self.settings
    }

    pub fn sanitize_enabled(&self) -> bool {
        self.sanitize
    }

    pub fn set_sanitize(&mut self, sanitize: bool) {
        self.sanitize = sanitize;
    }

    /// Attach the sink for this request. A request has exactly one sink for
    /// its whole lifetime.
    pub fn attach_sink(&mut self, sink: Sink) -> Result<(), DomainError> {
        if self.sink.is_some() {
            return Err(DomainError::invariant(
                "destination already resolved for this conversion",
            ));
        }
        self.sink = Some(sink);
        Ok(())
    }

    pub fn sink_target(&self) -> Option<SinkTarget> {
        self.sink.as_ref().map(Sink::target)
    }

    /// Path of the created file when the sink is file-backed.
    pub fn file_path(&self) -> Option<&Path> {
        self.sink.as_ref().and_then(Sink::file_path)
    }

    /// Record the produced PDF. Content is only ever stored whole.
    pub fn complete(&mut self, content: Vec<u8>) {
        self.content = Some(content);
    }

    pub fn content(&self) -> Option<&[u8]> {
        self.content.as_deref()
    }

    /// Write the produced PDF to the destination in a single call and release
    /// the closer. The closer is released at most once, even when the write
    /// itself fails; a write error is then reported over a close error.
    pub fn export(&mut self) -> Result<usize, ExportError> {
        let sink = self.sink.as_mut().ok_or(ExportError::NoDestination)?;
        let content = self.content.as_deref().ok_or(ExportError::NoContent)?;

        let written = sink
            .destination
            .write(content)
            .and_then(|written| sink.destination.flush().map(|()| written));

        let closed = match sink.closer.take() {
            Some(mut closer) => closer.close(),
            None => Ok(()),
        };

        let written = written?;
        closed?;
        if written != content.len() {
            return Err(ExportError::ShortWrite {
                written,
                expected: content.len(),
            });
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[derive(Clone, Default)]
    struct RecordingWriter {
        written: Arc<Mutex<Vec<u8>>>,
        limit: Option<usize>,
    }

    impl Write for RecordingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let accepted = self.limit.map_or(buf.len(), |limit| limit.min(buf.len()));
            self.written
                .lock()
                .expect("writer lock")
                .extend_from_slice(&buf[..accepted]);
            Ok(accepted)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct CountingCloser {
        count: Arc<AtomicUsize>,
    }

    impl Closer for CountingCloser {
        fn close(&mut self) -> io::Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "client went away"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct FailingCloser {
        count: Arc<AtomicUsize>,
    }

    impl Closer for FailingCloser {
        fn close(&mut self) -> io::Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::other("close failed"))
        }
    }

    const HELLO: &[u8] = b"<html><body>Hello World</body></html>";

    #[test]
    fn export_without_destination_fails() {
        let mut request = ConversionRequest::new(HELLO.to_vec());
        request.complete(HELLO.to_vec());

        let err = request.export().expect_err("export should fail");
        assert!(matches!(err, ExportError::NoDestination));
    }

    #[test]
    fn export_writes_content_and_closes_once() {
        let writer = RecordingWriter::default();
        let closer = CountingCloser::default();
        let mut request = ConversionRequest::new(Vec::new());
        request
            .attach_sink(Sink::stream(
                Box::new(writer.clone()),
                Some(Box::new(closer.clone())),
            ))
            .expect("first sink");
        request.complete(HELLO.to_vec());

        let written = request.export().expect("export succeeds");

        assert_eq!(written, HELLO.len());
        assert_eq!(writer.written.lock().expect("lock").as_slice(), HELLO);
        assert_eq!(closer.count.load(Ordering::SeqCst), 1);

        request.export().expect("second export still writes");
        assert_eq!(closer.count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn short_write_is_an_error() {
        let writer = RecordingWriter {
            limit: Some(5),
            ..Default::default()
        };
        let closer = CountingCloser::default();
        let mut request = ConversionRequest::new(Vec::new());
        request
            .attach_sink(Sink::stream(
                Box::new(writer),
                Some(Box::new(closer.clone())),
            ))
            .expect("sink");
        request.complete(HELLO.to_vec());

        let err = request.export().expect_err("short write");
        assert!(matches!(
            err,
            ExportError::ShortWrite {
                written: 5,
                expected
            } if expected == HELLO.len()
        ));
        assert_eq!(closer.count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn write_error_wins_over_close_error() {
        let closer = FailingCloser::default();
        let mut request = ConversionRequest::new(Vec::new());
        request
            .attach_sink(Sink::stream(
                Box::new(BrokenPipe),
                Some(Box::new(closer.clone())),
            ))
            .expect("sink");
        request.complete(HELLO.to_vec());

        let err = request.export().expect_err("write fails");
        assert!(matches!(
            &err,
            ExportError::Io(io_err) if io_err.kind() == io::ErrorKind::BrokenPipe
        ));
        assert_eq!(closer.count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_error_surfaces_after_a_full_write() {
        let writer = RecordingWriter::default();
        let closer = FailingCloser::default();
        let mut request = ConversionRequest::new(Vec::new());
        request
            .attach_sink(Sink::stream(
                Box::new(writer.clone()),
                Some(Box::new(closer)),
            ))
            .expect("sink");
        request.complete(HELLO.to_vec());

        let err = request.export().expect_err("close fails");
        assert!(matches!(err, ExportError::Io(_)));
        assert_eq!(writer.written.lock().expect("lock").as_slice(), HELLO);
    }

    #[test]
    fn export_before_completion_fails() {
        let mut request = ConversionRequest::new(HELLO.to_vec());
        request
            .attach_sink(Sink::stream(Box::new(RecordingWriter::default()), None))
            .expect("sink");

        assert!(request.content().is_none());
        assert!(matches!(request.export(), Err(ExportError::NoContent)));
    }

    #[test]
    fn sink_can_only_be_attached_once() {
        let mut request = ConversionRequest::new(Vec::new());
        request
            .attach_sink(Sink::stream(Box::new(RecordingWriter::default()), None))
            .expect("first sink");

        let err = request
            .attach_sink(Sink::stream(Box::new(RecordingWriter::default()), None))
            .expect_err("second sink rejected");
        assert!(matches!(err, DomainError::Invariant { .. }));
        assert_eq!(request.sink_target(), Some(SinkTarget::Stream));
    }

    #[test]
    fn file_path_only_present_for_file_sinks() {
        let mut request = ConversionRequest::new(Vec::new());
        request
            .attach_sink(Sink::stream(Box::new(RecordingWriter::default()), None))
            .expect("sink");
        assert!(request.file_path().is_none());

        let mut request = ConversionRequest::new(Vec::new());
        request
            .attach_sink(Sink::file(
                Box::new(RecordingWriter::default()),
                Box::new(CountingCloser::default()),
                PathBuf::from("/tmp/lazypress-test.pdf"),
            ))
            .expect("sink");
        assert_eq!(
            request.file_path(),
            Some(Path::new("/tmp/lazypress-test.pdf"))
        );
        assert_eq!(request.sink_target(), Some(SinkTarget::File));
    }
}
