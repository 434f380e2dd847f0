//! Render session coordination.
//!
//! One conversion owns one engine session. The page is loaded by navigating
//! to a temporary file, and printing only starts once the engine reports the
//! load event, so images and stylesheets referenced by the page are in place
//! before the PDF is produced:
//!
//! 1. launch a session and register a load listener,
//! 2. disable scripts, apply the viewport and navigate,
//! 3. the listener wakes a print task that delivers the bytes over a one-shot
//!    channel,
//! 4. the caller awaits that channel under a deadline, then tears the session
//!    down.

pub mod chrome;

use std::{
    io::Write,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use metrics::histogram;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::{runtime::Handle, sync::oneshot, task};
use tracing::{debug, info, warn};
use url::Url;

use crate::domain::print::{PrintSettings, Viewport};

pub use chrome::{ChromeLauncher, LaunchSettings};

pub(crate) const METRIC_RENDER_MS: &str = "lazypress_render_ms";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to launch rendering engine: {0}")]
    Launch(String),
    #[error("failed to stage page for rendering: {0}")]
    Page(String),
    #[error("navigation failed: {0}")]
    Navigate(String),
    #[error("print to PDF failed: {0}")]
    Print(String),
    #[error("page did not finish loading within {0:?}")]
    Timeout(Duration),
    #[error("render session aborted: {0}")]
    Aborted(String),
}

/// Invoked by a session each time the engine reports that the page finished
/// loading.
pub type LoadListener = Box<dyn Fn() + Send + Sync>;

/// A live rendering-engine session. Calls block the current thread.
pub trait RenderSession: Send + Sync {
    fn set_script_execution_disabled(&self, disabled: bool) -> Result<(), RenderError>;

    fn set_viewport(&self, viewport: Viewport) -> Result<(), RenderError>;

    fn on_load_complete(&self, listener: LoadListener) -> Result<(), RenderError>;

    fn navigate(&self, url: &str) -> Result<(), RenderError>;

    fn print_to_pdf(&self, settings: &PrintSettings) -> Result<Vec<u8>, RenderError>;

    /// Release engine resources. Must tolerate being called on a session
    /// whose engine already went away.
    fn close(&self);
}

/// Starts engine sessions.
pub trait SessionLauncher: Send + Sync {
    fn launch(&self) -> Result<Arc<dyn RenderSession>, RenderError>;
}

/// Drives one session per [`generate`](RenderCoordinator::generate) call.
#[derive(Clone)]
pub struct RenderCoordinator {
    launcher: Arc<dyn SessionLauncher>,
    timeout: Duration,
}

impl RenderCoordinator {
    pub fn new(launcher: Arc<dyn SessionLauncher>, timeout: Duration) -> Self {
        Self { launcher, timeout }
    }

    /// Render `html` to PDF bytes. The returned bytes are complete; on error
    /// nothing is returned. The session is closed on every exit path,
    /// including when this future is dropped.
    pub async fn generate(
        &self,
        settings: &PrintSettings,
        html: &[u8],
    ) -> Result<Vec<u8>, RenderError> {
        let started_at = Instant::now();
        let result = self.run_session(settings, html).await;
        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        histogram!(METRIC_RENDER_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

        match &result {
            Ok(pdf) => info!(
                target = "application::render",
                op = "render::generate",
                result = "ok",
                elapsed_ms,
                html_bytes = html.len(),
                pdf_bytes = pdf.len(),
                "PDF content created"
            ),
            Err(err) => warn!(
                target = "application::render",
                op = "render::generate",
                result = "error",
                elapsed_ms,
                html_bytes = html.len(),
                error = %err,
                "PDF generation failed"
            ),
        }

        result
    }

    async fn run_session(
        &self,
        settings: &PrintSettings,
        html: &[u8],
    ) -> Result<Vec<u8>, RenderError> {
        let page = stage_page(html)?;
        let url = Url::from_file_path(page.path())
            .map_err(|()| {
                RenderError::Page(format!("`{}` is not an absolute path", page.path().display()))
            })?
            .to_string();

        let launcher = Arc::clone(&self.launcher);
        let session = task::spawn_blocking(move || launcher.launch())
            .await
            .map_err(|err| RenderError::Aborted(err.to_string()))??;
        let guard = SessionGuard::new(Arc::clone(&session));

        let (done_tx, done_rx) = oneshot::channel();
        let navigating = Arc::new(AtomicBool::new(false));
        session.on_load_complete(print_on_load(
            &session,
            settings.clone(),
            Arc::clone(&navigating),
            done_tx,
        ))?;

        let viewport = settings.viewport;
        let loader = Arc::clone(&session);
        task::spawn_blocking(move || {
            loader.set_script_execution_disabled(true)?;
            loader.set_viewport(viewport)?;
            navigating.store(true, Ordering::SeqCst);
            loader.navigate(&url)
        })
        .await
        .map_err(|err| RenderError::Aborted(err.to_string()))??;

        let outcome = match tokio::time::timeout(self.timeout, done_rx).await {
            Ok(Ok(printed)) => printed,
            Ok(Err(_)) => Err(RenderError::Aborted(
                "load listener dropped before printing".to_string(),
            )),
            Err(_) => Err(RenderError::Timeout(self.timeout)),
        };

        guard.close().await;
        drop(page);

        match outcome {
            Ok(pdf) if pdf.is_empty() => {
                Err(RenderError::Print("engine returned an empty document".to_string()))
            }
            other => other,
        }
    }
}

/// Build the load listener: the first load event after `navigating` is set
/// spawns the print task. Earlier events belong to the blank tab and later
/// ones are ignored.
fn print_on_load(
    session: &Arc<dyn RenderSession>,
    settings: PrintSettings,
    navigating: Arc<AtomicBool>,
    done: oneshot::Sender<Result<Vec<u8>, RenderError>>,
) -> LoadListener {
    let session = Arc::downgrade(session);
    let done = Mutex::new(Some(done));
    let runtime = Handle::current();

    Box::new(move || {
        if !navigating.load(Ordering::SeqCst) {
            debug!(
                target = "application::render",
                op = "render::on_load",
                "Load event before navigation; ignored"
            );
            return;
        }
        let Some(done) = done.lock().ok().and_then(|mut slot| slot.take()) else {
            return;
        };
        let Some(session) = session.upgrade() else {
            return;
        };
        let settings = settings.clone();
        debug!(
            target = "application::render",
            op = "render::on_load",
            "Page load complete; printing"
        );
        runtime.spawn_blocking(move || {
            let _ = done.send(session.print_to_pdf(&settings));
        });
    })
}

fn stage_page(html: &[u8]) -> Result<NamedTempFile, RenderError> {
    let mut page = tempfile::Builder::new()
        .prefix("lazypress")
        .suffix(".html")
        .tempfile()
        .map_err(|err| RenderError::Page(err.to_string()))?;
    page.write_all(html)
        .and_then(|()| page.flush())
        .map_err(|err| RenderError::Page(err.to_string()))?;
    Ok(page)
}

/// Closes the session when the coordinator is done with it, or when the
/// owning future is dropped mid-flight.
struct SessionGuard {
    session: Option<Arc<dyn RenderSession>>,
}

impl SessionGuard {
    fn new(session: Arc<dyn RenderSession>) -> Self {
        Self {
            session: Some(session),
        }
    }

    async fn close(mut self) {
        if let Some(session) = self.session.take() {
            if let Err(err) = task::spawn_blocking(move || session.close()).await {
                warn!(
                    target = "application::render",
                    op = "render::close",
                    error = %err,
                    "Session teardown task failed"
                );
            }
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || session.close());
            }
            Err(_) => session.close(),
        }
    }
}
