#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use lazypress::{
    application::{
        convert::ConversionService,
        render::{LoadListener, RenderCoordinator, RenderError, RenderSession, SessionLauncher},
        sanitize::Sanitizer,
        sink::SinkSelector,
    },
    domain::print::{PrintSettings, Viewport},
};

pub const FAKE_PDF: &[u8] = b"%PDF-1.7 fake";

/// Engine stand-in: fires the load event right after navigation and prints a
/// fixed document.
#[derive(Default)]
pub struct FakeLauncher {
    pub launches: Mutex<usize>,
}

impl SessionLauncher for FakeLauncher {
    fn launch(&self) -> Result<Arc<dyn RenderSession>, RenderError> {
        if let Ok(mut launches) = self.launches.lock() {
            *launches += 1;
        }
        Ok(Arc::new(FakeSession::default()))
    }
}

#[derive(Default)]
struct FakeSession {
    listener: Mutex<Option<Arc<LoadListener>>>,
}

impl RenderSession for FakeSession {
    fn set_script_execution_disabled(&self, _disabled: bool) -> Result<(), RenderError> {
        Ok(())
    }

    fn set_viewport(&self, _viewport: Viewport) -> Result<(), RenderError> {
        Ok(())
    }

    fn on_load_complete(&self, listener: LoadListener) -> Result<(), RenderError> {
        *self.listener.lock().expect("listener slot") = Some(Arc::new(listener));
        Ok(())
    }

    fn navigate(&self, _url: &str) -> Result<(), RenderError> {
        if let Some(listener) = self.listener.lock().expect("listener slot").clone() {
            thread::spawn(move || listener());
        }
        Ok(())
    }

    fn print_to_pdf(&self, _settings: &PrintSettings) -> Result<Vec<u8>, RenderError> {
        Ok(FAKE_PDF.to_vec())
    }

    fn close(&self) {}
}

pub fn conversion_service(
    launcher: Arc<FakeLauncher>,
    output_dir: Option<std::path::PathBuf>,
) -> ConversionService {
    ConversionService::new(
        RenderCoordinator::new(launcher, Duration::from_secs(5)),
        Sanitizer::new(),
        SinkSelector::new(output_dir),
    )
}

pub fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
        .collect()
}
