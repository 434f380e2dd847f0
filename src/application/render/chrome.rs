//! Headless Chrome binding for [`RenderSession`].

use std::{ffi::OsStr, path::PathBuf, sync::Arc, time::Duration};

use headless_chrome::{
    Browser, LaunchOptions, Tab,
    protocol::cdp::{Emulation, types::Event},
    types::PrintToPdfOptions,
};
use tracing::{debug, info};

use super::{LoadListener, RenderError, RenderSession, SessionLauncher};
use crate::domain::print::{PrintSettings, Viewport};

/// Extra flags for hosts where Chrome cannot set up its own sandbox
/// (containers, serverless runtimes). `--no-sandbox` comes from
/// `LaunchOptions::sandbox`.
static SANDBOXED_HOST_FLAGS: [&str; 4] = [
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--single-process",
    "--no-zygote",
];

#[derive(Debug, Clone)]
pub struct LaunchSettings {
    /// Chrome/Chromium binary; `None` uses headless_chrome's discovery.
    pub executable: Option<PathBuf>,
    /// Disable sandboxing, shared memory and subprocess spawning.
    pub sandboxed_host: bool,
    /// How long the browser may stay idle before the engine gives up on it.
    pub idle_timeout: Duration,
}

pub struct ChromeLauncher {
    settings: LaunchSettings,
}

impl ChromeLauncher {
    pub fn new(settings: LaunchSettings) -> Self {
        Self { settings }
    }

    fn launch_flags(&self) -> Vec<&'static OsStr> {
        if self.settings.sandboxed_host {
            SANDBOXED_HOST_FLAGS
                .iter()
                .map(|flag| OsStr::new(*flag))
                .collect()
        } else {
            Vec::new()
        }
    }
}

impl SessionLauncher for ChromeLauncher {
    fn launch(&self) -> Result<Arc<dyn RenderSession>, RenderError> {
        let options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(!self.settings.sandboxed_host)
            .path(self.settings.executable.clone())
            .args(self.launch_flags())
            .idle_browser_timeout(self.settings.idle_timeout)
            .build()
            .map_err(|err| RenderError::Launch(err.to_string()))?;

        let browser = Browser::new(options).map_err(|err| RenderError::Launch(err.to_string()))?;
        let tab = browser
            .new_tab()
            .map_err(|err| RenderError::Launch(err.to_string()))?;

        info!(
            target = "application::render::chrome",
            op = "chrome::launch",
            result = "ok",
            executable = ?self.settings.executable,
            sandboxed_host = self.settings.sandboxed_host,
            "Browser session started"
        );

        Ok(Arc::new(ChromeSession {
            tab,
            _browser: browser,
        }))
    }
}

struct ChromeSession {
    tab: Arc<Tab>,
    // Dropping the browser terminates the Chrome process.
    _browser: Browser,
}

impl RenderSession for ChromeSession {
    fn set_script_execution_disabled(&self, disabled: bool) -> Result<(), RenderError> {
        self.tab
            .call_method(Emulation::SetScriptExecutionDisabled { value: disabled })
            .map(|_| ())
            .map_err(|err| RenderError::Navigate(err.to_string()))
    }

    fn set_viewport(&self, viewport: Viewport) -> Result<(), RenderError> {
        self.tab
            .call_method(device_metrics(viewport))
            .map(|_| ())
            .map_err(|err| RenderError::Navigate(err.to_string()))
    }

    fn on_load_complete(&self, listener: LoadListener) -> Result<(), RenderError> {
        self.tab
            .add_event_listener(Arc::new(move |event: &Event| {
                if let Event::PageLoadEventFired(_) = event {
                    listener();
                }
            }))
            .map(|_| ())
            .map_err(|err| RenderError::Navigate(err.to_string()))
    }

    fn navigate(&self, url: &str) -> Result<(), RenderError> {
        self.tab
            .navigate_to(url)
            .map(|_| ())
            .map_err(|err| RenderError::Navigate(err.to_string()))
    }

    fn print_to_pdf(&self, settings: &PrintSettings) -> Result<Vec<u8>, RenderError> {
        self.tab
            .print_to_pdf(Some(print_options(settings)))
            .map_err(|err| RenderError::Print(err.to_string()))
    }

    fn close(&self) {
        if let Err(err) = self.tab.close(false) {
            debug!(
                target = "application::render::chrome",
                op = "chrome::close",
                error = %err,
                "Tab already gone during teardown"
            );
        }
    }
}

/// Fixed desktop metrics for the page; a scale factor of zero keeps the
/// browser's own value.
fn device_metrics(viewport: Viewport) -> Emulation::SetDeviceMetricsOverride {
    Emulation::SetDeviceMetricsOverride {
        width: viewport.width,
        height: viewport.height,
        device_scale_factor: 0.0,
        mobile: false,
        scale: None,
        screen_width: None,
        screen_height: None,
        position_x: None,
        position_y: None,
        dont_set_visible_size: None,
        screen_orientation: None,
        viewport: None,
        display_feature: None,
        device_posture: None,
    }
}

fn print_options(settings: &PrintSettings) -> PrintToPdfOptions {
    PrintToPdfOptions {
        landscape: settings.landscape,
        display_header_footer: settings.display_header_footer,
        print_background: settings.print_background,
        scale: settings.scale,
        paper_width: settings.paper_width,
        paper_height: settings.paper_height,
        margin_top: settings.margin_top,
        margin_bottom: settings.margin_bottom,
        margin_left: settings.margin_left,
        margin_right: settings.margin_right,
        page_ranges: settings.page_ranges.clone(),
        header_template: settings.header_template.clone(),
        footer_template: settings.footer_template.clone(),
        prefer_css_page_size: settings.prefer_css_page_size,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launcher(sandboxed_host: bool) -> ChromeLauncher {
        ChromeLauncher::new(LaunchSettings {
            executable: None,
            sandboxed_host,
            idle_timeout: Duration::from_secs(30),
        })
    }

    #[test]
    fn constrained_hosts_get_extra_flags() {
        let flags = launcher(true).launch_flags();
        assert!(flags.contains(&OsStr::new("--disable-dev-shm-usage")));
        assert!(flags.contains(&OsStr::new("--single-process")));
        assert!(flags.contains(&OsStr::new("--no-zygote")));
        assert!(launcher(false).launch_flags().is_empty());
    }

    #[test]
    fn viewport_becomes_desktop_device_metrics() {
        let metrics = device_metrics(Viewport::default());

        assert_eq!(metrics.width, 1920);
        assert_eq!(metrics.height, 1080);
        assert_eq!(metrics.device_scale_factor, 0.0);
        assert!(!metrics.mobile);
        assert_eq!(metrics.screen_width, None);
    }

    #[test]
    fn print_options_carry_every_setting() {
        let settings = PrintSettings {
            landscape: Some(true),
            scale: Some(1.5),
            paper_width: Some(8.5),
            margin_left: Some(0.25),
            page_ranges: Some("1-2".to_string()),
            footer_template: Some("<span class=pageNumber></span>".to_string()),
            prefer_css_page_size: Some(false),
            ..Default::default()
        };

        let options = print_options(&settings);

        assert_eq!(options.landscape, Some(true));
        assert_eq!(options.scale, Some(1.5));
        assert_eq!(options.paper_width, Some(8.5));
        assert_eq!(options.margin_left, Some(0.25));
        assert_eq!(options.page_ranges.as_deref(), Some("1-2"));
        assert_eq!(
            options.footer_template.as_deref(),
            Some("<span class=pageNumber></span>")
        );
        assert_eq!(options.prefer_css_page_size, Some(false));
        assert_eq!(options.header_template, None);
    }
}
