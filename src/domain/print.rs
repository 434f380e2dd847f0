//! Typed print configuration handed to the rendering engine.

use serde::Deserialize;

pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1920;
pub const DEFAULT_VIEWPORT_HEIGHT: u32 = 1080;

/// Print-to-PDF options for a single conversion.
///
/// Every option is optional: `None` leaves the decision to the engine, which
/// is what happens when a request does not mention the corresponding key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrintSettings {
    pub landscape: Option<bool>,
    pub display_header_footer: Option<bool>,
    pub print_background: Option<bool>,
    pub scale: Option<f64>,
    /// Paper width in inches.
    pub paper_width: Option<f64>,
    /// Paper height in inches.
    pub paper_height: Option<f64>,
    pub margin_top: Option<f64>,
    pub margin_bottom: Option<f64>,
    pub margin_left: Option<f64>,
    pub margin_right: Option<f64>,
    /// Page-range expression such as `1-5, 8, 11-13`.
    pub page_ranges: Option<String>,
    pub header_template: Option<String>,
    pub footer_template: Option<String>,
    pub prefer_css_page_size: Option<bool>,
    pub viewport: Viewport,
}

impl PrintSettings {
    pub fn apply_margins(&mut self, margins: Margins) {
        if let Some(top) = margins.top {
            self.margin_top = Some(top);
        }
        if let Some(bottom) = margins.bottom {
            self.margin_bottom = Some(bottom);
        }
        if let Some(left) = margins.left {
            self.margin_left = Some(left);
        }
        if let Some(right) = margins.right {
            self.margin_right = Some(right);
        }
    }
}

/// Device viewport applied before the page is considered loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: DEFAULT_VIEWPORT_WIDTH,
            height: DEFAULT_VIEWPORT_HEIGHT,
        }
    }
}

/// Structured margin block accepted as embedded JSON, in inches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Margins {
    pub top: Option<f64>,
    pub bottom: Option<f64>,
    pub left: Option<f64>,
    pub right: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn margins_only_override_present_sides() {
        let mut settings = PrintSettings {
            margin_left: Some(0.5),
            ..Default::default()
        };
        settings.apply_margins(Margins {
            top: Some(1.0),
            bottom: Some(2.0),
            ..Default::default()
        });

        assert_eq!(settings.margin_top, Some(1.0));
        assert_eq!(settings.margin_bottom, Some(2.0));
        assert_eq!(settings.margin_left, Some(0.5));
        assert_eq!(settings.margin_right, None);
    }

    #[test]
    fn viewport_defaults_to_full_hd() {
        let viewport = PrintSettings::default().viewport;
        assert_eq!(viewport.width, 1920);
        assert_eq!(viewport.height, 1080);
    }
}
