use ammonia::Builder as AmmoniaBuilder;
use lol_html::{RewriteStrSettings, element, errors::RewritingError, rewrite_str};
use tracing::warn;

/// Document shell tags and the stand-in names they carry through ammonia.
///
/// html5ever parses ammonia input as a body fragment, which discards
/// `<html>`, `<head>` and `<body>` together with their attributes.
const SHELL_TAGS: [(&str, &str); 3] = [
    ("html", "lazypress-html"),
    ("head", "lazypress-head"),
    ("body", "lazypress-body"),
];

/// Allow-list HTML cleaner applied to request bodies and header/footer
/// templates when sanitization is requested.
///
/// Scripts and their content are always removed; document structure tags,
/// `<style>` blocks and `<meta name content>` pairs survive so the printed
/// page keeps its look.
pub struct Sanitizer {
    builder: AmmoniaBuilder<'static>,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Sanitizer {
    pub fn new() -> Self {
        Self {
            builder: build_document_sanitizer(),
        }
    }

    pub fn clean(&self, html: &str) -> String {
        let masked = match rename_shell(html, Shell::Mask) {
            Ok(masked) => masked,
            Err(err) => {
                warn!(
                    target = "application::sanitize",
                    op = "sanitize::clean",
                    result = "fragment",
                    error = %err,
                    "Could not mask the document shell; cleaning as a fragment"
                );
                html.to_string()
            }
        };
        let cleaned = self.builder.clean(&masked).to_string();

        match rename_shell(&cleaned, Shell::Restore) {
            Ok(restored) => restored,
            Err(err) => {
                warn!(
                    target = "application::sanitize",
                    op = "sanitize::clean",
                    result = "fragment",
                    error = %err,
                    "Could not restore the document shell"
                );
                self.builder.clean(html).to_string()
            }
        }
    }

    /// Clean raw request bytes. Invalid UTF-8 sequences are replaced before
    /// parsing.
    pub fn clean_bytes(&self, html: &[u8]) -> Vec<u8> {
        self.clean(&String::from_utf8_lossy(html)).into_bytes()
    }
}

#[derive(Clone, Copy)]
enum Shell {
    Mask,
    Restore,
}

/// Rename every shell tag (start and end) in one direction.
fn rename_shell(html: &str, direction: Shell) -> Result<String, RewritingError> {
    let handlers = SHELL_TAGS
        .iter()
        .map(|&(tag, stand_in)| {
            let (from, to) = match direction {
                Shell::Mask => (tag, stand_in),
                Shell::Restore => (stand_in, tag),
            };
            element!(from, move |el| {
                el.set_tag_name(to)?;
                Ok(())
            })
        })
        .collect();

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: handlers,
            ..RewriteStrSettings::default()
        },
    )
}

fn build_document_sanitizer() -> AmmoniaBuilder<'static> {
    let mut builder = AmmoniaBuilder::default();

    builder.rm_clean_content_tags(&["style"]);
    builder.add_tags(&["title", "style", "meta"]);
    builder.add_tags(SHELL_TAGS.iter().map(|&(_, stand_in)| stand_in));

    for tag in ["lazypress-body", "table", "tr", "td", "p", "a", "font", "image"] {
        builder.add_tag_attributes(tag, &["style"]);
    }
    builder.add_tag_attributes("meta", &["name", "content"]);

    builder
}

#[cfg(test)]
mod tests {
    use super::Sanitizer;

    #[test]
    fn script_only_payload_cleans_to_empty() {
        let sanitizer = Sanitizer::new();
        assert_eq!(sanitizer.clean("<script>alert(1)</script>"), "");
    }

    #[test]
    fn keeps_style_blocks_and_inline_styles() {
        let sanitizer = Sanitizer::new();
        let html = sanitizer.clean(
            "<style>h1 { color: red; }</style><table style=\"width: 100%\"><tr><td>x</td></tr></table>",
        );

        assert!(html.contains("<style>h1 { color: red; }</style>"));
        assert!(html.contains("style=\"width: 100%\""));
    }

    #[test]
    fn keeps_meta_name_and_content() {
        let sanitizer = Sanitizer::new();
        let html = sanitizer.clean("<meta name=\"author\" content=\"Ada\" http-equiv=\"refresh\">");

        assert!(html.contains("name=\"author\""));
        assert!(html.contains("content=\"Ada\""));
        assert!(!html.contains("http-equiv"));
    }

    #[test]
    fn strips_event_handlers_and_scripts() {
        let sanitizer = Sanitizer::new();
        let html = sanitizer.clean("<p onclick=\"steal()\">Hi<script>x()</script></p>");

        assert_eq!(html, "<p>Hi</p>");
    }

    #[test]
    fn sanitizing_twice_is_a_no_op() {
        let sanitizer = Sanitizer::new();
        let once = sanitizer.clean(
            "<h1 style=\"color: red\">Title</h1><p style=\"margin: 0\">Body <a href=\"https://example.com\" onclick=\"x()\">link</a></p><script>bad()</script>",
        );
        let twice = sanitizer.clean(&once);

        assert_eq!(once, twice);
    }

    #[test]
    fn full_documents_keep_their_shell() {
        let sanitizer = Sanitizer::new();
        let html = sanitizer.clean(
            "<html><head><title>Report</title><meta name=\"author\" content=\"Ada\"><script>x()</script></head>\
             <body style=\"margin: 0\" onload=\"steal()\"><p>x</p></body></html>",
        );

        assert!(html.starts_with("<html><head><title>Report</title>"), "{html}");
        assert!(html.contains("<meta name=\"author\" content=\"Ada\">"), "{html}");
        assert!(html.contains("</head>"), "{html}");
        assert!(html.contains("<body style=\"margin: 0\"><p>x</p></body>"), "{html}");
        assert!(html.ends_with("</html>"), "{html}");
        assert!(!html.contains("lazypress-"), "{html}");
        assert!(!html.contains("onload"));
        assert!(!html.contains("script"));
        assert_eq!(sanitizer.clean(&html), html);
    }

    #[test]
    fn byte_input_is_cleaned_like_text() {
        let sanitizer = Sanitizer::new();
        assert_eq!(
            sanitizer.clean_bytes(b"<b>bold</b><script>x</script>"),
            b"<b>bold</b>".to_vec()
        );
    }
}
