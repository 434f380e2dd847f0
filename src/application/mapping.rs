//! Maps flat, string-keyed request parameters onto [`PrintSettings`].
//!
//! The set of recognised keys is fixed by [`FIELDS`]; keys that are not in the
//! table are ignored. Population stops at the first value that cannot be
//! coerced, and whatever was applied before that point stays applied, so a
//! caller that sees an error must fall back to [`PrintSettings::default`].

use std::collections::HashMap;

use thiserror::Error;

use crate::domain::print::{Margins, PrintSettings};

/// Sink selector key (`file`, `download`, `s3`, `email`).
pub const OUTPUT_KEY: &str = "output";
/// Base name hint for file sinks.
pub const FILENAME_KEY: &str = "filename";
/// Enables sanitization of the body and header/footer templates.
pub const SANITIZE_KEY: &str = "sanitize";

#[derive(Debug, Error)]
#[error("invalid value `{value}` for `{key}`: {reason}")]
pub struct MappingError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Boolean,
    Float,
    Structured,
}

enum Setter {
    Text(fn(&mut PrintSettings, String)),
    Integer(fn(&mut PrintSettings, i64) -> Result<(), String>),
    Boolean(fn(&mut PrintSettings, bool)),
    Float(fn(&mut PrintSettings, f64)),
    Structured(fn(&mut PrintSettings, &str) -> Result<(), String>),
}

impl Setter {
    fn kind(&self) -> FieldKind {
        match self {
            Setter::Text(_) => FieldKind::Text,
            Setter::Integer(_) => FieldKind::Integer,
            Setter::Boolean(_) => FieldKind::Boolean,
            Setter::Float(_) => FieldKind::Float,
            Setter::Structured(_) => FieldKind::Structured,
        }
    }
}

struct Field {
    key: &'static str,
    setter: Setter,
}

const FIELDS: &[Field] = &[
    Field {
        key: "landscape",
        setter: Setter::Boolean(|s, v| s.landscape = Some(v)),
    },
    Field {
        key: "displayHeaderFooter",
        setter: Setter::Boolean(|s, v| s.display_header_footer = Some(v)),
    },
    Field {
        key: "printBackground",
        setter: Setter::Boolean(|s, v| s.print_background = Some(v)),
    },
    Field {
        key: "scale",
        setter: Setter::Float(|s, v| s.scale = Some(v)),
    },
    Field {
        key: "paperWidth",
        setter: Setter::Float(|s, v| s.paper_width = Some(v)),
    },
    Field {
        key: "paperHeight",
        setter: Setter::Float(|s, v| s.paper_height = Some(v)),
    },
    Field {
        key: "marginTop",
        setter: Setter::Float(|s, v| s.margin_top = Some(v)),
    },
    Field {
        key: "marginBottom",
        setter: Setter::Float(|s, v| s.margin_bottom = Some(v)),
    },
    Field {
        key: "marginLeft",
        setter: Setter::Float(|s, v| s.margin_left = Some(v)),
    },
    Field {
        key: "marginRight",
        setter: Setter::Float(|s, v| s.margin_right = Some(v)),
    },
    Field {
        key: "margins",
        setter: Setter::Structured(|s, raw| {
            let margins: Margins = serde_json::from_str(raw).map_err(|err| err.to_string())?;
            s.apply_margins(margins);
            Ok(())
        }),
    },
    Field {
        key: "pageRanges",
        setter: Setter::Text(|s, v| s.page_ranges = Some(v)),
    },
    Field {
        key: "headerTemplate",
        setter: Setter::Text(|s, v| s.header_template = Some(v)),
    },
    Field {
        key: "footerTemplate",
        setter: Setter::Text(|s, v| s.footer_template = Some(v)),
    },
    Field {
        key: "preferCSSPageSize",
        setter: Setter::Boolean(|s, v| s.prefer_css_page_size = Some(v)),
    },
    Field {
        key: "viewportWidth",
        setter: Setter::Integer(|s, v| {
            s.viewport.width = viewport_dimension(v)?;
            Ok(())
        }),
    },
    Field {
        key: "viewportHeight",
        setter: Setter::Integer(|s, v| {
            s.viewport.height = viewport_dimension(v)?;
            Ok(())
        }),
    },
];

/// Apply every recognised key of `params` to `target`.
pub fn populate(
    params: &HashMap<String, String>,
    target: &mut PrintSettings,
) -> Result<(), MappingError> {
    for field in FIELDS {
        let Some(raw) = params.get(field.key) else {
            continue;
        };
        let fail = |reason: String| MappingError {
            key: field.key,
            value: raw.clone(),
            reason,
        };

        match &field.setter {
            Setter::Text(set) => set(target, raw.clone()),
            Setter::Integer(set) => {
                let value = raw
                    .parse::<i64>()
                    .map_err(|err| fail(format!("expected an integer: {err}")))?;
                set(target, value).map_err(fail)?;
            }
            Setter::Boolean(set) => set(target, parse_bool(raw).map_err(fail)?),
            Setter::Float(set) => set(target, parse_float(raw).map_err(fail)?),
            Setter::Structured(set) => set(target, raw).map_err(fail)?,
        }
    }

    Ok(())
}

/// Kind of the field registered under `key`, if any.
pub fn field_kind(key: &str) -> Option<FieldKind> {
    FIELDS
        .iter()
        .find(|field| field.key == key)
        .map(|field| field.setter.kind())
}

/// `true`/`false`, ignoring ASCII case.
pub fn parse_bool(raw: &str) -> Result<bool, String> {
    if raw.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if raw.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err("expected `true` or `false`".to_string())
    }
}

fn parse_float(raw: &str) -> Result<f64, String> {
    let value = raw
        .parse::<f64>()
        .map_err(|err| format!("expected a decimal number: {err}"))?;
    if !value.is_finite() {
        return Err("number must be finite".to_string());
    }
    Ok(value)
}

fn viewport_dimension(value: i64) -> Result<u32, String> {
    match u32::try_from(value) {
        Ok(0) | Err(_) => Err("must be a positive 32-bit integer".to_string()),
        Ok(dimension) => Ok(dimension),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::print::Viewport;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn loads_every_print_option() {
        let params = params(&[
            ("landscape", "true"),
            ("displayHeaderFooter", "true"),
            ("printBackground", "true"),
            ("scale", "2"),
            ("paperWidth", "8.5"),
            ("paperHeight", "11"),
            ("marginTop", "1"),
            ("marginBottom", "1"),
            ("marginLeft", "1"),
            ("marginRight", "1"),
            ("pageRanges", "1-5, 8, 11-13"),
            ("headerTemplate", "<span class=title></span>"),
            ("footerTemplate", "<span class=date></span>"),
            ("preferCSSPageSize", "true"),
        ]);
        let mut settings = PrintSettings::default();

        populate(&params, &mut settings).expect("all values are valid");

        assert_eq!(settings.landscape, Some(true));
        assert_eq!(settings.display_header_footer, Some(true));
        assert_eq!(settings.print_background, Some(true));
        assert_eq!(settings.scale, Some(2.0));
        assert_eq!(settings.paper_width, Some(8.5));
        assert_eq!(settings.paper_height, Some(11.0));
        assert_eq!(settings.margin_top, Some(1.0));
        assert_eq!(settings.margin_bottom, Some(1.0));
        assert_eq!(settings.margin_left, Some(1.0));
        assert_eq!(settings.margin_right, Some(1.0));
        assert_eq!(settings.page_ranges.as_deref(), Some("1-5, 8, 11-13"));
        assert_eq!(
            settings.header_template.as_deref(),
            Some("<span class=title></span>")
        );
        assert_eq!(
            settings.footer_template.as_deref(),
            Some("<span class=date></span>")
        );
        assert_eq!(settings.prefer_css_page_size, Some(true));
    }

    #[test]
    fn unknown_and_directive_keys_are_ignored() {
        let params = params(&[
            ("output", "file"),
            ("filename", "report"),
            ("sanitize", "true"),
            ("colour", "blue"),
        ]);
        let mut settings = PrintSettings::default();

        populate(&params, &mut settings).expect("nothing to coerce");
        assert_eq!(settings, PrintSettings::default());
    }

    #[test]
    fn booleans_ignore_case() {
        let mut settings = PrintSettings::default();
        populate(
            &params(&[("landscape", "TRUE"), ("printBackground", "False")]),
            &mut settings,
        )
        .expect("case-insensitive booleans");

        assert_eq!(settings.landscape, Some(true));
        assert_eq!(settings.print_background, Some(false));
    }

    #[test]
    fn bad_value_reports_key_and_value() {
        let mut settings = PrintSettings::default();
        let err = populate(&params(&[("scale", "big")]), &mut settings)
            .expect_err("scale is not a number");

        assert_eq!(err.key, "scale");
        assert_eq!(err.value, "big");
    }

    #[test]
    fn failure_leaves_earlier_fields_applied() {
        let mut settings = PrintSettings::default();
        let result = populate(
            &params(&[("landscape", "true"), ("scale", "nope")]),
            &mut settings,
        );

        assert!(result.is_err());
        assert_eq!(settings.landscape, Some(true));
    }

    #[test]
    fn non_finite_floats_are_rejected() {
        let mut settings = PrintSettings::default();
        assert!(populate(&params(&[("paperWidth", "inf")]), &mut settings).is_err());
        assert!(populate(&params(&[("paperWidth", "NaN")]), &mut settings).is_err());
    }

    #[test]
    fn viewport_accepts_positive_integers_only() {
        let mut settings = PrintSettings::default();
        populate(
            &params(&[("viewportWidth", "1280"), ("viewportHeight", "720")]),
            &mut settings,
        )
        .expect("valid viewport");
        assert_eq!(
            settings.viewport,
            Viewport {
                width: 1280,
                height: 720
            }
        );

        for bad in ["0", "-4", "12.5", "99999999999"] {
            let mut settings = PrintSettings::default();
            assert!(
                populate(&params(&[("viewportWidth", bad)]), &mut settings).is_err(),
                "`{bad}` should be rejected"
            );
        }
    }

    #[test]
    fn margins_parse_from_embedded_json() {
        let mut settings = PrintSettings::default();
        populate(
            &params(&[("margins", r#"{"top": 0.5, "right": 0.25}"#)]),
            &mut settings,
        )
        .expect("valid margins");

        assert_eq!(settings.margin_top, Some(0.5));
        assert_eq!(settings.margin_right, Some(0.25));
        assert_eq!(settings.margin_bottom, None);

        let err = populate(&params(&[("margins", "{\"top\": ")]), &mut settings)
            .expect_err("truncated json");
        assert_eq!(err.key, "margins");
    }

    #[test]
    fn field_table_covers_each_kind() {
        assert_eq!(field_kind("pageRanges"), Some(FieldKind::Text));
        assert_eq!(field_kind("viewportWidth"), Some(FieldKind::Integer));
        assert_eq!(field_kind("landscape"), Some(FieldKind::Boolean));
        assert_eq!(field_kind("scale"), Some(FieldKind::Float));
        assert_eq!(field_kind("margins"), Some(FieldKind::Structured));
        assert_eq!(field_kind("output"), None);
    }
}
