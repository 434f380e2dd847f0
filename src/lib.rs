//! HTML to PDF conversion: print-option mapping, sanitization, output sink
//! selection and headless browser rendering behind an HTTP and CLI front.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
