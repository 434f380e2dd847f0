//! Conversion services: parameter mapping, sanitization, sink selection and
//! rendering.

pub mod convert;
pub mod error;
pub mod mapping;
pub mod render;
pub mod sanitize;
pub mod sink;
