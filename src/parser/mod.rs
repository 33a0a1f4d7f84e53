//! Email parsing: message sources and MIME handling.

pub mod eml;
pub mod mime;
