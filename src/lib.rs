//! `mailpdf` renders `.eml` and Outlook `.msg` messages into one archival PDF.
//!
//! The pipeline runs leaf-first: the [`parser`] normalizes either container
//! into a [`model::Message`], the [`tokenize`] module splits its HTML body
//! into text runs and inline images, the [`render`] module lays everything
//! out and writes the PDF, and [`merge`] optionally appends attachments.
//! [`convert::Converter`] wires the stages together.

pub mod config;
pub mod convert;
pub mod eml;
pub mod error;
pub mod merge;
pub mod model;
pub mod parser;
pub mod render;
pub mod sanitize;
pub mod tokenize;
