//! Pipeline entry point: upload bytes in, PDF bytes or a structured error out.

use std::time::Instant;

use tracing::{info, instrument};

use crate::config::Config;
use crate::error::Result;
use crate::merge::Merger;
use crate::model::Message;
use crate::parser::{Normalizer, Source};
use crate::render::Renderer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvertOptions {
    /// Append PDF (and unreferenced image) attachments as extra pages.
    pub merge_attachments: bool,
}

/// One conversion request. Everything it carries is owned by the request.
#[derive(Debug, Clone)]
pub struct ConvertRequest {
    pub file_bytes: Vec<u8>,
    /// Declared filename; its extension selects the container format.
    pub filename: String,
    pub options: ConvertOptions,
}

impl ConvertRequest {
    pub fn new(file_bytes: Vec<u8>, filename: impl Into<String>, options: ConvertOptions) -> Self {
        Self {
            file_bytes,
            filename: filename.into(),
            options,
        }
    }
}

/// Normalizer, renderer and merger built once and shared by all requests.
///
/// Holds no per-request state, so `&Converter` may be used from many
/// threads at once.
pub struct Converter {
    normalizer: Normalizer,
    renderer: Renderer,
    merger: Merger,
}

impl Converter {
    pub fn new(normalizer: Normalizer, renderer: Renderer, merger: Merger) -> Self {
        Self {
            normalizer,
            renderer,
            merger,
        }
    }

    /// Build every stage from configuration. Fails only when no usable font
    /// can be loaded.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            Normalizer::from_config(&config.msg),
            Renderer::from_config(&config.render)?,
            Merger::from_config(&config.merge, &config.render),
        ))
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Decode an upload without rendering it.
    pub fn normalize(&self, bytes: &[u8], filename: &str) -> Result<(Message, Source)> {
        self.normalizer.normalize_with_source(bytes, filename)
    }

    /// Normalize, render, then merge attachments when requested.
    #[instrument(skip_all, fields(filename = %request.filename, size = request.file_bytes.len()))]
    pub fn convert(&self, request: &ConvertRequest) -> Result<Vec<u8>> {
        let started = Instant::now();
        let message = self
            .normalizer
            .normalize(&request.file_bytes, &request.filename)?;
        let rendered = self.renderer.render(&message)?;
        let bytes = self.merger.merge(
            &rendered.bytes,
            &message.attachments,
            &rendered.consumed_content_ids,
            request.options.merge_attachments,
        )?;
        info!(
            pages = rendered.page_count,
            attachments = message.attachments.len(),
            bytes = bytes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Converted"
        );
        Ok(bytes)
    }
}
