//! Built-in transformers.

mod document;
mod resize;
mod video;

pub use document::DocumentTransformer;
pub use resize::ResizeTransformer;
pub use video::{build_transcode_request, VideoOptions, VideoTransformer};

use bytes::Bytes;
use medialib_core::JobError;
use std::sync::Arc;

use crate::conversion::ConversionService;
use crate::image::{ImageProcessor, RenderedImage, ResizeOptions};
use crate::transformer::TransformerRegistry;

impl TransformerRegistry {
    /// Registry with `resize`, `document` and `video`. Without a conversion
    /// service the latter two fail their jobs as misconfigured.
    pub fn with_defaults(conversion: Option<Arc<dyn ConversionService>>) -> Self {
        TransformerRegistry::new()
            .with(Arc::new(ResizeTransformer))
            .with(Arc::new(DocumentTransformer::new(conversion.clone())))
            .with(Arc::new(VideoTransformer::new(conversion)))
    }
}

/// Resize off the async runtime. `Ok(None)` when `data` does not decode.
async fn render_image(
    data: Bytes,
    options: ResizeOptions,
    mime_type: String,
) -> Result<Option<RenderedImage>, JobError> {
    let rendered = tokio::task::spawn_blocking(move || {
        ImageProcessor::render(&data, &options, &mime_type)
    })
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "Failed to spawn blocking task");
        JobError::transient(e)
    })?;

    match rendered {
        Ok(rendered) => Ok(Some(rendered)),
        Err(e) => {
            tracing::warn!(error = %e, "Image could not be decoded");
            Ok(None)
        }
    }
}

/// MIME type sniffed from content, `fallback` when unknown.
fn sniff_mime(data: &[u8], fallback: &str) -> String {
    infer::get(data)
        .map(|kind| kind.mime_type().to_string())
        .unwrap_or_else(|| fallback.to_string())
}
