use async_trait::async_trait;
use medialib_core::constants::{PREVIEW_NAME, THUMB_NAME};
use medialib_core::models::TransformationOutput;
use medialib_core::{FileType, JobError};
use serde::Deserialize;
use std::sync::Arc;

use super::{render_image, sniff_mime};
use crate::conversion::{ConversionRequest, ConversionService};
use crate::image::{ImageProcessor, ResizeOptions};
use crate::transformer::{missing_conversion_service, TransformContext, Transformer};

fn jpg() -> String {
    "jpg".to_string()
}

#[derive(Debug, Deserialize)]
struct DocumentOptions {
    /// Format of the rendered first page.
    #[serde(default = "jpg")]
    extension: String,
    #[serde(flatten)]
    thumb: ResizeOptions,
}

/// Renders the first page of a document through the conversion service,
/// stores it as `preview` and derives the `thumb` from it.
pub struct DocumentTransformer {
    conversion: Option<Arc<dyn ConversionService>>,
}

impl DocumentTransformer {
    pub fn new(conversion: Option<Arc<dyn ConversionService>>) -> Self {
        Self { conversion }
    }
}

#[async_trait]
impl Transformer for DocumentTransformer {
    fn id(&self) -> &'static str {
        "document"
    }

    #[tracing::instrument(skip(self, ctx), fields(file_id = %ctx.file.id, transformation = %ctx.name))]
    async fn transform(&self, ctx: &TransformContext) -> Result<Option<TransformationOutput>, JobError> {
        let conversion = self
            .conversion
            .as_ref()
            .ok_or_else(|| missing_conversion_service(self.id()))?;
        let options: DocumentOptions = ctx.config()?;

        let request = ConversionRequest::convert(
            ctx.file.extension.as_str(),
            options.extension.as_str(),
            ctx.require_source_url()?,
        )
        .option("page_range", "1-1");

        let page = match conversion.convert(&request).await {
            Ok(output) => output.data,
            Err(e) if e.is_rejected() => {
                tracing::warn!(error = %e, "Document cannot be rendered, skipping");
                return Ok(None);
            }
            Err(e) => return Err(e.into_job_error()),
        };

        let page_mime = sniff_mime(&page, "image/jpeg");
        let preview = ctx
            .store(
                PREVIEW_NAME,
                PREVIEW_NAME,
                FileType::Image,
                &options.extension,
                &page_mime,
                page.clone(),
                ImageProcessor::get_dimensions(&page),
            )
            .await?;
        ctx.record(preview).await?;

        let Some(thumb) = render_image(page, options.thumb, page_mime).await? else {
            tracing::warn!(
                file_id = %ctx.file.id,
                "Partial result: preview stored but the page could not be thumbnailed"
            );
            return Ok(None);
        };

        let output = ctx
            .store(
                THUMB_NAME,
                THUMB_NAME,
                FileType::Image,
                &thumb.extension,
                &thumb.mime_type,
                thumb.data,
                Some((thumb.width, thumb.height)),
            )
            .await?;

        Ok(Some(output))
    }
}
