use async_trait::async_trait;
use medialib_core::models::TransformationOutput;
use medialib_core::JobError;

use super::render_image;
use crate::image::ResizeOptions;
use crate::transformer::{TransformContext, Transformer};

/// Image resize/crop. Keeps the source format where it can be encoded.
pub struct ResizeTransformer;

#[async_trait]
impl Transformer for ResizeTransformer {
    fn id(&self) -> &'static str {
        "resize"
    }

    #[tracing::instrument(skip(self, ctx), fields(file_id = %ctx.file.id, transformation = %ctx.name))]
    async fn transform(&self, ctx: &TransformContext) -> Result<Option<TransformationOutput>, JobError> {
        let options: ResizeOptions = ctx.config()?;
        let original = ctx.read_original().await?;

        let Some(rendered) = render_image(original, options, ctx.file.mime_type.clone()).await? else {
            return Ok(None);
        };

        // Same format as the source keeps the source's spelling (jpeg vs jpg).
        let extension = if rendered.mime_type == ctx.file.mime_type {
            ctx.file.extension.clone()
        } else {
            rendered.extension.clone()
        };

        let output = ctx
            .store(
                &ctx.name,
                ctx.output_name(),
                ctx.file.file_type,
                &extension,
                &rendered.mime_type,
                rendered.data.clone(),
                Some((rendered.width, rendered.height)),
            )
            .await?;

        Ok(Some(output))
    }
}
