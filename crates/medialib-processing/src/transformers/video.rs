use async_trait::async_trait;
use medialib_core::constants::{PREVIEW_EXTENSION, PREVIEW_NAME, THUMB_NAME};
use medialib_core::models::{File, TransformationOutput};
use medialib_core::{FileType, JobError};
use serde::Deserialize;
use std::sync::Arc;

use super::{render_image, sniff_mime};
use crate::conversion::{ConversionError, ConversionOutput, ConversionRequest, ConversionService, StreamInfo};
use crate::image::{ImageProcessor, ResizeOptions, Size};
use crate::transformer::{missing_conversion_service, TransformContext, Transformer};

fn mp4() -> String {
    "mp4".to_string()
}

fn h264() -> String {
    "h264".to_string()
}

fn hd_resolution() -> String {
    "1280x720".to_string()
}

fn aac() -> String {
    "aac".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoStreamOptions {
    #[serde(default = "h264")]
    pub codec: String,
    /// `{width}x{height}`
    #[serde(default = "hd_resolution")]
    pub resolution: String,
}

impl Default for VideoStreamOptions {
    fn default() -> Self {
        Self {
            codec: h264(),
            resolution: hd_resolution(),
        }
    }
}

impl VideoStreamOptions {
    fn dimensions(&self) -> Option<(u32, u32)> {
        let (w, h) = self.resolution.split_once('x')?;
        Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioStreamOptions {
    #[serde(default = "aac")]
    pub codec: String,
}

impl Default for AudioStreamOptions {
    fn default() -> Self {
        Self { codec: aac() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreviewOptions {
    #[serde(default = "preview_size")]
    pub size: Size,
}

fn preview_size() -> Size {
    Size {
        w: Some(1280),
        h: None,
    }
}

impl Default for PreviewOptions {
    fn default() -> Self {
        Self { size: preview_size() }
    }
}

/// Target encoding of the video transformer.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoOptions {
    #[serde(default = "mp4")]
    pub extension: String,
    #[serde(default)]
    pub video: VideoStreamOptions,
    #[serde(default)]
    pub audio: AudioStreamOptions,
    #[serde(default)]
    pub preview: PreviewOptions,
    #[serde(default)]
    pub thumb: ResizeOptions,
}

impl Default for VideoOptions {
    fn default() -> Self {
        Self {
            extension: mp4(),
            video: VideoStreamOptions::default(),
            audio: AudioStreamOptions::default(),
            preview: PreviewOptions::default(),
            thumb: ResizeOptions::default(),
        }
    }
}

/// Conversion of `file` into the target encoding. Streams that already match
/// the target codec (and, for video, resolution) are copied, not re-encoded.
pub fn build_transcode_request(
    file: &File,
    source_url: &str,
    options: &VideoOptions,
    streams: &[StreamInfo],
) -> ConversionRequest {
    let video_codec = options.video.codec.to_lowercase();
    let audio_codec = options.audio.codec.to_lowercase();

    let mut request = ConversionRequest::convert(file.extension.as_str(), options.extension.as_str(), source_url)
        .option("video_codec", "copy")
        .option("audio_codec", "copy")
        .option("faststart", true);

    let video_compatible = streams.iter().any(|stream| {
        stream.codec_type == "video"
            && stream.codec_name == video_codec
            && stream.resolution().as_deref() == Some(options.video.resolution.as_str())
    });
    if !video_compatible {
        request = request
            .option("video_codec", video_codec)
            .option("video_resolution", options.video.resolution.as_str());
    }

    let audio_compatible = streams
        .iter()
        .any(|stream| stream.codec_type == "audio" && stream.codec_name == audio_codec);
    if !audio_compatible {
        request = request.option("audio_codec", audio_codec);
    }

    request
}

/// Transcodes video through the conversion service. A probe first yields the
/// stream layout and a preview frame, from which `preview` and `thumb` are
/// stored alongside the main output.
pub struct VideoTransformer {
    conversion: Option<Arc<dyn ConversionService>>,
}

impl VideoTransformer {
    pub fn new(conversion: Option<Arc<dyn ConversionService>>) -> Self {
        Self { conversion }
    }
}

/// `Ok(None)` when the service rejected the input.
fn accept(result: Result<ConversionOutput, ConversionError>) -> Result<Option<ConversionOutput>, JobError> {
    match result {
        Ok(output) => Ok(Some(output)),
        Err(e) if e.is_rejected() => {
            tracing::warn!(error = %e, "Video cannot be converted, skipping");
            Ok(None)
        }
        Err(e) => Err(e.into_job_error()),
    }
}

#[async_trait]
impl Transformer for VideoTransformer {
    fn id(&self) -> &'static str {
        "video"
    }

    #[tracing::instrument(skip(self, ctx), fields(file_id = %ctx.file.id, transformation = %ctx.name))]
    async fn transform(&self, ctx: &TransformContext) -> Result<Option<TransformationOutput>, JobError> {
        let conversion = self
            .conversion
            .as_ref()
            .ok_or_else(|| missing_conversion_service(self.id()))?;
        let options: VideoOptions = ctx.config()?;
        let source_url = ctx.require_source_url()?;

        let preview_width = options.preview.size.w.unwrap_or(1280);
        let probe = ConversionRequest::info(ctx.file.extension.as_str(), source_url)
            .option("thumbnail_format", PREVIEW_EXTENSION)
            .option("thumbnail_size", format!("{}x", preview_width));
        let Some(probe) = accept(conversion.convert(&probe).await)? else {
            return Ok(None);
        };
        let streams = probe
            .info
            .as_ref()
            .map(StreamInfo::from_info)
            .unwrap_or_default();

        let frame_mime = sniff_mime(&probe.data, "image/jpeg");
        let preview = ctx
            .store(
                PREVIEW_NAME,
                PREVIEW_NAME,
                FileType::Image,
                PREVIEW_EXTENSION,
                &frame_mime,
                probe.data.clone(),
                ImageProcessor::get_dimensions(&probe.data),
            )
            .await?;

        let thumb = match render_image(probe.data, options.thumb, frame_mime).await? {
            Some(rendered) => Some(
                ctx.store(
                    THUMB_NAME,
                    THUMB_NAME,
                    FileType::Image,
                    &rendered.extension,
                    &rendered.mime_type,
                    rendered.data,
                    Some((rendered.width, rendered.height)),
                )
                .await?,
            ),
            None => None,
        };

        let request = build_transcode_request(&ctx.file, source_url, &options, &streams);
        tracing::debug!(options = ?request.converter_options, "Transcoding video");
        let Some(converted) = accept(conversion.convert(&request).await)? else {
            return Ok(None);
        };

        let fallback_mime = format!("video/{}", options.extension);
        let mime_type = sniff_mime(&converted.data, &fallback_mime);
        let output = ctx
            .store(
                &ctx.name,
                ctx.output_name(),
                ctx.file.file_type,
                &options.extension,
                &mime_type,
                converted.data,
                options.video.dimensions(),
            )
            .await?;

        if let Some(thumb) = thumb {
            ctx.record(thumb).await?;
        }
        ctx.record(preview).await?;

        Ok(Some(output))
    }
}
