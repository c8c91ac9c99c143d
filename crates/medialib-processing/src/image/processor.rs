//! Image decoding, encoding and metadata.

use bytes::Bytes;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader};
use std::io::Cursor;

use super::resize::{ImageResize, ResizeOptions};

/// An encoded image together with what was measured while producing it.
#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
    pub extension: String,
}

pub struct ImageProcessor;

impl ImageProcessor {
    pub fn decode(data: &[u8]) -> Result<DynamicImage, anyhow::Error> {
        let cursor = Cursor::new(data);
        let img = ImageReader::new(cursor).with_guessed_format()?.decode()?;
        Ok(img)
    }

    /// Width and height read from the header, without decoding pixels.
    pub fn get_dimensions(data: &[u8]) -> Option<(u32, u32)> {
        let cursor = Cursor::new(data);
        let reader = ImageReader::new(cursor).with_guessed_format().ok()?;
        reader.into_dimensions().ok()
    }

    /// Detect image format from content type
    pub fn detect_format(content_type: &str) -> ImageFormat {
        match content_type {
            "image/jpeg" | "image/jpg" => ImageFormat::Jpeg,
            "image/png" => ImageFormat::Png,
            "image/gif" => ImageFormat::Gif,
            "image/webp" => ImageFormat::WebP,
            "image/x-icon" | "image/vnd.microsoft.icon" => ImageFormat::Ico,
            _ => ImageFormat::Jpeg,
        }
    }

    pub fn encode(img: &DynamicImage, format: ImageFormat) -> Result<Bytes, anyhow::Error> {
        // JPEG has no alpha channel
        let img = if format == ImageFormat::Jpeg {
            DynamicImage::ImageRgb8(img.to_rgb8())
        } else {
            img.clone()
        };

        let (width, height) = img.dimensions();
        let mut buffer = Vec::with_capacity((width * height * 3) as usize);
        img.write_to(&mut Cursor::new(&mut buffer), format)?;
        Ok(Bytes::from(buffer))
    }

    /// Resize encoded `data` and re-encode it as `mime_type`.
    pub fn render(
        data: &[u8],
        options: &ResizeOptions,
        mime_type: &str,
    ) -> Result<RenderedImage, anyhow::Error> {
        let img = Self::decode(data)?;
        let resized = ImageResize::apply(&img, options);
        let (width, height) = resized.dimensions();
        let format = Self::detect_format(mime_type);
        let encoded = Self::encode(&resized, format)?;

        Ok(RenderedImage {
            data: encoded,
            width,
            height,
            mime_type: format.to_mime_type().to_string(),
            extension: format
                .extensions_str()
                .first()
                .copied()
                .unwrap_or("jpg")
                .to_string(),
        })
    }
}

#[cfg(test)]
pub(crate) mod test_images {
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    pub fn png(width: u32, height: u32) -> Vec<u8> {
        encoded(width, height, ImageFormat::Png)
    }

    pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = image::DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            Rgba([10, 120, 200, 255]),
        ));
        let mut buffer = Vec::new();
        image::DynamicImage::ImageRgb8(img.to_rgb8())
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Jpeg)
            .unwrap();
        buffer
    }

    fn encoded(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([255, 0, 0, 255]));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), format).unwrap();
        buffer
    }
}
