use image::{DynamicImage, GenericImageView};
use serde::Deserialize;

/// Target box, either side optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Size {
    #[serde(default)]
    pub w: Option<u32>,
    #[serde(default)]
    pub h: Option<u32>,
}

fn yes() -> bool {
    true
}

/// Resize settings read from a descriptor's `config`.
///
/// `fit` crops to exactly fill the box (anchored at the top), otherwise the
/// image is scaled, keeping its aspect ratio unless `aspect` is false.
/// `upsize: false` never enlarges the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ResizeOptions {
    #[serde(default)]
    pub size: Size,
    #[serde(default)]
    pub fit: bool,
    #[serde(default = "yes")]
    pub aspect: bool,
    #[serde(default = "yes")]
    pub upsize: bool,
}

impl Default for ResizeOptions {
    fn default() -> Self {
        Self {
            size: Size::default(),
            fit: false,
            aspect: true,
            upsize: true,
        }
    }
}

/// Region of the source kept by a fit: `(x, y, width, height)`.
type CropRegion = (u32, u32, u32, u32);

/// Image resize operations
pub struct ImageResize;

impl ImageResize {
    /// Output dimensions of a plain resize.
    pub fn calculate_dimensions(orig_width: u32, orig_height: u32, options: &ResizeOptions) -> (u32, u32) {
        let (w, h) = (options.size.w, options.size.h);
        if w.is_none() && h.is_none() {
            return (orig_width, orig_height);
        }

        if !options.aspect {
            let mut width = w.unwrap_or(orig_width);
            let mut height = h.unwrap_or(orig_height);
            if !options.upsize {
                width = width.min(orig_width);
                height = height.min(orig_height);
            }
            return (width.max(1), height.max(1));
        }

        let width_scale = w.map(|w| w as f32 / orig_width as f32);
        let height_scale = h.map(|h| h as f32 / orig_height as f32);
        let mut scale = match (width_scale, height_scale) {
            (Some(ws), Some(hs)) => ws.min(hs),
            (Some(ws), None) => ws,
            (None, Some(hs)) => hs,
            (None, None) => 1.0,
        };
        if !options.upsize {
            scale = scale.min(1.0);
        }

        let width = (orig_width as f32 * scale).round() as u32;
        let height = (orig_height as f32 * scale).round() as u32;
        (width.max(1), height.max(1))
    }

    /// Crop region and output dimensions of a fit.
    ///
    /// A missing side takes the value of the other one (square box). The
    /// crop keeps the widest region with the box's aspect ratio, centered
    /// horizontally and anchored to the top edge.
    pub fn calculate_fit(
        orig_width: u32,
        orig_height: u32,
        options: &ResizeOptions,
    ) -> (CropRegion, (u32, u32)) {
        let (box_width, box_height) = match (options.size.w, options.size.h) {
            (Some(w), Some(h)) => (w, h),
            (Some(w), None) => (w, w),
            (None, Some(h)) => (h, h),
            (None, None) => return ((0, 0, orig_width, orig_height), (orig_width, orig_height)),
        };
        let (box_width, box_height) = (box_width.max(1), box_height.max(1));

        let target_ratio = box_width as f32 / box_height as f32;
        let source_ratio = orig_width as f32 / orig_height as f32;
        let crop = if source_ratio > target_ratio {
            let crop_width = ((orig_height as f32 * target_ratio).round() as u32).clamp(1, orig_width);
            ((orig_width - crop_width) / 2, 0, crop_width, orig_height)
        } else {
            let crop_height = ((orig_width as f32 / target_ratio).round() as u32).clamp(1, orig_height);
            (0, 0, orig_width, crop_height)
        };

        let output = if !options.upsize && (box_width > crop.2 || box_height > crop.3) {
            (crop.2, crop.3)
        } else {
            (box_width, box_height)
        };

        (crop, output)
    }

    /// Select appropriate filter type based on resize ratio
    pub fn select_filter(
        orig_width: u32,
        orig_height: u32,
        new_width: u32,
        new_height: u32,
    ) -> image::imageops::FilterType {
        let width_ratio = orig_width as f32 / new_width as f32;
        let height_ratio = orig_height as f32 / new_height as f32;
        let max_ratio = width_ratio.max(height_ratio);

        if max_ratio > 2.0 {
            image::imageops::FilterType::Triangle
        } else if max_ratio > 1.5 {
            image::imageops::FilterType::CatmullRom
        } else {
            image::imageops::FilterType::Lanczos3
        }
    }

    /// Resize image to exact dimensions
    pub fn resize_image(img: &DynamicImage, width: u32, height: u32) -> DynamicImage {
        let (orig_width, orig_height) = img.dimensions();
        if (orig_width, orig_height) == (width, height) {
            return img.clone();
        }
        let filter = Self::select_filter(orig_width, orig_height, width, height);
        img.resize_exact(width, height, filter)
    }

    /// Apply `options` to an image.
    pub fn apply(img: &DynamicImage, options: &ResizeOptions) -> DynamicImage {
        let (orig_width, orig_height) = img.dimensions();

        if options.fit {
            let ((x, y, crop_width, crop_height), (width, height)) =
                Self::calculate_fit(orig_width, orig_height, options);
            let cropped = img.crop_imm(x, y, crop_width, crop_height);
            Self::resize_image(&cropped, width, height)
        } else {
            let (width, height) = Self::calculate_dimensions(orig_width, orig_height, options);
            Self::resize_image(img, width, height)
        }
    }
}
