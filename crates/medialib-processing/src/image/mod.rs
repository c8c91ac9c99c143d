//! Image processing module
//!
//! - Decoding, encoding and header metadata (processor)
//! - Fit and resize strategies (resize)

pub mod processor;
pub mod resize;

pub use processor::{ImageProcessor, RenderedImage};
pub use resize::{ImageResize, ResizeOptions, Size};
