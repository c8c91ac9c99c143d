//! Medialib Processing Library
//!
//! Transformers producing derivatives of uploaded files: image resizing,
//! document first-page previews and video transcoding. Documents and videos
//! are handed to an external conversion service.

pub mod conversion;
pub mod image;
pub mod transformer;
pub mod transformers;

pub use conversion::{
    CloudConvertClient, ConversionError, ConversionMode, ConversionOutput, ConversionRequest,
    ConversionService, StreamInfo,
};
pub use transformer::{TransformContext, TransformationSink, Transformer, TransformerRegistry};
pub use transformers::{DocumentTransformer, ResizeTransformer, VideoOptions, VideoTransformer};
