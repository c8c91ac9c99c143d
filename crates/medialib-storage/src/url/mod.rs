//! URL generation for stored files and their transformations.
//!
//! A generator is picked per disk through the [`UrlGeneratorRegistry`] by the
//! disk's `url_generator` id. Direct generators (`public`, `s3`, `azure`) build
//! plain object URLs and cannot force a download; only `s3_presigned` can.

mod direct;
#[cfg(feature = "storage-s3")]
mod presigned;
mod registry;

use async_trait::async_trait;
use medialib_core::constants::{PREVIEW_EXTENSION, PREVIEW_NAME, UPLOAD_NAME};
use medialib_core::models::{File, Transformation};
use medialib_core::FileType;
use thiserror::Error;

pub use direct::DirectUrlGenerator;
#[cfg(feature = "storage-s3")]
pub use presigned::{AwsPresigner, PresignGet, PresignRequest, S3PresignedUrlGenerator};
pub use registry::{UrlGeneratorConstructor, UrlGeneratorFuture, UrlGeneratorRegistry};

#[derive(Debug, Error)]
pub enum UrlError {
    /// The generator cannot express the request (e.g. forced download on a
    /// public URL). Never answered with a degraded URL.
    #[error("Unsupported URL operation: {0}")]
    Unsupported(String),

    #[error("Unknown URL generator: {0}")]
    UnknownGenerator(String),

    #[error("URL generator configuration error: {0}")]
    Config(String),

    #[error("URL signing failed: {0}")]
    Signing(String),
}

#[async_trait]
pub trait UrlGenerator: Send + Sync {
    /// URL of the file's canonical object, or of `transformation` when given.
    ///
    /// `full_preview` swaps a non-image original for its `preview.jpg`;
    /// `download` asks for a URL that forces a save-as with a readable name.
    async fn url_for(
        &self,
        file: &File,
        transformation: Option<&Transformation>,
        full_preview: bool,
        download: bool,
    ) -> Result<String, UrlError>;
}

/// The stored object a URL points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub key: String,
    pub name: String,
    pub extension: String,
    pub mime_type: String,
}

impl ObjectRef {
    pub fn resolve(file: &File, transformation: Option<&Transformation>, full_preview: bool) -> Self {
        match transformation {
            Some(t) => ObjectRef {
                key: t.object_key(),
                name: t.name.clone(),
                extension: t.extension.clone(),
                mime_type: t.mime_type.clone(),
            },
            None if full_preview && file.file_type != FileType::Image => ObjectRef {
                key: file.object_key(PREVIEW_NAME, PREVIEW_EXTENSION),
                name: PREVIEW_NAME.to_string(),
                extension: PREVIEW_EXTENSION.to_string(),
                mime_type: "image/jpeg".to_string(),
            },
            None => ObjectRef {
                key: file.upload_key(),
                name: UPLOAD_NAME.to_string(),
                extension: file.extension.clone(),
                mime_type: file.mime_type.clone(),
            },
        }
    }

    /// `attachment; filename={file slug}-{name}.{extension}`
    pub fn content_disposition(&self, file: &File) -> String {
        format!(
            "attachment; filename={}-{}.{}",
            file.filename, self.name, self.extension
        )
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{file, thumb};
    use super::*;

    #[test]
    fn resolves_canonical_preview_and_transformation() {
        let doc = file(FileType::Document, "pdf", "application/pdf");

        let canonical = ObjectRef::resolve(&doc, None, false);
        assert_eq!(canonical.key, format!("{}/upload.pdf", doc.id));
        assert_eq!(canonical.mime_type, "application/pdf");

        let preview = ObjectRef::resolve(&doc, None, true);
        assert_eq!(preview.key, format!("{}/preview.jpg", doc.id));

        let t = thumb(&doc);
        let derived = ObjectRef::resolve(&doc, Some(&t), true);
        assert_eq!(derived.key, format!("{}/thumb.png", doc.id));
        assert_eq!(
            derived.content_disposition(&doc),
            "attachment; filename=quarterly-report-thumb.png"
        );
    }

    #[test]
    fn images_ignore_full_preview() {
        let image = file(FileType::Image, "png", "image/png");
        assert_eq!(
            ObjectRef::resolve(&image, None, true).key,
            format!("{}/upload.png", image.id)
        );
    }
}
