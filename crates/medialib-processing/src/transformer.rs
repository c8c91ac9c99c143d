//! Transformer trait, invocation context and registry.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use medialib_core::constants::{THUMB_NAME, UPLOAD_NAME};
use medialib_core::models::{File, TransformationOutput};
use medialib_core::{FileType, JobError, JobResultExt, TransformationDescriptor};
use medialib_storage::Storage;

/// Where side renditions (a document's or video's `preview` and `thumb`)
/// are recorded. Writes for a file that no longer exists are dropped.
#[async_trait]
pub trait TransformationSink: Send + Sync {
    async fn record(&self, file_id: uuid::Uuid, output: TransformationOutput) -> anyhow::Result<()>;
}

/// Everything one transformer invocation works with.
pub struct TransformContext {
    pub file: File,
    /// Transformation name, e.g. `thumb`.
    pub name: String,
    pub descriptor: TransformationDescriptor,
    pub storage: Arc<dyn Storage>,
    /// URL an external service can download the original from.
    pub source_url: Option<String>,
    pub sink: Arc<dyn TransformationSink>,
}

impl TransformContext {
    /// Whether the output replaces the original. `thumb` never does.
    pub fn promotes(&self) -> bool {
        self.descriptor.is_default() && self.name != THUMB_NAME
    }

    /// Object name the main output is stored under.
    pub fn output_name(&self) -> &str {
        if self.promotes() {
            UPLOAD_NAME
        } else {
            &self.name
        }
    }

    /// Typed transformer config.
    pub fn config<T: serde::de::DeserializeOwned>(&self) -> Result<T, JobError> {
        self.descriptor.config_as::<T>().unrecoverable()
    }

    pub fn require_source_url(&self) -> Result<&str, JobError> {
        self.source_url.as_deref().ok_or_else(|| {
            JobError::unrecoverable(anyhow::anyhow!(
                "No downloadable URL for file {} on disk '{}'",
                self.file.id,
                self.file.disk
            ))
        })
    }

    pub async fn read_original(&self) -> Result<Bytes, JobError> {
        self.storage
            .get(&self.file.upload_key())
            .await
            .map_err(|e| JobError::transient(anyhow::anyhow!(e)))
    }

    /// Store `data` under `{file_id}/{name}.{extension}` and describe it.
    #[allow(clippy::too_many_arguments)]
    pub async fn store(
        &self,
        name: &str,
        object_name: &str,
        file_type: FileType,
        extension: &str,
        mime_type: &str,
        data: Bytes,
        dimensions: Option<(u32, u32)>,
    ) -> Result<TransformationOutput, JobError> {
        let start = Instant::now();
        let output = TransformationOutput {
            name: name.to_string(),
            file_type,
            disk: self.file.disk.clone(),
            filename: object_name.to_string(),
            extension: extension.to_string(),
            mime_type: mime_type.to_string(),
            size: data.len() as i64,
            width: dimensions.map(|(w, _)| w as i32),
            height: dimensions.map(|(_, h)| h as i32),
        };
        let key = output.object_key(self.file.id);

        self.storage
            .put(&key, data, mime_type)
            .await
            .map_err(|e| JobError::transient(anyhow::anyhow!(e)))?;

        tracing::debug!(
            file_id = %self.file.id,
            transformation = %name,
            key = %key,
            size_bytes = output.size,
            duration_ms = start.elapsed().as_millis() as u64,
            "Rendition stored"
        );

        Ok(output)
    }

    /// Record a side rendition through the sink.
    pub async fn record(&self, output: TransformationOutput) -> Result<(), JobError> {
        self.sink
            .record(self.file.id, output)
            .await
            .map_err(JobError::transient)
    }
}

/// A unit of work producing one derivative of a file.
///
/// `Ok(None)` means the source cannot be transformed (corrupt or unsupported)
/// and the invocation is skipped without an error. Transformers never decide
/// promotion onto the file; they only store and describe their output.
#[async_trait]
pub trait Transformer: Send + Sync {
    fn id(&self) -> &'static str;

    async fn transform(&self, ctx: &TransformContext) -> Result<Option<TransformationOutput>, JobError>;
}

/// Transformer id → implementation, filled once at startup.
#[derive(Clone, Default)]
pub struct TransformerRegistry {
    transformers: BTreeMap<String, Arc<dyn Transformer>>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, transformer: Arc<dyn Transformer>) -> &mut Self {
        self.transformers
            .insert(transformer.id().to_string(), transformer);
        self
    }

    pub fn with(mut self, transformer: Arc<dyn Transformer>) -> Self {
        self.register(transformer);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Transformer>> {
        self.transformers.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.transformers.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.transformers.keys().map(String::as_str)
    }
}

/// Failure of a transformer that needs the conversion service when none is
/// configured. Retrying cannot help.
pub(crate) fn missing_conversion_service(transformer: &str) -> JobError {
    JobError::unrecoverable(anyhow::anyhow!(
        "Transformer '{}' requires a conversion service (CLOUDCONVERT_API_KEY)",
        transformer
    ))
}
