//! Medialib Services Layer
//!
//! The transformation scheduler and the [`MediaLibrary`] facade: uploads,
//! URL retrieval, deletion, attachment relations and job dispatch. Binaries
//! depend on this crate alone; the storage, processing and worker APIs they
//! need are re-exported here.

pub mod library;
pub mod scheduler;
pub mod stores;

pub use library::{MediaLibrary, MediaLibraryBuilder, StoreSink, UploadSource};
pub use scheduler::{
    MergeDecision, MergeOutcome, PlannedTransformation, TransformationPlan, TransformationScheduler,
};
pub use stores::Stores;

pub use medialib_processing::{
    CloudConvertClient, ConversionService, DocumentTransformer, ResizeTransformer, Transformer,
    TransformerRegistry, VideoTransformer,
};
pub use medialib_storage::{
    create_storage, DirectUrlGenerator, Disk, DiskRegistry, MemoryStorage, Storage, UrlError,
    UrlGenerator, UrlGeneratorRegistry,
};
pub use medialib_worker::{
    Dispatch, Invocation, JobExecutor, JobExecutorConfig, JobOutcome, JobQueue, JobQueueConfig,
};
