//! Media library facade
//!
//! [`MediaLibrary`] wires the classifier, scheduler, disks, transformers and
//! stores together. It is the job handler context for the executor and the
//! queue workers, so inline and deferred invocations run the same code.

mod attachments;
mod dispatch;
mod lifecycle;
mod upload;
mod urls;

use std::sync::{Arc, Weak};
use uuid::Uuid;

use medialib_core::models::{File, FileQuery, RelationRegistry};
use medialib_core::{AppError, FileType, LibraryConfig, TypeClassifier};
use medialib_processing::{TransformationSink, TransformerRegistry};
use medialib_storage::{Disk, DiskRegistry};
use medialib_worker::{JobExecutor, JobExecutorConfig, JobHandlerContext};

use crate::scheduler::TransformationScheduler;
use crate::stores::Stores;

pub use dispatch::StoreSink;
pub use upload::UploadSource;

pub struct MediaLibrary {
    library: Arc<LibraryConfig>,
    classifier: TypeClassifier,
    scheduler: TransformationScheduler,
    disks: DiskRegistry,
    transformers: TransformerRegistry,
    relations: RelationRegistry,
    stores: Stores,
    sink: Arc<dyn TransformationSink>,
    executor: JobExecutor,
}

/// Parts a [`MediaLibrary`] is assembled from.
pub struct MediaLibraryBuilder {
    library: LibraryConfig,
    disks: DiskRegistry,
    stores: Stores,
    transformers: TransformerRegistry,
    executor: JobExecutorConfig,
}

impl MediaLibraryBuilder {
    pub fn transformers(mut self, transformers: TransformerRegistry) -> Self {
        self.transformers = transformers;
        self
    }

    pub fn executor_config(mut self, config: JobExecutorConfig) -> Self {
        self.executor = config;
        self
    }

    pub fn build(self) -> Arc<MediaLibrary> {
        let library = Arc::new(self.library);
        let classifier = TypeClassifier::new(&library);
        let scheduler = TransformationScheduler::new(library.clone());
        let relations = RelationRegistry::new(&library.relations);
        let sink: Arc<dyn TransformationSink> =
            Arc::new(StoreSink::new(self.stores.transformations.clone()));

        Arc::new_cyclic(|weak: &Weak<MediaLibrary>| {
            let context: Weak<dyn JobHandlerContext> = weak.clone();
            let executor = JobExecutor::new(self.stores.jobs.clone(), context, self.executor);

            MediaLibrary {
                library,
                classifier,
                scheduler,
                disks: self.disks,
                transformers: self.transformers,
                relations,
                stores: self.stores,
                sink,
                executor,
            }
        })
    }
}

impl MediaLibrary {
    /// Start assembling a library. Transformers default to
    /// [`TransformerRegistry::with_defaults`] without a conversion service.
    pub fn builder(library: LibraryConfig, disks: DiskRegistry, stores: Stores) -> MediaLibraryBuilder {
        MediaLibraryBuilder {
            library,
            disks,
            stores,
            transformers: TransformerRegistry::with_defaults(None),
            executor: JobExecutorConfig::default(),
        }
    }

    /// Handler context for a [`medialib_worker::JobQueue`] serving this library.
    pub fn job_context(self: &Arc<Self>) -> Weak<dyn JobHandlerContext> {
        let context: Arc<dyn JobHandlerContext> = self.clone();
        Arc::downgrade(&context)
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.library
    }

    pub fn scheduler(&self) -> &TransformationScheduler {
        &self.scheduler
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn classify(&self, mime_type: &str) -> Option<FileType> {
        self.classifier.classify(mime_type)
    }

    pub async fn get_file(&self, id: Uuid) -> Result<File, AppError> {
        self.stores
            .files
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("File {} not found", id)))
    }

    pub async fn list_files(&self, query: &FileQuery) -> Result<Vec<File>, AppError> {
        Ok(self.stores.files.list(query).await?)
    }

    fn disk(&self, name: &str) -> Result<&Disk, AppError> {
        self.disks
            .get(name)
            .map_err(|e| AppError::Config(e.to_string()))
    }
}
