//! Record stores used by the media library.

use sqlx::PgPool;
use std::sync::Arc;

use medialib_db::{
    AttachableRepository, AttachmentStore, FileRepository, FileStore, JobRepository, JobStore,
    MemoryJobStore, MemoryStore, TransformationRepository, TransformationStore,
};

#[derive(Clone)]
pub struct Stores {
    pub files: Arc<dyn FileStore>,
    pub transformations: Arc<dyn TransformationStore>,
    pub attachments: Arc<dyn AttachmentStore>,
    pub jobs: Arc<dyn JobStore>,
}

impl Stores {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            files: Arc::new(FileRepository::new(pool.clone())),
            transformations: Arc::new(TransformationRepository::new(pool.clone())),
            attachments: Arc::new(AttachableRepository::new(pool.clone())),
            jobs: Arc::new(JobRepository::new(pool)),
        }
    }

    /// Process-local stores sharing one record state, so file deletion
    /// cascades to transformations and attachments.
    pub fn memory(records: Arc<MemoryStore>, jobs: Arc<MemoryJobStore>) -> Self {
        Self {
            files: records.clone(),
            transformations: records.clone(),
            attachments: records,
            jobs,
        }
    }
}
