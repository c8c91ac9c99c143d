//! Medialib Database Layer
//!
//! PostgreSQL repositories for files, transformations, categories,
//! attachments and jobs, the store traits the pipeline is written against,
//! and in-memory implementations of those traits.

pub mod db;
pub mod memory;
pub mod stores;

// Re-exports: repositories and setup
pub use db::{
    connect, run_migrations, AttachableRepository, CategoryRepository,
    FileRepository, JobRepository, TransformationRepository,
};

// Re-exports: Transaction utilities
pub use db::transaction::TransactionGuard;

// Re-exports: store traits and in-memory stores
pub use memory::{MemoryJobStore, MemoryStore};
pub use stores::{AttachmentStore, FileStore, JobStore, TransformationStore};
