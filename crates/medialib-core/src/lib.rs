//! Medialib Core Library
//!
//! Domain models, configuration, the MIME type classifier and the error types
//! shared by every medialib crate.

pub mod classifier;
pub mod config;
pub mod constants;
pub mod error;
pub mod file_type;
pub mod job_error;
pub mod library;
pub mod models;
pub mod storage_types;
pub mod util;

// Re-export commonly used types
pub use classifier::TypeClassifier;
pub use config::Config;
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use file_type::FileType;
pub use job_error::{JobError, JobResultExt};
pub use library::{
    DiskConfig, FileTypeConfig, LibraryConfig, MimeList, QueuePolicy, RelationsConfig,
    ThumbConfig, TransformationDescriptor,
};
pub use storage_types::StorageBackend;
pub use util::{extension_of, filesize_to_human, slugify, strip_extension};
