//! Medialib Storage Library
//!
//! Byte storage for named disks and URL generation for the stored objects.
//!
//! # Storage key format
//!
//! Every object of a file lives under the file's id:
//!
//! - **Original**: `{file_id}/upload.{extension}`
//! - **Derivatives**: `{file_id}/{transformation_name}.{extension}`
//!
//! Keys must not contain `..` or a leading `/`. Removing a file removes the
//! whole `{file_id}/` prefix in a single `delete_all` call.

pub mod factory;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod memory;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;
pub mod url;

// Re-export commonly used types
pub use factory::{create_storage, Disk, DiskRegistry};
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use medialib_core::StorageBackend;
pub use memory::MemoryStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{Storage, StorageError, StorageResult};
pub use url::{DirectUrlGenerator, ObjectRef, UrlError, UrlGenerator, UrlGeneratorRegistry};
