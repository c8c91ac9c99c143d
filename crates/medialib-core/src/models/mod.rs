//! Persisted records and the values passed between pipeline stages.

mod attachable;
mod category;
mod file;
mod job;
mod transformation;

pub use attachable::*;
pub use category::*;
pub use file::*;
pub use job::*;
pub use transformation::*;
