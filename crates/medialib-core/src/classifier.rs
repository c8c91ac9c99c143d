use std::collections::HashMap;

use crate::{FileType, LibraryConfig};

/// Maps a MIME string to the first configured file type that lists it.
///
/// Types are checked in [`FileType`] order, so a MIME shared by two types
/// (e.g. `application/ogg` for video and audio) resolves to the earlier one.
#[derive(Debug, Clone)]
pub struct TypeClassifier {
    by_mime: HashMap<String, FileType>,
}

impl TypeClassifier {
    pub fn new(config: &LibraryConfig) -> Self {
        let mut by_mime = HashMap::new();
        for (file_type, type_config) in &config.file_types {
            for mime in type_config.mime_types() {
                by_mime
                    .entry(mime.to_ascii_lowercase())
                    .or_insert(*file_type);
            }
        }
        Self { by_mime }
    }

    /// `None` means the upload must be rejected.
    pub fn classify(&self, mime: &str) -> Option<FileType> {
        let essence = mime.split(';').next().unwrap_or(mime).trim();
        self.by_mime.get(&essence.to_ascii_lowercase()).copied()
    }
}
