use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Coarse file category assigned by the [`TypeClassifier`](crate::TypeClassifier).
///
/// Declaration order is the classification order: a MIME type listed by more
/// than one category (e.g. `application/ogg`) resolves to the first one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "text", rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Image,
    Video,
    Document,
    Audio,
}

impl FileType {
    pub const ALL: [FileType; 4] = [
        FileType::Image,
        FileType::Video,
        FileType::Document,
        FileType::Audio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Image => "image",
            FileType::Video => "video",
            FileType::Document => "document",
            FileType::Audio => "audio",
        }
    }

    /// Categories that get a visual preview (thumb/preview renditions).
    pub fn has_preview(&self) -> bool {
        matches!(self, FileType::Image | FileType::Document | FileType::Video)
    }
}

impl Display for FileType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(FileType::Image),
            "video" => Ok(FileType::Video),
            "document" => Ok(FileType::Document),
            "audio" => Ok(FileType::Audio),
            _ => Err(anyhow::anyhow!("Invalid file type: {}", s)),
        }
    }
}
