use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{object_key, CanonicalUpdate};
use crate::FileType;

/// A stored derivative rendition of a file. At most one per `(file_id, name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Transformation {
    pub id: i32,
    pub file_id: Uuid,
    pub name: String,
    pub file_type: FileType,
    pub disk: String,
    pub filename: String,
    pub extension: String,
    pub mime_type: String,
    pub size: i64,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub completed: bool,
    pub properties: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transformation {
    pub fn object_key(&self) -> String {
        object_key(self.file_id, &self.filename, &self.extension)
    }
}

/// What a transformer produced and stored. The scheduler either records it
/// as a [`Transformation`] or promotes it onto the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationOutput {
    pub name: String,
    pub file_type: FileType,
    pub disk: String,
    /// Object name under the file prefix; the key is `{file_id}/{filename}.{extension}`.
    pub filename: String,
    pub extension: String,
    pub mime_type: String,
    pub size: i64,
    pub width: Option<i32>,
    pub height: Option<i32>,
}

impl TransformationOutput {
    pub fn object_key(&self, file_id: Uuid) -> String {
        object_key(file_id, &self.filename, &self.extension)
    }

    pub fn canonical_update(&self) -> CanonicalUpdate {
        CanonicalUpdate {
            extension: self.extension.clone(),
            mime_type: self.mime_type.clone(),
            size: self.size,
            width: self.width,
            height: self.height,
        }
    }
}
