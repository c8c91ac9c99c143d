use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{DEFAULT_GROUP, UPLOAD_NAME};
use crate::{filesize_to_human, FileType};

/// Storage key of a file's object: `{file_id}/{name}.{extension}`.
pub fn object_key(file_id: Uuid, name: &str, extension: &str) -> String {
    if extension.is_empty() {
        format!("{}/{}", file_id, name)
    } else {
        format!("{}/{}.{}", file_id, name, extension)
    }
}

/// Prefix covering every object stored for a file.
pub fn file_prefix(file_id: Uuid) -> String {
    format!("{}/", file_id)
}

/// An uploaded asset.
///
/// `completed` flips to true only once the original bytes are stored at
/// [`File::upload_key`]. Incomplete files are never handed out as ready.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct File {
    pub id: Uuid,
    pub name: Option<String>,
    pub caption: Option<String>,
    pub file_type: FileType,
    pub file_group: String,
    pub disk: String,
    /// Slug of the client file name, without extension.
    pub filename: String,
    pub extension: String,
    pub mime_type: String,
    pub size: i64,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub is_hidden: bool,
    pub completed: bool,
    pub properties: serde_json::Value,
    pub owner_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub category_id: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl File {
    pub fn upload_key(&self) -> String {
        object_key(self.id, UPLOAD_NAME, &self.extension)
    }

    pub fn object_key(&self, name: &str, extension: &str) -> String {
        object_key(self.id, name, extension)
    }

    pub fn storage_prefix(&self) -> String {
        file_prefix(self.id)
    }

    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.filename,
        }
    }

    pub fn human_size(&self) -> String {
        filesize_to_human(self.size.max(0) as u64, 2)
    }

    pub fn group(&self) -> &str {
        if self.file_group.is_empty() {
            DEFAULT_GROUP
        } else {
            &self.file_group
        }
    }
}

/// Caller supplied attributes of an upload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadAttributes {
    pub name: Option<String>,
    pub caption: Option<String>,
    pub group: Option<String>,
    pub category_id: Option<i32>,
    #[serde(default)]
    pub is_hidden: bool,
    pub owner_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub properties: Option<serde_json::Value>,
}

/// Fields of a file overwritten by a promoted transformation.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalUpdate {
    pub extension: String,
    pub mime_type: String,
    pub size: i64,
    pub width: Option<i32>,
    pub height: Option<i32>,
}

/// Filter on a nullable foreign key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelationFilter {
    #[default]
    Any,
    Is(Uuid),
    IsNull,
}

impl RelationFilter {
    pub fn matches(&self, value: Option<Uuid>) -> bool {
        match self {
            RelationFilter::Any => true,
            RelationFilter::Is(id) => value == Some(*id),
            RelationFilter::IsNull => value.is_none(),
        }
    }
}

/// Listing scopes for files.
#[derive(Debug, Clone, Default)]
pub struct FileQuery {
    pub hidden: Option<bool>,
    /// Empty matches every group.
    pub groups: Vec<String>,
    pub owner: RelationFilter,
    pub user: RelationFilter,
    pub category_id: Option<i32>,
    pub file_type: Option<FileType>,
    /// Also list files whose original has not been confirmed stored.
    pub include_incomplete: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl FileQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = Some(hidden);
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.groups = vec![group.into()];
        self
    }

    pub fn groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_owner(mut self, owner_id: Uuid) -> Self {
        self.owner = RelationFilter::Is(owner_id);
        self
    }

    pub fn without_owner(mut self) -> Self {
        self.owner = RelationFilter::IsNull;
        self
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user = RelationFilter::Is(user_id);
        self
    }

    pub fn without_user(mut self) -> Self {
        self.user = RelationFilter::IsNull;
        self
    }

    pub fn category(mut self, category_id: i32) -> Self {
        self.category_id = Some(category_id);
        self
    }

    pub fn of_type(mut self, file_type: FileType) -> Self {
        self.file_type = Some(file_type);
        self
    }

    /// Operator view: include uploads still in flight or left behind by a
    /// failed write.
    pub fn include_incomplete(mut self) -> Self {
        self.include_incomplete = true;
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// In-process evaluation, used by stores that do not translate to SQL.
    pub fn matches(&self, file: &File) -> bool {
        self.hidden.map_or(true, |hidden| file.is_hidden == hidden)
            && (self.groups.is_empty() || self.groups.iter().any(|g| g == file.group()))
            && self.owner.matches(file.owner_id)
            && self.user.matches(file.user_id)
            && self.category_id.map_or(true, |id| file.category_id == Some(id))
            && self.file_type.map_or(true, |t| file.file_type == t)
            && (self.include_incomplete || file.completed)
    }
}

#[cfg(test)]
pub(crate) fn sample_file() -> File {
    let now = Utc::now();
    File {
        id: Uuid::new_v4(),
        name: None,
        caption: None,
        file_type: FileType::Image,
        file_group: DEFAULT_GROUP.to_string(),
        disk: "media".to_string(),
        filename: "holiday-photo".to_string(),
        extension: "jpg".to_string(),
        mime_type: "image/jpeg".to_string(),
        size: 1500,
        width: Some(800),
        height: Some(600),
        is_hidden: false,
        completed: true,
        properties: serde_json::json!({}),
        owner_id: None,
        user_id: None,
        category_id: None,
        created_at: now,
        updated_at: now,
    }
}
