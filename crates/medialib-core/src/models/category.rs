use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Organizational label with one level of nesting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Category {
    pub id: i32,
    pub owner_id: Option<Uuid>,
    pub parent_id: Option<i32>,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Category {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCategory {
    pub owner_id: Option<Uuid>,
    pub parent_id: Option<i32>,
    pub name: String,
}
