use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::{AppError, RelationsConfig};

/// Join row linking a file to an external entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Attachment {
    pub file_id: Uuid,
    pub attachable_type: String,
    pub attachable_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A configured attachment relation, e.g. `"articles"` → `"article"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub name: String,
    pub attachable_type: String,
}

/// Relation name → attachable type, fixed at startup from `relations.attachment`.
#[derive(Debug, Clone, Default)]
pub struct RelationRegistry {
    relations: BTreeMap<String, Relation>,
}

impl RelationRegistry {
    pub fn new(config: &RelationsConfig) -> Self {
        let relations = config
            .attachment
            .iter()
            .map(|(name, attachable_type)| {
                (
                    name.clone(),
                    Relation {
                        name: name.clone(),
                        attachable_type: attachable_type.clone(),
                    },
                )
            })
            .collect();
        Self { relations }
    }

    pub fn get(&self, name: &str) -> Result<&Relation, AppError> {
        self.relations
            .get(name)
            .ok_or_else(|| AppError::InvalidInput(format!("Unknown attachment relation '{}'", name)))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.relations.keys().map(String::as_str)
    }
}
