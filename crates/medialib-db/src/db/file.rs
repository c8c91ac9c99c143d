use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use medialib_core::models::{CanonicalUpdate, File, FileQuery, RelationFilter};

const MAX_LIST_LIMIT: i64 = 1000;

#[derive(Clone)]
pub struct FileRepository {
    pool: PgPool,
}

impl FileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[tracing::instrument(skip(self, file), fields(file_id = %file.id))]
    pub async fn insert(&self, file: &File) -> Result<File> {
        let inserted = sqlx::query_as::<Postgres, File>(
            r#"
            INSERT INTO files (
                id, name, caption, file_type, file_group, disk, filename, extension,
                mime_type, size, width, height, is_hidden, completed, properties,
                owner_id, user_id, category_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            RETURNING
                id, name, caption, file_type, file_group, disk, filename, extension,
                mime_type, size, width, height, is_hidden, completed, properties,
                owner_id, user_id, category_id, created_at, updated_at
            "#,
        )
        .bind(file.id)
        .bind(&file.name)
        .bind(&file.caption)
        .bind(file.file_type)
        .bind(&file.file_group)
        .bind(&file.disk)
        .bind(&file.filename)
        .bind(&file.extension)
        .bind(&file.mime_type)
        .bind(file.size)
        .bind(file.width)
        .bind(file.height)
        .bind(file.is_hidden)
        .bind(file.completed)
        .bind(&file.properties)
        .bind(file.owner_id)
        .bind(file.user_id)
        .bind(file.category_id)
        .bind(file.created_at)
        .bind(file.updated_at)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert file")?;

        tracing::debug!(file_type = %inserted.file_type, "File record created");

        Ok(inserted)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<Option<File>> {
        let file = sqlx::query_as::<Postgres, File>(
            r#"
            SELECT
                id, name, caption, file_type, file_group, disk, filename, extension,
                mime_type, size, width, height, is_hidden, completed, properties,
                owner_id, user_id, category_id, created_at, updated_at
            FROM files
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch file")?;

        Ok(file)
    }

    /// Flag the file as durably stored.
    #[tracing::instrument(skip(self))]
    pub async fn mark_completed(&self, id: Uuid) -> Result<Option<File>> {
        let file = sqlx::query_as::<Postgres, File>(
            r#"
            UPDATE files
            SET completed = TRUE,
                updated_at = NOW()
            WHERE id = $1
            RETURNING
                id, name, caption, file_type, file_group, disk, filename, extension,
                mime_type, size, width, height, is_hidden, completed, properties,
                owner_id, user_id, category_id, created_at, updated_at
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to mark file as completed")?;

        Ok(file)
    }

    /// Overwrite the canonical fields with a promoted transformation's output.
    /// `None` when the file no longer exists.
    #[tracing::instrument(skip(self, update))]
    pub async fn promote(&self, id: Uuid, update: &CanonicalUpdate) -> Result<Option<File>> {
        let file = sqlx::query_as::<Postgres, File>(
            r#"
            UPDATE files
            SET extension = $2,
                mime_type = $3,
                size = $4,
                width = $5,
                height = $6,
                updated_at = NOW()
            WHERE id = $1
            RETURNING
                id, name, caption, file_type, file_group, disk, filename, extension,
                mime_type, size, width, height, is_hidden, completed, properties,
                owner_id, user_id, category_id, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(&update.extension)
        .bind(&update.mime_type)
        .bind(update.size)
        .bind(update.width)
        .bind(update.height)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to update canonical file fields")?;

        if file.is_some() {
            tracing::info!(
                file_id = %id,
                extension = %update.extension,
                mime_type = %update.mime_type,
                size_bytes = update.size,
                "File promoted to transformed rendition"
            );
        }

        Ok(file)
    }

    /// Delete the record; transformations and attachments cascade.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM files WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete file")?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self))]
    pub async fn list(&self, query: &FileQuery) -> Result<Vec<File>> {
        let limit = query.limit.unwrap_or(50).min(MAX_LIST_LIMIT);
        let offset = query.offset.unwrap_or(0);

        let mut sql = String::from(
            r#"
            SELECT
                id, name, caption, file_type, file_group, disk, filename, extension,
                mime_type, size, width, height, is_hidden, completed, properties,
                owner_id, user_id, category_id, created_at, updated_at
            FROM files
            WHERE TRUE
            "#,
        );

        let mut conditions = Vec::new();
        let mut bind_count = 1;

        if query.hidden.is_some() {
            conditions.push(format!("AND is_hidden = ${}", bind_count));
            bind_count += 1;
        }

        if !query.groups.is_empty() {
            conditions.push(format!("AND file_group = ANY(${})", bind_count));
            bind_count += 1;
        }

        match query.owner {
            RelationFilter::Any => {}
            RelationFilter::Is(_) => {
                conditions.push(format!("AND owner_id = ${}", bind_count));
                bind_count += 1;
            }
            RelationFilter::IsNull => conditions.push("AND owner_id IS NULL".to_string()),
        }

        match query.user {
            RelationFilter::Any => {}
            RelationFilter::Is(_) => {
                conditions.push(format!("AND user_id = ${}", bind_count));
                bind_count += 1;
            }
            RelationFilter::IsNull => conditions.push("AND user_id IS NULL".to_string()),
        }

        if query.category_id.is_some() {
            conditions.push(format!("AND category_id = ${}", bind_count));
            bind_count += 1;
        }

        if query.file_type.is_some() {
            conditions.push(format!("AND file_type = ${}", bind_count));
            bind_count += 1;
        }

        if !query.include_incomplete {
            conditions.push("AND completed = TRUE".to_string());
        }

        for condition in conditions {
            sql.push_str(&format!(" {} ", condition));
        }

        sql.push_str(&format!(
            " ORDER BY created_at DESC LIMIT ${} OFFSET ${}",
            bind_count,
            bind_count + 1
        ));

        let mut query_builder = sqlx::query_as::<Postgres, File>(&sql);

        if let Some(hidden) = query.hidden {
            query_builder = query_builder.bind(hidden);
        }
        if !query.groups.is_empty() {
            query_builder = query_builder.bind(query.groups.clone());
        }
        if let RelationFilter::Is(owner_id) = query.owner {
            query_builder = query_builder.bind(owner_id);
        }
        if let RelationFilter::Is(user_id) = query.user {
            query_builder = query_builder.bind(user_id);
        }
        if let Some(category_id) = query.category_id {
            query_builder = query_builder.bind(category_id);
        }
        if let Some(file_type) = query.file_type {
            query_builder = query_builder.bind(file_type);
        }

        let files = query_builder
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list files")?;

        Ok(files)
    }
}
