use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use medialib_core::models::{Transformation, TransformationOutput};

/// SQLSTATE foreign_key_violation
const FOREIGN_KEY_VIOLATION: &str = "23503";

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(FOREIGN_KEY_VIOLATION)
    )
}

#[derive(Clone)]
pub struct TransformationRepository {
    pool: PgPool,
}

impl TransformationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or replace the transformation `output.name` of a file.
    ///
    /// Returns `None` when the file no longer exists, so a worker finishing
    /// after the file was deleted writes nothing.
    #[tracing::instrument(skip(self, output), fields(transformation = %output.name))]
    pub async fn upsert(
        &self,
        file_id: Uuid,
        output: &TransformationOutput,
    ) -> Result<Option<Transformation>> {
        let result = sqlx::query_as::<Postgres, Transformation>(
            r#"
            INSERT INTO transformations (
                file_id, name, file_type, disk, filename, extension, mime_type,
                size, width, height, completed
            )
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, TRUE
            WHERE EXISTS (SELECT 1 FROM files WHERE id = $1)
            ON CONFLICT (file_id, name) DO UPDATE
            SET file_type = EXCLUDED.file_type,
                disk = EXCLUDED.disk,
                filename = EXCLUDED.filename,
                extension = EXCLUDED.extension,
                mime_type = EXCLUDED.mime_type,
                size = EXCLUDED.size,
                width = EXCLUDED.width,
                height = EXCLUDED.height,
                completed = TRUE,
                updated_at = NOW()
            RETURNING
                id, file_id, name, file_type, disk, filename, extension, mime_type,
                size, width, height, completed, properties, created_at, updated_at
            "#,
        )
        .bind(file_id)
        .bind(&output.name)
        .bind(output.file_type)
        .bind(&output.disk)
        .bind(&output.filename)
        .bind(&output.extension)
        .bind(&output.mime_type)
        .bind(output.size)
        .bind(output.width)
        .bind(output.height)
        .fetch_optional(&self.pool)
        .await;

        match result {
            Ok(Some(transformation)) => {
                tracing::debug!(
                    file_id = %file_id,
                    transformation_id = transformation.id,
                    size_bytes = transformation.size,
                    "Transformation stored"
                );
                Ok(Some(transformation))
            }
            Ok(None) => Ok(None),
            // The file was deleted between the existence check and the insert
            Err(e) if is_foreign_key_violation(&e) => Ok(None),
            Err(e) => Err(e).context("Failed to upsert transformation"),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn list_for_file(&self, file_id: Uuid) -> Result<Vec<Transformation>> {
        let transformations = sqlx::query_as::<Postgres, Transformation>(
            r#"
            SELECT
                id, file_id, name, file_type, disk, filename, extension, mime_type,
                size, width, height, completed, properties, created_at, updated_at
            FROM transformations
            WHERE file_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(file_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list transformations")?;

        Ok(transformations)
    }

    /// First completed transformation with the given name.
    #[tracing::instrument(skip(self))]
    pub async fn find(&self, file_id: Uuid, name: &str) -> Result<Option<Transformation>> {
        let transformation = sqlx::query_as::<Postgres, Transformation>(
            r#"
            SELECT
                id, file_id, name, file_type, disk, filename, extension, mime_type,
                size, width, height, completed, properties, created_at, updated_at
            FROM transformations
            WHERE file_id = $1 AND name = $2 AND completed = TRUE
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .bind(file_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch transformation")?;

        Ok(transformation)
    }
}
