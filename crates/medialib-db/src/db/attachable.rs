use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use super::transaction::TransactionGuard;

/// Polymorphic file ↔ entity join rows.
#[derive(Clone)]
pub struct AttachableRepository {
    pool: PgPool,
}

impl AttachableRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[tracing::instrument(skip(self))]
    pub async fn attach(
        &self,
        file_id: Uuid,
        attachable_type: &str,
        attachable_id: Uuid,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO attachables (file_id, attachable_type, attachable_id)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(file_id)
        .bind(attachable_type)
        .bind(attachable_id)
        .execute(&self.pool)
        .await
        .context("Failed to attach file")?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn detach(
        &self,
        file_id: Uuid,
        attachable_type: &str,
        attachable_id: Uuid,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM attachables
            WHERE file_id = $1 AND attachable_type = $2 AND attachable_id = $3
            "#,
        )
        .bind(file_id)
        .bind(attachable_type)
        .bind(attachable_id)
        .execute(&self.pool)
        .await
        .context("Failed to detach file")?;

        Ok(result.rows_affected() > 0)
    }

    /// Replace the files attached to one entity.
    #[tracing::instrument(skip(self, file_ids))]
    pub async fn sync(
        &self,
        attachable_type: &str,
        attachable_id: Uuid,
        file_ids: &[Uuid],
    ) -> Result<()> {
        let mut tx = TransactionGuard::begin(&self.pool).await?;

        sqlx::query(
            r#"
            DELETE FROM attachables
            WHERE attachable_type = $1 AND attachable_id = $2 AND NOT (file_id = ANY($3))
            "#,
        )
        .bind(attachable_type)
        .bind(attachable_id)
        .bind(file_ids)
        .execute(tx.conn()?)
        .await
        .context("Failed to remove stale attachments")?;

        sqlx::query(
            r#"
            INSERT INTO attachables (file_id, attachable_type, attachable_id)
            SELECT UNNEST($1::uuid[]), $2, $3
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(file_ids)
        .bind(attachable_type)
        .bind(attachable_id)
        .execute(tx.conn()?)
        .await
        .context("Failed to insert attachments")?;

        tx.commit().await?;

        tracing::debug!(
            attachable_type = %attachable_type,
            attachable_id = %attachable_id,
            files = file_ids.len(),
            "Attachments synced"
        );

        Ok(())
    }

    /// Files attached to an entity, oldest attachment first.
    #[tracing::instrument(skip(self))]
    pub async fn files_for(&self, attachable_type: &str, attachable_id: Uuid) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT file_id
            FROM attachables
            WHERE attachable_type = $1 AND attachable_id = $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(attachable_type)
        .bind(attachable_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list attached files")?;

        Ok(ids)
    }

    /// Entities of one type a file is attached to.
    #[tracing::instrument(skip(self))]
    pub async fn attached_ids(&self, file_id: Uuid, attachable_type: &str) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT attachable_id
            FROM attachables
            WHERE file_id = $1 AND attachable_type = $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(file_id)
        .bind(attachable_type)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list attachments")?;

        Ok(ids)
    }

    #[tracing::instrument(skip(self))]
    pub async fn attachment_count(&self, file_id: Uuid) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM attachables WHERE file_id = $1",
        )
        .bind(file_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count attachments")?;

        Ok(count)
    }
}
