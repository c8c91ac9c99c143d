//! Database transaction utilities

use anyhow::{Context, Result};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

/// A transaction that must be finished explicitly.
///
/// Dropping an unfinished guard rolls the transaction back (sqlx issues the
/// rollback when the connection returns to the pool) and logs a warning.
///
/// ```ignore
/// let mut tx = TransactionGuard::begin(&pool).await?;
/// sqlx::query("DELETE FROM attachables WHERE file_id = $1")
///     .bind(file_id)
///     .execute(tx.conn()?)
///     .await?;
/// tx.commit().await?;
/// ```
pub struct TransactionGuard {
    transaction: Option<Transaction<'static, Postgres>>,
}

impl TransactionGuard {
    pub async fn begin(pool: &PgPool) -> Result<Self> {
        let transaction = pool
            .begin()
            .await
            .context("Failed to begin database transaction")?;

        Ok(Self {
            transaction: Some(transaction),
        })
    }

    /// Connection to run statements on inside the transaction.
    pub fn conn(&mut self) -> Result<&mut PgConnection> {
        self.transaction
            .as_deref_mut()
            .ok_or_else(|| anyhow::anyhow!("Transaction was already committed or rolled back"))
    }

    pub async fn commit(mut self) -> Result<()> {
        if let Some(tx) = self.transaction.take() {
            tx.commit()
                .await
                .context("Failed to commit database transaction")?;
        }
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<()> {
        if let Some(tx) = self.transaction.take() {
            tx.rollback()
                .await
                .context("Failed to rollback database transaction")?;
        }
        Ok(())
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        if self.transaction.is_some() {
            tracing::warn!("Transaction was dropped without explicit commit or rollback - rolling back");
        }
    }
}
