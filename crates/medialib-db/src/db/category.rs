use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use medialib_core::models::{Category, NewCategory};

#[derive(Clone)]
pub struct CategoryRepository {
    pool: PgPool,
}

impl CategoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a category. Only one level of nesting: the parent must be a root.
    #[tracing::instrument(skip(self, category), fields(name = %category.name))]
    pub async fn create(&self, category: &NewCategory) -> Result<Category> {
        if let Some(parent_id) = category.parent_id {
            let parent = self
                .get(parent_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Parent category {} does not exist", parent_id))?;
            if !parent.is_root() {
                return Err(anyhow::anyhow!(
                    "Category {} is already nested and cannot have children",
                    parent_id
                ));
            }
        }

        let created = sqlx::query_as::<Postgres, Category>(
            r#"
            INSERT INTO categories (owner_id, parent_id, name)
            VALUES ($1, $2, $3)
            RETURNING id, owner_id, parent_id, name, created_at, updated_at
            "#,
        )
        .bind(category.owner_id)
        .bind(category.parent_id)
        .bind(&category.name)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create category")?;

        Ok(created)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get(&self, id: i32) -> Result<Option<Category>> {
        let category = sqlx::query_as::<Postgres, Category>(
            r#"
            SELECT id, owner_id, parent_id, name, created_at, updated_at
            FROM categories
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch category")?;

        Ok(category)
    }

    #[tracing::instrument(skip(self))]
    pub async fn roots(&self, owner_id: Option<Uuid>) -> Result<Vec<Category>> {
        let categories = sqlx::query_as::<Postgres, Category>(
            r#"
            SELECT id, owner_id, parent_id, name, created_at, updated_at
            FROM categories
            WHERE parent_id IS NULL AND owner_id IS NOT DISTINCT FROM $1
            ORDER BY name ASC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list root categories")?;

        Ok(categories)
    }

    #[tracing::instrument(skip(self))]
    pub async fn children(&self, parent_id: i32) -> Result<Vec<Category>> {
        let categories = sqlx::query_as::<Postgres, Category>(
            r#"
            SELECT id, owner_id, parent_id, name, created_at, updated_at
            FROM categories
            WHERE parent_id = $1
            ORDER BY name ASC
            "#,
        )
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list child categories")?;

        Ok(categories)
    }

    #[tracing::instrument(skip(self))]
    pub async fn rename(&self, id: i32, name: &str) -> Result<Option<Category>> {
        let category = sqlx::query_as::<Postgres, Category>(
            r#"
            UPDATE categories
            SET name = $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, owner_id, parent_id, name, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to rename category")?;

        Ok(category)
    }

    /// Delete a category and its children. Files keep existing with no category.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: i32) -> Result<bool> {
        let result = sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete category")?;

        Ok(result.rows_affected() > 0)
    }
}
