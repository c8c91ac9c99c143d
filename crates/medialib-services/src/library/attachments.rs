//! Attachment relations, resolved by name through the relation registry.

use uuid::Uuid;

use medialib_core::models::File;
use medialib_core::AppError;

use super::MediaLibrary;

impl MediaLibrary {
    pub async fn attach(&self, file_id: Uuid, relation: &str, entity_id: Uuid) -> Result<(), AppError> {
        let relation = self.relations.get(relation)?;
        self.get_file(file_id).await?;
        self.stores
            .attachments
            .attach(file_id, &relation.attachable_type, entity_id)
            .await?;
        Ok(())
    }

    pub async fn detach(&self, file_id: Uuid, relation: &str, entity_id: Uuid) -> Result<bool, AppError> {
        let relation = self.relations.get(relation)?;
        Ok(self
            .stores
            .attachments
            .detach(file_id, &relation.attachable_type, entity_id)
            .await?)
    }

    /// Replace the files attached to `entity_id` through `relation`.
    pub async fn sync_attachments(
        &self,
        relation: &str,
        entity_id: Uuid,
        file_ids: &[Uuid],
    ) -> Result<(), AppError> {
        let relation = self.relations.get(relation)?;
        self.stores
            .attachments
            .sync(&relation.attachable_type, entity_id, file_ids)
            .await?;
        Ok(())
    }

    /// Ids of the entities a file is attached to through `relation`.
    pub async fn attached_to(&self, file_id: Uuid, relation: &str) -> Result<Vec<Uuid>, AppError> {
        let relation = self.relations.get(relation)?;
        Ok(self
            .stores
            .attachments
            .attached_ids(file_id, &relation.attachable_type)
            .await?)
    }

    /// Files attached to an entity, in attachment order. Files deleted in the
    /// meantime are skipped.
    pub async fn attached_files(&self, relation: &str, entity_id: Uuid) -> Result<Vec<File>, AppError> {
        let relation = self.relations.get(relation)?;
        let ids = self
            .stores
            .attachments
            .files_for(&relation.attachable_type, entity_id)
            .await?;

        let mut files = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(file) = self.stores.files.get(id).await? {
                files.push(file);
            }
        }
        Ok(files)
    }
}
