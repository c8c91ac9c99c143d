//! Transformation scheduler
//!
//! Decides which transformations a file gets and how each finished result is
//! merged back: promoted onto the file's canonical fields, recorded as a
//! Transformation, or dropped.

use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use medialib_core::constants::{DEFAULT_GROUP, THUMB_NAME};
use medialib_core::models::{CanonicalUpdate, File, TransformationOutput};
use medialib_core::{FileType, LibraryConfig, TransformationDescriptor};
use medialib_storage::Storage;

use crate::stores::Stores;

/// One transformation to run for a file.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTransformation {
    pub name: String,
    pub descriptor: TransformationDescriptor,
}

impl PlannedTransformation {
    pub fn promotes(&self) -> bool {
        promotes(&self.name, &self.descriptor)
    }
}

/// Ordered transformations for one (file type, group): `thumb` first when the
/// type has one, then the group's entries in configured order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformationPlan {
    entries: Vec<PlannedTransformation>,
}

impl TransformationPlan {
    pub fn iter(&self) -> impl Iterator<Item = &PlannedTransformation> {
        self.entries.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&PlannedTransformation> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What to do with a transformer's result.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeDecision {
    /// Overwrite the file's canonical fields; no Transformation record.
    Promote(CanonicalUpdate),
    /// Upsert a Transformation record by `(file_id, name)`.
    Record(TransformationOutput),
    /// The transformer produced nothing.
    Skip,
}

/// Result of applying a [`MergeDecision`], stored as the job result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MergeOutcome {
    Promoted { file_id: Uuid },
    Recorded { transformation_id: i32 },
    Skipped,
    /// The file was deleted while the transformer ran.
    Orphaned,
}

/// Drop the object a promotion replaced. The file prefix is removed on
/// deletion anyway, so a failure here only leaves a stray object.
async fn retire_original(previous: &File, storage: &dyn Storage) {
    let key = previous.upload_key();
    match storage.delete(&key).await {
        Ok(()) => tracing::debug!(key = %key, "Replaced original removed"),
        Err(e) => tracing::warn!(error = %e, key = %key, "Failed to remove replaced original"),
    }
}

/// `thumb` is always a named Transformation, whatever its config says.
fn promotes(name: &str, descriptor: &TransformationDescriptor) -> bool {
    descriptor.is_default() && name != THUMB_NAME
}

pub struct TransformationScheduler {
    library: Arc<LibraryConfig>,
    plans: Mutex<HashMap<(FileType, String), Arc<TransformationPlan>>>,
}

impl TransformationScheduler {
    pub fn new(library: Arc<LibraryConfig>) -> Self {
        Self {
            library,
            plans: Mutex::new(HashMap::new()),
        }
    }

    pub fn plan_for(&self, file: &File) -> Arc<TransformationPlan> {
        self.plan(file.file_type, file.group())
    }

    /// Plan for a type and group. Unknown groups fall back to `default`;
    /// names without a descriptor are dropped. Plans are cached, the
    /// configuration being immutable.
    pub fn plan(&self, file_type: FileType, group: &str) -> Arc<TransformationPlan> {
        let group = self.resolve_group(file_type, group);
        let key = (file_type, group.to_string());

        let mut plans = self.plans.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(plan) = plans.get(&key) {
            return plan.clone();
        }

        let plan = Arc::new(self.build_plan(file_type, group));
        tracing::debug!(
            file_type = %file_type,
            group = %group,
            transformations = ?plan.names(),
            "Transformation plan built"
        );
        plans.insert(key, plan.clone());
        plan
    }

    /// Descriptor of a named transformation for a file type, `thumb` included.
    pub fn descriptor(&self, file_type: FileType, name: &str) -> Option<TransformationDescriptor> {
        let config = self.library.file_type(file_type)?;
        if name == THUMB_NAME {
            if !file_type.has_preview() {
                return None;
            }
            return config.thumb.as_ref().and_then(|thumb| thumb.descriptor());
        }
        config.transformations.get(name).cloned()
    }

    pub fn decide(
        name: &str,
        descriptor: &TransformationDescriptor,
        output: Option<TransformationOutput>,
    ) -> MergeDecision {
        match output {
            None => MergeDecision::Skip,
            Some(output) if promotes(name, descriptor) => {
                MergeDecision::Promote(output.canonical_update())
            }
            Some(output) => MergeDecision::Record(output),
        }
    }

    /// Apply a transformer's result to `file`, the record the transformer
    /// read. Writes for a deleted file are no-ops; concurrent promotions of
    /// the same file are last-writer-wins.
    ///
    /// A promotion that changes the extension leaves the previous original
    /// behind; it is removed only once the file row points at the new one,
    /// so a retry before that still finds its source.
    #[tracing::instrument(skip_all, fields(file_id = %file.id, transformation = %name))]
    pub async fn merge(
        &self,
        file: &File,
        name: &str,
        descriptor: &TransformationDescriptor,
        output: Option<TransformationOutput>,
        stores: &Stores,
        storage: &dyn Storage,
    ) -> Result<MergeOutcome> {
        let file_id = file.id;
        let outcome = match Self::decide(name, descriptor, output) {
            MergeDecision::Skip => MergeOutcome::Skipped,
            MergeDecision::Promote(update) => match stores.files.promote(file_id, &update).await? {
                Some(promoted) => {
                    if promoted.extension != file.extension {
                        retire_original(file, storage).await;
                    }
                    MergeOutcome::Promoted { file_id }
                }
                None => MergeOutcome::Orphaned,
            },
            MergeDecision::Record(output) => {
                match stores.transformations.upsert(file_id, &output).await? {
                    Some(record) => MergeOutcome::Recorded {
                        transformation_id: record.id,
                    },
                    None => MergeOutcome::Orphaned,
                }
            }
        };

        match &outcome {
            MergeOutcome::Orphaned => {
                tracing::info!("File was deleted during transformation, result dropped")
            }
            MergeOutcome::Skipped => tracing::debug!("Transformer produced no output"),
            _ => tracing::debug!(outcome = ?outcome, "Transformation merged"),
        }

        Ok(outcome)
    }

    fn resolve_group<'a>(&self, file_type: FileType, group: &'a str) -> &'a str {
        let known = self
            .library
            .file_type(file_type)
            .is_some_and(|config| config.transformation_groups.contains_key(group));
        if known {
            group
        } else {
            DEFAULT_GROUP
        }
    }

    fn build_plan(&self, file_type: FileType, group: &str) -> TransformationPlan {
        let mut entries: Vec<PlannedTransformation> = Vec::new();

        if let Some(descriptor) = self.descriptor(file_type, THUMB_NAME) {
            entries.push(PlannedTransformation {
                name: THUMB_NAME.to_string(),
                descriptor,
            });
        }

        let names = self
            .library
            .file_type(file_type)
            .and_then(|config| config.transformation_groups.get(group))
            .cloned()
            .unwrap_or_default();

        for name in names {
            if entries.iter().any(|e| e.name == name) {
                continue;
            }
            if let Some(descriptor) = self.descriptor(file_type, &name) {
                entries.push(PlannedTransformation { name, descriptor });
            }
        }

        TransformationPlan { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use medialib_core::{QueuePolicy, ThumbConfig};
    use medialib_db::{FileStore, MemoryJobStore, MemoryStore};
    use medialib_storage::MemoryStorage;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn library() -> Arc<LibraryConfig> {
        let mut library = LibraryConfig::default();
        let image = library
            .file_types
            .get_mut(&FileType::Image)
            .expect("stock image config");
        image.transformations.insert(
            "default".into(),
            TransformationDescriptor::new(
                "resize",
                QueuePolicy::Inline,
                json!({ "default": true, "size": { "w": 2048 } }),
            ),
        );
        image.transformations.insert(
            "banner".into(),
            TransformationDescriptor::new(
                "resize",
                QueuePolicy::Named("images".into()),
                json!({ "fit": true, "size": { "w": 1200, "h": 400 } }),
            ),
        );
        image.transformation_groups = BTreeMap::from([
            ("default".into(), vec!["default".into()]),
            (
                "hero".into(),
                vec!["thumb".into(), "banner".into(), "missing".into()],
            ),
        ]);
        Arc::new(library)
    }

    fn output(name: &str) -> TransformationOutput {
        TransformationOutput {
            name: name.into(),
            file_type: FileType::Image,
            disk: "media".into(),
            filename: name.into(),
            extension: "png".into(),
            mime_type: "image/png".into(),
            size: 100,
            width: Some(10),
            height: Some(10),
        }
    }

    #[test]
    fn thumb_comes_first_then_group_entries() {
        let scheduler = TransformationScheduler::new(library());
        assert_eq!(scheduler.plan(FileType::Image, "default").names(), vec!["thumb", "default"]);
        assert_eq!(scheduler.plan(FileType::Image, "hero").names(), vec!["thumb", "banner"]);
    }

    #[test]
    fn unknown_group_falls_back_to_default() {
        let scheduler = TransformationScheduler::new(library());
        assert_eq!(
            scheduler.plan(FileType::Image, "nope"),
            scheduler.plan(FileType::Image, "default")
        );
    }

    #[test]
    fn plans_are_cached_per_type_and_group() {
        let scheduler = TransformationScheduler::new(library());
        let first = scheduler.plan(FileType::Image, "hero");
        let second = scheduler.plan(FileType::Image, "hero");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn types_without_thumb_skip_it() {
        let scheduler = TransformationScheduler::new(library());
        // Stock video config has no thumb; the transcode makes its own.
        assert_eq!(scheduler.plan(FileType::Video, "default").names(), vec!["default"]);
        assert!(scheduler.plan(FileType::Audio, "default").is_empty());
    }

    #[test]
    fn audio_never_gets_a_thumb() {
        let mut library = LibraryConfig::default();
        library.file_types.get_mut(&FileType::Audio).expect("audio").thumb = Some(ThumbConfig {
            transformer: Some("resize".into()),
            queued: QueuePolicy::Inline,
            config: json!({}),
            defaults: BTreeMap::new(),
        });
        let scheduler = TransformationScheduler::new(Arc::new(library));
        assert!(scheduler.descriptor(FileType::Audio, THUMB_NAME).is_none());
    }

    #[test]
    fn default_flag_promotes_except_for_thumb() {
        let default = TransformationDescriptor::new("resize", QueuePolicy::Inline, json!({ "default": true }));
        let plain = TransformationDescriptor::new("resize", QueuePolicy::Inline, json!({}));

        assert!(matches!(
            TransformationScheduler::decide("default", &default, Some(output("default"))),
            MergeDecision::Promote(_)
        ));
        assert!(matches!(
            TransformationScheduler::decide("thumb", &default, Some(output("thumb"))),
            MergeDecision::Record(_)
        ));
        assert!(matches!(
            TransformationScheduler::decide("banner", &plain, Some(output("banner"))),
            MergeDecision::Record(_)
        ));
        assert_eq!(
            TransformationScheduler::decide("banner", &plain, None),
            MergeDecision::Skip
        );
    }

    fn stored_file(extension: &str) -> File {
        let now = chrono::Utc::now();
        File {
            id: Uuid::new_v4(),
            name: None,
            caption: None,
            file_type: FileType::Video,
            file_group: DEFAULT_GROUP.into(),
            disk: "media".into(),
            filename: "clip".into(),
            extension: extension.into(),
            mime_type: "video/quicktime".into(),
            size: 10,
            width: None,
            height: None,
            is_hidden: false,
            completed: true,
            properties: json!({}),
            owner_id: None,
            user_id: None,
            category_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn memory_stores() -> (Arc<MemoryStore>, Stores) {
        let records = Arc::new(MemoryStore::new());
        let stores = Stores::memory(records.clone(), Arc::new(MemoryJobStore::new()));
        (records, stores)
    }

    #[tokio::test]
    async fn merge_into_deleted_file_is_a_noop() {
        let scheduler = TransformationScheduler::new(library());
        let (records, stores) = memory_stores();
        let storage = MemoryStorage::new();
        let plain = TransformationDescriptor::new("resize", QueuePolicy::Inline, json!({}));
        let default = TransformationDescriptor::new("resize", QueuePolicy::Inline, json!({ "default": true }));
        let gone = stored_file("png");

        let recorded = scheduler
            .merge(&gone, "banner", &plain, Some(output("banner")), &stores, &storage)
            .await
            .unwrap();
        let promoted = scheduler
            .merge(&gone, "default", &default, Some(output("default")), &stores, &storage)
            .await
            .unwrap();

        assert_eq!(recorded, MergeOutcome::Orphaned);
        assert_eq!(promoted, MergeOutcome::Orphaned);
        assert_eq!(records.transformation_count(), 0);
    }

    #[tokio::test]
    async fn promotion_to_new_extension_retires_old_original_after_update() {
        let scheduler = TransformationScheduler::new(library());
        let (records, stores) = memory_stores();
        let storage = MemoryStorage::new();
        let file = records.insert(&stored_file("mov")).await.unwrap();
        let transcoded = TransformationOutput {
            file_type: FileType::Video,
            filename: "upload".into(),
            extension: "mp4".into(),
            mime_type: "video/mp4".into(),
            ..output("default")
        };
        storage
            .put(&file.upload_key(), Bytes::from_static(b"mov"), "video/quicktime")
            .await
            .unwrap();
        storage
            .put(&transcoded.object_key(file.id), Bytes::from_static(b"mp4"), "video/mp4")
            .await
            .unwrap();
        let default = TransformationDescriptor::new("video", QueuePolicy::Inline, json!({ "default": true }));

        let outcome = scheduler
            .merge(&file, "default", &default, Some(transcoded), &stores, &storage)
            .await
            .unwrap();

        assert_eq!(outcome, MergeOutcome::Promoted { file_id: file.id });
        let promoted = records.get(file.id).await.unwrap().unwrap();
        assert_eq!(promoted.extension, "mp4");
        assert_eq!(storage.keys(), vec![promoted.upload_key()]);
    }

    #[tokio::test]
    async fn orphaned_promotion_keeps_objects() {
        let scheduler = TransformationScheduler::new(library());
        let (_, stores) = memory_stores();
        let storage = MemoryStorage::new();
        let gone = stored_file("mov");
        storage
            .put(&gone.upload_key(), Bytes::from_static(b"mov"), "video/quicktime")
            .await
            .unwrap();
        let default = TransformationDescriptor::new("video", QueuePolicy::Inline, json!({ "default": true }));
        let transcoded = TransformationOutput {
            extension: "mp4".into(),
            ..output("default")
        };

        scheduler
            .merge(&gone, "default", &default, Some(transcoded), &stores, &storage)
            .await
            .unwrap();

        assert_eq!(storage.keys(), vec![gone.upload_key()]);
    }

    #[test]
    fn outcome_serializes_as_tagged_json() {
        let json = serde_json::to_value(MergeOutcome::Recorded { transformation_id: 7 }).unwrap();
        assert_eq!(json, json!({ "outcome": "recorded", "transformation_id": 7 }));
    }
}
