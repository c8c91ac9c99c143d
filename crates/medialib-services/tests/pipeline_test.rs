//! Upload-to-derivative pipeline against in-memory stores and storage.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use medialib_core::models::{
    FileQuery, JobPayload, JobStatus, Transformation, TransformationOutput, UploadAttributes,
};
use medialib_core::{AppError, FileType, LibraryConfig, QueuePolicy, TransformationDescriptor};
use medialib_db::{FileStore, MemoryJobStore, MemoryStore, TransformationStore};
use medialib_processing::{ConversionError, ConversionOutput, ConversionRequest};
use medialib_services::{
    ConversionService, DirectUrlGenerator, Dispatch, DiskRegistry, JobOutcome, JobQueue,
    JobQueueConfig, MediaLibrary, MemoryStorage, Stores, TransformerRegistry, UploadSource,
};

fn encode(width: u32, height: u32, format: image::ImageFormat) -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        width,
        height,
        image::Rgb([180, 40, 40]),
    ));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format).unwrap();
    out.into_inner()
}

fn png(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, image::ImageFormat::Png)
}

fn jpeg(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, image::ImageFormat::Jpeg)
}

#[derive(Default)]
struct CannedConversion {
    requests: Mutex<Vec<ConversionRequest>>,
    responses: Mutex<Vec<Result<ConversionOutput, ConversionError>>>,
}

impl CannedConversion {
    fn page(self, data: Vec<u8>) -> Self {
        self.then(Ok(ConversionOutput {
            data: Bytes::from(data),
            info: None,
        }))
    }

    fn then(self, response: Result<ConversionOutput, ConversionError>) -> Self {
        self.responses.lock().unwrap().push(response);
        self
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ConversionService for CannedConversion {
    async fn convert(&self, request: &ConversionRequest) -> Result<ConversionOutput, ConversionError> {
        self.requests.lock().unwrap().push(request.clone());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(ConversionError::Transient("service unavailable".into()));
        }
        responses.remove(0)
    }
}

struct Harness {
    library: Arc<MediaLibrary>,
    records: Arc<MemoryStore>,
    jobs: Arc<MemoryJobStore>,
    storage: Arc<MemoryStorage>,
    queue: JobQueue,
}

/// Fails the first `failures` upserts, then behaves like the wrapped store.
struct FlakyTransformations {
    inner: Arc<MemoryStore>,
    failures: AtomicUsize,
}

#[async_trait]
impl TransformationStore for FlakyTransformations {
    async fn upsert(
        &self,
        file_id: Uuid,
        output: &TransformationOutput,
    ) -> anyhow::Result<Option<Transformation>> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            anyhow::bail!("connection reset while writing transformation");
        }
        self.inner.upsert(file_id, output).await
    }

    async fn list_for_file(&self, file_id: Uuid) -> anyhow::Result<Vec<Transformation>> {
        self.inner.list_for_file(file_id).await
    }

    async fn find(&self, file_id: Uuid, name: &str) -> anyhow::Result<Option<Transformation>> {
        self.inner.find(file_id, name).await
    }
}

fn harness(config: LibraryConfig, conversion: Option<Arc<CannedConversion>>) -> Harness {
    harness_with(config, conversion, |stores, _| stores)
}

fn harness_with(
    config: LibraryConfig,
    conversion: Option<Arc<CannedConversion>>,
    adapt: impl FnOnce(Stores, &Arc<MemoryStore>) -> Stores,
) -> Harness {
    let records = Arc::new(MemoryStore::new());
    let jobs = Arc::new(MemoryJobStore::new());
    let storage = Arc::new(MemoryStorage::new());
    let disks = DiskRegistry::single(
        "media",
        storage.clone(),
        Arc::new(DirectUrlGenerator::new("https://cdn.example.com")),
    );
    let conversion = conversion.map(|c| c as Arc<dyn ConversionService>);

    let stores = adapt(Stores::memory(records.clone(), jobs.clone()), &records);
    let library = MediaLibrary::builder(config, disks, stores)
        .transformers(TransformerRegistry::with_defaults(conversion))
        .build();
    let queue = JobQueue::new_no_worker(
        jobs.clone(),
        JobQueueConfig::default().with_queues(vec!["default".into()]),
        library.job_context(),
    );

    Harness {
        library,
        records,
        jobs,
        storage,
        queue,
    }
}

/// Stock config plus an inline, promoting 100px-wide resize for images.
fn promoting_images() -> LibraryConfig {
    let mut config = LibraryConfig::default();
    let image = config.file_types.get_mut(&FileType::Image).unwrap();
    image.transformations.insert(
        "default".into(),
        TransformationDescriptor::new(
            "resize",
            QueuePolicy::Inline,
            json!({ "default": true, "size": { "w": 100 } }),
        ),
    );
    image.transformation_groups = BTreeMap::from([("default".into(), vec!["default".into()])]);
    config
}

fn image_upload(width: u32, height: u32) -> UploadSource {
    UploadSource::new(png(width, height), "Holiday Photo.png", "image/png")
}

fn pdf_upload() -> UploadSource {
    UploadSource::new(b"%PDF-1.4 minimal".to_vec(), "Annual Report.pdf", "application/pdf")
}

#[test]
fn classifier_maps_configured_mimes_only() {
    let h = harness(LibraryConfig::default(), None);
    assert_eq!(h.library.classify("image/png"), Some(FileType::Image));
    assert_eq!(h.library.classify("video/quicktime"), Some(FileType::Video));
    assert_eq!(h.library.classify("application/msword"), Some(FileType::Document));
    assert_eq!(h.library.classify("audio/x-wav"), Some(FileType::Audio));
    assert_eq!(h.library.classify("application/x-unknown"), None);
}

#[tokio::test]
async fn unknown_mime_is_rejected_without_side_effects() {
    let h = harness(LibraryConfig::default(), None);
    let source = UploadSource::new(vec![1, 2, 3], "blob.bin", "application/x-unknown");

    let err = h
        .library
        .upload_file(source, UploadAttributes::default(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::UnsupportedMediaType(_)));
    assert_eq!(h.storage.put_count(), 0);
    assert!(h.library.list_files(&Default::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn oversized_upload_is_rejected_before_any_write() {
    let mut config = LibraryConfig::default();
    config.file_types.get_mut(&FileType::Image).unwrap().max_file_size = 64;
    let h = harness(config, None);

    let err = h
        .library
        .upload_file(image_upload(300, 300), UploadAttributes::default(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::PayloadTooLarge { max: 64, .. }));
    assert_eq!(h.storage.put_count(), 0);
    assert!(h.library.list_files(&Default::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_original_write_leaves_no_record() {
    let h = harness(LibraryConfig::default(), None);
    h.storage.fail_puts(true);

    let err = h
        .library
        .upload_file(image_upload(50, 50), UploadAttributes::default(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Storage(_)));
    let all = FileQuery::new().include_incomplete();
    assert!(h.library.list_files(&all).await.unwrap().is_empty());
    assert!(h.jobs.all().is_empty());
}

#[tokio::test]
async fn default_transformation_is_promoted_onto_the_file() {
    let h = harness(promoting_images(), None);

    let file = h
        .library
        .upload_file(image_upload(400, 200), UploadAttributes::default(), None)
        .await
        .unwrap();

    assert!(file.completed);
    assert_eq!((file.width, file.height), (Some(100), Some(50)));
    assert_eq!(file.extension, "png");
    assert_eq!(file.filename, "holiday-photo");

    let records = h.records.list_for_file(file.id).await.unwrap();
    let names: Vec<&str> = records.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["thumb"]);
    assert!(h.records.find(file.id, "default").await.unwrap().is_none());
    assert_eq!((records[0].width, records[0].height), (Some(200), Some(200)));
    assert!(h.jobs.all().is_empty());
}

#[tokio::test]
async fn wait_for_default_runs_deferred_promotion_inline() {
    let mut config = promoting_images();
    let image = config.file_types.get_mut(&FileType::Image).unwrap();
    image.wait_for_default_transformation = true;
    image.transformations.get_mut("default").unwrap().queued = QueuePolicy::Default;
    let h = harness(config, None);

    let file = h
        .library
        .upload_file(image_upload(400, 200), UploadAttributes::default(), None)
        .await
        .unwrap();

    assert_eq!((file.width, file.height), (Some(100), Some(50)));
    assert!(h.jobs.all().is_empty());
}

#[tokio::test]
async fn document_conversion_yields_preview_and_thumb() {
    let conversion = Arc::new(CannedConversion::default().page(jpeg(600, 800)));
    let h = harness(LibraryConfig::default(), Some(conversion.clone()));

    let file = h
        .library
        .upload_file(pdf_upload(), UploadAttributes::default(), None)
        .await
        .unwrap();

    // The document thumb is deferred on the default queue.
    assert_eq!(h.jobs.with_status(JobStatus::Pending).len(), 1);
    assert!(h.library.preview_is_processing(&file).await.unwrap());

    assert_eq!(h.queue.drain().await.unwrap(), 1);

    let mut names: Vec<String> = h
        .records
        .list_for_file(file.id)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["preview", "thumb"]);
    assert_eq!(conversion.request_count(), 1);

    assert!(!h.library.preview_is_processing(&file).await.unwrap());
    assert_eq!(
        h.library.preview_full_url(&file).await.unwrap(),
        Some(format!("https://cdn.example.com/{}/preview.jpg", file.id))
    );
    assert_eq!(
        h.library.preview_url(&file).await.unwrap(),
        Some(format!("https://cdn.example.com/{}/thumb.jpg", file.id))
    );
}

#[tokio::test]
async fn rejected_document_keeps_file_without_derivatives() {
    let conversion = Arc::new(
        CannedConversion::default().then(Err(ConversionError::Rejected("damaged pdf".into()))),
    );
    let h = harness(LibraryConfig::default(), Some(conversion));

    let file = h
        .library
        .upload_file(pdf_upload(), UploadAttributes::default(), None)
        .await
        .unwrap();
    h.queue.drain().await.unwrap();

    assert_eq!(h.records.transformation_count(), 0);
    assert_eq!(h.jobs.with_status(JobStatus::Completed).len(), 1);
    assert_eq!(
        h.library.get_url(&file, None, false, false).await.unwrap(),
        Some(format!("https://cdn.example.com/{}/upload.pdf", file.id))
    );
    assert_eq!(h.library.preview_url(&file).await.unwrap(), None);
    assert!(!h.library.preview_is_processing(&file).await.unwrap());
}

#[tokio::test]
async fn unavailable_conversion_service_is_retried() {
    let h = harness(LibraryConfig::default(), Some(Arc::new(CannedConversion::default())));

    h.library
        .upload_file(pdf_upload(), UploadAttributes::default(), None)
        .await
        .unwrap();

    assert_eq!(h.queue.process_next().await.unwrap(), Some(JobOutcome::Retrying));
    let pending = h.jobs.with_status(JobStatus::Pending);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].attempts, 1);
    assert_eq!(h.records.transformation_count(), 0);
}

#[tokio::test]
async fn delete_cascades_and_schedules_one_prefix_cleanup() {
    let h = harness(promoting_images(), None);
    let file = h
        .library
        .upload_file(image_upload(300, 300), UploadAttributes::default(), None)
        .await
        .unwrap();
    assert_eq!(h.records.list_for_file(file.id).await.unwrap().len(), 1);

    assert!(h.library.delete_file(file.id).await.unwrap());

    assert!(h.records.list_for_file(file.id).await.unwrap().is_empty());
    assert!(matches!(
        h.library.get_file(file.id).await,
        Err(AppError::NotFound(_))
    ));

    let jobs = h.jobs.all();
    assert_eq!(jobs.len(), 1);
    assert_eq!(
        jobs[0].payload().unwrap(),
        JobPayload::DeleteFile {
            file_id: file.id,
            disk: "media".into()
        }
    );

    h.queue.drain().await.unwrap();
    assert_eq!(h.storage.deleted_prefixes(), vec![format!("{}/", file.id)]);
    assert!(h.storage.keys().is_empty());

    assert!(!h.library.delete_file(file.id).await.unwrap());
}

#[tokio::test]
async fn deletion_during_pending_transformation_is_tolerated() {
    let conversion = Arc::new(CannedConversion::default().page(jpeg(600, 800)));
    let h = harness(LibraryConfig::default(), Some(conversion.clone()));

    let file = h
        .library
        .upload_file(pdf_upload(), UploadAttributes::default(), None)
        .await
        .unwrap();
    h.library.delete_file(file.id).await.unwrap();

    assert_eq!(h.queue.drain().await.unwrap(), 2);
    assert_eq!(h.jobs.with_status(JobStatus::Completed).len(), 2);
    assert_eq!(h.records.transformation_count(), 0);
    assert_eq!(conversion.request_count(), 0);
}

#[tokio::test]
async fn forced_download_on_public_disk_is_unsupported() {
    let h = harness(LibraryConfig::default(), None);
    let file = h
        .library
        .upload_file(image_upload(20, 20), UploadAttributes::default(), None)
        .await
        .unwrap();

    let err = h.library.download_url(&file).await.unwrap_err();
    assert!(matches!(err, AppError::Unsupported(_)));
}

#[tokio::test]
async fn missing_transformation_falls_back_to_static_default() {
    let mut config = LibraryConfig::default();
    config
        .file_types
        .get_mut(&FileType::Image)
        .unwrap()
        .thumb
        .as_mut()
        .unwrap()
        .defaults
        .insert("banner".into(), "https://static.example.com/banner.png".into());
    let h = harness(config, None);
    let file = h
        .library
        .upload_file(image_upload(20, 20), UploadAttributes::default(), None)
        .await
        .unwrap();

    assert_eq!(
        h.library.get_url(&file, Some("banner"), false, false).await.unwrap(),
        Some("https://static.example.com/banner.png".to_string())
    );
    assert_eq!(h.library.get_url(&file, Some("poster"), false, false).await.unwrap(), None);
    assert_eq!(
        h.library.preview_full_url(&file).await.unwrap(),
        Some(format!("https://cdn.example.com/{}/upload.png", file.id))
    );
}

#[tokio::test]
async fn retransform_overwrites_instead_of_duplicating() {
    let h = harness(promoting_images(), None);
    let file = h
        .library
        .upload_file(image_upload(400, 200), UploadAttributes::default(), None)
        .await
        .unwrap();

    for _ in 0..2 {
        let dispatch = h.library.retransform(file.id, "thumb").await.unwrap();
        assert!(matches!(dispatch, Dispatch::Inline(_)));
    }
    h.library.retransform(file.id, "default").await.unwrap();

    let records = h.records.list_for_file(file.id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "thumb");
    assert_eq!(h.records.promotion_count(), 2);

    assert!(matches!(
        h.library.retransform(file.id, "poster").await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn attachments_resolve_through_named_relations() {
    let mut config = LibraryConfig::default();
    config.relations.attachment = BTreeMap::from([("gallery".into(), "gallery".into())]);
    let h = harness(config, None);
    let file = h
        .library
        .upload_file(image_upload(20, 20), UploadAttributes::default(), None)
        .await
        .unwrap();
    let gallery = Uuid::new_v4();

    h.library.attach(file.id, "gallery", gallery).await.unwrap();

    assert_eq!(h.library.attached_to(file.id, "gallery").await.unwrap(), vec![gallery]);
    let files = h.library.attached_files("gallery", gallery).await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].id, file.id);
    assert_eq!(h.library.attachment_count(&file).await.unwrap(), 1);

    assert!(matches!(
        h.library.attach(file.id, "album", gallery).await,
        Err(AppError::InvalidInput(_))
    ));

    h.library.sync_attachments("gallery", gallery, &[]).await.unwrap();
    assert_eq!(h.library.attachment_count(&file).await.unwrap(), 0);
}

#[tokio::test]
async fn upload_attributes_are_stored() {
    let h = harness(LibraryConfig::default(), None);
    let owner = Uuid::new_v4();
    let attributes = UploadAttributes {
        name: Some("Cover".into()),
        caption: Some("Front cover".into()),
        group: Some("covers".into()),
        is_hidden: true,
        owner_id: Some(owner),
        properties: Some(json!({ "source": "scanner" })),
        ..Default::default()
    };

    let file = h
        .library
        .upload_file(image_upload(64, 32), attributes, None)
        .await
        .unwrap();

    assert_eq!(file.display_name(), "Cover");
    assert_eq!(file.file_group, "covers");
    assert!(file.is_hidden);
    assert_eq!(file.owner_id, Some(owner));
    assert_eq!((file.width, file.height), (Some(64), Some(32)));
    assert_eq!(file.properties["source"], "scanner");
    // Unknown group: planned as `default`, so the stock thumb still runs.
    assert!(h.records.find(file.id, "thumb").await.unwrap().is_some());
    assert!(h.storage.object(&file.upload_key()).is_some());
}

#[tokio::test]
async fn incomplete_file_is_neither_listed_nor_addressable() {
    let h = harness(LibraryConfig::default(), None);
    let stored = h
        .library
        .upload_file(image_upload(20, 20), UploadAttributes::default(), None)
        .await
        .unwrap();
    let mut pending = stored.clone();
    pending.id = Uuid::new_v4();
    pending.completed = false;
    let pending = h.records.insert(&pending).await.unwrap();

    assert_eq!(h.library.get_url(&pending, None, false, false).await.unwrap(), None);
    assert_eq!(h.library.preview_url(&pending).await.unwrap(), None);

    let listed = h.library.list_files(&Default::default()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, stored.id);

    let listed = h
        .library
        .list_files(&FileQuery::new().include_incomplete())
        .await
        .unwrap();
    assert_eq!(listed.len(), 2);
}

#[tokio::test]
async fn transcode_retry_keeps_original_until_promotion() {
    let frame = || {
        Ok(ConversionOutput {
            data: Bytes::from(jpeg(1280, 720)),
            info: Some(json!({
                "streams": [
                    { "codec_type": "video", "codec_name": "h264", "width": 1280, "height": 720 },
                    { "codec_type": "audio", "codec_name": "aac" }
                ]
            })),
        })
    };
    let transcoded = || {
        Ok(ConversionOutput {
            data: Bytes::from_static(b"transcoded video"),
            info: None,
        })
    };
    let conversion = Arc::new(
        CannedConversion::default()
            .then(frame())
            .then(transcoded())
            .then(frame())
            .then(transcoded()),
    );
    let h = harness_with(LibraryConfig::default(), Some(conversion.clone()), |stores, records| {
        // The first write of a side rendition fails once.
        Stores {
            transformations: Arc::new(FlakyTransformations {
                inner: records.clone(),
                failures: AtomicUsize::new(1),
            }),
            ..stores
        }
    });
    let videos = JobQueue::new_no_worker(
        h.jobs.clone(),
        JobQueueConfig::default().with_queues(vec!["medialib_video".into()]),
        h.library.job_context(),
    );

    let file = h
        .library
        .upload_file(
            UploadSource::new(b"quicktime bytes".to_vec(), "clip.mov", "video/quicktime"),
            UploadAttributes::default(),
            None,
        )
        .await
        .unwrap();
    let original = file.upload_key();

    assert_eq!(videos.process_next().await.unwrap(), Some(JobOutcome::Retrying));
    let current = h.library.get_file(file.id).await.unwrap();
    assert_eq!(current.extension, "mov");
    assert!(h.storage.object(&original).is_some());

    h.jobs.release_backoff();
    assert_eq!(videos.process_next().await.unwrap(), Some(JobOutcome::Completed));

    let requests = conversion.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 4);
    assert_eq!(requests[2].file_url, requests[0].file_url);
    assert!(requests[2].file_url.ends_with("/upload.mov"));

    let promoted = h.library.get_file(file.id).await.unwrap();
    assert_eq!(promoted.extension, "mp4");
    assert!(h.storage.object(&promoted.upload_key()).is_some());
    assert!(h.storage.object(&original).is_none());
    assert_eq!(h.storage.keys().len(), 3);

    let mut names: Vec<String> = h
        .records
        .list_for_file(file.id)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["preview", "thumb"]);
}
