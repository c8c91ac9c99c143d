//! Names and defaults shared across crates.

/// Transformation group used when a file has none, or names an unknown one.
pub const DEFAULT_GROUP: &str = "default";

/// Reserved object name for the canonical original.
pub const UPLOAD_NAME: &str = "upload";

/// Distinguished thumbnail transformation, always a named Transformation.
pub const THUMB_NAME: &str = "thumb";

/// Full-size preview rendition produced by document and video transformers.
pub const PREVIEW_NAME: &str = "preview";

/// Extension of generated preview frames and pages.
pub const PREVIEW_EXTENSION: &str = "jpg";

/// Disk used when neither the upload call nor the environment picks one.
pub const DEFAULT_DISK: &str = "media";

/// Default queue for deferred invocations with `queued: true`.
pub const DEFAULT_QUEUE: &str = "default";

/// Lifetime of pre-signed URLs (20 minutes).
pub const PRESIGNED_URL_EXPIRY_SECS: u64 = 1200;

/// Cache-Control returned with pre-signed responses.
pub const PRESIGNED_CACHE_CONTROL: &str = "private, max-age=1200";

/// PostgreSQL NOTIFY channel signalled when a job is enqueued.
pub const JOB_NOTIFY_CHANNEL: &str = "medialib_new_job";
