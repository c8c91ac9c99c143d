//! Media library configuration
//!
//! One immutable [`LibraryConfig`] is built at process start (from JSON or the
//! stock defaults) and handed to the classifier, scheduler, transformers and
//! URL generators. Nothing reads configuration by string path at runtime.
//!
//! ```json
//! {
//!   "disk": "media",
//!   "disks": { "media": { "driver": "local", "root": "/var/lib/medialib", "url": "https://cdn.example.com" } },
//!   "file_types": {
//!     "image": {
//!       "mimes": { "jpg": "image/jpeg", "png": "image/png" },
//!       "thumb": { "transformer": "resize", "queued": false, "config": { "fit": true, "size": { "w": 200, "h": 200 } } },
//!       "transformations": { "default": { "transformer": "resize", "queued": false, "config": { "default": true, "size": { "w": 2048 } } } },
//!       "transformation_groups": { "default": ["default"] },
//!       "max_file_size": 10485760
//!     }
//!   }
//! }
//! ```

use anyhow::Context;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::constants::{DEFAULT_DISK, DEFAULT_QUEUE, THUMB_NAME};
use crate::{FileType, StorageBackend};

const MB: u64 = 1024 * 1024;

/// Execution lane of a transformation: `false`, `true` or a queue name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "RawQueuePolicy", into = "RawQueuePolicy")]
pub enum QueuePolicy {
    /// Run synchronously inside the triggering call.
    Inline,
    /// Deferred on the default queue.
    #[default]
    Default,
    /// Deferred on a dedicated queue.
    Named(String),
}

impl QueuePolicy {
    pub fn is_inline(&self) -> bool {
        matches!(self, QueuePolicy::Inline)
    }

    /// Queue a deferred invocation lands on, `None` for inline execution.
    pub fn queue_name(&self) -> Option<&str> {
        match self {
            QueuePolicy::Inline => None,
            QueuePolicy::Default => Some(DEFAULT_QUEUE),
            QueuePolicy::Named(name) => Some(name),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawQueuePolicy {
    Flag(bool),
    Name(String),
}

impl From<RawQueuePolicy> for QueuePolicy {
    fn from(raw: RawQueuePolicy) -> Self {
        match raw {
            RawQueuePolicy::Flag(false) => QueuePolicy::Inline,
            RawQueuePolicy::Flag(true) => QueuePolicy::Default,
            RawQueuePolicy::Name(name) if name.trim().is_empty() => QueuePolicy::Default,
            RawQueuePolicy::Name(name) => QueuePolicy::Named(name),
        }
    }
}

impl From<QueuePolicy> for RawQueuePolicy {
    fn from(policy: QueuePolicy) -> Self {
        match policy {
            QueuePolicy::Inline => RawQueuePolicy::Flag(false),
            QueuePolicy::Default => RawQueuePolicy::Flag(true),
            QueuePolicy::Named(name) => RawQueuePolicy::Name(name),
        }
    }
}

/// One MIME string or several for an extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MimeList {
    One(String),
    Many(Vec<String>),
}

impl MimeList {
    pub fn iter(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        match self {
            MimeList::One(mime) => Box::new(std::iter::once(mime.as_str())),
            MimeList::Many(mimes) => Box::new(mimes.iter().map(String::as_str)),
        }
    }

    pub fn first(&self) -> Option<&str> {
        self.iter().next()
    }
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// `{ transformer, queued, config }` entry of a file type's transformations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationDescriptor {
    /// Registry id of the transformer implementation.
    pub transformer: String,
    #[serde(default)]
    pub queued: QueuePolicy,
    #[serde(default = "empty_object")]
    pub config: serde_json::Value,
}

impl TransformationDescriptor {
    pub fn new(transformer: impl Into<String>, queued: QueuePolicy, config: serde_json::Value) -> Self {
        Self {
            transformer: transformer.into(),
            queued,
            config,
        }
    }

    /// Output replaces the file's canonical fields instead of becoming a
    /// Transformation record (`config.default: true`).
    pub fn is_default(&self) -> bool {
        self.config
            .get("default")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// Typed view of the transformer config.
    pub fn config_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.config.clone())
    }
}

/// Thumbnail settings of a file type. The transformer is optional so a type
/// can carry only static `defaults` (e.g. an audio icon URL).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThumbConfig {
    #[serde(default)]
    pub transformer: Option<String>,
    #[serde(default)]
    pub queued: QueuePolicy,
    #[serde(default = "empty_object")]
    pub config: serde_json::Value,
    /// Static URLs returned for a transformation name that does not exist (yet).
    #[serde(default)]
    pub defaults: BTreeMap<String, String>,
}

impl ThumbConfig {
    pub fn descriptor(&self) -> Option<TransformationDescriptor> {
        self.transformer.as_ref().map(|transformer| TransformationDescriptor {
            transformer: transformer.clone(),
            queued: self.queued.clone(),
            config: self.config.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileTypeConfig {
    /// extension → MIME string or list
    pub mimes: BTreeMap<String, MimeList>,
    #[serde(default, alias = "transformationGroups")]
    pub transformation_groups: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub thumb: Option<ThumbConfig>,
    #[serde(default)]
    pub transformations: BTreeMap<String, TransformationDescriptor>,
    /// Maximum upload size in bytes.
    pub max_file_size: u64,
    /// Run default-promoting transformations inline during upload.
    #[serde(default)]
    pub wait_for_default_transformation: bool,
}

impl FileTypeConfig {
    pub fn mime_types(&self) -> impl Iterator<Item = &str> {
        self.mimes.values().flat_map(MimeList::iter)
    }

    pub fn mime_for_extension(&self, extension: &str) -> Option<&str> {
        self.mimes
            .get(&extension.to_lowercase())
            .and_then(MimeList::first)
    }

    /// Static fallback URL for a missing transformation.
    pub fn static_default(&self, name: &str) -> Option<&str> {
        self.thumb
            .as_ref()
            .and_then(|thumb| thumb.defaults.get(name))
            .map(String::as_str)
            .filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskConfig {
    pub driver: StorageBackend,
    /// Root directory (local driver).
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Public base URL objects are served from.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible providers.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    /// Azure storage account (azure URL generator).
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub container: Option<String>,
    /// URL generator registry id; defaults per driver.
    #[serde(default)]
    pub url_generator: Option<String>,
    #[serde(default)]
    pub presigned_expires_secs: Option<u64>,
}

impl DiskConfig {
    pub fn local(root: impl Into<PathBuf>, url: impl Into<String>) -> Self {
        Self {
            driver: StorageBackend::Local,
            root: Some(root.into()),
            url: Some(url.into()),
            bucket: None,
            region: None,
            endpoint: None,
            key: None,
            secret: None,
            account: None,
            container: None,
            url_generator: None,
            presigned_expires_secs: None,
        }
    }

    pub fn url_generator_id(&self) -> &str {
        match (&self.url_generator, self.driver) {
            (Some(id), _) => id,
            (None, StorageBackend::S3) => "s3",
            (None, StorageBackend::Local | StorageBackend::Memory) => "public",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationsConfig {
    /// Entity the `owner_id` column points at.
    #[serde(default)]
    pub owner: Option<String>,
    /// Entity the `user_id` column points at.
    #[serde(default)]
    pub user: Option<String>,
    /// relation name → attachable type stored in the join table
    #[serde(default)]
    pub attachment: BTreeMap<String, String>,
}

fn default_disk() -> String {
    DEFAULT_DISK.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryConfig {
    #[serde(default = "default_disk")]
    pub disk: String,
    #[serde(default)]
    pub disks: BTreeMap<String, DiskConfig>,
    #[serde(default)]
    pub relations: RelationsConfig,
    #[serde(alias = "files_types")]
    pub file_types: BTreeMap<FileType, FileTypeConfig>,
}

impl LibraryConfig {
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let config: LibraryConfig =
            serde_json::from_str(json).context("Failed to parse media library configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| {
            format!("Failed to read media library configuration {}", path.display())
        })?;
        Self::from_json_str(&raw)
    }

    pub fn file_type(&self, file_type: FileType) -> Option<&FileTypeConfig> {
        self.file_types.get(&file_type)
    }

    pub fn disk_config(&self, name: &str) -> Option<&DiskConfig> {
        self.disks.get(name)
    }

    /// First configured MIME type for an extension, across all file types.
    pub fn mime_for_extension(&self, extension: &str) -> Option<&str> {
        self.file_types
            .values()
            .find_map(|config| config.mime_for_extension(extension))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.disks.is_empty() && !self.disks.contains_key(&self.disk) {
            return Err(anyhow::anyhow!(
                "Default disk '{}' is not configured under disks",
                self.disk
            ));
        }

        for (file_type, config) in &self.file_types {
            if config.max_file_size == 0 {
                return Err(anyhow::anyhow!(
                    "{}.max_file_size must be greater than zero",
                    file_type
                ));
            }

            for (group, names) in &config.transformation_groups {
                for name in names {
                    if name != THUMB_NAME && !config.transformations.contains_key(name) {
                        return Err(anyhow::anyhow!(
                            "{}.transformation_groups.{} references unknown transformation '{}'",
                            file_type,
                            group,
                            name
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}

fn mimes(entries: &[(&str, &[&str])]) -> BTreeMap<String, MimeList> {
    entries
        .iter()
        .map(|(extension, types)| {
            let list = match types {
                [single] => MimeList::One(single.to_string()),
                many => MimeList::Many(many.iter().map(|t| t.to_string()).collect()),
            };
            (extension.to_string(), list)
        })
        .collect()
}

fn groups(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
    entries
        .iter()
        .map(|(group, names)| {
            (
                group.to_string(),
                names.iter().map(|n| n.to_string()).collect(),
            )
        })
        .collect()
}

fn fit_thumb(transformer: &str, queued: QueuePolicy) -> ThumbConfig {
    ThumbConfig {
        transformer: Some(transformer.to_string()),
        queued,
        config: serde_json::json!({ "fit": true, "size": { "w": 200, "h": 200 } }),
        defaults: BTreeMap::new(),
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        let mut file_types = BTreeMap::new();

        file_types.insert(
            FileType::Image,
            FileTypeConfig {
                mimes: mimes(&[
                    ("gif", &["image/gif"]),
                    ("jpeg", &["image/jpeg"]),
                    ("jpg", &["image/jpeg"]),
                    ("ico", &["image/x-icon"]),
                    ("png", &["image/png"]),
                ]),
                transformation_groups: groups(&[("default", &[])]),
                thumb: Some(fit_thumb("resize", QueuePolicy::Inline)),
                transformations: BTreeMap::new(),
                max_file_size: 10 * MB,
                wait_for_default_transformation: false,
            },
        );

        let mut video_transformations = BTreeMap::new();
        video_transformations.insert(
            "default".to_string(),
            TransformationDescriptor::new(
                "video",
                QueuePolicy::Named("medialib_video".to_string()),
                serde_json::json!({
                    "default": true,
                    "extension": "mp4",
                    "video": { "codec": "h264", "resolution": "1280x720" },
                    "audio": { "codec": "aac" },
                    "preview": { "size": { "w": 1280 } },
                    "thumb": { "fit": true, "size": { "w": 200, "h": 200 } }
                }),
            ),
        );
        file_types.insert(
            FileType::Video,
            FileTypeConfig {
                mimes: mimes(&[
                    ("avi", &["video/avi", "video/msvideo", "video/x-msvideo"]),
                    ("mpeg", &["video/mpeg"]),
                    ("mpeg4", &["video/mp4v-es"]),
                    ("mp4", &["video/mp4v-es", "video/mp4"]),
                    ("mov", &["video/quicktime"]),
                    ("wmv", &["video/x-ms-wmv"]),
                    ("flv", &["video/x-flv"]),
                    ("3gpp", &["video/3gpp"]),
                    ("webm", &["video/webm"]),
                    ("ogg", &["video/ogg", "application/ogg"]),
                    ("ogv", &["video/ogg"]),
                ]),
                transformation_groups: groups(&[("default", &["default"])]),
                thumb: None,
                transformations: video_transformations,
                max_file_size: 500 * MB,
                wait_for_default_transformation: false,
            },
        );

        let powerpoint: &[&str] = &["application/mspowerpoint", "application/vnd.ms-powerpoint"];
        file_types.insert(
            FileType::Document,
            FileTypeConfig {
                mimes: mimes(&[
                    (
                        "pdf",
                        &[
                            "application/pdf",
                            "application/x-pdf",
                            "application/acrobat",
                            "applications/vnd.pdf",
                            "text/pdf",
                            "text/x-pdf",
                            "application/download",
                            "application/x-download",
                            "application/save-as",
                        ],
                    ),
                    ("doc", &["application/msword"]),
                    ("dot", &["application/msword"]),
                    (
                        "docx",
                        &["application/vnd.openxmlformats-officedocument.wordprocessingml.document"],
                    ),
                    ("txt", &["text/plain"]),
                    ("pot", powerpoint),
                    ("ppa", powerpoint),
                    ("pps", powerpoint),
                    ("pws", &["application/vnd.ms-powerpoint"]),
                    (
                        "ppt",
                        &[
                            "application/mspowerpoint",
                            "application/powerpoint",
                            "application/vnd.ms-powerpoint",
                            "application/x-mspowerpoint",
                            "application/vnd.openxmlformats-officedocument.presentationml.presentation",
                        ],
                    ),
                    ("pptm", &["application/vnd.ms-powerpoint.presentation.macroEnabled.12"]),
                    (
                        "pptx",
                        &["application/vnd.openxmlformats-officedocument.presentationml.presentation"],
                    ),
                    ("xls", &["application/vnd.ms-excel"]),
                    ("xlt", &["application/vnd.ms-excel"]),
                    ("xla", &["application/vnd.ms-excel"]),
                    (
                        "xlsx",
                        &["application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"],
                    ),
                ]),
                transformation_groups: groups(&[("default", &[])]),
                thumb: Some(fit_thumb("document", QueuePolicy::Default)),
                transformations: BTreeMap::new(),
                max_file_size: 10 * MB,
                wait_for_default_transformation: false,
            },
        );

        file_types.insert(
            FileType::Audio,
            FileTypeConfig {
                mimes: mimes(&[
                    ("mp3", &["audio/mpeg3", "audio/x-mpeg-3"]),
                    ("wav", &["audio/wav", "audio/x-wav"]),
                    ("ogg", &["application/ogg"]),
                    ("m4a", &["audio/mp4", "audio/x-m4a"]),
                ]),
                transformation_groups: BTreeMap::new(),
                thumb: None,
                transformations: BTreeMap::new(),
                max_file_size: 50 * MB,
                wait_for_default_transformation: false,
            },
        );

        let mut disks = BTreeMap::new();
        disks.insert(
            DEFAULT_DISK.to_string(),
            DiskConfig::local("storage/media", "http://localhost:8080/media"),
        );

        Self {
            disk: DEFAULT_DISK.to_string(),
            disks,
            relations: RelationsConfig::default(),
            file_types,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_policy_accepts_bool_and_name() {
        let inline: QueuePolicy = serde_json::from_str("false").unwrap();
        let default: QueuePolicy = serde_json::from_str("true").unwrap();
        let named: QueuePolicy = serde_json::from_str("\"medialib_video\"").unwrap();

        assert_eq!(inline, QueuePolicy::Inline);
        assert_eq!(default.queue_name(), Some(DEFAULT_QUEUE));
        assert_eq!(named.queue_name(), Some("medialib_video"));
        assert_eq!(serde_json::to_string(&inline).unwrap(), "false");
    }

    #[test]
    fn descriptor_defaults_to_default_queue() {
        let descriptor: TransformationDescriptor =
            serde_json::from_str(r#"{ "transformer": "resize" }"#).unwrap();
        assert_eq!(descriptor.queued, QueuePolicy::Default);
        assert!(!descriptor.is_default());
        assert!(descriptor.config.is_object());
    }

    #[test]
    fn default_flag_comes_from_config() {
        let descriptor: TransformationDescriptor = serde_json::from_str(
            r#"{ "transformer": "video", "queued": "videos", "config": { "default": true } }"#,
        )
        .unwrap();
        assert!(descriptor.is_default());
    }

    #[test]
    fn stock_config_is_valid() {
        let config = LibraryConfig::default();
        config.validate().unwrap();
        assert_eq!(
            config.file_type(FileType::Video).unwrap().max_file_size,
            500 * MB
        );
        assert_eq!(config.mime_for_extension("PNG"), Some("image/png"));
        assert_eq!(config.disk_config("media").unwrap().url_generator_id(), "public");
    }

    #[test]
    fn parses_camel_case_groups_and_thumb_defaults() {
        let config = LibraryConfig::from_json_str(
            r#"{
                "file_types": {
                    "audio": {
                        "mimes": { "mp3": ["audio/mpeg3", "audio/x-mpeg-3"] },
                        "thumb": { "defaults": { "thumb": "https://cdn.example.com/audio.png" } },
                        "transformationGroups": { "default": [] },
                        "max_file_size": 1024
                    }
                }
            }"#,
        )
        .unwrap();

        let audio = config.file_type(FileType::Audio).unwrap();
        assert_eq!(audio.static_default("thumb"), Some("https://cdn.example.com/audio.png"));
        assert!(audio.thumb.as_ref().unwrap().descriptor().is_none());
        assert_eq!(config.disk, DEFAULT_DISK);
    }

    #[test]
    fn rejects_group_with_unknown_transformation() {
        let err = LibraryConfig::from_json_str(
            r#"{
                "file_types": {
                    "image": {
                        "mimes": { "png": "image/png" },
                        "transformation_groups": { "default": ["retina"] },
                        "max_file_size": 1024
                    }
                }
            }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("retina"));
    }
}
