use medialib_core::constants::{PREVIEW_NAME, THUMB_NAME};
use medialib_core::models::File;
use medialib_core::{AppError, FileType};
use medialib_storage::UrlError;

use super::MediaLibrary;

fn url_error(err: UrlError) -> AppError {
    match err {
        UrlError::Unsupported(msg) => AppError::Unsupported(msg),
        other => AppError::Config(other.to_string()),
    }
}

impl MediaLibrary {
    /// URL of the file, or of one of its transformations.
    ///
    /// `None` while the original is not confirmed stored, and when the named
    /// transformation does not exist and the file type has no static default
    /// for it. A forced download on a disk that cannot
    /// express one is `AppError::Unsupported`.
    pub async fn get_url(
        &self,
        file: &File,
        transformation: Option<&str>,
        full_preview: bool,
        download: bool,
    ) -> Result<Option<String>, AppError> {
        if !file.completed {
            return Ok(None);
        }

        let record = match transformation.filter(|name| !name.is_empty()) {
            Some(name) => {
                let found = self
                    .stores
                    .transformations
                    .find(file.id, name)
                    .await?
                    .filter(|t| t.completed);
                match found {
                    Some(record) => Some(record),
                    None => {
                        return Ok(self
                            .library
                            .file_type(file.file_type)
                            .and_then(|config| config.static_default(name))
                            .map(str::to_string))
                    }
                }
            }
            None => None,
        };

        let disk = self.disk(&file.disk)?;
        let url = disk
            .urls
            .url_for(file, record.as_ref(), full_preview, download)
            .await
            .map_err(url_error)?;
        Ok(Some(url))
    }

    /// Small preview: the `thumb` transformation.
    pub async fn preview_url(&self, file: &File) -> Result<Option<String>, AppError> {
        self.get_url(file, Some(THUMB_NAME), false, false).await
    }

    /// Large preview: the image itself, or the `preview` rendition of
    /// documents and videos.
    pub async fn preview_full_url(&self, file: &File) -> Result<Option<String>, AppError> {
        if file.file_type == FileType::Image {
            return self.get_url(file, None, false, false).await;
        }
        self.get_url(file, Some(PREVIEW_NAME), true, false).await
    }

    /// URL forcing a save-as of the original.
    pub async fn download_url(&self, file: &File) -> Result<Option<String>, AppError> {
        self.get_url(file, None, false, true).await
    }

    /// Whether a previewable file lacks its large preview while jobs for it
    /// are still pending or running.
    pub async fn preview_is_processing(&self, file: &File) -> Result<bool, AppError> {
        if !file.file_type.has_preview() || self.preview_full_url(file).await?.is_some() {
            return Ok(false);
        }
        Ok(self.stores.jobs.has_active_jobs(file.id).await?)
    }

    pub async fn attachment_count(&self, file: &File) -> Result<i64, AppError> {
        Ok(self.stores.attachments.attachment_count(file.id).await?)
    }
}
