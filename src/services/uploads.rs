use std::sync::Arc;

use crate::{
    config::Config,
    errors::{AppError, Result},
    models::{StoredImage, UploadedFile},
    storage::Storage,
    utils::file,
};

/// Validates listing photos and writes them under random filenames.
#[derive(Clone)]
pub struct UploadService {
    storage: Arc<dyn Storage>,
    public_prefix: String,
    max_file_size: usize,
    max_files: usize,
    allowed_mime_types: Vec<String>,
}

impl UploadService {
    pub fn new(storage: Arc<dyn Storage>, config: &Config) -> Self {
        Self {
            storage,
            public_prefix: config.public_upload_prefix.clone(),
            max_file_size: config.max_file_size,
            max_files: config.max_images_per_listing,
            allowed_mime_types: config.allowed_mime_types.clone(),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Content type of an acceptable image upload.
    pub fn validate(&self, upload: &UploadedFile) -> Result<mime::Mime> {
        if upload.data.is_empty() {
            return Err(AppError::Validation("Uploaded file is empty".to_string()));
        }
        if upload.data.len() > self.max_file_size {
            return Err(AppError::Validation(format!(
                "File exceeds the {} byte limit",
                self.max_file_size
            )));
        }

        let mime_type =
            file::resolve_mime_type(upload.content_type.as_deref(), upload.file_name.as_deref())
                .ok_or_else(|| AppError::Validation("Unknown file type".to_string()))?;
        file::validate_mime_type(&mime_type, &self.allowed_mime_types)?;

        image::guess_format(&upload.data).map_err(|_| {
            AppError::Validation("File content is not a recognised image".to_string())
        })?;

        Ok(mime_type)
    }

    /// Stores every file or none of them. At least one file is required.
    pub async fn store_all(&self, uploads: &[UploadedFile]) -> Result<Vec<StoredImage>> {
        if uploads.is_empty() {
            return Err(AppError::Validation(
                "At least one image is required".to_string(),
            ));
        }
        if uploads.len() > self.max_files {
            return Err(AppError::Validation(format!(
                "At most {} images per listing",
                self.max_files
            )));
        }
        for upload in uploads {
            self.validate(upload)?;
        }

        let mut stored = Vec::with_capacity(uploads.len());
        for upload in uploads {
            let key = file::generate_filename();
            if let Err(e) = self.storage.store(&key, &upload.data).await {
                self.remove_quietly(&stored).await;
                return Err(e);
            }
            let url = file::public_url(&self.public_prefix, &key);
            stored.push(StoredImage { key, url });
        }

        tracing::debug!(count = stored.len(), "stored listing images");
        Ok(stored)
    }

    /// Best-effort cleanup of files whose listing never made it to the database.
    pub async fn remove_quietly(&self, stored: &[StoredImage]) {
        for image in stored {
            if let Err(e) = self.storage.delete(&image.key).await {
                tracing::warn!(key = %image.key, "failed to remove orphaned upload: {}", e);
            }
        }
    }
}
