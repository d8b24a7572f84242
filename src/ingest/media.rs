use crate::catalog::{AttachmentRef, CatalogId, CatalogStore, MediaUpload, StoreError};
use crate::config::MediaConfig;
use crate::models::ImageSource;
use reqwest::{Client, Url, header::CONTENT_TYPE};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum MediaOutcome {
    Attached(AttachmentRef),
    NoImage,
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("file type `{0}` is not allowed")]
    UnsupportedType(String),
    #[error("media is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("fetch returned HTTP {0}")]
    HttpStatus(u16),
    #[error("upload failed: {0}")]
    Upload(#[from] StoreError),
}

/// Attaches a primary image to a catalog object. Failures never abort the
/// surrounding write: they are logged and reported as [`MediaOutcome::NoImage`].
#[derive(Clone)]
pub struct MediaAcquirer {
    store: Arc<dyn CatalogStore>,
    http: Client,
    config: MediaConfig,
}

impl MediaAcquirer {
    pub fn new(store: Arc<dyn CatalogStore>, http: Client, config: MediaConfig) -> Self {
        Self {
            store,
            http,
            config,
        }
    }

    pub async fn acquire(&self, source: Option<&ImageSource>, id: CatalogId) -> MediaOutcome {
        let prepared = match source {
            None => return MediaOutcome::NoImage,
            Some(ImageSource::Upload { bytes, filename }) => {
                self.prepare(filename.clone(), bytes.clone(), None)
            }
            Some(ImageSource::Url(raw)) => match absolute_url(raw) {
                Some(url) => self.fetch(url).await,
                None => {
                    debug!(target = "catalog.media", product_id = %id, url = %raw, "image_url_ignored");
                    return MediaOutcome::NoImage;
                }
            },
        };

        let attached = match prepared {
            Ok(upload) => self
                .store
                .attach_image(id, upload)
                .await
                .map_err(MediaError::from),
            Err(err) => Err(err),
        };

        match attached {
            Ok(attachment) => {
                info!(
                    target = "catalog.media",
                    product_id = %id,
                    attachment_id = %attachment.id,
                    filename = %attachment.filename,
                    "image_attached"
                );
                MediaOutcome::Attached(attachment)
            }
            Err(err) => {
                warn!(target = "catalog.media", product_id = %id, error = %err, "image_skipped");
                MediaOutcome::NoImage
            }
        }
    }

    fn prepare(
        &self,
        filename: String,
        bytes: Vec<u8>,
        content_type: Option<String>,
    ) -> Result<MediaUpload, MediaError> {
        let extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        if !self.config.allowed_types.iter().any(|allowed| *allowed == extension) {
            return Err(MediaError::UnsupportedType(extension));
        }
        if bytes.len() > self.config.max_bytes {
            return Err(MediaError::TooLarge {
                size: bytes.len(),
                limit: self.config.max_bytes,
            });
        }
        let content_type = content_type
            .filter(|value| value.starts_with("image/"))
            .unwrap_or_else(|| content_type_for(&extension).to_string());
        Ok(MediaUpload {
            filename,
            content_type,
            bytes,
        })
    }

    async fn fetch(&self, url: Url) -> Result<MediaUpload, MediaError> {
        let mut response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|err| MediaError::Fetch(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::HttpStatus(status.as_u16()));
        }
        if let Some(length) = response.content_length() {
            if length as usize > self.config.max_bytes {
                return Err(MediaError::TooLarge {
                    size: length as usize,
                    limit: self.config.max_bytes,
                });
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string());
        // Chunked responses carry no length up front; count as we read.
        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| MediaError::Fetch(err.to_string()))?
        {
            if bytes.len() + chunk.len() > self.config.max_bytes {
                return Err(MediaError::TooLarge {
                    size: bytes.len() + chunk.len(),
                    limit: self.config.max_bytes,
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        let filename = filename_for(&url, content_type.as_deref());
        self.prepare(filename, bytes, content_type)
    }
}

fn absolute_url(raw: &str) -> Option<Url> {
    Url::parse(raw.trim())
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
}

fn filename_for(url: &Url, content_type: Option<&str>) -> String {
    let last = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .map(|segment| {
            urlencoding::decode(segment)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| segment.to_string())
        })
        .filter(|segment| !segment.is_empty())
        .unwrap_or_else(|| "image".to_string());
    if last.contains('.') {
        return last;
    }
    match content_type.and_then(extension_for) {
        Some(ext) => format!("{last}.{ext}"),
        None => last,
    }
}

fn content_type_for(extension: &str) -> &'static str {
    match extension {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

fn extension_for(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}
