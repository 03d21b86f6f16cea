use chorus_common::model::media::{MediaKind, UnsupportedMediaTypeError};
use thiserror::Error;

pub const DEFAULT_MAX_MEDIA_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum MediaError {
    #[error("Media file {name} is {size} bytes, the limit is {limit} bytes")]
    TooLarge { name: String, size: u64, limit: u64 },
    #[error("Media file {0} is empty")]
    Empty(String),
    #[error(transparent)]
    Unsupported(#[from] UnsupportedMediaTypeError),
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct MediaLimits {
    pub max_bytes: u64,
}

impl Default for MediaLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_MEDIA_BYTES,
        }
    }
}

/// A file picked by the user, not yet uploaded.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct MediaUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl MediaUpload {
    #[must_use]
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// The part of the file name after the last dot, if there is one.
    #[must_use]
    pub fn extension(&self) -> Option<&str> {
        self.file_name
            .rsplit_once('.')
            .map(|(_, extension)| extension)
            .filter(|extension| !extension.is_empty())
    }
}

/// Client-side checks that run before anything is uploaded.
pub fn preflight(upload: &MediaUpload, limits: MediaLimits) -> Result<MediaKind, MediaError> {
    let size = upload.size();
    if size == 0 {
        return Err(MediaError::Empty(upload.file_name.clone()));
    }
    if size > limits.max_bytes {
        return Err(MediaError::TooLarge {
            name: upload.file_name.clone(),
            size,
            limit: limits.max_bytes,
        });
    }

    Ok(MediaKind::from_content_type(&upload.content_type)?)
}
