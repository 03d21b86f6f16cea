use crate::media::{DEFAULT_MAX_MEDIA_BYTES, MediaLimits};
use serde::Deserialize;
use std::num::NonZeroU32;

pub const ENV_PREFIX: &str = "FEED_";

pub const DEFAULT_PAGE_SIZE: NonZeroU32 = match NonZeroU32::new(5) {
    Some(page_size) => page_size,
    None => NonZeroU32::MIN,
};

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_page_size")]
    pub page_size: NonZeroU32,
    #[serde(default = "default_max_media_bytes")]
    pub max_media_bytes: u64,
    /// Base of the shareable post links.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

fn default_page_size() -> NonZeroU32 {
    DEFAULT_PAGE_SIZE
}

fn default_max_media_bytes() -> u64 {
    DEFAULT_MAX_MEDIA_BYTES
}

fn default_public_url() -> String {
    "http://localhost:3000".to_owned()
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_media_bytes: default_max_media_bytes(),
            public_url: default_public_url(),
        }
    }
}

impl FeedConfig {
    /// Reads `FEED_PAGE_SIZE`, `FEED_MAX_MEDIA_BYTES` and `FEED_PUBLIC_URL`.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed(ENV_PREFIX).from_env()
    }

    #[must_use]
    pub fn media_limits(&self) -> MediaLimits {
        MediaLimits {
            max_bytes: self.max_media_bytes,
        }
    }
}
