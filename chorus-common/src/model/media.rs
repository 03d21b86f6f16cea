use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};
use thiserror::Error;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Unsupported media type: {0}")]
pub struct UnsupportedMediaTypeError(pub String);

impl MediaKind {
    /// Classifies a MIME content type such as `image/png`.
    pub fn from_content_type(content_type: &str) -> Result<Self, UnsupportedMediaTypeError> {
        let top_level = content_type
            .split_once('/')
            .map_or(content_type, |(top_level, _)| top_level)
            .trim();

        match top_level.to_ascii_lowercase().as_str() {
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            _ => Err(UnsupportedMediaTypeError(content_type.to_owned())),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

impl Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = UnsupportedMediaTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            _ => Err(UnsupportedMediaTypeError(s.to_owned())),
        }
    }
}

/// Where an uploaded attachment lives once the media pipeline accepted it.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct MediaRef {
    pub url: String,
    pub kind: MediaKind,
}

#[cfg(test)]
mod tests {
    use crate::model::media::MediaKind;

    #[test]
    fn content_types() {
        assert_eq!(MediaKind::from_content_type("image/png"), Ok(MediaKind::Image));
        assert_eq!(MediaKind::from_content_type("VIDEO/mp4"), Ok(MediaKind::Video));
        assert_eq!(MediaKind::from_content_type("audio/ogg"), Ok(MediaKind::Audio));
        assert!(MediaKind::from_content_type("application/pdf").is_err());
        assert!(MediaKind::from_content_type("").is_err());
        assert!(MediaKind::from_content_type("imagery/png").is_err());
    }

    #[test]
    fn names_round_trip() {
        for kind in [MediaKind::Image, MediaKind::Video, MediaKind::Audio] {
            assert_eq!(kind.as_str().parse::<MediaKind>(), Ok(kind));
        }
    }
}
