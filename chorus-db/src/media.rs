use chorus_common::model::media::{MediaKind, MediaRef};
use chorus_feed::{
    media::MediaUpload,
    service::{self, MediaPipeline, ServiceError},
};
use rand::{Rng, distr::Alphanumeric};
use sqlx::PgPool;
use tracing::debug;

pub const OBJECT_KEY_LENGTH: usize = 13;

/// Keeps uploaded media in Postgres and hands out links under
/// `{public_base}/media/`.
pub struct PgMediaStore {
    pool: PgPool,
    public_base: String,
}

impl PgMediaStore {
    pub fn new(pool: PgPool, public_base: impl Into<String>) -> Self {
        let public_base = public_base.into().trim_end_matches('/').to_owned();
        Self { pool, public_base }
    }

    #[must_use]
    pub fn public_url(&self, object_key: &str) -> String {
        format!("{}/media/{object_key}", self.public_base)
    }

    pub async fn store_object(
        &self,
        upload: &MediaUpload,
        kind: MediaKind,
    ) -> Result<String, sqlx::Error> {
        let object_key = object_key(upload.extension());

        sqlx::query(
            "
            INSERT INTO media.objects (object_key, content_type, kind, bytes)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(&object_key)
        .bind(&upload.content_type)
        .bind(kind.as_str())
        .bind(upload.bytes.as_slice())
        .execute(&self.pool)
        .await?;

        debug!(%object_key, size = upload.size(), %kind, "Stored media object");
        Ok(object_key)
    }
}

/// A random alphanumeric key, keeping the file extension if there is one.
fn object_key(extension: Option<&str>) -> String {
    let stem: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(OBJECT_KEY_LENGTH)
        .map(char::from)
        .collect();

    match extension {
        Some(extension) => format!("{stem}.{extension}"),
        None => stem,
    }
}

impl MediaPipeline for PgMediaStore {
    async fn upload_media(
        &self,
        upload: &MediaUpload,
        kind: MediaKind,
    ) -> service::Result<MediaRef> {
        let object_key = self
            .store_object(upload, kind)
            .await
            .map_err(|error| ServiceError::new("upload_media", error))?;

        Ok(MediaRef {
            url: self.public_url(&object_key),
            kind,
        })
    }
}
