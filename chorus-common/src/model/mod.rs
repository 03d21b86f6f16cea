pub mod comment;
pub mod media;
pub mod post;

use crate::{
    model::media::UnsupportedMediaTypeError,
    snowflake::{Epoch, Snowflake, SnowflakeGenerator},
};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, marker::PhantomData};
use thiserror::Error;
use time::{UtcDateTime, macros::utc_datetime};

#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum ModelValidationError {
    #[error(transparent)]
    MediaType(#[from] UnsupportedMediaTypeError),
    #[error("Like count was negative: {0}")]
    NegativeLikes(i64),
    #[error("Media reference had a url but no kind, or the other way around")]
    IncompleteMedia,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct ChorusEpoch;
impl Epoch for ChorusEpoch {
    const EPOCH_TIME: UtcDateTime = utc_datetime!(2025-01-01 00:00);
}

pub type ChorusSnowflake = Snowflake<ChorusEpoch>;
pub type ChorusSnowflakeGenerator = SnowflakeGenerator<ChorusEpoch>;

/// A snowflake tagged with the kind of entity it identifies.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Id<Marker>(ChorusSnowflake, #[serde(skip)] PhantomData<Marker>);

impl<Marker> Id<Marker> {
    #[must_use]
    pub fn new(snowflake: ChorusSnowflake) -> Self {
        Self(snowflake, PhantomData)
    }

    #[must_use]
    pub fn snowflake(self) -> ChorusSnowflake {
        self.0
    }

    #[must_use]
    pub fn created_at(self) -> UtcDateTime {
        self.0.created_at()
    }
}

impl<Marker> Display for Id<Marker> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<Marker> From<ChorusSnowflake> for Id<Marker> {
    fn from(value: ChorusSnowflake) -> Self {
        Self::new(value)
    }
}

impl<Marker> From<u64> for Id<Marker> {
    fn from(value: u64) -> Self {
        Id::new(ChorusSnowflake::new(value))
    }
}

impl<Marker> From<Id<Marker>> for u64 {
    fn from(value: Id<Marker>) -> Self {
        value.snowflake().get()
    }
}
