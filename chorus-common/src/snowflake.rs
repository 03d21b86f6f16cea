//! Snowflake identifiers.
//!
//! Layout, most significant bit first: 42 bits of milliseconds since the
//! epoch, 10 bits of node id, 12 bits of per-millisecond sequence. Ids
//! generated by one node are strictly increasing, so sorting by id sorts by
//! creation time.

use derive_where::derive_where;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    marker::PhantomData,
};
use thiserror::Error;
use time::{Duration, UtcDateTime};

pub const TIMESTAMP_BITS: u32 = 42;
pub const NODE_ID_BITS: u32 = 10;
pub const SEQUENCE_BITS: u32 = 12;

const NODE_ID_SHIFT: u32 = SEQUENCE_BITS;
const TIMESTAMP_SHIFT: u32 = NODE_ID_BITS + SEQUENCE_BITS;

pub const MAX_TIMESTAMP: u64 = (1 << TIMESTAMP_BITS) - 1;
pub const MAX_NODE_ID: u16 = (1 << NODE_ID_BITS) - 1;
pub const MAX_SEQUENCE: u16 = (1 << SEQUENCE_BITS) - 1;

pub trait Epoch {
    const EPOCH_TIME: UtcDateTime;
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Error)]
pub enum SnowflakeTimeError {
    #[error("Specified time was before the snowflake epoch.")]
    BeforeEpoch,
    #[error("Specified time is too far after the snowflake epoch.")]
    AfterRange,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Node id {0} does not fit into {NODE_ID_BITS} bits")]
pub struct NodeIdOutOfRangeError(u16);

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize)]
#[serde(transparent)]
pub struct NodeId(u16);

impl NodeId {
    #[must_use]
    pub fn new(id: u16) -> Option<Self> {
        (id <= MAX_NODE_ID).then_some(Self(id))
    }

    #[must_use]
    pub fn get(self) -> u16 {
        self.0
    }
}

impl TryFrom<u16> for NodeId {
    type Error = NodeIdOutOfRangeError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(NodeIdOutOfRangeError(value))
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let inner = u16::deserialize(deserializer)?;
        Self::try_from(inner).map_err(serde::de::Error::custom)
    }
}

#[derive_where(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Debug,
    Default,
    Hash,
    Serialize,
    Deserialize
)]
#[serde(transparent)]
pub struct Snowflake<SnowflakeEpoch>(u64, #[serde(skip)] PhantomData<SnowflakeEpoch>);

impl<SnowflakeEpoch> Snowflake<SnowflakeEpoch> {
    #[must_use]
    pub fn new(inner: u64) -> Self {
        Self(inner, PhantomData)
    }

    /// Packs the parts without range checks beyond masking; callers hand in
    /// values produced by [`SnowflakeGenerator`] or read back from a snowflake.
    #[must_use]
    pub fn from_parts(millis: u64, node_id: NodeId, sequence: u16) -> Self {
        let packed = (millis & MAX_TIMESTAMP) << TIMESTAMP_SHIFT
            | u64::from(node_id.get()) << NODE_ID_SHIFT
            | u64::from(sequence & MAX_SEQUENCE);

        Self::new(packed)
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn millis_since_epoch(self) -> u64 {
        self.0 >> TIMESTAMP_SHIFT
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn node_id(self) -> NodeId {
        NodeId((self.0 >> NODE_ID_SHIFT) as u16 & MAX_NODE_ID)
    }

    #[must_use]
    pub fn sequence(self) -> u16 {
        #[allow(clippy::cast_possible_truncation)]
        let sequence = self.0 as u16;
        sequence & MAX_SEQUENCE
    }
}

impl<SnowflakeEpoch: Epoch> Snowflake<SnowflakeEpoch> {
    #[must_use]
    pub fn created_at(self) -> UtcDateTime {
        // 42 bits of milliseconds always fit into an i64.
        #[allow(clippy::cast_possible_wrap)]
        let millis = self.millis_since_epoch() as i64;
        SnowflakeEpoch::EPOCH_TIME + Duration::milliseconds(millis)
    }
}

impl<SnowflakeEpoch> Display for Snowflake<SnowflakeEpoch> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<SnowflakeEpoch> From<u64> for Snowflake<SnowflakeEpoch> {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl<SnowflakeEpoch> From<Snowflake<SnowflakeEpoch>> for u64 {
    fn from(value: Snowflake<SnowflakeEpoch>) -> Self {
        value.get()
    }
}

pub fn millis_since_epoch<SnowflakeEpoch: Epoch>(
    time: UtcDateTime,
) -> Result<u64, SnowflakeTimeError> {
    let millis = (time - SnowflakeEpoch::EPOCH_TIME).whole_milliseconds();
    if millis < 0 {
        return Err(SnowflakeTimeError::BeforeEpoch);
    }

    u64::try_from(millis)
        .ok()
        .filter(|millis| *millis <= MAX_TIMESTAMP)
        .ok_or(SnowflakeTimeError::AfterRange)
}

#[derive_where(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct SnowflakeGenerator<SnowflakeEpoch> {
    node_id: NodeId,
    last: Option<(u64, u16)>,
    phantom_data: PhantomData<SnowflakeEpoch>,
}

impl<SnowflakeEpoch: Epoch> SnowflakeGenerator<SnowflakeEpoch> {
    #[must_use]
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            last: None,
            phantom_data: PhantomData,
        }
    }

    #[must_use]
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Generates an id for `time`. If the clock stalls or runs backwards the
    /// generator keeps counting from the last millisecond it issued, borrowing
    /// the next millisecond once the sequence is exhausted.
    pub fn generate_at(
        &mut self,
        time: UtcDateTime,
    ) -> Result<Snowflake<SnowflakeEpoch>, SnowflakeTimeError> {
        let millis = millis_since_epoch::<SnowflakeEpoch>(time)?;

        let (millis, sequence) = match self.last {
            Some((last_millis, last_sequence)) if millis <= last_millis => {
                if last_sequence == MAX_SEQUENCE {
                    (last_millis + 1, 0)
                } else {
                    (last_millis, last_sequence + 1)
                }
            }
            _ => (millis, 0),
        };

        if millis > MAX_TIMESTAMP {
            return Err(SnowflakeTimeError::AfterRange);
        }

        self.last = Some((millis, sequence));
        Ok(Snowflake::from_parts(millis, self.node_id, sequence))
    }

    pub fn generate(&mut self) -> Result<Snowflake<SnowflakeEpoch>, SnowflakeTimeError> {
        self.generate_at(UtcDateTime::now())
    }
}
