use serde::{Deserialize, Serialize};

/// Numeric identifier of a delivery profile.
pub type ProfileId = u32;
/// Numeric identifier of an application topic.
pub type TopicId = u32;
/// Wall-clock time in whole seconds.
pub type DtnTime = u64;

/// Service number DTPC sends from (and ACKs arrive from).
pub const DEFAULT_SEND_SERVICE: u64 = 128;
/// Service number DTPC receives ADUs and ACKs on.
pub const DEFAULT_RECV_SERVICE: u64 = 129;

/// Stable arena key of an outbound or inbound aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregatorId(pub u64);

/// Stable arena key of an outbound ADU or inbound ADU slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AduId(pub u64);

/// Handle of one scheduled timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

/// Transport-issued reference for one enqueued transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransmitRef(pub u64);
