use std::collections::{BTreeMap, BTreeSet, VecDeque};

use dtpc_core::{
    AduId, AggregatorId, DtnTime, Eid, EventId, ProfileId, SeqNo, TopicId, TransmitRef,
};
use serde::{Deserialize, Serialize};

use crate::events::EventQueue;
use crate::profile::ProfileTable;

/// Records inserted for one topic of one outbound ADU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicRecords {
    pub topic: TopicId,
    pub records: Vec<Vec<u8>>,
}

/// Sender side of one (destination, profile) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutAggregator {
    pub id: AggregatorId,
    pub dest: Eid,
    pub profile: ProfileId,
    /// Sequence number the next opened ADU takes.
    pub next_seq: SeqNo,
    /// Every ADU not yet deleted, open one included.
    pub adus: Vec<AduId>,
    pub open_adu: Option<AduId>,
    /// ADUs handed to the transport and not yet resolved.
    pub in_flight: BTreeSet<AduId>,
}

/// One outbound aggregated data unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutAdu {
    pub id: AduId,
    pub aggregator: AggregatorId,
    pub seq: SeqNo,
    /// Seconds since the first insert; `None` while empty.
    pub age: Option<u64>,
    pub attempts: u32,
    pub expiration: DtnTime,
    pub topics: Vec<TopicRecords>,
    /// Sum of record payload lengths, compared against the size limit.
    pub payload_bytes: u64,
    /// Wire bytes, set once the ADU is closed.
    pub serialized: Option<Vec<u8>>,
    pub transmit: Option<TransmitRef>,
    pub rtx_event: Option<EventId>,
    pub delete_event: Option<EventId>,
}

impl OutAdu {
    pub fn is_closed(&self) -> bool {
        self.serialized.is_some()
    }

    pub fn record_count(&self) -> usize {
        self.topics.iter().map(|topic| topic.records.len()).sum()
    }
}

/// Receiver side of one (source, profile) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InAggregator {
    pub id: AggregatorId,
    pub source: Eid,
    pub profile: ProfileId,
    pub next_expected: SeqNo,
    /// Highest small sequence number seen; zero when unset.
    pub reset_seq: SeqNo,
    /// Creation time after which a small sequence number means the sender restarted.
    pub reset_expiration: DtnTime,
    /// Received ADUs and gap placeholders in ascending sequence order.
    pub adus: Vec<AduId>,
}

/// A received ADU, or a placeholder for a missing range when `body` is `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InAdu {
    pub id: AduId,
    pub aggregator: AggregatorId,
    pub seq: SeqNo,
    /// Topic section of the received frame.
    pub body: Option<Vec<u8>>,
    pub gap_event: Option<EventId>,
}

impl InAdu {
    pub fn is_gap(&self) -> bool {
        self.body.is_none()
    }
}

/// One record released to a topic subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredItem {
    pub source: Eid,
    pub topic: TopicId,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub items_inserted: u64,
    pub items_rejected: u64,
    pub adus_closed: u64,
    pub adus_sent: u64,
    pub adus_retransmitted: u64,
    pub adus_acknowledged: u64,
    /// Outbound ADUs whose lifespan ran out after at least one send.
    pub adus_expired: u64,
    /// Outbound ADUs that expired while waiting to be sent.
    pub adus_expired_before_send: u64,
    pub congestion_retries: u64,
    pub send_failures: u64,
    pub adus_received: u64,
    pub duplicate_adus: u64,
    pub stale_adus: u64,
    pub malformed_adus: u64,
    pub unknown_profile_adus: u64,
    pub gaps_created: u64,
    pub gaps_expired: u64,
    pub resets_detected: u64,
    pub records_delivered: u64,
    /// Records for topics nobody had open.
    pub records_skipped: u64,
    pub acks_sent: u64,
    pub ack_send_failures: u64,
    pub acks_received: u64,
    pub acks_unmatched: u64,
}

/// Signals owed to blocked threads, drained after each operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Wakeups {
    /// ADUs made ready for the delivery driver.
    pub driver: usize,
    /// Topics that received at least one item.
    pub topics: BTreeSet<TopicId>,
}

/// All mutable engine state; one lock around it stands in for a store transaction.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EngineState {
    pub profiles: ProfileTable,
    pub out_aggregators: BTreeMap<AggregatorId, OutAggregator>,
    pub in_aggregators: BTreeMap<AggregatorId, InAggregator>,
    pub out_adus: BTreeMap<AduId, OutAdu>,
    pub in_adus: BTreeMap<AduId, InAdu>,
    pub events: EventQueue,
    /// Closed ADUs waiting for the delivery driver.
    pub ready: VecDeque<AduId>,
    /// Delivery queues of open topics.
    pub topics: BTreeMap<TopicId, VecDeque<DeliveredItem>>,
    /// Payload bytes held by outbound ADUs.
    pub outbound_bytes: u64,
    pub stats: EngineStats,
    next_id: u64,
    #[serde(skip)]
    pub wakeups: Wakeups,
}

impl EngineState {
    /// Allocates a fresh arena key shared by aggregators and ADUs.
    pub fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn find_out_aggregator(&self, dest: &Eid, profile: ProfileId) -> Option<AggregatorId> {
        self.out_aggregators
            .values()
            .find(|agg| agg.profile == profile && &agg.dest == dest)
            .map(|agg| agg.id)
    }

    pub fn find_in_aggregator(&self, source: &Eid, profile: ProfileId) -> Option<AggregatorId> {
        self.in_aggregators
            .values()
            .find(|agg| agg.profile == profile && &agg.source == source)
            .map(|agg| agg.id)
    }

    /// Number of gap placeholders across all inbound aggregators.
    pub fn gap_count(&self) -> usize {
        self.in_adus.values().filter(|adu| adu.is_gap()).count()
    }

    pub fn take_wakeups(&mut self) -> Wakeups {
        std::mem::take(&mut self.wakeups)
    }
}
