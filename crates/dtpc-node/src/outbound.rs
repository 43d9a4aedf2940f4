use dtpc_codec::adu::{encode_adu, AduFrame, TopicFrame};
use dtpc_core::{AduId, AggregatorId, DtnTime, Eid, ProfileId, SeqNo, TopicId};
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::profile::Profile;
use crate::state::{EngineState, OutAdu, OutAggregator, TopicRecords};

/// One application item headed for `dest`.
#[derive(Debug, Clone)]
pub struct InsertRequest<'a> {
    pub profile: ProfileId,
    pub dest: &'a Eid,
    pub topic: TopicId,
    pub payload: Vec<u8>,
}

/// Why an item was not accepted. The item was not stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertRejection {
    /// The item alone exceeds the profile's aggregation size limit.
    PayloadTooLarge { len: u64, limit: u64 },
    UnknownProfile(ProfileId),
    InvalidDestination,
    /// Outbound storage is full; retrying after ADUs drain may succeed.
    StoreExhausted { needed: u64, available: u64 },
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Stored in the ADU with sequence `seq`; `closed` if that ADU was handed off.
    Accepted { seq: SeqNo, closed: bool },
    Rejected(InsertRejection),
}

/// Appends one item to the open ADU of its (destination, profile) pair.
///
/// The ADU is closed as soon as its payload reaches the size limit, or at
/// once when the profile does not aggregate, and a fresh ADU is opened.
pub fn insert(
    state: &mut EngineState,
    request: InsertRequest<'_>,
    now: DtnTime,
    store_capacity: u64,
) -> Result<InsertOutcome, EngineError> {
    let InsertRequest {
        profile: profile_id,
        dest,
        topic,
        payload,
    } = request;

    if dest.is_null() {
        return Ok(reject(state, InsertRejection::InvalidDestination));
    }
    let Some(profile) = state.profiles.get(profile_id).cloned() else {
        return Ok(reject(state, InsertRejection::UnknownProfile(profile_id)));
    };
    let len = payload.len() as u64;
    if profile.aggr_size_limit > 0 && len > profile.aggr_size_limit {
        return Ok(reject(
            state,
            InsertRejection::PayloadTooLarge {
                len,
                limit: profile.aggr_size_limit,
            },
        ));
    }
    if store_capacity > 0 && state.outbound_bytes.saturating_add(len) > store_capacity {
        let available = store_capacity.saturating_sub(state.outbound_bytes);
        return Ok(reject(
            state,
            InsertRejection::StoreExhausted {
                needed: len,
                available,
            },
        ));
    }

    let agg_id = match state.find_out_aggregator(dest, profile_id) {
        Some(id) => id,
        None => create_out_aggregator(state, dest, &profile),
    };
    let open = state
        .out_aggregators
        .get(&agg_id)
        .ok_or(EngineError::Corrupt("outbound aggregator missing"))?
        .open_adu;
    let adu_id = match open {
        Some(id) => id,
        None => open_adu(state, agg_id, &profile)?,
    };

    let adu = state
        .out_adus
        .get_mut(&adu_id)
        .ok_or(EngineError::Corrupt("open ADU missing"))?;
    match adu.topics.iter_mut().find(|records| records.topic == topic) {
        Some(records) => records.records.push(payload),
        None => adu.topics.push(TopicRecords {
            topic,
            records: vec![payload],
        }),
    }
    if adu.age.is_none() {
        adu.age = Some(0);
        adu.expiration = now.saturating_add(profile.lifespan);
    }
    adu.payload_bytes += len;
    let seq = adu.seq;
    let full = adu.payload_bytes >= profile.aggr_size_limit || !profile.aggregates();

    state.outbound_bytes += len;
    state.stats.items_inserted += 1;

    if full {
        close_adu(state, adu_id, &profile)?;
        open_adu(state, agg_id, &profile)?;
    }
    Ok(InsertOutcome::Accepted { seq, closed: full })
}

fn reject(state: &mut EngineState, rejection: InsertRejection) -> InsertOutcome {
    state.stats.items_rejected += 1;
    debug!(?rejection, "rejected insert");
    InsertOutcome::Rejected(rejection)
}

fn create_out_aggregator(state: &mut EngineState, dest: &Eid, profile: &Profile) -> AggregatorId {
    let id = AggregatorId(state.allocate_id());
    let next_seq = if profile.has_transport_service() {
        SeqNo::ONE
    } else {
        SeqNo::ZERO
    };
    state.out_aggregators.insert(
        id,
        OutAggregator {
            id,
            dest: dest.clone(),
            profile: profile.id,
            next_seq,
            adus: Vec::new(),
            open_adu: None,
            in_flight: Default::default(),
        },
    );
    info!(%dest, profile = profile.id, "created outbound aggregator");
    id
}

/// Opens an empty ADU, consuming the aggregator's next sequence number.
pub fn open_adu(
    state: &mut EngineState,
    agg_id: AggregatorId,
    profile: &Profile,
) -> Result<AduId, EngineError> {
    let id = AduId(state.allocate_id());
    let agg = state
        .out_aggregators
        .get_mut(&agg_id)
        .ok_or(EngineError::Corrupt("outbound aggregator missing"))?;
    let seq = if profile.has_transport_service() {
        let seq = agg.next_seq;
        agg.next_seq = seq.next();
        seq
    } else {
        SeqNo::ZERO
    };
    agg.adus.push(id);
    agg.open_adu = Some(id);
    state.out_adus.insert(
        id,
        OutAdu {
            id,
            aggregator: agg_id,
            seq,
            age: None,
            attempts: 0,
            expiration: 0,
            topics: Vec::new(),
            payload_bytes: 0,
            serialized: None,
            transmit: None,
            rtx_event: None,
            delete_event: None,
        },
    );
    Ok(id)
}

/// Serializes an ADU and queues it for the delivery driver.
pub fn close_adu(
    state: &mut EngineState,
    adu_id: AduId,
    profile: &Profile,
) -> Result<(), EngineError> {
    let adu = state
        .out_adus
        .get_mut(&adu_id)
        .ok_or(EngineError::Corrupt("closing unknown ADU"))?;
    let mut frame = AduFrame::new(profile.id, adu.seq);
    frame.topics = std::mem::take(&mut adu.topics)
        .into_iter()
        .map(|records| TopicFrame {
            topic: records.topic,
            records: records.records,
        })
        .collect();
    let bytes = encode_adu(&frame);
    debug!(
        profile = profile.id,
        seq = %adu.seq,
        topics = frame.topics.len(),
        len = bytes.len(),
        "closed ADU"
    );
    adu.serialized = Some(bytes);
    let agg_id = adu.aggregator;

    if let Some(agg) = state.out_aggregators.get_mut(&agg_id) {
        if agg.open_adu == Some(adu_id) {
            agg.open_adu = None;
        }
    }
    state.ready.push_back(adu_id);
    state.stats.adus_closed += 1;
    state.wakeups.driver += 1;
    Ok(())
}

/// Advances the age of every non-empty open ADU by one tick and closes
/// those that reached their profile's time limit. Returns how many closed.
pub fn age_open_adus(state: &mut EngineState) -> Result<usize, EngineError> {
    let open: Vec<(AggregatorId, ProfileId, AduId)> = state
        .out_aggregators
        .values()
        .filter_map(|agg| agg.open_adu.map(|adu| (agg.id, agg.profile, adu)))
        .collect();

    let mut closed = 0;
    for (agg_id, profile_id, adu_id) in open {
        let Some(profile) = state.profiles.get(profile_id).cloned() else {
            warn!(profile = profile_id, "open ADU references a removed profile");
            continue;
        };
        let Some(adu) = state.out_adus.get_mut(&adu_id) else {
            return Err(EngineError::Corrupt("open ADU missing"));
        };
        let Some(age) = adu.age.as_mut() else {
            continue;
        };
        *age += 1;
        if profile.aggregates() && *age >= profile.aggr_time_limit {
            close_adu(state, adu_id, &profile)?;
            open_adu(state, agg_id, &profile)?;
            closed += 1;
        }
    }
    Ok(closed)
}

#[cfg(test)]
mod tests {
    use dtpc_codec::adu::decode_adu;
    use dtpc_core::{Eid, SeqNo};

    use super::{age_open_adus, insert, InsertOutcome, InsertRejection, InsertRequest};
    use crate::testutil::{plain_profile, state_with, transport_profile};

    fn request(dest: &Eid, payload: Vec<u8>) -> InsertRequest<'_> {
        InsertRequest {
            profile: 1,
            dest,
            topic: 7,
            payload,
        }
    }

    #[test]
    fn two_sixty_byte_items_close_one_adu_at_a_hundred_byte_limit() {
        let mut state = state_with(&[transport_profile(1)]);
        let dest = Eid::ipn(2, 129);

        let first = insert(&mut state, request(&dest, vec![0xAA; 60]), 1_000, 0)
            .expect("insert should succeed");
        assert_eq!(
            first,
            InsertOutcome::Accepted {
                seq: SeqNo::ONE,
                closed: false
            }
        );
        let agg = state.out_aggregators.values().next().expect("aggregator");
        let open = state.out_adus[&agg.open_adu.expect("open adu")].clone();
        assert_eq!(open.age, Some(0));
        assert_eq!(open.expiration, 1_400);

        let second = insert(&mut state, request(&dest, vec![0xBB; 60]), 1_000, 0)
            .expect("insert should succeed");
        assert_eq!(
            second,
            InsertOutcome::Accepted {
                seq: SeqNo::ONE,
                closed: true
            }
        );

        assert_eq!(state.ready.len(), 1);
        let closed = &state.out_adus[&state.ready[0]];
        let frame = decode_adu(closed.serialized.as_deref().expect("serialized"))
            .expect("closed ADU should decode");
        assert_eq!(frame.header.seq, SeqNo::ONE);
        assert_eq!(frame.topics.len(), 1);
        assert_eq!(frame.topics[0].records, vec![vec![0xAA; 60], vec![0xBB; 60]]);

        let agg = state.out_aggregators.values().next().expect("aggregator");
        let fresh = &state.out_adus[&agg.open_adu.expect("fresh adu")];
        assert_eq!(fresh.seq, SeqNo::from_u64(2));
        assert_eq!(fresh.age, None);
        assert_eq!(state.wakeups.driver, 1);
        assert_eq!(state.stats.adus_closed, 1);
    }

    #[test]
    fn items_group_by_topic_in_insert_order() {
        let mut state = state_with(&[transport_profile(1)]);
        let dest = Eid::ipn(2, 129);
        for (topic, byte) in [(3, 1_u8), (4, 2), (3, 3)] {
            insert(
                &mut state,
                InsertRequest {
                    profile: 1,
                    dest: &dest,
                    topic,
                    payload: vec![byte],
                },
                0,
                0,
            )
            .expect("insert should succeed");
        }
        let adu = state.out_adus.values().next().expect("open adu");
        assert_eq!(adu.topics.len(), 2);
        assert_eq!(adu.topics[0].topic, 3);
        assert_eq!(adu.topics[0].records, vec![vec![1], vec![3]]);
        assert_eq!(adu.record_count(), 3);
    }

    #[test]
    fn rejections_leave_state_untouched() {
        let mut state = state_with(&[transport_profile(1)]);
        let dest = Eid::ipn(2, 129);
        let null = Eid::parse("dtn:none").expect("null eid parses");

        let too_large = insert(&mut state, request(&dest, vec![0; 101]), 0, 0)
            .expect("insert should not fail");
        assert_eq!(
            too_large,
            InsertOutcome::Rejected(InsertRejection::PayloadTooLarge {
                len: 101,
                limit: 100
            })
        );
        assert_eq!(
            insert(&mut state, request(&null, vec![1]), 0, 0).expect("insert"),
            InsertOutcome::Rejected(InsertRejection::InvalidDestination)
        );
        let unknown = InsertRequest {
            profile: 9,
            ..request(&dest, vec![1])
        };
        assert_eq!(
            insert(&mut state, unknown, 0, 0).expect("insert"),
            InsertOutcome::Rejected(InsertRejection::UnknownProfile(9))
        );
        assert!(state.out_aggregators.is_empty());
        assert_eq!(state.stats.items_rejected, 3);
    }

    #[test]
    fn store_capacity_bounds_buffered_bytes() {
        let mut state = state_with(&[transport_profile(1)]);
        let dest = Eid::ipn(2, 129);
        insert(&mut state, request(&dest, vec![0; 40]), 0, 50).expect("insert");
        assert_eq!(
            insert(&mut state, request(&dest, vec![0; 20]), 0, 50).expect("insert"),
            InsertOutcome::Rejected(InsertRejection::StoreExhausted {
                needed: 20,
                available: 10
            })
        );
        assert_eq!(state.outbound_bytes, 40);
    }

    #[test]
    fn no_transport_profile_closes_every_item_with_sequence_zero() {
        let mut state = state_with(&[plain_profile(1)]);
        let dest = Eid::ipn(2, 129);
        for _ in 0..2 {
            assert_eq!(
                insert(&mut state, request(&dest, vec![1, 2]), 0, 0).expect("insert"),
                InsertOutcome::Accepted {
                    seq: SeqNo::ZERO,
                    closed: true
                }
            );
        }
        assert_eq!(state.ready.len(), 2);
        let agg = state.out_aggregators.values().next().expect("aggregator");
        assert_eq!(agg.next_seq, SeqNo::ZERO);
    }

    #[test]
    fn aging_closes_open_adus_at_the_time_limit() {
        let mut state = state_with(&[transport_profile(1)]);
        let dest = Eid::ipn(2, 129);
        insert(&mut state, request(&dest, vec![0; 10]), 0, 0).expect("insert");

        for _ in 0..9 {
            assert_eq!(age_open_adus(&mut state).expect("aging"), 0);
        }
        assert_eq!(age_open_adus(&mut state).expect("aging"), 1);
        assert_eq!(state.ready.len(), 1);

        // The fresh ADU is empty and never ages.
        for _ in 0..20 {
            assert_eq!(age_open_adus(&mut state).expect("aging"), 0);
        }
    }
}
