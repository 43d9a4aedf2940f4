use std::collections::{BTreeMap, VecDeque};

use dtpc_codec::adu::{AduHeader, TopicReader};
use dtpc_codec::error::CodecError;
use dtpc_core::{AduId, AggregatorId, DtnTime, Eid, ProfileId, SeqNo, TopicId};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::EventKind;
use crate::profile::Profile;
use crate::state::{DeliveredItem, EngineState, EngineStats, InAdu, InAggregator, Wakeups};

/// One ADU as received from the transport.
#[derive(Debug, Clone)]
pub struct Arrival<'a> {
    pub source: &'a Eid,
    pub creation_time: DtnTime,
    /// Bundle lifetime; bounds how long gaps wait for retransmissions.
    pub lifetime: u64,
    pub header: AduHeader,
    /// Topic section following the header.
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrivalOutcome {
    /// Placed in sequence; `released` records reached subscriber queues.
    Accepted { seq: SeqNo, released: usize },
    /// Same sequence number already held.
    Duplicate { seq: SeqNo },
    /// Below the next expected sequence number; already delivered or given up on.
    Stale { seq: SeqNo },
    UnknownProfile { profile: ProfileId },
    /// Topic framing did not decode; the ADU was dropped.
    Malformed,
}

impl ArrivalOutcome {
    /// Whether the sender should be acknowledged for this arrival.
    pub fn acknowledges(&self) -> bool {
        matches!(
            self,
            ArrivalOutcome::Accepted { .. }
                | ArrivalOutcome::Duplicate { .. }
                | ArrivalOutcome::Stale { .. }
        )
    }
}

/// Places an arriving ADU in its aggregator's sequence and releases every
/// record that became deliverable in order.
pub fn on_adu_arrival(
    state: &mut EngineState,
    config: &EngineConfig,
    arrival: Arrival<'_>,
    now: DtnTime,
) -> Result<ArrivalOutcome, EngineError> {
    let Arrival {
        source,
        creation_time,
        lifetime,
        header,
        body,
    } = arrival;
    let AduHeader {
        profile: profile_id,
        seq,
    } = header;
    state.stats.adus_received += 1;

    if let Err(err) = validate_body(&body) {
        state.stats.malformed_adus += 1;
        warn!(%source, profile = profile_id, seq = %seq, %err, "dropping malformed ADU");
        return Ok(ArrivalOutcome::Malformed);
    }

    let profile = match state.profiles.get(profile_id) {
        Some(profile) => profile.clone(),
        None if config.infer_unknown_profiles => {
            let profile = Profile::inferred(profile_id, seq, lifetime);
            if let Err(err) = state.profiles.add(profile.clone()) {
                state.stats.unknown_profile_adus += 1;
                warn!(%source, profile = profile_id, %err, "cannot infer profile; dropping ADU");
                return Ok(ArrivalOutcome::UnknownProfile {
                    profile: profile_id,
                });
            }
            info!(profile = profile_id, max_rtx = profile.max_rtx, "inferred inbound profile");
            profile
        }
        None => {
            state.stats.unknown_profile_adus += 1;
            debug!(%source, profile = profile_id, "dropping ADU for unknown profile");
            return Ok(ArrivalOutcome::UnknownProfile {
                profile: profile_id,
            });
        }
    };

    let agg_id = match state.find_in_aggregator(source, profile_id) {
        Some(id) => id,
        None => create_in_aggregator(state, source, &profile),
    };

    if !profile.has_transport_service() {
        let id = new_in_adu(state, agg_id, seq, Some(body));
        in_aggregator_mut(state, agg_id)?.adus.insert(0, id);
        let released = parse_in_adus(state, agg_id)?;
        return Ok(ArrivalOutcome::Accepted { seq, released });
    }

    if config.detect_sender_reset && seq.is_below(config.reset_threshold) {
        check_sender_reset(state, agg_id, seq, creation_time, &profile)?;
    }

    if seq < in_aggregator_mut(state, agg_id)?.next_expected {
        state.stats.stale_adus += 1;
        debug!(%source, seq = %seq, "discarding stale ADU");
        return Ok(ArrivalOutcome::Stale { seq });
    }

    let gap_due = creation_time
        .saturating_add(lifetime)
        .saturating_sub(1)
        .max(now);
    if !place_adu(state, agg_id, seq, body, gap_due)? {
        state.stats.duplicate_adus += 1;
        debug!(%source, seq = %seq, "discarding duplicate ADU");
        return Ok(ArrivalOutcome::Duplicate { seq });
    }
    let released = parse_in_adus(state, agg_id)?;
    Ok(ArrivalOutcome::Accepted { seq, released })
}

fn validate_body(body: &[u8]) -> Result<(), CodecError> {
    TopicReader::new(body).try_for_each(|frame| frame.map(drop))
}

fn in_aggregator_mut(
    state: &mut EngineState,
    agg_id: AggregatorId,
) -> Result<&mut InAggregator, EngineError> {
    state
        .in_aggregators
        .get_mut(&agg_id)
        .ok_or(EngineError::Corrupt("inbound aggregator missing"))
}

fn initial_next_expected(profile: &Profile) -> SeqNo {
    if profile.has_transport_service() {
        SeqNo::ONE
    } else {
        SeqNo::ZERO
    }
}

fn create_in_aggregator(state: &mut EngineState, source: &Eid, profile: &Profile) -> AggregatorId {
    let id = AggregatorId(state.allocate_id());
    state.in_aggregators.insert(
        id,
        InAggregator {
            id,
            source: source.clone(),
            profile: profile.id,
            next_expected: initial_next_expected(profile),
            reset_seq: SeqNo::ZERO,
            reset_expiration: 0,
            adus: Vec::new(),
        },
    );
    info!(%source, profile = profile.id, "created inbound aggregator");
    id
}

fn new_in_adu(
    state: &mut EngineState,
    agg_id: AggregatorId,
    seq: SeqNo,
    body: Option<Vec<u8>>,
) -> AduId {
    let id = AduId(state.allocate_id());
    state.in_adus.insert(
        id,
        InAdu {
            id,
            aggregator: agg_id,
            seq,
            body,
            gap_event: None,
        },
    );
    id
}

/// Inserts a placeholder for the range starting at `seq` at list position `index`.
fn add_gap(
    state: &mut EngineState,
    agg_id: AggregatorId,
    index: usize,
    seq: SeqNo,
    due: DtnTime,
) -> Result<(), EngineError> {
    let id = new_in_adu(state, agg_id, seq, None);
    let event = state.events.schedule(due, EventKind::DeleteGap(id));
    if let Some(gap) = state.in_adus.get_mut(&id) {
        gap.gap_event = Some(event);
    }
    in_aggregator_mut(state, agg_id)?.adus.insert(index, id);
    state.stats.gaps_created += 1;
    debug!(seq = %seq, due, "created gap placeholder");
    Ok(())
}

/// Inserts a received ADU at its ordered position. Returns false for a duplicate.
fn place_adu(
    state: &mut EngineState,
    agg_id: AggregatorId,
    seq: SeqNo,
    body: Vec<u8>,
    gap_due: DtnTime,
) -> Result<bool, EngineError> {
    let agg = state
        .in_aggregators
        .get(&agg_id)
        .ok_or(EngineError::Corrupt("inbound aggregator missing"))?;
    let entries: Vec<(AduId, SeqNo, bool)> = agg
        .adus
        .iter()
        .filter_map(|id| state.in_adus.get(id))
        .map(|adu| (adu.id, adu.seq, adu.is_gap()))
        .collect();
    let next_expected = agg.next_expected;

    // New arrivals are usually the most recent, so scan from the tail.
    let Some(index) = entries.iter().rposition(|(_, s, _)| *s <= seq) else {
        let mut at = 0;
        if next_expected < seq {
            add_gap(state, agg_id, 0, next_expected, gap_due)?;
            at = 1;
        }
        let id = new_in_adu(state, agg_id, seq, Some(body));
        in_aggregator_mut(state, agg_id)?.adus.insert(at, id);
        return Ok(true);
    };

    let (pred_id, pred_seq, pred_is_gap) = entries[index];
    let successor = entries.get(index + 1).map(|(_, s, _)| *s);

    if pred_seq == seq {
        if !pred_is_gap {
            return Ok(false);
        }
        fill_placeholder(state, agg_id, index, pred_id, seq, successor, body)?;
        return Ok(true);
    }

    if pred_is_gap {
        // Arrival inside the placeholder's range: re-arm its expiry.
        rearm_gap(state, pred_id, gap_due);
        let id = new_in_adu(state, agg_id, seq, Some(body));
        in_aggregator_mut(state, agg_id)?.adus.insert(index + 1, id);
        if let Some(next_seq) = successor {
            if seq.next() < next_seq {
                add_gap(state, agg_id, index + 2, seq.next(), gap_due)?;
            }
        }
        return Ok(true);
    }

    let mut at = index + 1;
    if successor.is_none() && pred_seq.next() < seq {
        add_gap(state, agg_id, at, pred_seq.next(), gap_due)?;
        at += 1;
    }
    let id = new_in_adu(state, agg_id, seq, Some(body));
    in_aggregator_mut(state, agg_id)?.adus.insert(at, id);
    Ok(true)
}

/// Fills the low end of a placeholder with a received ADU.
fn fill_placeholder(
    state: &mut EngineState,
    agg_id: AggregatorId,
    index: usize,
    gap_id: AduId,
    seq: SeqNo,
    successor: Option<SeqNo>,
    body: Vec<u8>,
) -> Result<(), EngineError> {
    let gap = state
        .in_adus
        .get_mut(&gap_id)
        .ok_or(EngineError::Corrupt("gap placeholder missing"))?;
    if successor.map_or(true, |next_seq| seq.next() >= next_seq) {
        gap.body = Some(body);
        if let Some(event) = gap.gap_event.take() {
            state.events.cancel(event);
        }
        return Ok(());
    }
    gap.seq = seq.next();
    let id = new_in_adu(state, agg_id, seq, Some(body));
    in_aggregator_mut(state, agg_id)?.adus.insert(index, id);
    Ok(())
}

fn rearm_gap(state: &mut EngineState, gap_id: AduId, due: DtnTime) {
    let Some(gap) = state.in_adus.get_mut(&gap_id) else {
        return;
    };
    if let Some(event) = gap.gap_event.take() {
        state.events.cancel(event);
    }
    gap.gap_event = Some(state.events.schedule(due, EventKind::DeleteGap(gap_id)));
}

/// Updates the reset watermark, or resets the aggregator when a small
/// sequence number arrives in a bundle created after the watermark expired.
fn check_sender_reset(
    state: &mut EngineState,
    agg_id: AggregatorId,
    seq: SeqNo,
    creation_time: DtnTime,
    profile: &Profile,
) -> Result<(), EngineError> {
    let agg = in_aggregator_mut(state, agg_id)?;
    if agg.reset_expiration == 0 || seq > agg.reset_seq {
        agg.reset_seq = seq;
        agg.reset_expiration = creation_time.saturating_add(profile.lifespan);
        return Ok(());
    }
    if creation_time < agg.reset_expiration {
        return Ok(());
    }
    info!(source = %agg.source, profile = profile.id, seq = %seq, "detected sender reset");
    reset_in_aggregator(state, agg_id, profile)?;
    state.stats.resets_detected += 1;
    Ok(())
}

/// Drops every placeholder, delivers what is held and restarts the sequence.
pub fn reset_in_aggregator(
    state: &mut EngineState,
    agg_id: AggregatorId,
    profile: &Profile,
) -> Result<(), EngineError> {
    let gaps: Vec<AduId> = state
        .in_aggregators
        .get(&agg_id)
        .ok_or(EngineError::Corrupt("inbound aggregator missing"))?
        .adus
        .iter()
        .copied()
        .filter(|id| state.in_adus.get(id).is_some_and(InAdu::is_gap))
        .collect();
    for gap_id in gaps {
        remove_in_adu(state, gap_id);
    }
    parse_in_adus(state, agg_id)?;

    let agg = in_aggregator_mut(state, agg_id)?;
    agg.next_expected = initial_next_expected(profile);
    agg.reset_seq = SeqNo::ZERO;
    agg.reset_expiration = 0;
    Ok(())
}

fn remove_in_adu(state: &mut EngineState, adu_id: AduId) -> Option<InAdu> {
    let adu = state.in_adus.remove(&adu_id)?;
    if let Some(event) = adu.gap_event {
        state.events.cancel(event);
    }
    if let Some(agg) = state.in_aggregators.get_mut(&adu.aggregator) {
        agg.adus.retain(|id| *id != adu_id);
    }
    Some(adu)
}

/// Handles a due DeleteGap event: stops waiting for the placeholder's range.
pub fn expire_gap(state: &mut EngineState, adu_id: AduId) -> Result<usize, EngineError> {
    if !state.in_adus.get(&adu_id).is_some_and(InAdu::is_gap) {
        return Ok(0);
    }
    let Some(gap) = remove_in_adu(state, adu_id) else {
        return Ok(0);
    };
    state.stats.gaps_expired += 1;
    debug!(seq = %gap.seq, "gap placeholder expired");
    parse_in_adus(state, gap.aggregator)
}

/// Consumes the run of received ADUs at the head of an aggregator's list,
/// pushing their records to open topic queues in order.
pub fn parse_in_adus(state: &mut EngineState, agg_id: AggregatorId) -> Result<usize, EngineError> {
    let agg = state
        .in_aggregators
        .get_mut(&agg_id)
        .ok_or(EngineError::Corrupt("inbound aggregator missing"))?;
    let mut released = 0;
    let mut last_seq = None;
    while let Some(&head) = agg.adus.first() {
        let Some(adu) = state.in_adus.get(&head) else {
            return Err(EngineError::Corrupt("inbound ADU missing"));
        };
        if adu.is_gap() {
            break;
        }
        agg.adus.remove(0);
        let Some(adu) = state.in_adus.remove(&head) else {
            break;
        };
        last_seq = Some(adu.seq);
        if let Some(body) = adu.body {
            released += release_records(
                &mut state.topics,
                &mut state.stats,
                &mut state.wakeups,
                &agg.source,
                &body,
            );
        }
    }
    if let Some(last) = last_seq {
        let candidate = last.next();
        if candidate > agg.next_expected {
            agg.next_expected = candidate;
        }
    }
    Ok(released)
}

fn release_records(
    topics: &mut BTreeMap<TopicId, VecDeque<DeliveredItem>>,
    stats: &mut EngineStats,
    wakeups: &mut Wakeups,
    source: &Eid,
    body: &[u8],
) -> usize {
    let mut released = 0;
    for frame in TopicReader::new(body) {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                stats.malformed_adus += 1;
                warn!(%source, %err, "stopped parsing ADU at malformed topic");
                break;
            }
        };
        let count = frame.records.len();
        let Some(queue) = topics.get_mut(&frame.topic) else {
            stats.records_skipped += count as u64;
            continue;
        };
        queue.extend(frame.records.into_iter().map(|payload| DeliveredItem {
            source: source.clone(),
            topic: frame.topic,
            payload,
        }));
        stats.records_delivered += count as u64;
        wakeups.topics.insert(frame.topic);
        released += count;
    }
    released
}
