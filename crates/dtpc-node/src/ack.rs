use dtpc_codec::ack::AckFrame;
use dtpc_core::{DtnTime, Eid, ProfileId, SeqNo};
use dtpc_transport::adapter::{
    Ancillary, BundleTransport, CustodyMode, SendOutcome, SendRequest, SrrFlags,
};
use tracing::{debug, warn};

use crate::delivery::delete_out_adu;
use crate::state::EngineState;

/// Lifetime margin for ACKs of profiles this node does not know.
const UNKNOWN_PROFILE_ACK_MARGIN: u64 = 10;

/// Result of processing one received ACK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// The acknowledged ADU was deleted.
    Retired { seq: SeqNo },
    /// No outbound aggregator for the ACK's sender and profile.
    NoAggregator,
    /// Aggregator exists but holds no sent ADU with that sequence number.
    NoMatchingAdu,
    /// The sender's endpoint has no node number to derive a destination from.
    InvalidSource,
}

/// Where and how one ACK is sent.
#[derive(Debug, Clone, Copy)]
pub struct AckParams<'a> {
    /// Source of the acknowledged ADU.
    pub source: &'a Eid,
    pub profile: ProfileId,
    pub seq: SeqNo,
    /// Creation time of the acknowledged bundle.
    pub creation_time: DtnTime,
    pub recv_service: u64,
}

/// Sends an untracked ACK to the receive service on the ADU sender's node.
///
/// Returns whether the transport accepted it. A lost ACK is repaired by the
/// sender's retransmission, so send failures are only counted.
pub fn send_ack<T: BundleTransport>(
    state: &mut EngineState,
    transport: &mut T,
    params: AckParams<'_>,
    now: DtnTime,
) -> bool {
    let AckParams {
        source,
        profile,
        seq,
        creation_time,
        recv_service,
    } = params;
    let Some(dest) = source.with_service(recv_service) else {
        state.stats.ack_send_failures += 1;
        warn!(%source, "cannot address ACK to non-ipn source");
        return false;
    };
    let lifetime = match state.profiles.get(profile) {
        Some(profile) => profile.lifespan,
        None => now
            .saturating_sub(creation_time)
            .saturating_add(UNKNOWN_PROFILE_ACK_MARGIN),
    };
    let request = SendRequest {
        dest: dest.clone(),
        report_to: Eid::null(),
        creation_time: now,
        lifetime,
        class_of_service: 0,
        custody: CustodyMode::None,
        srr_flags: SrrFlags::default(),
        ancillary: Ancillary::default(),
        payload: AckFrame { profile, seq }.encode(),
    };
    match transport.send(request) {
        SendOutcome::Enqueued(_) => {
            state.stats.acks_sent += 1;
            debug!(%dest, profile, seq = %seq, "sent ACK");
            true
        }
        SendOutcome::Congested => {
            state.stats.ack_send_failures += 1;
            debug!(%dest, seq = %seq, "transport congested; ACK dropped");
            false
        }
        SendOutcome::Failed(reason) => {
            state.stats.ack_send_failures += 1;
            warn!(%dest, seq = %seq, %reason, "ACK send failed");
            false
        }
    }
}

/// Retires the sent ADU an ACK names.
pub fn on_ack_arrival(
    state: &mut EngineState,
    source: &Eid,
    ack: AckFrame,
    recv_service: u64,
) -> AckOutcome {
    state.stats.acks_received += 1;
    let Some(dest) = source.with_service(recv_service) else {
        state.stats.acks_unmatched += 1;
        return AckOutcome::InvalidSource;
    };
    let Some(agg_id) = state.find_out_aggregator(&dest, ack.profile) else {
        state.stats.acks_unmatched += 1;
        debug!(%source, profile = ack.profile, "ACK for unknown aggregator");
        return AckOutcome::NoAggregator;
    };
    let matched = state.out_aggregators.get(&agg_id).and_then(|agg| {
        agg.adus.iter().copied().find(|id| {
            state
                .out_adus
                .get(id)
                .is_some_and(|adu| adu.seq == ack.seq && adu.is_closed())
        })
    });
    let Some(adu_id) = matched else {
        state.stats.acks_unmatched += 1;
        debug!(%source, seq = %ack.seq, "ACK matches no outstanding ADU");
        return AckOutcome::NoMatchingAdu;
    };
    delete_out_adu(state, adu_id);
    state.stats.adus_acknowledged += 1;
    debug!(%dest, seq = %ack.seq, "ADU acknowledged");
    AckOutcome::Retired { seq: ack.seq }
}
