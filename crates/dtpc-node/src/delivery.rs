use dtpc_core::{AduId, DtnTime, SeqNo, TransmitRef};
use dtpc_transport::adapter::{BundleTransport, SendOutcome, SendRequest};
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::events::{EventKind, EventQueue};
use crate::profile::Profile;
use crate::state::{EngineState, OutAdu};

/// Result of one [`deliver_next`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Nothing is ready to send.
    Idle,
    /// Handed to the transport; `attempt` counts sends of this ADU so far.
    Sent {
        seq: SeqNo,
        handle: TransmitRef,
        attempt: u32,
    },
    /// The ADU outlived its lifespan while waiting and was dropped.
    Expired { seq: SeqNo },
    /// The transport is out of resources; the ADU stays at the head of the queue.
    Congested,
}

/// Sends the oldest ready ADU and arms its retransmission and deletion events.
///
/// A transport failure leaves the ADU queued and is returned as
/// [`EngineError::Transport`].
pub fn deliver_next<T: BundleTransport>(
    state: &mut EngineState,
    transport: &mut T,
    now: DtnTime,
) -> Result<DeliveryOutcome, EngineError> {
    let Some(&adu_id) = state.ready.front() else {
        return Ok(DeliveryOutcome::Idle);
    };
    let Some(adu) = state.out_adus.get(&adu_id) else {
        state.ready.pop_front();
        return Err(EngineError::Corrupt("ready ADU missing"));
    };
    let Some(payload) = adu.serialized.clone() else {
        state.ready.pop_front();
        return Err(EngineError::Corrupt("ready ADU was never closed"));
    };
    let (agg_id, seq, attempts) = (adu.aggregator, adu.seq, adu.attempts);

    if now >= adu.expiration {
        delete_out_adu(state, adu_id);
        state.stats.adus_expired_before_send += 1;
        debug!(seq = %seq, "ADU expired before it could be sent");
        return Ok(DeliveryOutcome::Expired { seq });
    }

    let Some(agg) = state.out_aggregators.get(&agg_id) else {
        delete_out_adu(state, adu_id);
        return Err(EngineError::Corrupt("ADU aggregator missing"));
    };
    let dest = agg.dest.clone();
    let Some(profile) = state.profiles.get(agg.profile).cloned() else {
        let profile_id = agg.profile;
        delete_out_adu(state, adu_id);
        return Err(EngineError::ProfileRemoved(profile_id));
    };

    let request = SendRequest {
        dest: dest.clone(),
        report_to: profile.report_to.clone(),
        creation_time: now,
        lifetime: profile.transmission_lifetime(attempts),
        class_of_service: profile.class_of_service,
        custody: profile.custody,
        srr_flags: profile.srr_flags,
        ancillary: profile.ancillary,
        payload,
    };
    let handle = match transport.send(request) {
        SendOutcome::Enqueued(handle) => handle,
        SendOutcome::Congested => {
            state.stats.congestion_retries += 1;
            debug!(%dest, seq = %seq, "transport congested; ADU stays queued");
            return Ok(DeliveryOutcome::Congested);
        }
        SendOutcome::Failed(reason) => {
            state.stats.send_failures += 1;
            warn!(%dest, seq = %seq, %reason, "ADU send failed");
            return Err(EngineError::Transport(reason));
        }
    };

    state.ready.pop_front();
    state.stats.adus_sent += 1;
    if attempts > 0 {
        state.stats.adus_retransmitted += 1;
    }
    debug!(
        %dest,
        profile = profile.id,
        seq = %seq,
        attempt = attempts + 1,
        "sent ADU"
    );

    if !profile.has_transport_service() {
        delete_out_adu(state, adu_id);
        return Ok(DeliveryOutcome::Sent {
            seq,
            handle,
            attempt: 1,
        });
    }

    let adu = state
        .out_adus
        .get_mut(&adu_id)
        .ok_or(EngineError::Corrupt("sent ADU missing"))?;
    adu.transmit = Some(handle);
    adu.attempts += 1;
    let attempt = adu.attempts;
    if adu.rtx_event.is_none() {
        arm_resend(&mut state.events, adu, &profile, now);
    }
    if adu.delete_event.is_none() {
        let due = adu.expiration;
        adu.delete_event = Some(state.events.schedule(due, EventKind::DeleteAdu(adu_id)));
    }
    if let Some(agg) = state.out_aggregators.get_mut(&agg_id) {
        agg.in_flight.insert(adu_id);
    }
    Ok(DeliveryOutcome::Sent {
        seq,
        handle,
        attempt,
    })
}

/// Schedules a retransmission if attempts remain and one fits before expiry.
fn arm_resend(events: &mut EventQueue, adu: &mut OutAdu, profile: &Profile, now: DtnTime) {
    let due = now.saturating_add(profile.nominal_rtt());
    if adu.attempts <= profile.max_rtx && due < adu.expiration {
        adu.rtx_event = Some(events.schedule(due, EventKind::ResendAdu(adu.id)));
    }
}

/// Handles a due ResendAdu event.
///
/// If the last transmission has not left the node yet the ADU is not
/// duplicated; the attempt is counted and the timer re-armed instead.
pub fn resend_adu<T: BundleTransport>(
    state: &mut EngineState,
    transport: &T,
    adu_id: AduId,
    now: DtnTime,
) -> Result<(), EngineError> {
    let Some(adu) = state.out_adus.get_mut(&adu_id) else {
        return Ok(());
    };
    adu.rtx_event = None;
    let agg_id = adu.aggregator;
    let still_pending = adu
        .transmit
        .is_some_and(|handle| transport.is_pending(handle));

    if still_pending {
        let profile_id = state
            .out_aggregators
            .get(&agg_id)
            .map(|agg| agg.profile)
            .ok_or(EngineError::Corrupt("ADU aggregator missing"))?;
        let Some(profile) = state.profiles.get(profile_id) else {
            return Err(EngineError::ProfileRemoved(profile_id));
        };
        adu.attempts += 1;
        arm_resend(&mut state.events, adu, profile, now);
        debug!(
            seq = %adu.seq,
            attempts = adu.attempts,
            "previous transmission still queued"
        );
        return Ok(());
    }

    adu.transmit = None;
    if let Some(agg) = state.out_aggregators.get_mut(&agg_id) {
        agg.in_flight.remove(&adu_id);
    }
    if !state.ready.contains(&adu_id) {
        debug!(seq = %adu.seq, "requeued ADU for retransmission");
        state.ready.push_back(adu_id);
        state.wakeups.driver += 1;
    }
    Ok(())
}

/// Handles a due DeleteAdu event: the ADU's lifespan ran out.
pub fn expire_out_adu(state: &mut EngineState, adu_id: AduId) {
    if let Some(adu) = state.out_adus.get_mut(&adu_id) {
        adu.delete_event = None;
    }
    if let Some(adu) = delete_out_adu(state, adu_id) {
        state.stats.adus_expired += 1;
        debug!(seq = %adu.seq, attempts = adu.attempts, "outbound ADU expired");
    }
}

/// Removes an outbound ADU together with its pending events and queue entries.
pub fn delete_out_adu(state: &mut EngineState, adu_id: AduId) -> Option<OutAdu> {
    let adu = state.out_adus.remove(&adu_id)?;
    for event in [adu.rtx_event, adu.delete_event].into_iter().flatten() {
        state.events.cancel(event);
    }
    state.ready.retain(|id| *id != adu_id);
    if let Some(agg) = state.out_aggregators.get_mut(&adu.aggregator) {
        agg.adus.retain(|id| *id != adu_id);
        agg.in_flight.remove(&adu_id);
        if agg.open_adu == Some(adu_id) {
            agg.open_adu = None;
        }
    }
    state.outbound_bytes = state.outbound_bytes.saturating_sub(adu.payload_bytes);
    Some(adu)
}

#[cfg(test)]
mod tests {
    use dtpc_core::{Eid, SeqNo};
    use dtpc_transport::adapter::{BundleTransport, InMemoryTransport};

    use super::{deliver_next, delete_out_adu, expire_out_adu, resend_adu, DeliveryOutcome};
    use crate::error::EngineError;
    use crate::events::EventKind;
    use crate::outbound::{insert, InsertRequest};
    use crate::state::EngineState;
    use crate::testutil::{plain_profile, state_with, transport_profile};

    fn close_one(state: &mut EngineState, now: u64) {
        let dest = Eid::ipn(2, 129);
        insert(
            state,
            InsertRequest {
                profile: 1,
                dest: &dest,
                topic: 1,
                payload: vec![0; 100],
            },
            now,
            0,
        )
        .expect("insert should succeed");
    }

    fn transport() -> InMemoryTransport {
        InMemoryTransport::new(Eid::ipn(1, 128))
    }

    #[test]
    fn first_send_arms_resend_and_delete_events() {
        let mut state = state_with(&[transport_profile(1)]);
        let mut transport = transport();
        close_one(&mut state, 0);

        let outcome = deliver_next(&mut state, &mut transport, 5).expect("send should succeed");
        let DeliveryOutcome::Sent { seq, attempt, .. } = outcome else {
            panic!("expected a send, got {outcome:?}");
        };
        assert_eq!(seq, SeqNo::ONE);
        assert_eq!(attempt, 1);
        assert!(state.ready.is_empty());

        let kinds: Vec<(u64, EventKind)> = state.events.iter().map(|e| (e.due, e.kind)).collect();
        let adu_id = state.out_adus.keys().next().copied().expect("adu stays");
        assert!(kinds.contains(&(105, EventKind::ResendAdu(adu_id))));
        assert!(kinds.contains(&(400, EventKind::DeleteAdu(adu_id))));

        let sent = &transport.outbound()[0].request;
        assert_eq!(sent.dest, Eid::ipn(2, 129));
        assert_eq!(sent.lifetime, 400);
        assert_eq!(sent.report_to, Eid::ipn(1, 0));
        let agg = state.out_aggregators.values().next().expect("aggregator");
        assert!(agg.in_flight.contains(&adu_id));
    }

    #[test]
    fn resend_requeues_once_the_bundle_left_and_shrinks_lifetime() {
        let mut state = state_with(&[transport_profile(1)]);
        let mut transport = transport();
        close_one(&mut state, 0);
        deliver_next(&mut state, &mut transport, 0).expect("send");
        let adu_id = state.out_adus.keys().next().copied().expect("adu");

        // Still queued at the transport: no duplicate, attempt counted.
        resend_adu(&mut state, &transport, adu_id, 100).expect("resend");
        assert!(state.ready.is_empty());
        assert_eq!(state.out_adus[&adu_id].attempts, 2);
        assert!(state.out_adus[&adu_id].rtx_event.is_some());

        transport.take_outbound();
        resend_adu(&mut state, &transport, adu_id, 200).expect("resend");
        assert_eq!(state.ready.front(), Some(&adu_id));
        assert_eq!(state.wakeups.driver, 2);

        let outcome = deliver_next(&mut state, &mut transport, 200).expect("resend send");
        assert!(matches!(outcome, DeliveryOutcome::Sent { attempt: 3, .. }));
        assert_eq!(transport.outbound()[0].request.lifetime, 200);
        assert_eq!(state.stats.adus_retransmitted, 1);
        // The next retransmission at 300 still falls before expiry at 400.
        assert!(state.out_adus[&adu_id].rtx_event.is_some());
    }

    #[test]
    fn attempts_stop_after_max_rtx_retransmissions() {
        let mut state = state_with(&[transport_profile(1)]);
        let mut transport = transport();
        close_one(&mut state, 0);
        let adu_id = state.ready[0];

        let mut sends = 0;
        let mut now = 0;
        loop {
            if let DeliveryOutcome::Sent { .. } =
                deliver_next(&mut state, &mut transport, now).expect("send")
            {
                sends += 1;
            }
            transport.take_outbound();
            let Some(event) = state.out_adus[&adu_id].rtx_event else {
                break;
            };
            now = state.events.get(event).map(|e| e.due).expect("event queued");
            state.events.cancel(event);
            resend_adu(&mut state, &transport, adu_id, now).expect("resend");
        }
        // One send plus three retransmissions at 100, 200 and 300.
        assert_eq!(sends, 4);
        assert_eq!(state.out_adus[&adu_id].attempts, 4);
    }

    #[test]
    fn expired_ready_adu_is_dropped_without_sending() {
        let mut state = state_with(&[transport_profile(1)]);
        let mut transport = transport();
        close_one(&mut state, 0);

        let outcome = deliver_next(&mut state, &mut transport, 400).expect("deliver");
        assert_eq!(outcome, DeliveryOutcome::Expired { seq: SeqNo::ONE });
        assert!(transport.outbound().is_empty());
        assert_eq!(state.stats.adus_expired_before_send, 1);
        assert_eq!(state.outbound_bytes, 0);
        assert_eq!(
            deliver_next(&mut state, &mut transport, 400).expect("idle"),
            DeliveryOutcome::Idle
        );
    }

    #[test]
    fn ready_adu_without_aggregator_is_dropped_from_the_queue() {
        let mut state = state_with(&[transport_profile(1)]);
        let mut transport = transport();
        close_one(&mut state, 0);
        state.out_aggregators.clear();

        assert!(matches!(
            deliver_next(&mut state, &mut transport, 0),
            Err(EngineError::Corrupt(_))
        ));
        assert!(state.ready.is_empty());
        assert!(state.out_adus.is_empty());
        assert_eq!(
            deliver_next(&mut state, &mut transport, 0).expect("idle"),
            DeliveryOutcome::Idle
        );
    }

    #[test]
    fn congestion_and_failure_keep_the_adu_queued() {
        let mut state = state_with(&[transport_profile(1)]);
        let mut transport = InMemoryTransport::with_capacity(Eid::ipn(1, 128), 0);
        close_one(&mut state, 0);

        assert_eq!(
            deliver_next(&mut state, &mut transport, 1).expect("congested"),
            DeliveryOutcome::Congested
        );
        transport.set_capacity(None);
        transport.set_fail_sends(true);
        let err = deliver_next(&mut state, &mut transport, 1).expect_err("send should fail");
        assert!(matches!(err, EngineError::Transport(_)));
        assert_eq!(state.ready.len(), 1);

        transport.set_fail_sends(false);
        assert!(matches!(
            deliver_next(&mut state, &mut transport, 1).expect("send"),
            DeliveryOutcome::Sent { .. }
        ));
        assert_eq!(state.stats.congestion_retries, 1);
        assert_eq!(state.stats.send_failures, 1);
    }

    #[test]
    fn no_transport_adus_are_deleted_after_handoff() {
        let mut state = state_with(&[plain_profile(1)]);
        let mut transport = transport();
        close_one(&mut state, 0);
        deliver_next(&mut state, &mut transport, 0).expect("send");

        assert!(transport.is_pending(transport.outbound()[0].handle));
        assert_eq!(state.out_adus.len(), 1, "only the fresh open ADU remains");
        assert!(state.events.is_empty());
    }

    #[test]
    fn expiry_and_delete_cancel_pending_events() {
        let mut state = state_with(&[transport_profile(1)]);
        let mut transport = transport();
        close_one(&mut state, 0);
        let adu_id = state.ready[0];
        deliver_next(&mut state, &mut transport, 0).expect("send");
        assert_eq!(state.events.len(), 2);

        expire_out_adu(&mut state, adu_id);
        assert!(state.events.is_empty());
        assert_eq!(state.stats.adus_expired, 1);
        assert!(delete_out_adu(&mut state, adu_id).is_none());
    }
}
