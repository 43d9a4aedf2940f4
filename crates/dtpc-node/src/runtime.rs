use std::path::Path;

use dtpc_codec::message::{decode_message, DtpcMessage};
use dtpc_core::{DtnTime, Eid, ProfileId, TopicId};
use dtpc_transport::adapter::{BundleTransport, Delivery};
use tracing::{info, warn};

use crate::ack::{on_ack_arrival, send_ack, AckOutcome, AckParams};
use crate::config::EngineConfig;
use crate::delivery::{deliver_next, expire_out_adu, resend_adu, DeliveryOutcome};
use crate::error::EngineError;
use crate::events::EventKind;
use crate::inbound::{expire_gap, on_adu_arrival, Arrival, ArrivalOutcome};
use crate::outbound::{age_open_adus, insert, InsertOutcome, InsertRequest};
use crate::persistence::save_state_to_path;
use crate::profile::Profile;
use crate::state::{DeliveredItem, EngineState, EngineStats, Wakeups};
use crate::subscriptions;

/// What one inbound bundle turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Adu(ArrivalOutcome),
    Ack(AckOutcome),
    /// Payload was not a DTPC frame.
    Undecodable,
}

/// Work done by one clock tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// ADUs closed because they reached their time limit.
    pub closed: usize,
    /// Scheduler events that fired.
    pub events: usize,
}

/// Summary of one [`DtpcNode::deliver_pending`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub sent: usize,
    pub expired: usize,
    /// The pass stopped because the transport was congested.
    pub congested: bool,
}

/// Stateful engine facade: owns the state, the transport and the config.
///
/// Every method is one read-modify-write step; callers sharing a node
/// across threads wrap it in a single lock.
pub struct DtpcNode<T: BundleTransport> {
    pub state: EngineState,
    pub transport: T,
    pub config: EngineConfig,
}

impl<T: BundleTransport> DtpcNode<T> {
    /// Builds a node with the profiles listed in `config`.
    pub fn new(config: EngineConfig, transport: T) -> Result<Self, EngineError> {
        Self::with_state(config, transport, EngineState::default())
    }

    /// Resumes from restored state; configured profiles missing from it are added.
    pub fn with_state(
        config: EngineConfig,
        transport: T,
        mut state: EngineState,
    ) -> Result<Self, EngineError> {
        for profile in &config.profiles {
            if state.profiles.get(profile.id).is_none() {
                state.profiles.add(profile.clone())?;
            }
        }
        info!(
            node = %config.node,
            profiles = state.profiles.len(),
            "dtpc node ready"
        );
        Ok(Self {
            state,
            transport,
            config,
        })
    }

    pub fn add_profile(&mut self, profile: Profile) -> Result<(), EngineError> {
        let id = profile.id;
        self.state.profiles.add(profile)?;
        info!(profile = id, "added profile");
        Ok(())
    }

    pub fn remove_profile(&mut self, id: ProfileId) -> Result<Profile, EngineError> {
        let profile = self.state.profiles.remove(id)?;
        info!(profile = id, "removed profile");
        Ok(profile)
    }

    pub fn insert(
        &mut self,
        profile: ProfileId,
        dest: &Eid,
        topic: TopicId,
        payload: Vec<u8>,
        now: DtnTime,
    ) -> Result<InsertOutcome, EngineError> {
        insert(
            &mut self.state,
            InsertRequest {
                profile,
                dest,
                topic,
                payload,
            },
            now,
            self.config.store_capacity_bytes,
        )
    }

    pub fn open_topic(&mut self, topic: TopicId) -> Result<(), EngineError> {
        subscriptions::open_topic(&mut self.state, topic)
    }

    pub fn close_topic(&mut self, topic: TopicId) -> usize {
        subscriptions::close_topic(&mut self.state, topic)
    }

    pub fn pop_item(&mut self, topic: TopicId) -> Option<DeliveredItem> {
        subscriptions::pop_item(&mut self.state, topic)
    }

    /// One clock second: ages open ADUs, then fires every due event.
    pub fn tick(&mut self, now: DtnTime) -> Result<TickReport, EngineError> {
        let closed = age_open_adus(&mut self.state)?;
        let events = self.dispatch_due(now)?;
        Ok(TickReport { closed, events })
    }

    /// Fires every scheduler event due at or before `now`, in due order.
    pub fn dispatch_due(&mut self, now: DtnTime) -> Result<usize, EngineError> {
        let mut fired = 0;
        while let Some(event) = self.state.events.pop_due(now) {
            fired += 1;
            match event.kind {
                EventKind::ResendAdu(adu) => {
                    resend_adu(&mut self.state, &self.transport, adu, now)?;
                }
                EventKind::DeleteAdu(adu) => expire_out_adu(&mut self.state, adu),
                EventKind::DeleteGap(adu) => {
                    expire_gap(&mut self.state, adu)?;
                }
            }
        }
        Ok(fired)
    }

    pub fn deliver_next(&mut self, now: DtnTime) -> Result<DeliveryOutcome, EngineError> {
        deliver_next(&mut self.state, &mut self.transport, now)
    }

    /// Sends ready ADUs until the queue drains or the transport pushes back.
    pub fn deliver_pending(&mut self, now: DtnTime) -> Result<DeliveryReport, EngineError> {
        let mut report = DeliveryReport::default();
        loop {
            match self.deliver_next(now)? {
                DeliveryOutcome::Idle => return Ok(report),
                DeliveryOutcome::Sent { .. } => report.sent += 1,
                DeliveryOutcome::Expired { .. } => report.expired += 1,
                DeliveryOutcome::Congested => {
                    report.congested = true;
                    return Ok(report);
                }
            }
        }
    }

    /// Classifies one inbound bundle and applies it.
    pub fn handle_delivery(
        &mut self,
        delivery: Delivery,
        now: DtnTime,
    ) -> Result<InboundEvent, EngineError> {
        let Delivery {
            source,
            creation_time,
            lifetime,
            payload,
        } = delivery;
        let message = match decode_message(&payload) {
            Ok(message) => message,
            Err(err) => {
                self.state.stats.malformed_adus += 1;
                warn!(%source, %err, "dropping undecodable bundle");
                return Ok(InboundEvent::Undecodable);
            }
        };
        let recv_service = self.config.recv_service;
        match message {
            DtpcMessage::Ack(ack) => Ok(InboundEvent::Ack(on_ack_arrival(
                &mut self.state,
                &source,
                ack,
                recv_service,
            ))),
            DtpcMessage::Adu { header, body } => {
                let outcome = on_adu_arrival(
                    &mut self.state,
                    &self.config,
                    Arrival {
                        source: &source,
                        creation_time,
                        lifetime,
                        header,
                        body,
                    },
                    now,
                )?;
                let reliable = self
                    .state
                    .profiles
                    .get(header.profile)
                    .is_some_and(Profile::has_transport_service);
                if outcome.acknowledges() && reliable {
                    send_ack(
                        &mut self.state,
                        &mut self.transport,
                        AckParams {
                            source: &source,
                            profile: header.profile,
                            seq: header.seq,
                            creation_time,
                            recv_service,
                        },
                        now,
                    );
                }
                Ok(InboundEvent::Adu(outcome))
            }
        }
    }

    /// Handles every bundle the transport has waiting. Returns how many.
    pub fn poll_inbound(&mut self, now: DtnTime) -> Result<usize, EngineError> {
        let mut handled = 0;
        while let Some(delivery) = self.transport.receive() {
            self.handle_delivery(delivery, now)?;
            handled += 1;
        }
        Ok(handled)
    }

    pub fn take_wakeups(&mut self) -> Wakeups {
        self.state.take_wakeups()
    }

    pub fn stats(&self) -> EngineStats {
        self.state.stats
    }

    pub fn next_event_due(&self) -> Option<DtnTime> {
        self.state.events.next_due()
    }

    pub fn save_state(&self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        save_state_to_path(path, &self.state)?;
        Ok(())
    }
}
