use std::collections::VecDeque;

use dtpc_core::{DtnTime, DtpcError, Eid, TransmitRef};
use serde::{Deserialize, Serialize};

/// Custody transfer requested for a bundle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustodyMode {
    #[default]
    None,
    Optional,
    Required,
}

/// Extended class-of-service fields passed through to the bundle layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Ancillary {
    pub ordinal: u8,
    pub flags: u8,
    pub data_label: u32,
}

/// Status-report request bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SrrFlags(pub u8);

impl SrrFlags {
    pub const RECEIVED: u8 = 0x01;
    pub const CUSTODY: u8 = 0x02;
    pub const FORWARDED: u8 = 0x04;
    pub const DELIVERED: u8 = 0x08;
    pub const DELETED: u8 = 0x10;

    /// Parses a comma-separated list of `rcv`, `ct`, `fwd`, `dlv`, `del`.
    pub fn parse_list(text: &str) -> Result<Self, DtpcError> {
        let mut bits = 0_u8;
        for token in text.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            bits |= match token {
                "rcv" => Self::RECEIVED,
                "ct" => Self::CUSTODY,
                "fwd" => Self::FORWARDED,
                "dlv" => Self::DELIVERED,
                "del" => Self::DELETED,
                _ => return Err(DtpcError::InvalidInput("unknown status report flag")),
            };
        }
        Ok(Self(bits))
    }

    pub fn contains(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    /// Inverse of [`SrrFlags::parse_list`].
    pub fn to_list(self) -> String {
        [
            (Self::RECEIVED, "rcv"),
            (Self::CUSTODY, "ct"),
            (Self::FORWARDED, "fwd"),
            (Self::DELIVERED, "dlv"),
            (Self::DELETED, "del"),
        ]
        .iter()
        .filter(|(bit, _)| self.contains(*bit))
        .map(|(_, name)| *name)
        .collect::<Vec<_>>()
        .join(",")
    }
}

/// One bundle handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub dest: Eid,
    pub report_to: Eid,
    pub creation_time: DtnTime,
    /// Seconds the bundle may live in the network.
    pub lifetime: u64,
    pub class_of_service: u8,
    pub custody: CustodyMode,
    pub srr_flags: SrrFlags,
    pub ancillary: Ancillary,
    pub payload: Vec<u8>,
}

/// Result of [`BundleTransport::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Accepted; the handle stays pending until the bundle leaves the node.
    Enqueued(TransmitRef),
    /// Temporarily out of resources; retry later.
    Congested,
    Failed(String),
}

/// One inbound bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub source: Eid,
    pub creation_time: DtnTime,
    /// Remaining bundle lifetime in seconds, as set by the sender.
    pub lifetime: u64,
    pub payload: Vec<u8>,
}

/// Coarse per-transport counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransportHealthSnapshot {
    pub outbound_queued: u64,
    pub outbound_send_ok: u64,
    pub outbound_congested: u64,
    pub outbound_send_err: u64,
    pub inbound_received: u64,
    pub last_error: Option<String>,
}

/// Bundle-oriented transport contract consumed by the DTPC engine.
pub trait BundleTransport {
    /// Hands one bundle to the transport.
    fn send(&mut self, request: SendRequest) -> SendOutcome;

    /// Whether a previously enqueued bundle is still waiting to leave the node.
    fn is_pending(&self, handle: TransmitRef) -> bool;

    /// Returns the next inbound bundle, if any.
    fn receive(&mut self) -> Option<Delivery>;

    /// Best-effort counters for diagnostics.
    fn health_snapshot(&self) -> TransportHealthSnapshot {
        TransportHealthSnapshot::default()
    }
}

/// Bundle captured by [`InMemoryTransport`] until routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub handle: TransmitRef,
    pub source: Eid,
    pub request: SendRequest,
}

impl Outbound {
    pub fn into_delivery(self) -> Delivery {
        Delivery {
            source: self.source,
            creation_time: self.request.creation_time,
            lifetime: self.request.lifetime,
            payload: self.request.payload,
        }
    }
}

/// In-memory transport for tests and simulations.
///
/// Sent bundles stay pending until [`InMemoryTransport::take_outbound`]
/// drains them.
#[derive(Debug, Clone)]
pub struct InMemoryTransport {
    local: Eid,
    inbound: VecDeque<Delivery>,
    outbound: Vec<Outbound>,
    next_handle: u64,
    capacity: Option<usize>,
    fail_sends: bool,
    send_ok: u64,
    congested: u64,
    send_err: u64,
    recv_ok: u64,
}

impl InMemoryTransport {
    /// Creates a transport whose bundles are sourced from `local`.
    pub fn new(local: Eid) -> Self {
        Self {
            local,
            inbound: VecDeque::new(),
            outbound: Vec::new(),
            next_handle: 1,
            capacity: None,
            fail_sends: false,
            send_ok: 0,
            congested: 0,
            send_err: 0,
            recv_ok: 0,
        }
    }

    /// Reports `Congested` once `capacity` bundles are waiting.
    pub fn with_capacity(local: Eid, capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new(local)
        }
    }

    pub fn local(&self) -> &Eid {
        &self.local
    }

    pub fn set_capacity(&mut self, capacity: Option<usize>) {
        self.capacity = capacity;
    }

    /// If enabled, every send fails.
    pub fn set_fail_sends(&mut self, fail_sends: bool) {
        self.fail_sends = fail_sends;
    }

    pub fn enqueue_inbound(&mut self, delivery: Delivery) {
        self.inbound.push_back(delivery);
    }

    /// Bundles sent but not yet routed.
    pub fn outbound(&self) -> &[Outbound] {
        &self.outbound
    }

    /// Drains every captured bundle; their handles stop being pending.
    pub fn take_outbound(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbound)
    }

    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }
}

impl BundleTransport for InMemoryTransport {
    fn send(&mut self, request: SendRequest) -> SendOutcome {
        if self.fail_sends {
            self.send_err += 1;
            return SendOutcome::Failed("send disabled".to_string());
        }
        if self
            .capacity
            .is_some_and(|capacity| self.outbound.len() >= capacity)
        {
            self.congested += 1;
            return SendOutcome::Congested;
        }
        let handle = TransmitRef(self.next_handle);
        self.next_handle += 1;
        self.outbound.push(Outbound {
            handle,
            source: self.local.clone(),
            request,
        });
        self.send_ok += 1;
        SendOutcome::Enqueued(handle)
    }

    fn is_pending(&self, handle: TransmitRef) -> bool {
        self.outbound.iter().any(|out| out.handle == handle)
    }

    fn receive(&mut self) -> Option<Delivery> {
        let delivery = self.inbound.pop_front();
        if delivery.is_some() {
            self.recv_ok += 1;
        }
        delivery
    }

    fn health_snapshot(&self) -> TransportHealthSnapshot {
        TransportHealthSnapshot {
            outbound_queued: self.outbound.len() as u64,
            outbound_send_ok: self.send_ok,
            outbound_congested: self.congested,
            outbound_send_err: self.send_err,
            inbound_received: self.recv_ok,
            last_error: None,
        }
    }
}

/// Moves every captured bundle of `from` into the inbound queue of `to`.
pub fn route_in_memory_outbound(from: &mut InMemoryTransport, to: &mut InMemoryTransport) -> usize {
    let outbound = from.take_outbound();
    let moved = outbound.len();
    for out in outbound {
        to.enqueue_inbound(out.into_delivery());
    }
    moved
}

#[cfg(test)]
mod tests {
    use dtpc_core::{Eid, TransmitRef};

    use super::{
        route_in_memory_outbound, Ancillary, BundleTransport, CustodyMode, InMemoryTransport,
        SendOutcome, SendRequest, SrrFlags,
    };

    fn request(payload: &[u8]) -> SendRequest {
        SendRequest {
            dest: Eid::ipn(2, 129),
            report_to: Eid::ipn(1, 0),
            creation_time: 100,
            lifetime: 60,
            class_of_service: 1,
            custody: CustodyMode::None,
            srr_flags: SrrFlags::default(),
            ancillary: Ancillary::default(),
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn sent_bundles_stay_pending_until_drained() {
        let mut transport = InMemoryTransport::new(Eid::ipn(1, 128));
        let SendOutcome::Enqueued(handle) = transport.send(request(b"a")) else {
            panic!("send should enqueue");
        };
        assert!(transport.is_pending(handle));
        assert!(!transport.is_pending(TransmitRef(999)));

        let drained = transport.take_outbound();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].source, Eid::ipn(1, 128));
        assert!(!transport.is_pending(handle));
    }

    #[test]
    fn capacity_and_failure_toggles_shape_outcomes() {
        let mut transport = InMemoryTransport::with_capacity(Eid::ipn(1, 128), 1);
        assert!(matches!(transport.send(request(b"a")), SendOutcome::Enqueued(_)));
        assert_eq!(transport.send(request(b"b")), SendOutcome::Congested);

        transport.set_capacity(None);
        transport.set_fail_sends(true);
        assert!(matches!(transport.send(request(b"c")), SendOutcome::Failed(_)));

        let health = transport.health_snapshot();
        assert_eq!(health.outbound_queued, 1);
        assert_eq!(health.outbound_send_ok, 1);
        assert_eq!(health.outbound_congested, 1);
        assert_eq!(health.outbound_send_err, 1);
    }

    #[test]
    fn route_moves_bundles_with_source_and_creation_time() {
        let mut a = InMemoryTransport::new(Eid::ipn(1, 128));
        let mut b = InMemoryTransport::new(Eid::ipn(2, 128));
        a.send(request(&[1, 2, 3]));
        a.send(request(&[4]));

        assert_eq!(route_in_memory_outbound(&mut a, &mut b), 2);
        let first = b.receive().expect("first delivery expected");
        assert_eq!(first.source, Eid::ipn(1, 128));
        assert_eq!(first.creation_time, 100);
        assert_eq!(first.lifetime, 60);
        assert_eq!(first.payload, vec![1, 2, 3]);
        assert_eq!(b.receive().map(|d| d.payload), Some(vec![4]));
        assert!(b.receive().is_none());
    }

    #[test]
    fn srr_flag_list_parses_known_tokens() {
        let flags = SrrFlags::parse_list("rcv, dlv,del").expect("flags should parse");
        assert!(flags.contains(SrrFlags::RECEIVED));
        assert!(flags.contains(SrrFlags::DELIVERED));
        assert!(flags.contains(SrrFlags::DELETED));
        assert!(!flags.contains(SrrFlags::CUSTODY));
        assert_eq!(flags.to_list(), "rcv,dlv,del");
        assert_eq!(SrrFlags::parse_list(""), Ok(SrrFlags(0)));
        assert!(SrrFlags::parse_list("rcv,bogus").is_err());
    }
}
