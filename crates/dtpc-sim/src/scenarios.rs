use std::collections::BTreeSet;

use dtpc_core::{DtnTime, Eid, TopicId};
use dtpc_node::config::EngineConfig;
use dtpc_node::error::EngineError;
use dtpc_node::outbound::InsertOutcome;
use dtpc_node::profile::Profile;
use dtpc_node::runtime::DtpcNode;
use dtpc_node::state::EngineStats;
use dtpc_transport::adapter::{BundleTransport, InMemoryTransport, TransportHealthSnapshot};
use dtpc_transport::lossy::{LossyLink, RouteReport};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

pub const SENDER_NODE: u64 = 1;
pub const RECEIVER_NODE: u64 = 2;
pub const SIM_TOPIC: TopicId = 1;

/// Every item starts with its big-endian index.
const INDEX_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LossScenario {
    pub loss_percent: u8,
    pub reorder_percent: u8,
    pub seed: u64,
}

pub const PRACTICAL_BASELINE: LossScenario = LossScenario {
    loss_percent: 10,
    reorder_percent: 10,
    seed: 7,
};

pub fn practical_baseline() -> LossScenario {
    PRACTICAL_BASELINE
}

/// One sender-to-receiver transfer run.
#[derive(Debug, Clone)]
pub struct TransferParams {
    pub items: usize,
    pub item_len: usize,
    pub link: LossScenario,
    /// Virtual seconds to run before giving up on convergence.
    pub max_seconds: u64,
    pub profile: Profile,
    /// Base config for both nodes; node addresses are overridden.
    pub config: EngineConfig,
}

#[derive(Debug, Error)]
pub enum SimError {
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("item length {0} is shorter than the {INDEX_LEN}-byte item index")]
    ItemTooShort(usize),
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    pub items: usize,
    /// Items the sender engine accepted.
    pub accepted: usize,
    /// Distinct items that reached the receiving topic.
    pub delivered: usize,
    pub in_order: bool,
    pub duplicates: usize,
    /// Virtual seconds until both sides settled, or the limit.
    pub seconds: u64,
    /// Nothing left in flight: every ADU was acknowledged or given up on.
    pub converged: bool,
    pub link: LossScenario,
    pub bundles_dropped: usize,
    pub bundles_delayed: usize,
    pub sender: EngineStats,
    pub receiver: EngineStats,
    pub sender_transport: TransportHealthSnapshot,
    pub receiver_transport: TransportHealthSnapshot,
}

fn build_node(
    id: u64,
    params: &TransferParams,
) -> Result<DtpcNode<InMemoryTransport>, EngineError> {
    let mut config = params.config.clone();
    config.node = Eid::ipn(id, 0);
    if !config.profiles.iter().any(|p| p.id == params.profile.id) {
        config.profiles.push(params.profile.clone());
    }
    let transport = InMemoryTransport::new(config.send_endpoint());
    DtpcNode::new(config, transport)
}

fn item_payload(rng: &mut StdRng, index: u64, len: usize) -> Vec<u8> {
    let mut payload = vec![0_u8; len];
    payload[..INDEX_LEN].copy_from_slice(&index.to_be_bytes());
    rng.fill_bytes(&mut payload[INDEX_LEN..]);
    payload
}

fn item_index(payload: &[u8]) -> Option<u64> {
    let bytes: [u8; INDEX_LEN] = payload.get(..INDEX_LEN)?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

fn settled(
    sender: &DtpcNode<InMemoryTransport>,
    receiver: &DtpcNode<InMemoryTransport>,
    links: [&LossyLink; 2],
) -> bool {
    let outbound_idle = sender
        .state
        .out_adus
        .values()
        .all(|adu| !adu.is_closed() && adu.record_count() == 0);
    outbound_idle && receiver.state.gap_count() == 0 && links.iter().all(|l| l.held() == 0)
}

/// Inserts every item at time zero, then steps both nodes one virtual
/// second at a time until nothing is left in flight.
pub fn run_transfer(params: &TransferParams) -> Result<TransferReport, SimError> {
    if params.item_len < INDEX_LEN {
        return Err(SimError::ItemTooShort(params.item_len));
    }
    let mut sender = build_node(SENDER_NODE, params)?;
    let mut receiver = build_node(RECEIVER_NODE, params)?;
    receiver.open_topic(SIM_TOPIC)?;
    let dest = receiver.config.recv_endpoint();

    let mut rng = StdRng::seed_from_u64(params.link.seed);
    let mut accepted = 0;
    for index in 0..params.items as u64 {
        let payload = item_payload(&mut rng, index, params.item_len);
        match sender.insert(params.profile.id, &dest, SIM_TOPIC, payload, 0)? {
            InsertOutcome::Accepted { .. } => accepted += 1,
            InsertOutcome::Rejected(reason) => debug!(index, ?reason, "item rejected"),
        }
    }

    let LossScenario {
        loss_percent,
        reorder_percent,
        seed,
    } = params.link;
    let mut forward = LossyLink::new(seed, loss_percent, reorder_percent);
    let mut backward = LossyLink::new(seed.wrapping_add(1), loss_percent, reorder_percent);
    let mut routed = RouteReport::default();
    let mut tally = |report: RouteReport| {
        routed.dropped += report.dropped;
        routed.delayed += report.delayed;
    };

    let mut received = Vec::new();
    let mut seen = BTreeSet::new();
    let mut duplicates = 0;
    let mut converged = false;
    let mut seconds: DtnTime = 0;

    for now in 0..=params.max_seconds {
        seconds = now;
        sender.tick(now)?;
        receiver.tick(now)?;
        sender.deliver_pending(now)?;
        tally(forward.route(&mut sender.transport, &mut receiver.transport));
        receiver.poll_inbound(now)?;
        tally(backward.route(&mut receiver.transport, &mut sender.transport));
        sender.poll_inbound(now)?;

        while let Some(item) = receiver.pop_item(SIM_TOPIC) {
            let Some(index) = item_index(&item.payload) else {
                continue;
            };
            if !seen.insert(index) {
                duplicates += 1;
            }
            received.push(index);
        }
        sender.take_wakeups();
        receiver.take_wakeups();

        if settled(&sender, &receiver, [&forward, &backward]) {
            converged = true;
            break;
        }
    }

    let in_order = received.windows(2).all(|pair| pair[0] < pair[1]);
    let report = TransferReport {
        items: params.items,
        accepted,
        delivered: seen.len(),
        in_order,
        duplicates,
        seconds,
        converged,
        link: params.link,
        bundles_dropped: routed.dropped,
        bundles_delayed: routed.delayed,
        sender: sender.stats(),
        receiver: receiver.stats(),
        sender_transport: sender.transport.health_snapshot(),
        receiver_transport: receiver.transport.health_snapshot(),
    };
    info!(
        delivered = report.delivered,
        accepted,
        seconds,
        converged,
        "transfer finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use dtpc_core::Eid;
    use dtpc_node::config::EngineConfig;
    use dtpc_node::profile::Profile;

    use super::{
        practical_baseline, run_transfer, LossScenario, SimError, TransferParams,
    };

    fn profile(max_rtx: u32) -> Profile {
        Profile {
            id: 1,
            max_rtx,
            aggr_size_limit: 256,
            aggr_time_limit: 5,
            lifespan: 400,
            class_of_service: 1,
            ancillary: Default::default(),
            custody: Default::default(),
            srr_flags: Default::default(),
            report_to: Eid::ipn(1, 0),
        }
    }

    fn params(link: LossScenario, max_rtx: u32) -> TransferParams {
        TransferParams {
            items: 50,
            item_len: 32,
            link,
            max_seconds: 5_000,
            profile: profile(max_rtx),
            config: EngineConfig::default(),
        }
    }

    #[test]
    fn practical_baseline_is_reasonable() {
        let baseline = practical_baseline();
        assert_eq!(baseline.loss_percent, 10);
        assert_eq!(baseline.reorder_percent, 10);
    }

    #[test]
    fn perfect_link_delivers_everything_in_order() {
        let link = LossScenario {
            loss_percent: 0,
            reorder_percent: 0,
            seed: 1,
        };
        let report = run_transfer(&params(link, 3)).expect("transfer");
        assert!(report.converged);
        assert_eq!(report.accepted, 50);
        assert_eq!(report.delivered, 50);
        assert!(report.in_order);
        assert_eq!(report.duplicates, 0);
        assert_eq!(report.sender.adus_retransmitted, 0);
        assert_eq!(report.sender.adus_acknowledged, report.sender.adus_sent);
        assert_eq!(report.sender_transport.outbound_send_ok, report.sender.adus_sent);
        assert_eq!(report.receiver_transport.outbound_send_ok, report.receiver.acks_sent);
        assert_eq!(
            report.receiver_transport.inbound_received,
            report.receiver.adus_received
        );
    }

    #[test]
    fn lossy_link_retransmits_and_keeps_order() {
        let link = LossScenario {
            loss_percent: 30,
            reorder_percent: 20,
            seed: 11,
        };
        let report = run_transfer(&params(link, 3)).expect("transfer");
        assert!(report.converged);
        assert!(report.in_order);
        assert_eq!(report.duplicates, 0);
        assert!(report.bundles_dropped > 0);
        assert!(report.sender.adus_retransmitted > 0);
    }

    #[test]
    fn short_items_are_refused() {
        let mut p = params(practical_baseline(), 3);
        p.item_len = 4;
        assert!(matches!(run_transfer(&p), Err(SimError::ItemTooShort(4))));
    }
}
