use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use dtpc_core::Eid;
use dtpc_node::config::EngineConfig;
use dtpc_node::profile::Profile;
use dtpc_node::runtime::DtpcNode;
use dtpc_node::service::{Engine, ManualClock, ReceiveOutcome};
use dtpc_transport::adapter::InMemoryTransport;
use dtpc_transport::lossy::LossyLink;

fn engine(id: u64, clock: Arc<ManualClock>) -> Engine<InMemoryTransport> {
    let profile = Profile {
        id: 1,
        max_rtx: 3,
        aggr_size_limit: 64,
        aggr_time_limit: 1_000_000,
        lifespan: 400,
        class_of_service: 1,
        ancillary: Default::default(),
        custody: Default::default(),
        srr_flags: Default::default(),
        report_to: Eid::ipn(1, 0),
    };
    let config = EngineConfig {
        node: Eid::ipn(id, 0),
        profiles: vec![profile],
        clock_tick_ms: 5,
        inbound_poll_ms: 5,
        ..EngineConfig::default()
    };
    let transport = InMemoryTransport::new(config.send_endpoint());
    let node = DtpcNode::new(config, transport).expect("node should build");
    Engine::start_with_clock(node, clock).expect("engine should start")
}

fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

/// Moves bundles one way through `link`, holding both engines' locks.
fn route(
    link: &mut LossyLink,
    from: &Engine<InMemoryTransport>,
    to: &Engine<InMemoryTransport>,
) {
    from.with_node(|src, _| {
        to.with_node(|dst, _| link.route(&mut src.transport, &mut dst.transport));
    });
}

#[test]
fn e2e_threaded_engines_recover_a_lost_adu() {
    let clock = Arc::new(ManualClock::new(0));
    let a = engine(1, Arc::clone(&clock));
    let b = engine(2, Arc::clone(&clock));
    let subscription = b.open_topic(7).expect("open topic");
    let dest = Eid::ipn(2, 129);

    for n in 0..3_u8 {
        a.insert(1, &dest, 7, vec![n; 64]).expect("insert");
    }
    wait_for("first sends", || a.stats().adus_sent == 3);

    // Lose the middle ADU.
    let mut bundles = a.with_node(|node, _| node.transport.take_outbound());
    bundles.remove(1);
    b.with_node(|node, _| {
        for bundle in bundles {
            node.transport.enqueue_inbound(bundle.into_delivery());
        }
    });
    match subscription.receive(Some(Duration::from_secs(10))) {
        ReceiveOutcome::Item(item) => assert_eq!(item.payload, vec![0; 64]),
        other => panic!("unexpected receive outcome {other:?}"),
    }
    wait_for("gap", || b.with_node(|node, _| node.state.gap_count() == 1));

    let mut back = LossyLink::perfect();
    route(&mut back, &b, &a);
    wait_for("two acks", || a.stats().adus_acknowledged == 2);

    // One round-trip later the missing ADU is sent again.
    clock.advance(100);
    wait_for("retransmission", || a.stats().adus_retransmitted == 1);
    let mut forward = LossyLink::perfect();
    route(&mut forward, &a, &b);

    for expected in [1_u8, 2] {
        match subscription.receive(Some(Duration::from_secs(10))) {
            ReceiveOutcome::Item(item) => assert_eq!(item.payload, vec![expected; 64]),
            other => panic!("unexpected receive outcome {other:?}"),
        }
    }
    route(&mut back, &b, &a);
    wait_for("final ack", || a.stats().adus_acknowledged == 3);
}
