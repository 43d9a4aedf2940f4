#![no_main]

use dtpc_core::Eid;
use dtpc_node::config::EngineConfig;
use dtpc_node::profile::Profile;
use dtpc_node::runtime::DtpcNode;
use dtpc_transport::adapter::{Delivery, InMemoryTransport};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let profile = Profile {
        id: 1,
        max_rtx: 3,
        aggr_size_limit: 1024,
        aggr_time_limit: 5,
        lifespan: 60,
        class_of_service: 1,
        ancillary: Default::default(),
        custody: Default::default(),
        srr_flags: Default::default(),
        report_to: Eid::ipn(1, 0),
    };
    let config = EngineConfig {
        infer_unknown_profiles: data.first().is_some_and(|b| b & 1 == 1),
        profiles: vec![profile],
        ..EngineConfig::default()
    };
    let transport = InMemoryTransport::new(config.send_endpoint());
    let Ok(mut node) = DtpcNode::new(config, transport) else {
        return;
    };
    let _ = node.open_topic(1);

    for (now, chunk) in data.chunks(64).enumerate() {
        let now = now as u64;
        let delivery = Delivery {
            source: Eid::ipn(2, 128),
            creation_time: now,
            lifetime: 60,
            payload: chunk.to_vec(),
        };
        let _ = node.handle_delivery(delivery, now);
        let _ = node.tick(now);
        while node.pop_item(1).is_some() {}
    }
});
