use dtpc_core::Eid;
use dtpc_transport::adapter::SrrFlags;

use crate::profile::Profile;
use crate::state::EngineState;

/// Transport profile: three retransmissions, 100-byte / 10-second aggregation.
pub(crate) fn transport_profile(id: u32) -> Profile {
    Profile {
        id,
        max_rtx: 3,
        aggr_size_limit: 100,
        aggr_time_limit: 10,
        lifespan: 400,
        class_of_service: 1,
        ancillary: Default::default(),
        custody: Default::default(),
        srr_flags: SrrFlags::default(),
        report_to: Eid::ipn(1, 0),
    }
}

/// Best-effort profile without aggregation.
pub(crate) fn plain_profile(id: u32) -> Profile {
    Profile {
        max_rtx: 0,
        aggr_time_limit: 0,
        ..transport_profile(id)
    }
}

pub(crate) fn state_with(profiles: &[Profile]) -> EngineState {
    let mut state = EngineState::default();
    for profile in profiles {
        state
            .profiles
            .add(profile.clone())
            .expect("test profile should be valid");
    }
    state
}
