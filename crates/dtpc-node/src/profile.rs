use std::collections::BTreeMap;

use dtpc_core::{Eid, ProfileId, SeqNo};
use dtpc_transport::adapter::{Ancillary, CustodyMode, SrrFlags};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Service number used for report-to endpoints of inferred profiles.
pub const INFERRED_REPORT_SERVICE: u64 = 2_097_151;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProfileError {
    #[error("profile id must be non-zero")]
    ZeroId,
    #[error("profile {0} has zero lifespan")]
    ZeroLifespan(ProfileId),
    #[error("profile {0} has no report-to endpoint")]
    MissingReportTo(ProfileId),
    #[error("profile {id} report-to endpoint is invalid: {eid}")]
    InvalidReportTo { id: ProfileId, eid: String },
    #[error("profile {0} already exists")]
    Duplicate(ProfileId),
    #[error("profile {id} has the same parameters as profile {existing}")]
    SameParameters { id: ProfileId, existing: ProfileId },
    #[error("profile {0} is unknown")]
    Unknown(ProfileId),
}

/// Immutable delivery parameters shared by every aggregator that uses them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    /// Retransmissions after the first send; zero means no transport service.
    #[serde(default)]
    pub max_rtx: u32,
    /// Payload bytes at which an ADU is closed.
    #[serde(default)]
    pub aggr_size_limit: u64,
    /// Seconds an ADU may stay open; zero disables aggregation.
    #[serde(default)]
    pub aggr_time_limit: u64,
    /// Seconds an item stays deliverable.
    pub lifespan: u64,
    #[serde(default)]
    pub class_of_service: u8,
    #[serde(default)]
    pub ancillary: Ancillary,
    #[serde(default)]
    pub custody: CustodyMode,
    #[serde(default, with = "srr_list")]
    pub srr_flags: SrrFlags,
    pub report_to: Eid,
}

impl Profile {
    /// Profile registered for ADUs whose profile id is unknown locally.
    pub fn inferred(id: ProfileId, seq: SeqNo, lifespan: u64) -> Self {
        Self {
            id,
            max_rtx: u32::from(!seq.is_zero()),
            aggr_size_limit: 0,
            aggr_time_limit: 0,
            lifespan: lifespan.max(1),
            class_of_service: 1,
            ancillary: Ancillary::default(),
            custody: CustodyMode::None,
            srr_flags: SrrFlags::default(),
            report_to: Eid::ipn(u64::from(id), INFERRED_REPORT_SERVICE),
        }
    }

    pub fn has_transport_service(&self) -> bool {
        self.max_rtx > 0
    }

    pub fn aggregates(&self) -> bool {
        self.aggr_time_limit > 0
    }

    /// Expected seconds between transmission attempts.
    pub fn nominal_rtt(&self) -> u64 {
        self.lifespan / (u64::from(self.max_rtx) + 1)
    }

    /// Lifetime handed to the transport for the given attempt number.
    pub fn transmission_lifetime(&self, attempts: u32) -> u64 {
        self.lifespan
            .saturating_sub(u64::from(attempts).saturating_mul(self.nominal_rtt()))
            .max(1)
    }

    /// Full-field comparison ignoring the id.
    pub fn same_parameters(&self, other: &Profile) -> bool {
        self.max_rtx == other.max_rtx
            && self.aggr_size_limit == other.aggr_size_limit
            && self.aggr_time_limit == other.aggr_time_limit
            && self.lifespan == other.lifespan
            && self.class_of_service == other.class_of_service
            && self.ancillary == other.ancillary
            && self.custody == other.custody
            && self.srr_flags == other.srr_flags
            && self.report_to == other.report_to
    }
}

/// Profiles keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileTable {
    profiles: BTreeMap<ProfileId, Profile>,
}

impl ProfileTable {
    pub fn add(&mut self, profile: Profile) -> Result<(), ProfileError> {
        if profile.id == 0 {
            return Err(ProfileError::ZeroId);
        }
        if profile.lifespan == 0 {
            return Err(ProfileError::ZeroLifespan(profile.id));
        }
        if profile.report_to.as_str().trim().is_empty() {
            return Err(ProfileError::MissingReportTo(profile.id));
        }
        if Eid::parse(profile.report_to.as_str()).is_err() {
            return Err(ProfileError::InvalidReportTo {
                id: profile.id,
                eid: profile.report_to.to_string(),
            });
        }
        if self.profiles.contains_key(&profile.id) {
            return Err(ProfileError::Duplicate(profile.id));
        }
        if let Some(existing) = self.find_matching(&profile) {
            return Err(ProfileError::SameParameters {
                id: profile.id,
                existing,
            });
        }
        self.profiles.insert(profile.id, profile);
        Ok(())
    }

    pub fn remove(&mut self, id: ProfileId) -> Result<Profile, ProfileError> {
        self.profiles.remove(&id).ok_or(ProfileError::Unknown(id))
    }

    pub fn get(&self, id: ProfileId) -> Option<&Profile> {
        self.profiles.get(&id)
    }

    /// Id of a profile whose parameters all match `probe`.
    pub fn find_matching(&self, probe: &Profile) -> Option<ProfileId> {
        self.profiles
            .values()
            .find(|profile| profile.same_parameters(probe))
            .map(|profile| profile.id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

mod srr_list {
    use dtpc_transport::adapter::SrrFlags;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(flags: &SrrFlags, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&flags.to_list())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SrrFlags, D::Error> {
        let text = String::deserialize(deserializer)?;
        SrrFlags::parse_list(&text).map_err(serde::de::Error::custom)
    }
}
