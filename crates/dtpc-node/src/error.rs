use dtpc_core::{ProfileId, TopicId};
use thiserror::Error;

use crate::config::ConfigError;
use crate::persistence::PersistenceError;
use crate::profile::ProfileError;

/// Failures surfaced by engine operations.
///
/// Transient conditions (store or transport congestion) and protocol
/// anomalies are reported through per-operation outcome enums instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("profile error: {0}")]
    Profile(#[from] ProfileError),
    #[error("profile {0} was removed while traffic was pending")]
    ProfileRemoved(ProfileId),
    #[error("transport send failed: {0}")]
    Transport(String),
    #[error("engine state inconsistent: {0}")]
    Corrupt(&'static str),
    #[error("topic {0} already has a subscriber")]
    TopicInUse(TopicId),
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine stopped")]
    Stopped,
}
