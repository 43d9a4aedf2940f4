use std::fs;
use std::path::Path;
use std::time::Duration;

use dtpc_core::{Eid, DEFAULT_RECV_SERVICE, DEFAULT_SEND_SERVICE};
use serde::Deserialize;
use thiserror::Error;

use crate::profile::Profile;

/// Errors returned while loading an [`EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Local node endpoint; ADUs and ACKs are sourced from its services.
    pub node: Eid,
    /// Service number outbound ADUs are sent from.
    pub send_service: u64,
    /// Service number ADUs and ACKs are received on.
    pub recv_service: u64,
    /// Inbound sequence numbers below this are treated as possible sender restarts.
    pub reset_threshold: u32,
    pub detect_sender_reset: bool,
    /// Delay before retrying a send the transport reported as congested.
    pub congestion_backoff_ms: u64,
    /// Delay before retrying a send that failed outright.
    pub delivery_retry_backoff_ms: u64,
    /// Upper bound on buffered outbound payload bytes; 0 disables the limit.
    pub store_capacity_bytes: u64,
    /// How many times a producer retries an insert while the store is full.
    pub insert_retry_attempts: u32,
    pub insert_retry_backoff_ms: u64,
    /// Receiver thread sleep when the transport has nothing queued.
    pub inbound_poll_ms: u64,
    /// Scheduler tick; one tick advances the engine clock by one second.
    pub clock_tick_ms: u64,
    /// Register a profile for ADUs that arrive with an unknown profile id.
    pub infer_unknown_profiles: bool,
    /// Profiles declared as `[[profiles]]` tables.
    pub profiles: Vec<Profile>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node: Eid::ipn(1, 0),
            send_service: DEFAULT_SEND_SERVICE,
            recv_service: DEFAULT_RECV_SERVICE,
            reset_threshold: 1000,
            detect_sender_reset: true,
            congestion_backoff_ms: 500,
            delivery_retry_backoff_ms: 1_000,
            store_capacity_bytes: 0,
            insert_retry_attempts: 5,
            insert_retry_backoff_ms: 200,
            inbound_poll_ms: 50,
            clock_tick_ms: 1_000,
            infer_unknown_profiles: false,
            profiles: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path.as_ref()).map_err(ConfigError::Read)?;
        Self::from_toml_str(&text)
    }

    /// Endpoint outbound ADUs are sourced from.
    pub fn send_endpoint(&self) -> Eid {
        self.node
            .with_service(self.send_service)
            .unwrap_or_else(|| self.node.clone())
    }

    /// Endpoint inbound ADUs and ACKs are addressed to.
    pub fn recv_endpoint(&self) -> Eid {
        self.node
            .with_service(self.recv_service)
            .unwrap_or_else(|| self.node.clone())
    }

    pub fn congestion_backoff(&self) -> Duration {
        Duration::from_millis(self.congestion_backoff_ms)
    }

    pub fn delivery_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.delivery_retry_backoff_ms)
    }

    pub fn insert_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.insert_retry_backoff_ms)
    }

    pub fn inbound_poll(&self) -> Duration {
        Duration::from_millis(self.inbound_poll_ms)
    }

    pub fn clock_tick(&self) -> Duration {
        Duration::from_millis(self.clock_tick_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use dtpc_core::Eid;
    use dtpc_transport::adapter::{CustodyMode, SrrFlags};

    use super::{ConfigError, EngineConfig};

    #[test]
    fn defaults_use_well_known_services() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.send_service, 128);
        assert_eq!(cfg.recv_service, 129);
        assert_eq!(cfg.reset_threshold, 1000);
        assert!(cfg.detect_sender_reset);
        assert!(!cfg.infer_unknown_profiles);
        assert_eq!(cfg.recv_endpoint(), Eid::ipn(1, 129));
    }

    #[test]
    fn toml_overrides_fields_and_declares_profiles() {
        let cfg = EngineConfig::from_toml_str(
            r#"
node = "ipn:7.0"
store_capacity_bytes = 4096
infer_unknown_profiles = true

[[profiles]]
id = 1
max_rtx = 3
aggr_size_limit = 100
aggr_time_limit = 10
lifespan = 400
custody = "optional"
srr_flags = "rcv,dlv"
report_to = "ipn:7.0"

[profiles.ancillary]
ordinal = 5
"#,
        )
        .expect("config should parse");

        assert_eq!(cfg.node, Eid::ipn(7, 0));
        assert_eq!(cfg.send_endpoint(), Eid::ipn(7, 128));
        assert_eq!(cfg.store_capacity_bytes, 4096);
        assert!(cfg.infer_unknown_profiles);
        assert_eq!(cfg.clock_tick_ms, 1_000);

        let profile = &cfg.profiles[0];
        assert_eq!(profile.id, 1);
        assert_eq!(profile.custody, CustodyMode::Optional);
        assert!(profile.srr_flags.contains(SrrFlags::RECEIVED));
        assert!(profile.srr_flags.contains(SrrFlags::DELIVERED));
        assert_eq!(profile.ancillary.ordinal, 5);
        assert_eq!(profile.class_of_service, 0);
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let err = EngineConfig::from_toml_str("reset_threshold = \"many\"")
            .expect_err("wrong type should fail");
        assert!(matches!(err, ConfigError::Parse(_)));

        let missing = EngineConfig::load("/nonexistent/dtpc.toml").expect_err("missing file");
        assert!(matches!(missing, ConfigError::Read(_)));
    }
}
