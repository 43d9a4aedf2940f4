use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DtpcError;

/// The null endpoint; never a valid destination.
pub const NULL_EID: &str = "dtn:none";

/// Endpoint identifier in `scheme:ssp` form.
///
/// `ipn:<node>.<service>` endpoints additionally expose their node and
/// service numbers so that ACK addresses can be derived from them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Eid(String);

impl Eid {
    /// Parses and validates an endpoint id.
    pub fn parse(text: &str) -> Result<Self, DtpcError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(DtpcError::InvalidEndpoint(String::new()));
        }
        let Some((scheme, ssp)) = text.split_once(':') else {
            return Err(DtpcError::InvalidEndpoint(text.to_string()));
        };
        if scheme.is_empty() || ssp.is_empty() {
            return Err(DtpcError::InvalidEndpoint(text.to_string()));
        }
        if scheme == "ipn" && parse_ipn(ssp).is_none() {
            return Err(DtpcError::InvalidEndpoint(text.to_string()));
        }
        Ok(Self(text.to_string()))
    }

    /// Builds `ipn:<node>.<service>`.
    pub fn ipn(node: u64, service: u64) -> Self {
        Self(format!("ipn:{node}.{service}"))
    }

    pub fn null() -> Self {
        Self(NULL_EID.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == NULL_EID
    }

    /// Node number of an `ipn` endpoint.
    pub fn ipn_node(&self) -> Option<u64> {
        self.0
            .strip_prefix("ipn:")
            .and_then(parse_ipn)
            .map(|(node, _)| node)
    }

    /// Service number of an `ipn` endpoint.
    pub fn ipn_service(&self) -> Option<u64> {
        self.0
            .strip_prefix("ipn:")
            .and_then(parse_ipn)
            .map(|(_, service)| service)
    }

    /// Same node, different service. `None` for non-`ipn` endpoints.
    pub fn with_service(&self, service: u64) -> Option<Eid> {
        self.ipn_node().map(|node| Eid::ipn(node, service))
    }
}

fn parse_ipn(ssp: &str) -> Option<(u64, u64)> {
    let (node, service) = ssp.split_once('.')?;
    Some((node.parse().ok()?, service.parse().ok()?))
}

impl FromStr for Eid {
    type Err = DtpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Eid::parse(s)
    }
}

impl fmt::Display for Eid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
