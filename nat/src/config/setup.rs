// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Startup description of a NAT engine: parameters, NAT interfaces and static port mappings.
//!
//! Nothing is persisted by the engine itself. The owning process keeps a [`NatSetup`] document,
//! typically in YAML, and hands it to [`NatEngine::from_setup`](crate::NatEngine::from_setup) at
//! startup.
//!
//! ```yaml
//! params:
//!   max_dynamic_entries: 512
//!   max_static_rules: 32
//!   port_range: { start: 49152, end: 61439 }
//!   timeouts: { tcp_established: 1800, tcp_closing: 20, udp: 2, icmp: 2 }
//! interfaces:
//!   - index: 1
//!     address: 203.0.113.5
//!     nat: true
//! portmaps:
//!   - protocol: tcp
//!     external_port: 8080
//!     internal_addr: 10.0.0.2
//!     internal_port: 80
//! ```

use super::{ConfigError, NatParams};
use crate::address_pool::InterfaceId;
use crate::protocol::NatProtocol;
use serde::Deserialize;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterfaceSetup {
    pub index: InterfaceId,
    pub address: Ipv4Addr,
    /// Enable NAT on this interface, using its address as external address
    #[serde(default)]
    pub nat: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortMapSetup {
    pub protocol: NatProtocol,
    /// Defaults to any address
    #[serde(default = "unspecified")]
    pub external_addr: Ipv4Addr,
    pub external_port: u16,
    pub internal_addr: Ipv4Addr,
    pub internal_port: u16,
}

fn unspecified() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NatSetup {
    pub params: NatParams,
    pub interfaces: Vec<InterfaceSetup>,
    pub portmaps: Vec<PortMapSetup>,
}

impl NatSetup {
    /// Parse and validate a YAML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be parsed, or if the parameters are invalid.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let setup: NatSetup =
            serde_yaml_ng::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        setup.params.validate()?;
        Ok(setup)
    }
}
