// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! NAT engine parameters
//!
//! [`NatParams`] holds the sizing of the tables, the ephemeral port range and the aging timeouts.
//! Parameters are either built in code with [`NatParamsBuilder`], or loaded at startup as part of a
//! [`NatSetup`] document.

mod setup;

pub use setup::{InterfaceSetup, NatSetup, PortMapSetup};

use crate::port::PortRange;
use derive_builder::Builder;
use serde::{Deserialize, Deserializer};
use std::fmt::Display;
use std::time::Duration;

/// The reasons why we may reject a configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("the dynamic table must hold at least one entry")]
    NoDynamicEntries,
    #[error("timeout for {0} must be non-zero")]
    ZeroTimeout(&'static str),
    #[error("failed to parse NAT setup: {0}")]
    Parse(String),
}

fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_secs)
}

/// Idle timeouts, per class of entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NatTimeouts {
    /// TCP connections that saw a SYN-ACK and no FIN or RST
    #[serde(deserialize_with = "seconds")]
    pub tcp_established: Duration,
    /// TCP connections being set up, closed, or reset
    #[serde(deserialize_with = "seconds")]
    pub tcp_closing: Duration,
    #[serde(deserialize_with = "seconds")]
    pub udp: Duration,
    #[serde(deserialize_with = "seconds")]
    pub icmp: Duration,
}

impl NatTimeouts {
    pub const TCP_ESTABLISHED: Duration = Duration::from_secs(30 * 60);
    pub const TCP_CLOSING: Duration = Duration::from_secs(20);
    pub const UDP: Duration = Duration::from_secs(2);
    pub const ICMP: Duration = Duration::from_secs(2);

    fn validate(&self) -> Result<(), ConfigError> {
        let timeouts = [
            ("TCP established", self.tcp_established),
            ("TCP closing", self.tcp_closing),
            ("UDP", self.udp),
            ("ICMP", self.icmp),
        ];
        for (name, timeout) in timeouts {
            if timeout.is_zero() {
                return Err(ConfigError::ZeroTimeout(name));
            }
        }
        Ok(())
    }
}

impl Default for NatTimeouts {
    fn default() -> Self {
        Self {
            tcp_established: Self::TCP_ESTABLISHED,
            tcp_closing: Self::TCP_CLOSING,
            udp: Self::UDP,
            icmp: Self::ICMP,
        }
    }
}

/// Parameters for a [`NatEngine`](crate::NatEngine). N.B. we derive a builder type
/// `NatParamsBuilder` and provide defaults for each field.
#[derive(Builder, Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NatParams {
    /// Maximum number of dynamic entries
    #[builder(default = NatParams::DEFAULT_MAX_DYNAMIC_ENTRIES)]
    pub max_dynamic_entries: u32,

    /// Maximum number of static port mappings
    #[builder(default = NatParams::DEFAULT_MAX_STATIC_RULES)]
    pub max_static_rules: u8,

    #[builder(default)]
    pub port_range: PortRange,

    #[builder(default)]
    pub timeouts: NatTimeouts,
}

impl NatParams {
    pub const DEFAULT_MAX_DYNAMIC_ENTRIES: u32 = 512;
    pub const DEFAULT_MAX_STATIC_RULES: u8 = 32;

    /// Check the parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the dynamic table has no room, or if a timeout is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_dynamic_entries == 0 {
            return Err(ConfigError::NoDynamicEntries);
        }
        self.timeouts.validate()
    }
}

impl Default for NatParams {
    fn default() -> Self {
        Self {
            max_dynamic_entries: Self::DEFAULT_MAX_DYNAMIC_ENTRIES,
            max_static_rules: Self::DEFAULT_MAX_STATIC_RULES,
            port_range: PortRange::default(),
            timeouts: NatTimeouts::default(),
        }
    }
}

impl Display for NatParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "NAT parameters")?;
        writeln!(f, "  dynamic entries : {}", self.max_dynamic_entries)?;
        writeln!(f, "  static rules    : {}", self.max_static_rules)?;
        writeln!(
            f,
            "  port range      : {}-{}",
            self.port_range.start(),
            self.port_range.end()
        )?;
        writeln!(
            f,
            "  timeouts (s)    : tcp {} / tcp-closing {} / udp {} / icmp {}",
            self.timeouts.tcp_established.as_secs(),
            self.timeouts.tcp_closing.as_secs(),
            self.timeouts.udp.as_secs(),
            self.timeouts.icmp.as_secs()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builder_defaults() {
        let params = NatParamsBuilder::default()
            .build()
            .expect("Failed to build parameters");
        assert_eq!(params, NatParams::default());
        assert_eq!(params.max_dynamic_entries, 512);
        assert_eq!(params.max_static_rules, 32);
        assert_eq!(params.timeouts.tcp_established, Duration::from_secs(1800));
        assert_eq!(params.timeouts.tcp_closing, Duration::from_secs(20));
        assert_eq!(params.timeouts.udp, Duration::from_secs(2));
        assert_eq!(params.timeouts.icmp, Duration::from_secs(2));
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_builder_overrides() {
        let params = NatParamsBuilder::default()
            .max_dynamic_entries(4)
            .max_static_rules(2)
            .port_range(PortRange::new_checked(40000, 40009).unwrap())
            .build()
            .expect("Failed to build parameters");
        assert_eq!(params.max_dynamic_entries, 4);
        assert_eq!(params.port_range.width(), 10);
    }

    #[test]
    fn test_validation() {
        let params = NatParamsBuilder::default()
            .max_dynamic_entries(0)
            .build()
            .unwrap();
        assert_eq!(params.validate(), Err(ConfigError::NoDynamicEntries));

        let params = NatParamsBuilder::default()
            .timeouts(NatTimeouts {
                udp: Duration::ZERO,
                ..NatTimeouts::default()
            })
            .build()
            .unwrap();
        assert_eq!(params.validate(), Err(ConfigError::ZeroTimeout("UDP")));
    }

    #[test]
    fn test_display() {
        let output = NatParams::default().to_string();
        assert!(output.contains("port range      : 49152-61439"));
        assert!(output.contains("tcp 1800 / tcp-closing 20 / udp 2 / icmp 2"));
    }
}
