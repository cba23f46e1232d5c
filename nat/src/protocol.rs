// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Transport protocols handled by the NAPT engine.

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ProtocolError {
    #[error("unsupported IP protocol ({0})")]
    Unsupported(u8),
}

/// Transport protocols subject to translation.
///
/// For [`NatProtocol::Icmp`], the echo identifier stands in for the port on the internal side, and
/// the remote port is always considered to be zero.
#[cfg_attr(test, derive(bolero::TypeGenerator))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NatProtocol {
    Tcp,
    Udp,
    Icmp,
}

impl NatProtocol {
    pub const ALL: [NatProtocol; 3] = [NatProtocol::Tcp, NatProtocol::Udp, NatProtocol::Icmp];

    /// IANA protocol number, as found in the IPv4 header.
    #[must_use]
    pub fn number(self) -> u8 {
        match self {
            NatProtocol::Icmp => 1,
            NatProtocol::Tcp => 6,
            NatProtocol::Udp => 17,
        }
    }

    /// Dense index, used for per-protocol arrays.
    #[must_use]
    pub(crate) fn index(self) -> usize {
        match self {
            NatProtocol::Tcp => 0,
            NatProtocol::Udp => 1,
            NatProtocol::Icmp => 2,
        }
    }

    /// ICMP query replies carry the translated identifier in place of both ports, so the remote
    /// side of an ICMP flow is identified by its address only.
    #[must_use]
    pub fn remote_port(self, port: u16) -> u16 {
        match self {
            NatProtocol::Icmp => 0,
            NatProtocol::Tcp | NatProtocol::Udp => port,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            NatProtocol::Tcp => "TCP",
            NatProtocol::Udp => "UDP",
            NatProtocol::Icmp => "ICMP",
        }
    }
}

impl TryFrom<u8> for NatProtocol {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(NatProtocol::Icmp),
            6 => Ok(NatProtocol::Tcp),
            17 => Ok(NatProtocol::Udp),
            other => Err(ProtocolError::Unsupported(other)),
        }
    }
}

impl From<NatProtocol> for u8 {
    fn from(protocol: NatProtocol) -> Self {
        protocol.number()
    }
}
