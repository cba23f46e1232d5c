// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::address_pool::NatConfig;
use crate::conntrack::NatEntry;
use crate::engine::{NatEngine, TranslateResult};
use crate::portmap::PortMapRule;
use crate::protocol::NatProtocol;
use std::fmt::{Display, Formatter};

impl Display for NatProtocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Display for NatEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let (internal, external, remote) = if self.protocol == NatProtocol::Icmp {
            (
                format!("{} id:{}", self.internal_addr, self.internal_port),
                format!("{} id:{}", self.external_addr, self.external_port),
                format!("{}", self.remote_addr),
            )
        } else {
            (
                format!("{}:{}", self.internal_addr, self.internal_port),
                format!("{}:{}", self.external_addr, self.external_port),
                format!("{}:{}", self.remote_addr, self.remote_port),
            )
        };
        write!(
            f,
            "{{ [proto: {}] {internal} <-> {external} <-> {remote}",
            self.protocol
        )?;
        if let Some(state) = self.tcp_state() {
            write!(f, " [{}]", state.as_str())?;
        }
        write!(f, " }}")
    }
}

impl Display for PortMapRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let external = if self.external_addr.is_unspecified() {
            "*".to_string()
        } else {
            self.external_addr.to_string()
        };
        write!(
            f,
            "{{ [proto: {}] {external}:{} -> {}:{} }}",
            self.protocol, self.external_port, self.internal_addr, self.internal_port
        )
    }
}

impl Display for NatConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.enabled {
            write!(
                f,
                "{} NAT enabled, external address {}",
                self.interface_addr, self.external_addr
            )
        } else {
            write!(f, "{} NAT disabled", self.interface_addr)
        }
    }
}

impl Display for TranslateResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TranslateResult::Forward { addr, port } => write!(f, "forward to {addr}:{port}"),
            TranslateResult::Drop(reason) => write!(f, "drop ({reason:?})"),
            TranslateResult::Untouched => write!(f, "untouched"),
        }
    }
}

impl Display for NatEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.with_tables(|tables| {
            write!(f, "{}", tables.params)?;

            writeln!(f, "Interfaces")?;
            for (interface, config) in tables.pool.interfaces() {
                writeln!(f, "  {interface}: {config}")?;
            }

            writeln!(
                f,
                "Static port mappings ({}/{})",
                tables.portmap.len(),
                tables.portmap.capacity()
            )?;
            for rule in tables.portmap.rules() {
                writeln!(f, "  {rule}")?;
            }

            writeln!(
                f,
                "Dynamic entries ({}/{})",
                tables.conntrack.len(),
                tables.conntrack.capacity()
            )?;
            for entry in tables.conntrack.entries() {
                writeln!(f, "  {entry}")?;
            }

            writeln!(f, "Statistics")?;
            write!(f, "{}", tables.stats())
        })
    }
}
