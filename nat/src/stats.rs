// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![allow(clippy::cast_precision_loss)]

//! NAT statistics
//!
//! Counters are kept next to the tables they describe, so that a [`NatStats`] snapshot is
//! consistent. Every update is mirrored to the `metrics` facade; whatever recorder the owning
//! process installs gets to export them.

use crate::protocol::NatProtocol;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use std::fmt::Display;

/// Metric name constants
pub const NAT_ENTRIES_CREATED: &str = "nat_entries_created";
pub const NAT_ENTRIES_EXPIRED: &str = "nat_entries_expired";
pub const NAT_ENTRIES_EVICTED: &str = "nat_entries_evicted";
pub const NAT_POOL_EXHAUSTED: &str = "nat_pool_exhausted";
pub const NAT_INBOUND_DROPPED: &str = "nat_inbound_dropped";
pub const NAT_STATIC_HITS: &str = "nat_static_hits";
pub const NAT_ACTIVE_ENTRIES: &str = "nat_active_entries";
pub const NAT_STATIC_RULES: &str = "nat_static_rules";

/// Register metrics descriptions with the installed recorder
pub fn describe_metrics() {
    describe_counter!(NAT_ENTRIES_CREATED, "Dynamic NAT entries created");
    describe_counter!(NAT_ENTRIES_EXPIRED, "Dynamic NAT entries removed after timeout");
    describe_counter!(
        NAT_ENTRIES_EVICTED,
        "Dynamic NAT entries evicted to make room for a new flow"
    );
    describe_counter!(
        NAT_POOL_EXHAUSTED,
        "Outbound packets dropped for lack of an external port"
    );
    describe_counter!(NAT_INBOUND_DROPPED, "Inbound packets with no usable mapping");
    describe_counter!(NAT_STATIC_HITS, "Packets translated by a static port mapping");
    describe_gauge!(NAT_ACTIVE_ENTRIES, "Active dynamic NAT entries per protocol");
    describe_gauge!(NAT_STATIC_RULES, "Configured static port mappings");
}

/// Snapshot of the NAT counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NatStats {
    pub active_tcp: usize,
    pub active_udp: usize,
    pub active_icmp: usize,
    pub static_rules: usize,
    pub created: u64,
    pub expired: u64,
    /// Entries evicted because the table was full
    pub evicted: u64,
    pub pool_exhausted: u64,
    pub inbound_dropped: u64,
    pub static_hits: u64,
}

impl NatStats {
    #[must_use]
    pub fn active(&self) -> usize {
        self.active_tcp + self.active_udp + self.active_icmp
    }

    #[must_use]
    pub fn active_for(&self, protocol: NatProtocol) -> usize {
        match protocol {
            NatProtocol::Tcp => self.active_tcp,
            NatProtocol::Udp => self.active_udp,
            NatProtocol::Icmp => self.active_icmp,
        }
    }
}

impl Display for NatStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "  active entries  : {} (tcp {} / udp {} / icmp {})",
            self.active(),
            self.active_tcp,
            self.active_udp,
            self.active_icmp
        )?;
        writeln!(f, "  static rules    : {}", self.static_rules)?;
        writeln!(f, "  created         : {}", self.created)?;
        writeln!(f, "  expired         : {}", self.expired)?;
        writeln!(f, "  evicted         : {}", self.evicted)?;
        writeln!(f, "  pool exhausted  : {}", self.pool_exhausted)?;
        writeln!(f, "  inbound dropped : {}", self.inbound_dropped)?;
        writeln!(f, "  static hits     : {}", self.static_hits)
    }
}

/// Monotonic counters, owned by the engine tables.
#[derive(Debug, Default)]
pub(crate) struct NatCounters {
    created: u64,
    expired: u64,
    evicted: u64,
    pool_exhausted: u64,
    inbound_dropped: u64,
    static_hits: u64,
}

impl NatCounters {
    pub(crate) fn created(&mut self, protocol: NatProtocol) {
        self.created += 1;
        counter!(NAT_ENTRIES_CREATED, "protocol" => protocol.as_str()).increment(1);
    }

    pub(crate) fn expired(&mut self, protocol: NatProtocol) {
        self.expired += 1;
        counter!(NAT_ENTRIES_EXPIRED, "protocol" => protocol.as_str()).increment(1);
    }

    pub(crate) fn evicted(&mut self, protocol: NatProtocol) {
        self.evicted += 1;
        counter!(NAT_ENTRIES_EVICTED, "protocol" => protocol.as_str()).increment(1);
    }

    pub(crate) fn pool_exhausted(&mut self, protocol: NatProtocol) {
        self.pool_exhausted += 1;
        counter!(NAT_POOL_EXHAUSTED, "protocol" => protocol.as_str()).increment(1);
    }

    pub(crate) fn inbound_dropped(&mut self, protocol: NatProtocol) {
        self.inbound_dropped += 1;
        counter!(NAT_INBOUND_DROPPED, "protocol" => protocol.as_str()).increment(1);
    }

    pub(crate) fn static_hit(&mut self, protocol: NatProtocol) {
        self.static_hits += 1;
        counter!(NAT_STATIC_HITS, "protocol" => protocol.as_str()).increment(1);
    }

    /// Publish the table sizes and build a snapshot.
    pub(crate) fn snapshot(&self, active: [usize; 3], static_rules: usize) -> NatStats {
        for (protocol, count) in NatProtocol::ALL.iter().zip(active) {
            gauge!(NAT_ACTIVE_ENTRIES, "protocol" => protocol.as_str()).set(count as f64);
        }
        gauge!(NAT_STATIC_RULES).set(static_rules as f64);
        NatStats {
            active_tcp: active[0],
            active_udp: active[1],
            active_icmp: active[2],
            static_rules,
            created: self.created,
            expired: self.expired,
            evicted: self.evicted,
            pool_exhausted: self.pool_exhausted,
            inbound_dropped: self.inbound_dropped,
            static_hits: self.static_hits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let mut counters = NatCounters::default();
        counters.created(NatProtocol::Tcp);
        counters.created(NatProtocol::Udp);
        counters.expired(NatProtocol::Udp);
        counters.inbound_dropped(NatProtocol::Tcp);
        let stats = counters.snapshot([1, 0, 2], 3);
        assert_eq!(stats.created, 2);
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.inbound_dropped, 1);
        assert_eq!(stats.active(), 3);
        assert_eq!(stats.active_for(NatProtocol::Icmp), 2);
        assert_eq!(stats.static_rules, 3);
        assert!(stats.to_string().contains("(tcp 1 / udp 0 / icmp 2)"));
    }
}
