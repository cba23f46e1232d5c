// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Dynamic NAPT table
//!
//! Entries are indexed twice: by the outbound flow they were created for, and by the external port
//! allocated to them, which is how inbound replies find their way back. A priority queue ordered by
//! last activity tells which entry to sacrifice when the table is full.

use crate::config::NatTimeouts;
use crate::port::PortRange;
use crate::port_alloc::{AllocatorError, PortAllocator};
use crate::protocol::NatProtocol;
use crate::tcp::{FlowDirection, TcpConnState, TcpFlags, TcpTracker};
use ahash::RandomState;
use priority_queue::PriorityQueue;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};
use tracing::debug;

/// Identifies a flow as seen from the internal side, before translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutboundKey {
    pub protocol: NatProtocol,
    pub internal_addr: Ipv4Addr,
    pub internal_port: u16,
    pub remote_addr: Ipv4Addr,
    pub remote_port: u16,
}

impl OutboundKey {
    /// Build a key, normalising the remote port for protocols that have none.
    #[must_use]
    pub fn new(
        protocol: NatProtocol,
        internal_addr: Ipv4Addr,
        internal_port: u16,
        remote_addr: Ipv4Addr,
        remote_port: u16,
    ) -> Self {
        Self {
            protocol,
            internal_addr,
            internal_port,
            remote_addr,
            remote_port: protocol.remote_port(remote_port),
        }
    }
}

type InboundKey = (NatProtocol, u16);

/// One active dynamic mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatEntry {
    pub protocol: NatProtocol,
    pub internal_addr: Ipv4Addr,
    pub internal_port: u16,
    pub remote_addr: Ipv4Addr,
    pub remote_port: u16,
    /// External address recorded when the entry was created
    pub external_addr: Ipv4Addr,
    pub external_port: u16,
    pub last_activity: Instant,
    pub tcp: TcpTracker,
}

impl NatEntry {
    #[must_use]
    pub fn key(&self) -> OutboundKey {
        OutboundKey {
            protocol: self.protocol,
            internal_addr: self.internal_addr,
            internal_port: self.internal_port,
            remote_addr: self.remote_addr,
            remote_port: self.remote_port,
        }
    }

    /// Connection state, for TCP entries only.
    #[must_use]
    pub fn tcp_state(&self) -> Option<TcpConnState> {
        (self.protocol == NatProtocol::Tcp).then(|| self.tcp.state())
    }

    /// Idle time after which this entry goes away.
    #[must_use]
    pub fn timeout(&self, timeouts: &NatTimeouts) -> Duration {
        match self.protocol {
            NatProtocol::Tcp if self.tcp.state().is_established() => timeouts.tcp_established,
            NatProtocol::Tcp => timeouts.tcp_closing,
            NatProtocol::Udp => timeouts.udp,
            NatProtocol::Icmp => timeouts.icmp,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: Instant, timeouts: &NatTimeouts) -> bool {
        now.saturating_duration_since(self.last_activity) > self.timeout(timeouts)
    }

    fn touch(&mut self, direction: FlowDirection, flags: TcpFlags, now: Instant) {
        // Packets may be handed to us with a slightly stale timestamp
        self.last_activity = self.last_activity.max(now);
        if self.protocol == NatProtocol::Tcp {
            self.tcp.update(direction, flags);
        }
    }
}

/// Why an inbound packet found no dynamic entry to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundMiss {
    /// No entry holds this external address and port
    NoMapping,
    /// An entry exists, but for another remote endpoint
    RemoteMismatch,
}

/// Result of an outbound translation through the dynamic table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMapping {
    pub external_addr: Ipv4Addr,
    pub external_port: u16,
    /// The entry was created by this packet
    pub created: bool,
    /// Entry sacrificed to make room for the new one
    pub evicted: Option<NatEntry>,
}

// Least recently active first. The sequence number orders entries touched at the same instant.
type Priority = Reverse<(Instant, u64)>;

#[derive(Debug)]
pub struct ConnectionTable {
    capacity: usize,
    timeouts: NatTimeouts,
    allocator: PortAllocator,
    entries: HashMap<OutboundKey, NatEntry, RandomState>,
    inbound: HashMap<InboundKey, OutboundKey, RandomState>,
    lru: PriorityQueue<OutboundKey, Priority, RandomState>,
    sequence: u64,
}

impl ConnectionTable {
    #[must_use]
    pub fn new(capacity: usize, range: PortRange, timeouts: NatTimeouts) -> Self {
        Self {
            capacity,
            timeouts,
            allocator: PortAllocator::new(range),
            entries: HashMap::with_capacity_and_hasher(capacity, RandomState::new()),
            inbound: HashMap::with_capacity_and_hasher(capacity, RandomState::new()),
            lru: PriorityQueue::with_capacity_and_default_hasher(capacity),
            sequence: 0,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn timeouts(&self) -> &NatTimeouts {
        &self.timeouts
    }

    #[must_use]
    pub fn allocator(&self) -> &PortAllocator {
        &self.allocator
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries for `protocol`.
    #[must_use]
    pub fn count(&self, protocol: NatProtocol) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.protocol == protocol)
            .count()
    }

    #[must_use]
    pub fn get(&self, key: &OutboundKey) -> Option<&NatEntry> {
        self.entries.get(key)
    }

    /// Entry holding `external_port` for `protocol`.
    #[must_use]
    pub fn get_by_external(&self, protocol: NatProtocol, external_port: u16) -> Option<&NatEntry> {
        self.inbound
            .get(&(protocol, external_port))
            .and_then(|key| self.entries.get(key))
    }

    /// Copies of all entries, least recently active first.
    #[must_use]
    pub fn entries(&self) -> Vec<NatEntry> {
        let mut entries: Vec<_> = self.entries.values().cloned().collect();
        entries.sort_by_key(|entry| (entry.last_activity, entry.key()));
        entries
    }

    fn next_priority(&mut self, now: Instant) -> Priority {
        self.sequence = self.sequence.wrapping_add(1);
        Reverse((now, self.sequence))
    }

    fn bump(&mut self, key: &OutboundKey, last_activity: Instant) {
        let priority = self.next_priority(last_activity);
        self.lru.change_priority(key, priority);
    }

    /// Translate an outbound packet through an existing entry, without creating one.
    pub fn refresh_outbound(
        &mut self,
        key: &OutboundKey,
        flags: TcpFlags,
        now: Instant,
    ) -> Option<(Ipv4Addr, u16)> {
        let entry = self.entries.get_mut(key)?;
        entry.touch(FlowDirection::Outbound, flags, now);
        let (translated, last_activity) =
            ((entry.external_addr, entry.external_port), entry.last_activity);
        self.bump(key, last_activity);
        Some(translated)
    }

    /// Translate an outbound packet, creating an entry mapped to `external_addr` on a miss.
    ///
    /// When the table is full, the least recently active entry is evicted to make room. Nothing is
    /// evicted if no port can be found for the new entry. Ports for which `reserved` returns true
    /// are never allocated.
    ///
    /// # Errors
    ///
    /// Returns [`AllocatorError::PoolExhausted`] if no external port is available.
    pub fn translate_outbound<F>(
        &mut self,
        key: OutboundKey,
        external_addr: Ipv4Addr,
        flags: TcpFlags,
        now: Instant,
        reserved: F,
    ) -> Result<OutboundMapping, AllocatorError>
    where
        F: Fn(u16) -> bool,
    {
        if let Some((external_addr, external_port)) = self.refresh_outbound(&key, flags, now) {
            return Ok(OutboundMapping {
                external_addr,
                external_port,
                created: false,
                evicted: None,
            });
        }

        let (external_port, evicted) = self.allocate_for(key.protocol, &reserved)?;

        let mut entry = NatEntry {
            protocol: key.protocol,
            internal_addr: key.internal_addr,
            internal_port: key.internal_port,
            remote_addr: key.remote_addr,
            remote_port: key.remote_port,
            external_addr,
            external_port,
            last_activity: now,
            tcp: TcpTracker::new(),
        };
        entry.touch(FlowDirection::Outbound, flags, now);
        debug!(
            "new {} mapping {}:{} -> {}:{} for remote {}:{}",
            key.protocol.as_str(),
            key.internal_addr,
            key.internal_port,
            external_addr,
            external_port,
            key.remote_addr,
            key.remote_port
        );

        let priority = self.next_priority(now);
        self.inbound.insert((key.protocol, external_port), key);
        self.lru.push(key, priority);
        self.entries.insert(key, entry);

        Ok(OutboundMapping {
            external_addr,
            external_port,
            created: true,
            evicted,
        })
    }

    /// Find the internal endpoint for an inbound packet sent by `remote_addr:remote_port` to
    /// `external_addr:external_port`, and account for the packet.
    ///
    /// # Errors
    ///
    /// Returns the reason why no entry can be used; the packet should then be dropped.
    #[allow(clippy::too_many_arguments)]
    pub fn translate_inbound(
        &mut self,
        protocol: NatProtocol,
        external_addr: Ipv4Addr,
        external_port: u16,
        remote_addr: Ipv4Addr,
        remote_port: u16,
        flags: TcpFlags,
        now: Instant,
    ) -> Result<(Ipv4Addr, u16), InboundMiss> {
        let key = *self
            .inbound
            .get(&(protocol, external_port))
            .ok_or(InboundMiss::NoMapping)?;
        let entry = self.entries.get_mut(&key).ok_or(InboundMiss::NoMapping)?;
        if entry.external_addr != external_addr {
            return Err(InboundMiss::NoMapping);
        }
        if entry.remote_addr != remote_addr || entry.remote_port != protocol.remote_port(remote_port)
        {
            debug!(
                "{} port {external_port} is mapped for {}:{}, not {remote_addr}:{remote_port}",
                protocol.as_str(),
                entry.remote_addr,
                entry.remote_port
            );
            return Err(InboundMiss::RemoteMismatch);
        }
        entry.touch(FlowDirection::Inbound, flags, now);
        let (translated, last_activity) =
            ((entry.internal_addr, entry.internal_port), entry.last_activity);
        self.bump(&key, last_activity);
        Ok(translated)
    }

    /// Remove the entry for `key`, releasing its external port.
    pub fn remove(&mut self, key: &OutboundKey) -> Option<NatEntry> {
        let entry = self.entries.remove(key)?;
        self.lru.remove(key);
        self.inbound.remove(&(entry.protocol, entry.external_port));
        self.allocator.release(entry.protocol, entry.external_port);
        Some(entry)
    }

    // Allocate a port for a new entry and make room for it. The oldest entry is only evicted once
    // the new entry is certain to be created, unless it holds a port of the same protocol, in
    // which case its port is handed over to the new entry.
    fn allocate_for<F>(
        &mut self,
        protocol: NatProtocol,
        reserved: &F,
    ) -> Result<(u16, Option<NatEntry>), AllocatorError>
    where
        F: Fn(u16) -> bool,
    {
        let full = self.entries.len() >= self.capacity;
        match self.allocator.allocate(protocol, reserved) {
            Ok(port) => {
                let evicted = if full { self.evict_oldest() } else { None };
                Ok((port, evicted))
            }
            Err(e) => {
                let reusable = self
                    .lru
                    .peek()
                    .and_then(|(oldest, _)| self.entries.get(oldest))
                    .is_some_and(|oldest| {
                        oldest.protocol == protocol && !reserved(oldest.external_port)
                    });
                if !(full && reusable) {
                    return Err(e);
                }
                let evicted = self.evict_oldest();
                let port = self.allocator.allocate(protocol, reserved)?;
                Ok((port, evicted))
            }
        }
    }

    fn evict_oldest(&mut self) -> Option<NatEntry> {
        let (key, _) = self.lru.peek()?;
        let key = *key;
        let entry = self.remove(&key)?;
        debug!(
            "table full, evicted {} mapping {}:{} -> {}:{}",
            entry.protocol.as_str(),
            entry.internal_addr,
            entry.internal_port,
            entry.external_addr,
            entry.external_port
        );
        Some(entry)
    }

    /// Remove the entries whose idle time exceeds their timeout. Returns the evicted entries.
    pub fn expire(&mut self, now: Instant) -> Vec<NatEntry> {
        let expired: Vec<OutboundKey> = self
            .entries
            .values()
            .filter(|entry| entry.is_expired(now, &self.timeouts))
            .map(NatEntry::key)
            .collect();

        let mut evicted = Vec::with_capacity(expired.len());
        for key in expired {
            if let Some(entry) = self.remove(&key) {
                debug!(
                    "expired {} mapping {}:{} -> {}:{}",
                    entry.protocol.as_str(),
                    entry.internal_addr,
                    entry.internal_port,
                    entry.external_addr,
                    entry.external_port
                );
                evicted.push(entry);
            }
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Ipv4Addr {
        s.parse().expect("Failed to parse address")
    }

    const EXTERNAL: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 5);

    fn no_reservation(_port: u16) -> bool {
        false
    }

    fn table(capacity: usize) -> ConnectionTable {
        ConnectionTable::new(capacity, PortRange::default(), NatTimeouts::default())
    }

    fn udp_key(internal_port: u16) -> OutboundKey {
        OutboundKey::new(
            NatProtocol::Udp,
            addr("10.0.0.2"),
            internal_port,
            addr("198.51.100.7"),
            53,
        )
    }

    #[test]
    fn test_outbound_is_idempotent() {
        let mut table = table(8);
        let now = Instant::now();
        let key = udp_key(5000);
        let first = table
            .translate_outbound(key, EXTERNAL, TcpFlags::empty(), now, no_reservation)
            .unwrap();
        assert!(first.created);
        assert_eq!(first.external_port, 49152);

        let later = now + Duration::from_secs(1);
        let second = table
            .translate_outbound(key, EXTERNAL, TcpFlags::empty(), later, no_reservation)
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.external_port, first.external_port);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&key).unwrap().last_activity, later);
    }

    #[test]
    fn test_inbound_round_trip() {
        let mut table = table(8);
        let now = Instant::now();
        let key = udp_key(5000);
        let mapping = table
            .translate_outbound(key, EXTERNAL, TcpFlags::empty(), now, no_reservation)
            .unwrap();

        let reply = table.translate_inbound(
            NatProtocol::Udp,
            EXTERNAL,
            mapping.external_port,
            addr("198.51.100.7"),
            53,
            TcpFlags::empty(),
            now,
        );
        assert_eq!(reply, Ok((addr("10.0.0.2"), 5000)));

        let wrong_remote = table.translate_inbound(
            NatProtocol::Udp,
            EXTERNAL,
            mapping.external_port,
            addr("198.51.100.8"),
            53,
            TcpFlags::empty(),
            now,
        );
        assert_eq!(wrong_remote, Err(InboundMiss::RemoteMismatch));

        let wrong_port = table.translate_inbound(
            NatProtocol::Udp,
            EXTERNAL,
            mapping.external_port + 1,
            addr("198.51.100.7"),
            53,
            TcpFlags::empty(),
            now,
        );
        assert_eq!(wrong_port, Err(InboundMiss::NoMapping));

        let wrong_protocol = table.translate_inbound(
            NatProtocol::Tcp,
            EXTERNAL,
            mapping.external_port,
            addr("198.51.100.7"),
            53,
            TcpFlags::empty(),
            now,
        );
        assert_eq!(wrong_protocol, Err(InboundMiss::NoMapping));

        let wrong_address = table.translate_inbound(
            NatProtocol::Udp,
            addr("203.0.113.6"),
            mapping.external_port,
            addr("198.51.100.7"),
            53,
            TcpFlags::empty(),
            now,
        );
        assert_eq!(wrong_address, Err(InboundMiss::NoMapping));
    }

    #[test]
    fn test_icmp_ignores_remote_port() {
        let mut table = table(8);
        let now = Instant::now();
        let key = OutboundKey::new(
            NatProtocol::Icmp,
            addr("10.0.0.2"),
            0x1234,
            addr("198.51.100.7"),
            0x1234,
        );
        assert_eq!(key.remote_port, 0);
        let mapping = table
            .translate_outbound(key, EXTERNAL, TcpFlags::empty(), now, no_reservation)
            .unwrap();
        // Echo replies carry the translated identifier on both sides
        let reply = table.translate_inbound(
            NatProtocol::Icmp,
            EXTERNAL,
            mapping.external_port,
            addr("198.51.100.7"),
            mapping.external_port,
            TcpFlags::empty(),
            now,
        );
        assert_eq!(reply, Ok((addr("10.0.0.2"), 0x1234)));
    }

    #[test]
    fn test_lru_eviction() {
        let mut table = table(3);
        let start = Instant::now();
        for i in 0..3u16 {
            let now = start + Duration::from_millis(u64::from(i));
            table
                .translate_outbound(udp_key(i), EXTERNAL, TcpFlags::empty(), now, no_reservation)
                .unwrap();
        }
        // Refresh the oldest entry, the second one becomes the least recently active
        table.refresh_outbound(
            &udp_key(0),
            TcpFlags::empty(),
            start + Duration::from_millis(10),
        );

        let mapping = table
            .translate_outbound(
                udp_key(3),
                EXTERNAL,
                TcpFlags::empty(),
                start + Duration::from_millis(11),
                no_reservation,
            )
            .unwrap();
        assert!(mapping.created);
        assert_eq!(mapping.evicted.map(|entry| entry.key()), Some(udp_key(1)));
        assert_eq!(table.len(), 3);
        assert!(table.get(&udp_key(1)).is_none());
        assert!(table.get(&udp_key(0)).is_some());
    }

    #[test]
    fn test_same_instant_uses_insertion_order() {
        let mut table = table(2);
        let now = Instant::now();
        for i in 0..3u16 {
            table
                .translate_outbound(udp_key(i), EXTERNAL, TcpFlags::empty(), now, no_reservation)
                .unwrap();
        }
        assert!(table.get(&udp_key(0)).is_none());
        assert!(table.get(&udp_key(1)).is_some());
        assert!(table.get(&udp_key(2)).is_some());
    }

    #[test]
    fn test_eviction_releases_port() {
        let range = PortRange::new_checked(1000, 1001).unwrap();
        let mut table = ConnectionTable::new(2, range, NatTimeouts::default());
        let now = Instant::now();
        for i in 0..2u16 {
            table
                .translate_outbound(udp_key(i), EXTERNAL, TcpFlags::empty(), now, no_reservation)
                .unwrap();
        }
        let mapping = table
            .translate_outbound(udp_key(2), EXTERNAL, TcpFlags::empty(), now, no_reservation)
            .unwrap();
        assert_eq!(mapping.external_port, 1000);
        assert_eq!(table.allocator().allocated(NatProtocol::Udp), 2);
    }

    #[test]
    fn test_pool_exhaustion() {
        let range = PortRange::new_checked(1000, 1000).unwrap();
        let mut table = ConnectionTable::new(8, range, NatTimeouts::default());
        let now = Instant::now();
        table
            .translate_outbound(udp_key(1), EXTERNAL, TcpFlags::empty(), now, no_reservation)
            .unwrap();
        assert_eq!(
            table.translate_outbound(udp_key(2), EXTERNAL, TcpFlags::empty(), now, no_reservation),
            Err(AllocatorError::PoolExhausted(NatProtocol::Udp))
        );
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_full_table_keeps_entries_when_pool_exhausted() {
        let range = PortRange::new_checked(1000, 1000).unwrap();
        let mut table = ConnectionTable::new(2, range, NatTimeouts::default());
        let start = Instant::now();
        let tcp_key = OutboundKey::new(
            NatProtocol::Tcp,
            addr("10.0.0.2"),
            40000,
            addr("198.51.100.7"),
            443,
        );
        table
            .translate_outbound(tcp_key, EXTERNAL, TcpFlags::SYN, start, no_reservation)
            .unwrap();
        table
            .translate_outbound(
                udp_key(1),
                EXTERNAL,
                TcpFlags::empty(),
                start + Duration::from_millis(1),
                no_reservation,
            )
            .unwrap();

        // The table is full and the only UDP port is taken: the oldest entry is TCP and freeing
        // it would not help, so nothing is evicted.
        assert_eq!(
            table.translate_outbound(
                udp_key(2),
                EXTERNAL,
                TcpFlags::empty(),
                start + Duration::from_millis(2),
                no_reservation,
            ),
            Err(AllocatorError::PoolExhausted(NatProtocol::Udp))
        );
        assert_eq!(table.len(), 2);
        assert!(table.get(&tcp_key).is_some());
        assert!(table.get(&udp_key(1)).is_some());
        assert_eq!(table.allocator().allocated(NatProtocol::Tcp), 1);
        assert_eq!(table.allocator().allocated(NatProtocol::Udp), 1);

        // Once the oldest entry is UDP, its port is handed over to the new flow.
        table.remove(&tcp_key);
        table
            .translate_outbound(
                tcp_key,
                EXTERNAL,
                TcpFlags::SYN,
                start + Duration::from_millis(3),
                no_reservation,
            )
            .unwrap();
        let mapping = table
            .translate_outbound(
                udp_key(2),
                EXTERNAL,
                TcpFlags::empty(),
                start + Duration::from_millis(4),
                no_reservation,
            )
            .unwrap();
        assert_eq!(mapping.external_port, 1000);
        assert_eq!(mapping.evicted.map(|entry| entry.key()), Some(udp_key(1)));
        assert!(table.get(&tcp_key).is_some());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_full_table_keeps_entry_holding_reserved_port() {
        let range = PortRange::new_checked(1000, 1000).unwrap();
        let mut table = ConnectionTable::new(1, range, NatTimeouts::default());
        let now = Instant::now();
        table
            .translate_outbound(udp_key(1), EXTERNAL, TcpFlags::empty(), now, no_reservation)
            .unwrap();
        // Port 1000 has since been claimed by a static rule, evicting its holder would not help
        let reserved = |port: u16| port == 1000;
        assert_eq!(
            table.translate_outbound(udp_key(2), EXTERNAL, TcpFlags::empty(), now, reserved),
            Err(AllocatorError::PoolExhausted(NatProtocol::Udp))
        );
        assert!(table.get(&udp_key(1)).is_some());
    }

    #[test]
    fn test_expiry_per_class() {
        let mut table = table(8);
        let now = Instant::now();
        let tcp_key = OutboundKey::new(
            NatProtocol::Tcp,
            addr("10.0.0.2"),
            40000,
            addr("198.51.100.7"),
            443,
        );
        table
            .translate_outbound(tcp_key, EXTERNAL, TcpFlags::SYN, now, no_reservation)
            .unwrap();
        let port = table.get(&tcp_key).unwrap().external_port;
        table
            .translate_inbound(
                NatProtocol::Tcp,
                EXTERNAL,
                port,
                addr("198.51.100.7"),
                443,
                TcpFlags::SYN | TcpFlags::ACK,
                now,
            )
            .unwrap();
        table
            .translate_outbound(udp_key(7), EXTERNAL, TcpFlags::empty(), now, no_reservation)
            .unwrap();

        // Exactly at the timeout nothing goes away
        assert!(table.expire(now + Duration::from_secs(2)).is_empty());

        let expired = table.expire(now + Duration::from_secs(3));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].protocol, NatProtocol::Udp);
        assert_eq!(
            table.get(&tcp_key).unwrap().tcp_state(),
            Some(TcpConnState::Established)
        );

        assert!(table.expire(now + Duration::from_secs(1800)).is_empty());
        assert_eq!(table.expire(now + Duration::from_secs(1801)).len(), 1);
        assert!(table.is_empty());
        assert_eq!(table.allocator().allocated(NatProtocol::Tcp), 0);
    }

    #[test]
    fn test_embryonic_tcp_uses_short_timeout() {
        let mut table = table(8);
        let now = Instant::now();
        let tcp_key = OutboundKey::new(
            NatProtocol::Tcp,
            addr("10.0.0.2"),
            40000,
            addr("198.51.100.7"),
            443,
        );
        table
            .translate_outbound(tcp_key, EXTERNAL, TcpFlags::SYN, now, no_reservation)
            .unwrap();
        assert_eq!(
            table.get(&tcp_key).unwrap().tcp_state(),
            Some(TcpConnState::Embryonic)
        );
        assert!(table.expire(now + Duration::from_secs(20)).is_empty());
        assert_eq!(table.expire(now + Duration::from_secs(21)).len(), 1);
    }

    #[test]
    fn test_counts_and_entries() {
        let mut table = table(8);
        let now = Instant::now();
        table
            .translate_outbound(udp_key(1), EXTERNAL, TcpFlags::empty(), now, no_reservation)
            .unwrap();
        table
            .translate_outbound(
                udp_key(2),
                EXTERNAL,
                TcpFlags::empty(),
                now + Duration::from_millis(1),
                no_reservation,
            )
            .unwrap();
        assert_eq!(table.count(NatProtocol::Udp), 2);
        assert_eq!(table.count(NatProtocol::Tcp), 0);
        let entries = table.entries();
        assert_eq!(entries[0].key(), udp_key(1));
        assert_eq!(entries[1].key(), udp_key(2));
        assert_eq!(
            table
                .get_by_external(NatProtocol::Udp, entries[1].external_port)
                .map(NatEntry::key),
            Some(udp_key(2))
        );
    }

    #[test]
    fn test_indices_stay_consistent_bolero() {
        bolero::check!()
            .with_type::<Vec<(u8, u8, u8)>>()
            .for_each(|ops| {
                let range = PortRange::new_checked(3000, 3007).unwrap();
                let mut table = ConnectionTable::new(6, range, NatTimeouts::default());
                let start = Instant::now();
                let mut clock = 0u64;
                for (op, host, port) in ops {
                    clock += 1;
                    let now = start + Duration::from_millis(clock * 500);
                    let key = OutboundKey::new(
                        NatProtocol::Udp,
                        Ipv4Addr::new(10, 0, 0, *host % 4),
                        1000 + u16::from(*port % 4),
                        Ipv4Addr::new(198, 51, 100, 1),
                        53,
                    );
                    match op % 3 {
                        0 | 1 => {
                            let mapping = table
                                .translate_outbound(
                                    key,
                                    EXTERNAL,
                                    TcpFlags::empty(),
                                    now,
                                    no_reservation,
                                )
                                .expect("capacity is below the pool size");
                            assert!(range.contains(mapping.external_port));
                        }
                        _ => {
                            table.expire(now);
                        }
                    }
                    assert!(table.len() <= 6);
                    assert_eq!(table.inbound.len(), table.len());
                    assert_eq!(table.lru.len(), table.len());
                    assert_eq!(
                        table.allocator().allocated(NatProtocol::Udp),
                        u64::try_from(table.len()).unwrap()
                    );
                    for entry in table.entries.values() {
                        assert_eq!(
                            table.inbound.get(&(entry.protocol, entry.external_port)),
                            Some(&entry.key())
                        );
                    }
                }
            });
    }
}
