// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The NAT engine: control API and per-packet translation
//!
//! All tables live in a single `NatTables` value behind one lock, so that each call, including
//! the allocation of an external port, happens atomically with respect to other callers. Time is
//! always passed in by the caller, which keeps the engine deterministic and lets the owning process
//! drive aging from its own timer.

use crate::address_pool::{AddressPool, AddressPoolError, InterfaceId, NatConfig};
use crate::config::{ConfigError, NatParams, NatSetup};
use crate::conntrack::{ConnectionTable, InboundMiss, NatEntry, OutboundKey};
use crate::port_alloc::AllocatorError;
use crate::portmap::{PortMapError, PortMapRule, StaticPortMap};
use crate::protocol::NatProtocol;
use crate::stats::{NatCounters, NatStats};
use crate::sync::{Mutex, MutexGuard};
use crate::tcp::TcpFlags;
use std::net::Ipv4Addr;
use std::sync::PoisonError;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Any error returned while setting up an engine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NatError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("interface error: {0}")]
    AddressPool(#[from] AddressPoolError),
    #[error("static port mapping error: {0}")]
    PortMap(#[from] PortMapError),
    #[error("port allocation error: {0}")]
    Allocator(#[from] AllocatorError),
}

/// What the engine needs to know about a packet. The forwarding path extracts it from the headers
/// and rewrites the packet according to the [`TranslateResult`].
///
/// For ICMP echo messages, the ports hold the echo identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketMeta {
    /// Interface the packet leaves through (outbound) or arrived on (inbound)
    pub interface: InterfaceId,
    pub protocol: NatProtocol,
    pub src_addr: Ipv4Addr,
    pub src_port: u16,
    pub dst_addr: Ipv4Addr,
    pub dst_port: u16,
    /// TCP flags, empty for other protocols
    pub tcp_flags: TcpFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No external port left for a new outbound flow
    PoolExhausted,
    /// Unsolicited inbound packet
    NoMapping,
    /// Inbound packet from another remote endpoint than the one the mapping was created for
    RemoteMismatch,
}

impl From<InboundMiss> for DropReason {
    fn from(miss: InboundMiss) -> Self {
        match miss {
            InboundMiss::NoMapping => DropReason::NoMapping,
            InboundMiss::RemoteMismatch => DropReason::RemoteMismatch,
        }
    }
}

/// Verdict for a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslateResult {
    /// Rewrite the source (outbound) or destination (inbound) address and port
    Forward { addr: Ipv4Addr, port: u16 },
    /// Drop the packet
    Drop(DropReason),
    /// NAT does not apply, forward the packet unchanged
    Untouched,
}

///////////////////////////////////////////////////////////////////////////////
// NatTables
///////////////////////////////////////////////////////////////////////////////

#[derive(Debug)]
pub(crate) struct NatTables {
    pub(crate) params: NatParams,
    pub(crate) pool: AddressPool,
    pub(crate) portmap: StaticPortMap,
    pub(crate) conntrack: ConnectionTable,
    counters: NatCounters,
}

impl NatTables {
    fn new(params: NatParams) -> Self {
        let capacity = usize::try_from(params.max_dynamic_entries).unwrap_or(usize::MAX);
        Self {
            pool: AddressPool::new(),
            portmap: StaticPortMap::new(params.max_static_rules),
            conntrack: ConnectionTable::new(capacity, params.port_range, params.timeouts),
            counters: NatCounters::default(),
            params,
        }
    }

    fn outbound(&mut self, meta: &PacketMeta, now: Instant) -> TranslateResult {
        let protocol = meta.protocol;
        let key = OutboundKey::new(
            protocol,
            meta.src_addr,
            meta.src_port,
            meta.dst_addr,
            meta.dst_port,
        );

        let Some(external_addr) = self.pool.external_addr(meta.interface) else {
            // NAT is off on this interface: flows mapped earlier still translate until they age out
            return match self.conntrack.refresh_outbound(&key, meta.tcp_flags, now) {
                Some((addr, port)) => TranslateResult::Forward { addr, port },
                None => TranslateResult::Untouched,
            };
        };

        if let Some(rule) = self
            .portmap
            .lookup_reply(protocol, meta.src_addr, meta.src_port)
        {
            let addr = if rule.external_addr.is_unspecified() {
                external_addr
            } else {
                rule.external_addr
            };
            let port = rule.external_port;
            self.counters.static_hit(protocol);
            return TranslateResult::Forward { addr, port };
        }

        let portmap = &self.portmap;
        let reserved = |port| portmap.is_reserved(port, protocol);
        match self
            .conntrack
            .translate_outbound(key, external_addr, meta.tcp_flags, now, reserved)
        {
            Ok(mapping) => {
                if let Some(evicted) = &mapping.evicted {
                    self.counters.evicted(evicted.protocol);
                }
                if mapping.created {
                    self.counters.created(protocol);
                }
                TranslateResult::Forward {
                    addr: mapping.external_addr,
                    port: mapping.external_port,
                }
            }
            Err(AllocatorError::PoolExhausted(protocol)) => {
                warn!(
                    "dropping {} packet from {}:{}: no external port available",
                    protocol.as_str(),
                    meta.src_addr,
                    meta.src_port
                );
                self.counters.pool_exhausted(protocol);
                TranslateResult::Drop(DropReason::PoolExhausted)
            }
        }
    }

    fn inbound(&mut self, meta: &PacketMeta, now: Instant) -> TranslateResult {
        let protocol = meta.protocol;
        let enabled = self.pool.external_addr(meta.interface).is_some();

        // Static rules take precedence over dynamic entries holding the same port
        let rule = self
            .portmap
            .get(meta.dst_port, protocol)
            .filter(|rule| enabled && rule.matches_external_addr(meta.dst_addr));
        if let Some(rule) = rule {
            let (addr, port) = (rule.internal_addr, rule.internal_port);
            self.counters.static_hit(protocol);
            return TranslateResult::Forward { addr, port };
        }

        match self.conntrack.translate_inbound(
            protocol,
            meta.dst_addr,
            meta.dst_port,
            meta.src_addr,
            meta.src_port,
            meta.tcp_flags,
            now,
        ) {
            Ok((addr, port)) => TranslateResult::Forward { addr, port },
            Err(_) if !enabled => TranslateResult::Untouched,
            Err(miss) => {
                debug!(
                    "dropping {} packet from {}:{} to {}:{}: {miss:?}",
                    protocol.as_str(),
                    meta.src_addr,
                    meta.src_port,
                    meta.dst_addr,
                    meta.dst_port
                );
                self.counters.inbound_dropped(protocol);
                TranslateResult::Drop(miss.into())
            }
        }
    }

    fn tick(&mut self, now: Instant) -> usize {
        let expired = self.conntrack.expire(now);
        for entry in &expired {
            self.counters.expired(entry.protocol);
        }
        expired.len()
    }

    fn set_enabled(&mut self, interface: InterfaceId, on: bool) -> Result<(), AddressPoolError> {
        if on {
            let addr = self
                .pool
                .get(interface)
                .ok_or(AddressPoolError::NoSuchInterface(interface))?
                .interface_addr;
            self.pool.enable(interface, addr)
        } else {
            self.pool.disable(interface)
        }
    }

    pub(crate) fn stats(&self) -> NatStats {
        let active = NatProtocol::ALL.map(|protocol| self.conntrack.count(protocol));
        self.counters.snapshot(active, self.portmap.len())
    }
}

///////////////////////////////////////////////////////////////////////////////
// NatEngine
///////////////////////////////////////////////////////////////////////////////

/// A NAPT engine. Share it between threads as an `Arc<NatEngine>`.
#[derive(Debug)]
pub struct NatEngine {
    tables: Mutex<NatTables>,
}

impl NatEngine {
    /// Create an engine with room for `max_dynamic_entries` dynamic mappings and
    /// `max_static_rules` port forwarding rules, and default values for everything else.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_dynamic_entries` is zero.
    pub fn init(max_dynamic_entries: u32, max_static_rules: u8) -> Result<Self, ConfigError> {
        Self::new(NatParams {
            max_dynamic_entries,
            max_static_rules,
            ..NatParams::default()
        })
    }

    /// Create an engine from `params`.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameters are invalid.
    pub fn new(params: NatParams) -> Result<Self, ConfigError> {
        params.validate()?;
        info!(
            "NAT engine with {} dynamic entries, {} static rules, ports {}-{}",
            params.max_dynamic_entries,
            params.max_static_rules,
            params.port_range.start(),
            params.port_range.end()
        );
        Ok(Self {
            tables: Mutex::new(NatTables::new(params)),
        })
    }

    /// Create an engine and apply a startup description: register the interfaces, enable NAT
    /// where requested, and install the static port mappings.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameters are invalid, or if an interface or a rule is rejected.
    pub fn from_setup(setup: &NatSetup) -> Result<Self, NatError> {
        let engine = Self::new(setup.params.clone())?;
        for interface in &setup.interfaces {
            engine.configure_interface(interface.index, interface.address);
            if interface.nat {
                engine.try_enable(interface.index, true)?;
            }
        }
        for portmap in &setup.portmaps {
            engine.try_portmap_add(PortMapRule::new(
                portmap.protocol,
                portmap.external_addr,
                portmap.external_port,
                portmap.internal_addr,
                portmap.internal_port,
            ))?;
        }
        Ok(engine)
    }

    // Every mutation leaves the tables consistent before it can panic, so a poisoned lock
    // still guards usable tables.
    fn lock(&self) -> MutexGuard<'_, NatTables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register interface `index` with address `addr`, or record a new address for it.
    pub fn configure_interface(&self, index: InterfaceId, addr: Ipv4Addr) {
        self.lock().pool.configure(index, addr);
    }

    /// Turn NAT on or off for `interface`. When turning it on, the interface address becomes the
    /// external address.
    ///
    /// # Errors
    ///
    /// Returns an error if the interface is unknown or has no address.
    pub fn try_enable(&self, interface: InterfaceId, on: bool) -> Result<(), AddressPoolError> {
        self.lock().set_enabled(interface, on)
    }

    /// Turn NAT on or off for the interface holding `interface_addr`.
    ///
    /// # Errors
    ///
    /// Returns [`AddressPoolError::NoSuchAddress`] if no interface holds `interface_addr`.
    pub fn try_enable_by_addr(
        &self,
        interface_addr: Ipv4Addr,
        on: bool,
    ) -> Result<(), AddressPoolError> {
        let mut tables = self.lock();
        let interface = tables
            .pool
            .find_by_addr(interface_addr)
            .ok_or(AddressPoolError::NoSuchAddress(interface_addr))?;
        tables.set_enabled(interface, on)
    }

    /// Turn NAT on or off for the interface holding `interface_addr`. Returns false if there is no
    /// such interface.
    pub fn enable(&self, interface_addr: Ipv4Addr, on: bool) -> bool {
        match self.try_enable_by_addr(interface_addr, on) {
            Ok(()) => true,
            Err(e) => {
                warn!("cannot toggle NAT: {e}");
                false
            }
        }
    }

    /// Turn NAT on or off for interface number `interface_no`. Returns false if there is no such
    /// interface.
    pub fn enable_by_index(&self, interface_no: u8, on: bool) -> bool {
        match self.try_enable(InterfaceId::new(interface_no), on) {
            Ok(()) => true,
            Err(e) => {
                warn!("cannot toggle NAT: {e}");
                false
            }
        }
    }

    /// Add or replace a static port mapping. Returns the replaced rule, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the rule is invalid or if the table is full.
    pub fn try_portmap_add(&self, rule: PortMapRule) -> Result<Option<PortMapRule>, PortMapError> {
        self.lock().portmap.add(rule)
    }

    /// Add or replace a static port mapping. Returns false if the rule was rejected.
    pub fn portmap_add(
        &self,
        protocol: NatProtocol,
        external_addr: Ipv4Addr,
        external_port: u16,
        internal_addr: Ipv4Addr,
        internal_port: u16,
    ) -> bool {
        let rule = PortMapRule::new(
            protocol,
            external_addr,
            external_port,
            internal_addr,
            internal_port,
        );
        match self.try_portmap_add(rule) {
            Ok(_) => true,
            Err(e) => {
                warn!("rejected static mapping: {e}");
                false
            }
        }
    }

    /// Remove the static port mapping for `external_port`.
    ///
    /// # Errors
    ///
    /// Returns [`PortMapError::NotFound`] if there is no such mapping.
    pub fn try_portmap_remove(
        &self,
        protocol: NatProtocol,
        external_port: u16,
    ) -> Result<PortMapRule, PortMapError> {
        self.lock().portmap.remove(external_port, protocol)
    }

    /// Remove the static port mapping for `external_port`. Returns false if there was none.
    pub fn portmap_remove(&self, protocol: NatProtocol, external_port: u16) -> bool {
        self.try_portmap_remove(protocol, external_port).is_ok()
    }

    /// Translate a packet leaving through `meta.interface`.
    #[must_use]
    pub fn on_outbound(&self, meta: &PacketMeta, now: Instant) -> TranslateResult {
        self.lock().outbound(meta, now)
    }

    /// Translate a packet received on `meta.interface`.
    #[must_use]
    pub fn on_inbound(&self, meta: &PacketMeta, now: Instant) -> TranslateResult {
        self.lock().inbound(meta, now)
    }

    /// Remove the entries idle for longer than their timeout. Meant to be called about once per
    /// second. Returns the number of entries removed.
    pub fn tick(&self, now: Instant) -> usize {
        self.lock().tick(now)
    }

    #[must_use]
    pub fn params(&self) -> NatParams {
        self.lock().params.clone()
    }

    #[must_use]
    pub fn stats(&self) -> NatStats {
        self.lock().stats()
    }

    /// Copies of the dynamic entries, least recently active first.
    #[must_use]
    pub fn entries(&self) -> Vec<NatEntry> {
        self.lock().conntrack.entries()
    }

    /// Copies of the static port mappings, sorted by protocol and external port.
    #[must_use]
    pub fn portmaps(&self) -> Vec<PortMapRule> {
        self.lock().portmap.rules()
    }

    #[must_use]
    pub fn interfaces(&self) -> Vec<(InterfaceId, NatConfig)> {
        self.lock()
            .pool
            .interfaces()
            .map(|(interface, config)| (*interface, *config))
            .collect()
    }

    pub(crate) fn with_tables<R>(&self, f: impl FnOnce(&NatTables) -> R) -> R {
        f(&self.lock())
    }
}
