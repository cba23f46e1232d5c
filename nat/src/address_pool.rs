// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Address pool: which interfaces perform NAT, and with which external address.
//!
//! Each interface carries at most one external address. Toggling NAT on an interface only affects
//! the creation of new mappings and the use of static rules; dynamic entries created earlier keep
//! the address recorded at the time and age out on their own.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::net::Ipv4Addr;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AddressPoolError {
    #[error("no such interface ({0})")]
    NoSuchInterface(InterfaceId),
    #[error("no interface with address {0}")]
    NoSuchAddress(Ipv4Addr),
    #[error("unspecified external address")]
    UnspecifiedAddress,
}

/// Index of a network interface, as numbered by the interface collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(transparent)]
pub struct InterfaceId(u8);

impl InterfaceId {
    #[must_use]
    pub const fn new(index: u8) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

impl From<u8> for InterfaceId {
    fn from(index: u8) -> Self {
        Self(index)
    }
}

impl Display for InterfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "if{}", self.0)
    }
}

/// NAT settings for one interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NatConfig {
    /// Address currently assigned to the interface.
    pub interface_addr: Ipv4Addr,
    pub enabled: bool,
    /// Address used for translation while `enabled` is set.
    pub external_addr: Ipv4Addr,
}

#[derive(Debug, Default)]
pub struct AddressPool {
    interfaces: BTreeMap<InterfaceId, NatConfig>,
}

impl AddressPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an interface, or record a new address for a known one.
    ///
    /// NAT stays disabled for new interfaces. For known interfaces with NAT enabled, the external
    /// address follows the interface address.
    pub fn configure(&mut self, interface: InterfaceId, addr: Ipv4Addr) {
        let config = self.interfaces.entry(interface).or_insert(NatConfig {
            interface_addr: addr,
            enabled: false,
            external_addr: addr,
        });
        config.interface_addr = addr;
        if config.enabled && config.external_addr != addr {
            info!("NAT external address for {interface} is now {addr}");
        }
        config.external_addr = addr;
    }

    /// Enable NAT on `interface`, translating to `external_addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the interface is unknown or if the address is unspecified.
    pub fn enable(
        &mut self,
        interface: InterfaceId,
        external_addr: Ipv4Addr,
    ) -> Result<(), AddressPoolError> {
        if external_addr.is_unspecified() {
            return Err(AddressPoolError::UnspecifiedAddress);
        }
        let config = self
            .interfaces
            .get_mut(&interface)
            .ok_or(AddressPoolError::NoSuchInterface(interface))?;
        config.enabled = true;
        config.external_addr = external_addr;
        info!("NAT enabled on {interface} with external address {external_addr}");
        Ok(())
    }

    /// Disable NAT on `interface`. Existing mappings are left alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the interface is unknown.
    pub fn disable(&mut self, interface: InterfaceId) -> Result<(), AddressPoolError> {
        let config = self
            .interfaces
            .get_mut(&interface)
            .ok_or(AddressPoolError::NoSuchInterface(interface))?;
        config.enabled = false;
        info!("NAT disabled on {interface}");
        Ok(())
    }

    #[must_use]
    pub fn get(&self, interface: InterfaceId) -> Option<&NatConfig> {
        self.interfaces.get(&interface)
    }

    /// External address of `interface`, if NAT is enabled on it.
    #[must_use]
    pub fn external_addr(&self, interface: InterfaceId) -> Option<Ipv4Addr> {
        self.interfaces
            .get(&interface)
            .filter(|config| config.enabled)
            .map(|config| config.external_addr)
    }

    /// Find the interface holding `addr`.
    #[must_use]
    pub fn find_by_addr(&self, addr: Ipv4Addr) -> Option<InterfaceId> {
        self.interfaces
            .iter()
            .find(|(_, config)| config.interface_addr == addr)
            .map(|(interface, _)| *interface)
    }

    pub fn interfaces(&self) -> impl Iterator<Item = (&InterfaceId, &NatConfig)> {
        self.interfaces.iter()
    }
}
