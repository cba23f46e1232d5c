// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Static port mappings (port forwarding)
//!
//! Rules are configured by an administrator and never expire. A rule binds an external port and
//! protocol to an internal address and port; at most one rule exists per (port, protocol) pair, and
//! adding a rule for a pair already mapped replaces the previous rule.
//!
//! Besides the forward lookup used on the inbound path, the table keeps a reply index so that
//! packets sent back by the internal server leave with the rule's external address and port.

use crate::protocol::NatProtocol;
use ahash::RandomState;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PortMapError {
    #[error("invalid port ({0})")]
    InvalidPort(u16),
    #[error("invalid address ({0})")]
    InvalidAddress(Ipv4Addr),
    #[error("port mapping is not supported for {}", .0.as_str())]
    UnsupportedProtocol(NatProtocol),
    #[error("static port map is full ({0} rules)")]
    TableFull(u8),
    #[error("no static mapping for {} port {}", .0.as_str(), .1)]
    NotFound(NatProtocol, u16),
}

/// A static port forwarding rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortMapRule {
    /// External address the rule applies to. [`Ipv4Addr::UNSPECIFIED`] matches any address.
    pub external_addr: Ipv4Addr,
    pub external_port: u16,
    pub protocol: NatProtocol,
    pub internal_addr: Ipv4Addr,
    pub internal_port: u16,
    /// Stored rules are always valid; the flag is kept for reporting.
    pub valid: bool,
}

impl PortMapRule {
    #[must_use]
    pub fn new(
        protocol: NatProtocol,
        external_addr: Ipv4Addr,
        external_port: u16,
        internal_addr: Ipv4Addr,
        internal_port: u16,
    ) -> Self {
        Self {
            external_addr,
            external_port,
            protocol,
            internal_addr,
            internal_port,
            valid: true,
        }
    }

    /// Whether a packet sent to `addr` can use this rule.
    #[must_use]
    pub fn matches_external_addr(&self, addr: Ipv4Addr) -> bool {
        self.external_addr.is_unspecified() || self.external_addr == addr
    }

    fn validate(&self) -> Result<(), PortMapError> {
        if self.protocol == NatProtocol::Icmp {
            return Err(PortMapError::UnsupportedProtocol(self.protocol));
        }
        if self.external_port == 0 {
            return Err(PortMapError::InvalidPort(self.external_port));
        }
        if self.internal_port == 0 {
            return Err(PortMapError::InvalidPort(self.internal_port));
        }
        let addr = self.internal_addr;
        if addr.is_unspecified() || addr.is_broadcast() || addr.is_multicast() {
            return Err(PortMapError::InvalidAddress(addr));
        }
        if self.external_addr.is_broadcast() || self.external_addr.is_multicast() {
            return Err(PortMapError::InvalidAddress(self.external_addr));
        }
        Ok(())
    }
}

type RuleKey = (NatProtocol, u16);
type ReplyKey = (NatProtocol, Ipv4Addr, u16);

#[derive(Debug)]
pub struct StaticPortMap {
    capacity: u8,
    rules: HashMap<RuleKey, PortMapRule, RandomState>,
    replies: HashMap<ReplyKey, u16, RandomState>,
}

impl StaticPortMap {
    #[must_use]
    pub fn new(capacity: u8) -> Self {
        Self {
            capacity,
            rules: HashMap::with_capacity_and_hasher(usize::from(capacity), RandomState::new()),
            replies: HashMap::with_capacity_and_hasher(usize::from(capacity), RandomState::new()),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> u8 {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Add a rule, replacing any rule for the same external port and protocol.
    ///
    /// Returns the replaced rule, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the rule is malformed, or if the table is full and the rule does not
    /// replace an existing one.
    pub fn add(&mut self, rule: PortMapRule) -> Result<Option<PortMapRule>, PortMapError> {
        rule.validate()?;
        let key = (rule.protocol, rule.external_port);
        if !self.rules.contains_key(&key) && self.rules.len() >= usize::from(self.capacity) {
            return Err(PortMapError::TableFull(self.capacity));
        }

        let rule = PortMapRule {
            valid: true,
            ..rule
        };
        let replaced = self.rules.insert(key, rule);
        if let Some(old) = &replaced {
            self.unlink_reply(old);
        }
        self.replies.insert(
            (rule.protocol, rule.internal_addr, rule.internal_port),
            rule.external_port,
        );
        info!(
            "static mapping {} {}:{} -> {}:{}",
            rule.protocol.as_str(),
            rule.external_addr,
            rule.external_port,
            rule.internal_addr,
            rule.internal_port
        );
        Ok(replaced)
    }

    /// Remove the rule for `external_port` and `protocol`.
    ///
    /// # Errors
    ///
    /// Returns [`PortMapError::NotFound`] if there is no such rule.
    pub fn remove(
        &mut self,
        external_port: u16,
        protocol: NatProtocol,
    ) -> Result<PortMapRule, PortMapError> {
        let rule = self
            .rules
            .remove(&(protocol, external_port))
            .ok_or(PortMapError::NotFound(protocol, external_port))?;
        self.unlink_reply(&rule);
        info!(
            "removed static mapping {} port {external_port}",
            protocol.as_str()
        );
        Ok(rule)
    }

    // Drop the reply index entry for a rule that left the table. Several rules may forward to the
    // same internal endpoint, in which case the index moves to one of the remaining rules.
    fn unlink_reply(&mut self, rule: &PortMapRule) {
        let reply_key = (rule.protocol, rule.internal_addr, rule.internal_port);
        if self.replies.get(&reply_key) != Some(&rule.external_port) {
            return;
        }
        let other = self
            .rules
            .values()
            .filter(|r| (r.protocol, r.internal_addr, r.internal_port) == reply_key)
            .map(|r| r.external_port)
            .min();
        match other {
            Some(port) => {
                self.replies.insert(reply_key, port);
            }
            None => {
                self.replies.remove(&reply_key);
            }
        }
    }

    /// Internal endpoint for inbound traffic to `external_port`.
    #[must_use]
    pub fn lookup(&self, external_port: u16, protocol: NatProtocol) -> Option<(Ipv4Addr, u16)> {
        self.get(external_port, protocol)
            .map(|rule| (rule.internal_addr, rule.internal_port))
    }

    #[must_use]
    pub fn get(&self, external_port: u16, protocol: NatProtocol) -> Option<&PortMapRule> {
        self.rules
            .get(&(protocol, external_port))
            .filter(|rule| rule.valid)
    }

    /// Rule covering traffic sent back by the internal endpoint `internal_addr:internal_port`.
    #[must_use]
    pub fn lookup_reply(
        &self,
        protocol: NatProtocol,
        internal_addr: Ipv4Addr,
        internal_port: u16,
    ) -> Option<&PortMapRule> {
        let external_port = self
            .replies
            .get(&(protocol, internal_addr, internal_port))?;
        let rule = self.get(*external_port, protocol);
        if rule.is_some() {
            debug!(
                "lookup_reply: {} {internal_addr}:{internal_port} uses static port {external_port}",
                protocol.as_str()
            );
        }
        rule
    }

    /// Whether `port` is claimed by a rule for `protocol`.
    #[must_use]
    pub fn is_reserved(&self, port: u16, protocol: NatProtocol) -> bool {
        self.rules.contains_key(&(protocol, port))
    }

    /// Rules, sorted by protocol and external port.
    #[must_use]
    pub fn rules(&self) -> Vec<PortMapRule> {
        let mut rules: Vec<_> = self.rules.values().copied().collect();
        rules.sort_by_key(|rule| (rule.protocol, rule.external_port));
        rules
    }
}
