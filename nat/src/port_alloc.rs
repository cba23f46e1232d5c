// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Port allocation for dynamic mappings
//!
//! The allocator hands out external ports from a fixed [`PortRange`], separately for each
//! [`NatProtocol`]. Ports in use are tracked in a bitmap per protocol; the search for a free port
//! starts from a cursor that moves forward after each allocation and wraps at the top of the range,
//! so that recently released ports are not immediately reused.
//!
//! The allocator knows nothing about static rules: callers pass a predicate telling which ports are
//! claimed by other means, and these ports are skipped.

use crate::port::PortRange;
use crate::protocol::NatProtocol;
use roaring::RoaringBitmap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum AllocatorError {
    #[error("no free {} port left in the pool", .0.as_str())]
    PoolExhausted(NatProtocol),
}

///////////////////////////////////////////////////////////////////////////////
// ProtocolPorts
///////////////////////////////////////////////////////////////////////////////

#[derive(Debug)]
struct ProtocolPorts {
    used: RoaringBitmap,
    cursor: u16,
}

impl ProtocolPorts {
    fn new(range: PortRange) -> Self {
        Self {
            used: RoaringBitmap::new(),
            cursor: range.start(),
        }
    }
}

///////////////////////////////////////////////////////////////////////////////
// PortAllocator
///////////////////////////////////////////////////////////////////////////////

#[derive(Debug)]
pub struct PortAllocator {
    range: PortRange,
    ports: [ProtocolPorts; 3],
}

impl PortAllocator {
    #[must_use]
    pub fn new(range: PortRange) -> Self {
        Self {
            range,
            ports: [
                ProtocolPorts::new(range),
                ProtocolPorts::new(range),
                ProtocolPorts::new(range),
            ],
        }
    }

    #[must_use]
    pub fn range(&self) -> PortRange {
        self.range
    }

    /// Allocate a free port for `protocol`, skipping ports for which `reserved` returns true.
    ///
    /// # Errors
    ///
    /// Returns [`AllocatorError::PoolExhausted`] if every port in the range is either in use or
    /// reserved.
    pub fn allocate<F>(&mut self, protocol: NatProtocol, reserved: F) -> Result<u16, AllocatorError>
    where
        F: Fn(u16) -> bool,
    {
        let range = self.range;
        let ports = &mut self.ports[protocol.index()];

        let mut candidate = ports.cursor;
        for _ in 0..range.width() {
            if !ports.used.contains(u32::from(candidate)) && !reserved(candidate) {
                ports.used.insert(u32::from(candidate));
                ports.cursor = range.next_after(candidate);
                debug!("allocate: {} port {candidate}", protocol.as_str());
                return Ok(candidate);
            }
            candidate = range.next_after(candidate);
        }

        warn!(
            "allocate: no {} port left in range {}-{}",
            protocol.as_str(),
            range.start(),
            range.end()
        );
        Err(AllocatorError::PoolExhausted(protocol))
    }

    /// Give `port` back to the pool. Returns false if the port was not allocated.
    pub fn release(&mut self, protocol: NatProtocol, port: u16) -> bool {
        let released = self.ports[protocol.index()]
            .used
            .remove(u32::from(port));
        if released {
            debug!("release: {} port {port}", protocol.as_str());
        }
        released
    }

    #[must_use]
    pub fn is_allocated(&self, protocol: NatProtocol, port: u16) -> bool {
        self.ports[protocol.index()].used.contains(u32::from(port))
    }

    /// Number of ports currently allocated for `protocol`.
    #[must_use]
    pub fn allocated(&self, protocol: NatProtocol) -> u64 {
        self.ports[protocol.index()].used.len()
    }
}
