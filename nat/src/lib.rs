// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(clippy::all, clippy::pedantic)]
#![deny(rustdoc::all)]

//! Network Address and Port Translation (NAPT) for a small IPv4 router
//!
//! This package implements a [`NatEngine`] that rewrites the source address and port of packets
//! leaving through a NAT interface to the interface's external address, tracks the resulting
//! mappings so that replies find their way back to the right internal host, and forwards inbound
//! traffic according to static port mappings.
//!
//! The engine does not parse or rewrite packets itself: the forwarding path hands it a
//! [`PacketMeta`] and applies the returned [`TranslateResult`], including checksum updates.
//!
//! The building blocks are usable on their own: [`AddressPool`] tracks which interfaces perform
//! NAT, [`PortAllocator`] hands out external ports, [`StaticPortMap`] holds the port forwarding
//! rules and [`ConnectionTable`] the dynamic mappings.
//!
//! # Example
//!
//! ```
//! use napt_nat::{InterfaceId, NatEngine, NatProtocol, PacketMeta, TcpFlags, TranslateResult};
//! use std::net::Ipv4Addr;
//! use std::time::Instant;
//!
//! let wan = InterfaceId::new(1);
//! let engine = NatEngine::init(512, 32).expect("Failed to create NAT engine");
//! engine.configure_interface(wan, Ipv4Addr::new(203, 0, 113, 5));
//! assert!(engine.enable(Ipv4Addr::new(203, 0, 113, 5), true));
//!
//! let syn = PacketMeta {
//!     interface: wan,
//!     protocol: NatProtocol::Tcp,
//!     src_addr: Ipv4Addr::new(10, 0, 0, 9),
//!     src_port: 51000,
//!     dst_addr: Ipv4Addr::new(93, 184, 216, 34),
//!     dst_port: 443,
//!     tcp_flags: TcpFlags::SYN,
//! };
//! assert_eq!(
//!     engine.on_outbound(&syn, Instant::now()),
//!     TranslateResult::Forward {
//!         addr: Ipv4Addr::new(203, 0, 113, 5),
//!         port: 49152
//!     }
//! );
//! ```
//!
//! # Limitations
//!
//! - Only IPv4 is supported, and fragments are not reassembled
//! - Each NAT interface has exactly one external address
//! - No hairpinning, and no application level gateways

mod address_pool;
pub mod config;
mod conntrack;
mod display;
mod engine;
mod port;
mod port_alloc;
mod portmap;
mod protocol;
pub mod stats;
mod sync;
mod tcp;

pub use address_pool::{AddressPool, AddressPoolError, InterfaceId, NatConfig};
pub use config::{ConfigError, NatParams, NatParamsBuilder, NatSetup, NatTimeouts};
pub use conntrack::{ConnectionTable, InboundMiss, NatEntry, OutboundKey, OutboundMapping};
pub use engine::{DropReason, NatEngine, NatError, PacketMeta, TranslateResult};
pub use port::{PortRange, PortRangeError};
pub use port_alloc::{AllocatorError, PortAllocator};
pub use portmap::{PortMapError, PortMapRule, StaticPortMap};
pub use protocol::{NatProtocol, ProtocolError};
pub use stats::NatStats;
pub use tcp::{FlowDirection, TcpConnState, TcpFlags, TcpTracker};
