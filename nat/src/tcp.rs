// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! TCP connection tracking for NAT entries
//!
//! Each direction of a TCP connection closes independently, so the tracker records what it has seen
//! in each direction (FIN, the ACK for that FIN) plus the SYN-ACK and RST events. The connection
//! state used for aging is derived from these observations.

use bitflags::bitflags;

bitflags! {
    /// TCP header flags of the packet being translated.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TcpFlags: u8 {
        const FIN = 0x01;
        const SYN = 0x02;
        const RST = 0x04;
        const PSH = 0x08;
        const ACK = 0x10;
        const URG = 0x20;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    struct Seen: u8 {
        /// FIN sent by the internal host
        const FIN1 = 0x01;
        /// FIN sent by the remote host
        const FIN2 = 0x02;
        /// ACK of FIN1, sent by the remote host
        const FINACK1 = 0x04;
        /// ACK of FIN2, sent by the internal host
        const FINACK2 = 0x08;
        const SYNACK = 0x10;
        const RST = 0x20;
    }
}

/// Which side sent the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowDirection {
    /// From the internal host to the remote host
    Outbound,
    /// From the remote host to the internal host
    Inbound,
}

/// State of a tracked TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TcpConnState {
    /// No SYN-ACK seen yet
    Embryonic,
    /// SYN-ACK seen, no FIN or RST
    Established,
    /// One side sent a FIN
    HalfClosed,
    /// Both sides sent a FIN
    Closing,
    /// A RST was seen
    Reset,
}

impl TcpConnState {
    /// Whether the connection qualifies for the long, established timeout.
    #[must_use]
    pub fn is_established(self) -> bool {
        self == TcpConnState::Established
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TcpConnState::Embryonic => "embryonic",
            TcpConnState::Established => "established",
            TcpConnState::HalfClosed => "half-closed",
            TcpConnState::Closing => "closing",
            TcpConnState::Reset => "reset",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TcpTracker {
    seen: Seen,
}

impl TcpTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for a packet with `flags` travelling in `direction`.
    pub fn update(&mut self, direction: FlowDirection, flags: TcpFlags) {
        if flags.contains(TcpFlags::RST) {
            self.seen |= Seen::RST;
        }
        if flags.contains(TcpFlags::SYN | TcpFlags::ACK) {
            self.seen |= Seen::SYNACK;
        }
        let (fin, peer_fin, peer_finack) = match direction {
            FlowDirection::Outbound => (Seen::FIN1, Seen::FIN2, Seen::FINACK2),
            FlowDirection::Inbound => (Seen::FIN2, Seen::FIN1, Seen::FINACK1),
        };
        // An ACK only acknowledges a FIN that was sent before it, by the other side
        if flags.contains(TcpFlags::ACK) && self.seen.contains(peer_fin) {
            self.seen |= peer_finack;
        }
        if flags.contains(TcpFlags::FIN) {
            self.seen |= fin;
        }
    }

    #[must_use]
    pub fn state(&self) -> TcpConnState {
        let fins = self.seen & (Seen::FIN1 | Seen::FIN2);
        if self.seen.contains(Seen::RST) {
            TcpConnState::Reset
        } else if fins == Seen::FIN1 | Seen::FIN2 {
            TcpConnState::Closing
        } else if !fins.is_empty() {
            TcpConnState::HalfClosed
        } else if self.seen.contains(Seen::SYNACK) {
            TcpConnState::Established
        } else {
            TcpConnState::Embryonic
        }
    }

    /// FIN sent by the internal host
    #[must_use]
    pub fn fin1(&self) -> bool {
        self.seen.contains(Seen::FIN1)
    }

    /// FIN sent by the remote host
    #[must_use]
    pub fn fin2(&self) -> bool {
        self.seen.contains(Seen::FIN2)
    }

    #[must_use]
    pub fn finack1(&self) -> bool {
        self.seen.contains(Seen::FINACK1)
    }

    #[must_use]
    pub fn finack2(&self) -> bool {
        self.seen.contains(Seen::FINACK2)
    }

    #[must_use]
    pub fn synack(&self) -> bool {
        self.seen.contains(Seen::SYNACK)
    }

    #[must_use]
    pub fn rst(&self) -> bool {
        self.seen.contains(Seen::RST)
    }

    /// Both FINs were sent and acknowledged.
    #[must_use]
    pub fn fully_closed(&self) -> bool {
        self.seen
            .contains(Seen::FIN1 | Seen::FIN2 | Seen::FINACK1 | Seen::FINACK2)
    }
}
