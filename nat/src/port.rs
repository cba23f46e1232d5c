// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Port range: the closed interval of external ports usable for dynamic mappings.

use serde::Deserialize;
use std::ops::RangeInclusive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum PortRangeError {
    #[error("reserved port ({0})")]
    ReservedPort(u16),
    #[error("empty port range ({0}-{1})")]
    Empty(u16, u16),
}

/// `PortRange` is a closed, non-empty interval of non-zero ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "RawPortRange")]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    /// Default ephemeral range for dynamic mappings.
    pub const DEFAULT_START: u16 = 49152;
    pub const DEFAULT_END: u16 = 61439;

    /// Build a new range covering `start..=end`.
    ///
    /// # Errors
    ///
    /// Returns an error if `start` is zero, or if `start` is greater than `end`.
    pub fn new_checked(start: u16, end: u16) -> Result<PortRange, PortRangeError> {
        if start == 0 {
            return Err(PortRangeError::ReservedPort(start));
        }
        if start > end {
            return Err(PortRangeError::Empty(start, end));
        }
        Ok(Self { start, end })
    }

    #[must_use]
    pub fn start(&self) -> u16 {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> u16 {
        self.end
    }

    /// Number of ports in the range.
    #[must_use]
    pub fn width(&self) -> u32 {
        u32::from(self.end) - u32::from(self.start) + 1
    }

    #[must_use]
    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    /// Port following `port` in the range, wrapping to the start after the last port.
    #[must_use]
    pub fn next_after(&self, port: u16) -> u16 {
        if port >= self.end || port < self.start {
            self.start
        } else {
            port + 1
        }
    }

    #[must_use]
    pub fn as_range(&self) -> RangeInclusive<u16> {
        self.start..=self.end
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: Self::DEFAULT_START,
            end: Self::DEFAULT_END,
        }
    }
}

#[derive(Deserialize)]
struct RawPortRange {
    start: u16,
    end: u16,
}

impl TryFrom<RawPortRange> for PortRange {
    type Error = PortRangeError;

    fn try_from(raw: RawPortRange) -> Result<Self, Self::Error> {
        PortRange::new_checked(raw.start, raw.end)
    }
}
