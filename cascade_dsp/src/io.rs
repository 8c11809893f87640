//! Host-visible I/O control blocks.
//!
//! These small blocks are the per-tick contract between the node and its
//! scheduler: buffer-exchange slots per port, the graph position clock, and
//! the optional rate-match block a follower driver uses to steer the
//! resampler. The node owns the storage; the host reads and writes it
//! through accessors between ticks, which encodes the control/process
//! mutual-exclusion contract in `&mut self`.

use bitflags::bitflags;
use cascade_core::Fraction;

/// Status of a buffer-exchange slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoStatus {
    #[default]
    Ok,
    /// The consumer wants a new buffer.
    NeedData,
    /// The producer has filled the referenced buffer.
    HaveData,
}

/// A buffer-exchange slot attached to one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoBuffers {
    pub status: IoStatus,
    pub buffer_id: u32,
}

impl Default for IoBuffers {
    fn default() -> Self {
        Self {
            status: IoStatus::Ok,
            buffer_id: u32::MAX,
        }
    }
}

bitflags! {
    /// Result of one `process` tick.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProcessStatus: u32 {
        /// The node consumed its inputs and wants more.
        const NEED_DATA = 1 << 0;
        /// The node produced output data.
        const HAVE_DATA = 1 << 1;
    }
}

/// The graph clock, as published by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    /// Tick rate as a fraction of a second (e.g. `1/48000`).
    pub rate: Fraction,
    /// Nominal frames per tick (the quantum).
    pub duration: u32,
}

impl Default for Clock {
    fn default() -> Self {
        Self {
            rate: Fraction::new(1, 48000),
            duration: 1024,
        }
    }
}

/// The position control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub clock: Clock,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RateMatchFlags: u32 {
        /// The host is actively steering the resampler rate.
        const ACTIVE = 1 << 0;
    }
}

/// The rate-match control block.
///
/// When present, the node publishes the resampler delay and the number of
/// input frames required for the next tick into it; when additionally
/// `ACTIVE`, the host's fractional `rate` correction is folded into the
/// resampler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateMatch {
    /// Fractional rate correction supplied by the host.
    pub rate: f64,
    pub flags: RateMatchFlags,
    /// Resampler filter delay, in samples (published by the node).
    pub delay: u32,
    /// Input frames required to produce the next quantum (published by the
    /// node).
    pub size: u32,
}

impl Default for RateMatch {
    fn default() -> Self {
        Self {
            rate: 1.0,
            flags: RateMatchFlags::empty(),
            delay: 0,
            size: 0,
        }
    }
}
