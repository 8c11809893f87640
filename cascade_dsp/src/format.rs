//! Audio sample formats and negotiated format descriptors.
//!
//! Raw ports negotiate one of the [`SampleFormat`] menu entries; DSP ports
//! always carry [`SampleFormat::DspF32`] (32-bit float, one channel per
//! plane, native endianness). The stride and block layout of a port follow
//! from the format.

use crate::channel::ChannelPosition;

/// Maximum number of channels a side can carry.
pub const MAX_CHANNELS: usize = 64;
/// Maximum number of ports per side (one per channel in dsp mode).
pub const MAX_PORTS: usize = MAX_CHANNELS;
/// Maximum number of buffers a port accepts.
pub const MAX_BUFFERS: usize = 32;

/// A concrete sample encoding.
///
/// `P`-suffixed variants are planar (one plane per channel, native byte
/// order); the others are interleaved with explicit endianness. `DspF32` is
/// the pipeline's native mid-stage format: planar f32, memory-compatible
/// with `F32P`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    U8,
    U8P,
    S8,
    S8P,
    Ulaw,
    Alaw,
    S16Le,
    S16Be,
    S16P,
    S24Le,
    S24Be,
    S24P,
    S24In32Le,
    S24In32Be,
    S24In32P,
    S32Le,
    S32Be,
    S32P,
    F32Le,
    F32Be,
    F32P,
    F64Le,
    F64Be,
    F64P,
    DspF32,
}

impl SampleFormat {
    /// Bytes per sample.
    pub fn width(&self) -> u32 {
        use SampleFormat::*;
        match self {
            U8 | U8P | S8 | S8P | Ulaw | Alaw => 1,
            S16Le | S16Be | S16P => 2,
            S24Le | S24Be | S24P => 3,
            F64Le | F64Be | F64P => 8,
            _ => 4,
        }
    }

    /// Returns `true` for one-plane-per-channel formats.
    pub fn is_planar(&self) -> bool {
        use SampleFormat::*;
        matches!(
            self,
            U8P | S8P | S16P | S24P | S24In32P | S32P | F32P | F64P | DspF32
        )
    }

    /// Returns `true` for the pipeline-native DSP format.
    #[inline]
    pub fn is_dsp(&self) -> bool {
        matches!(self, SampleFormat::DspF32)
    }
}

/// A fully negotiated raw audio format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFormat {
    pub format: SampleFormat,
    pub rate: u32,
    pub channels: u32,
    /// Channel position per lane; length equals `channels`.
    pub positions: Vec<ChannelPosition>,
}

impl RawFormat {
    /// Create a format, padding or truncating `positions` to `channels`.
    pub fn new(
        format: SampleFormat,
        rate: u32,
        channels: u32,
        positions: Vec<ChannelPosition>,
    ) -> Self {
        let mut positions = positions;
        positions.resize(channels as usize, ChannelPosition::UNKNOWN);
        Self {
            format,
            rate,
            channels,
            positions,
        }
    }

    /// Bytes per frame of one block.
    pub fn stride(&self) -> u32 {
        if self.format.is_planar() {
            self.format.width()
        } else {
            self.format.width() * self.channels
        }
    }

    /// Number of data blocks per buffer: one per channel when planar,
    /// one in total when interleaved.
    pub fn blocks(&self) -> u32 {
        if self.format.is_planar() {
            self.channels
        } else {
            1
        }
    }
}

/// The single-channel DSP format carried by dsp-mode ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DspFormat {
    pub format: SampleFormat,
}

impl Default for DspFormat {
    fn default() -> Self {
        Self {
            format: SampleFormat::DspF32,
        }
    }
}

/// A port's negotiated format: either the mono DSP format or a raw format.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioInfo {
    Dsp(DspFormat),
    Raw(RawFormat),
}

impl AudioInfo {
    /// The raw format, if this is one.
    pub fn as_raw(&self) -> Option<&RawFormat> {
        match self {
            AudioInfo::Raw(raw) => Some(raw),
            AudioInfo::Dsp(_) => None,
        }
    }
}
