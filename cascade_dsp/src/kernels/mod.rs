//! The three DSP kernel capabilities of the conversion pipeline.
//!
//! Each kernel is configured once at pipeline assembly (control thread) and
//! then driven per tick with borrowed data planes. The reference paths here
//! are scalar; the CPU feature flags are threaded through so specialised
//! implementations can slot in behind the same interfaces.

pub mod channelmix;
pub mod convert;
pub mod resample;

pub use channelmix::{ChannelMixer, MixConfig, MixFlags, MixOptions};
pub use convert::{ConvertConfig, Converter};
pub use resample::{ResampleConfig, Resampler};

/// View a byte plane as `n` f32 samples.
///
/// Planes come from the aligned scratch pools or from host blocks that were
/// registered with the alignment contract, so the cast is direct.
#[inline]
pub(crate) fn plane_f32(bytes: &[u8], n: usize) -> &[f32] {
    bytemuck::cast_slice(&bytes[..n * 4])
}

/// View a mutable byte plane as `n` f32 samples.
#[inline]
pub(crate) fn plane_f32_mut(bytes: &mut [u8], n: usize) -> &mut [f32] {
    bytemuck::cast_slice_mut(&mut bytes[..n * 4])
}
