//! The volume and property model.
//!
//! Three independent volume tracks are carried: `channel` (hardware-facing),
//! `soft` (applied inside the channel-mix stage) and `monitor` (monitor
//! fan-out). All three are kept in lock-step with the channel map: any
//! remapping that reorders the map applies the same swaps to every track,
//! and any change of channel count folds the previous per-channel gains into
//! their arithmetic mean.

use crate::channel::ChannelPosition;
use crate::format::RawFormat;

pub const DEFAULT_VOLUME: f32 = 1.0;
pub const DEFAULT_MUTE: bool = false;
pub const DEFAULT_RESAMPLE_QUALITY: u32 = 4;

/// One volume track: a mute switch plus per-channel linear gains.
#[derive(Debug, Clone, PartialEq)]
pub struct Volumes {
    pub mute: bool,
    pub volumes: Vec<f32>,
}

impl Default for Volumes {
    fn default() -> Self {
        Self {
            mute: DEFAULT_MUTE,
            volumes: Vec::new(),
        }
    }
}

impl Volumes {
    /// Resize the track to `channels` entries, all equal to the arithmetic
    /// mean of the previous entries (1.0 when the track was empty).
    pub fn resize_mean(&mut self, channels: usize) {
        let mean = if self.volumes.is_empty() {
            DEFAULT_VOLUME
        } else {
            self.volumes.iter().sum::<f32>() / self.volumes.len() as f32
        };
        self.volumes.clear();
        self.volumes.resize(channels, mean);
    }
}

/// The node's property state.
#[derive(Debug, Clone)]
pub struct Props {
    /// Master gain applied ahead of the channel mix.
    pub volume: f32,
    /// Ordered channel identities; length is the current channel count.
    pub channel_map: Vec<ChannelPosition>,
    /// Hardware-facing volumes.
    pub channel: Volumes,
    /// Software volumes, fed to the mix stage when `have_soft_volume`.
    pub soft: Volumes,
    /// Monitor fan-out volumes.
    pub monitor: Volumes,
    /// Selects the `soft` track over `channel` for the mix stage.
    pub have_soft_volume: bool,
    /// Bypass the channel-mix stage entirely.
    pub mix_disabled: bool,
    /// User pitch-scale factor multiplied into the resampler rate.
    pub rate: f64,
    /// Resampler quality level, 0..=14.
    pub resample_quality: u32,
    /// Bypass the resampler entirely.
    pub resample_disabled: bool,
}

impl Default for Props {
    fn default() -> Self {
        Self {
            volume: DEFAULT_VOLUME,
            channel_map: Vec::new(),
            channel: Volumes::default(),
            soft: Volumes::default(),
            monitor: Volumes::default(),
            have_soft_volume: false,
            mix_disabled: false,
            rate: 1.0,
            resample_quality: DEFAULT_RESAMPLE_QUALITY,
            resample_disabled: false,
        }
    }
}

impl Props {
    /// Current channel count of the property model.
    #[inline]
    pub fn n_channels(&self) -> usize {
        self.channel_map.len()
    }

    /// Reconcile the channel map (and all three volume tracks) with a newly
    /// negotiated format.
    ///
    /// For each index `i` of the current map, the first index `j >= i` of
    /// the new position vector with the same identity is located and the
    /// elements at `i` and `j` are swapped in the map and in every track.
    /// The map is then overwritten by the new positions, and any track whose
    /// length differs from the new channel count is mean-filled. The scan
    /// starts at `j = i`, so a non-monotone permutation of an already
    /// matching map keeps its volumes in place (the map itself is always
    /// overwritten).
    pub fn remap_volumes(&mut self, info: &RawFormat) {
        let target = info.channels as usize;
        let old_len = self.channel_map.len();
        if old_len < target {
            self.channel_map.resize(target, ChannelPosition::UNKNOWN);
        }

        for i in 0..old_len {
            for j in i..target {
                if self.channel_map[i] != info.positions[j] {
                    continue;
                }
                if i != j {
                    self.channel_map.swap(i, j);
                    swap_in_track(&mut self.channel.volumes, i, j);
                    swap_in_track(&mut self.soft.volumes, i, j);
                    swap_in_track(&mut self.monitor.volumes, i, j);
                }
                break;
            }
        }

        self.channel_map.clear();
        self.channel_map.extend_from_slice(&info.positions[..target]);

        if target == 0 {
            return;
        }
        if self.channel.volumes.len() != target {
            self.channel.resize_mean(target);
        }
        if self.soft.volumes.len() != target {
            self.soft.resize_mean(target);
        }
        if self.monitor.volumes.len() != target {
            self.monitor.resize_mean(target);
        }
    }
}

/// Swap two entries of a volume track, treating indices past the logical
/// length as holding the default gain.
fn swap_in_track(volumes: &mut [f32], i: usize, j: usize) {
    match (i < volumes.len(), j < volumes.len()) {
        (true, true) => volumes.swap(i, j),
        (true, false) => volumes[i] = DEFAULT_VOLUME,
        _ => {}
    }
}
