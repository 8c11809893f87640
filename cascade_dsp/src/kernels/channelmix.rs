//! The channel-mix kernel.
//!
//! Routes source channels onto destination channels through a gain matrix
//! derived from the two channel masks, folds the active volume track into
//! the matrix, and reports identity so the pipeline can skip it entirely.

use bitflags::bitflags;
use cascade_core::CpuFlags;

use crate::channel::{ChannelPosition, default_mask};
use crate::error::{Error, Result};
use crate::kernels::{plane_f32, plane_f32_mut};

bitflags! {
    /// Behaviour options of the mix stage.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MixOptions: u32 {
        /// Scale the matrix so no output sums above unity.
        const NORMALIZE = 1 << 0;
        /// Fold the LFE channel into the fronts instead of dropping it.
        const MIX_LFE = 1 << 1;
        /// Synthesise missing destination channels from the fronts.
        const UPMIX = 1 << 2;
    }
}

bitflags! {
    /// State flags reported by a configured mixer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MixFlags: u32 {
        /// The mix is a bit-exact identity; the stage can be skipped.
        const IDENTITY = 1 << 0;
    }
}

/// Configuration of a channel-mix kernel instance.
#[derive(Debug, Clone, Copy)]
pub struct MixConfig {
    pub src_chan: u32,
    pub src_mask: u64,
    pub dst_chan: u32,
    pub dst_mask: u64,
    /// Sample rate, for the LFE filter coefficient.
    pub freq: u32,
    pub options: MixOptions,
    /// LFE low-pass cutoff in Hz; 0 disables the filter.
    pub lfe_cutoff: f32,
    pub cpu_flags: CpuFlags,
}

const SQRT1_2: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// A configured channel mixer.
#[derive(Debug)]
pub struct ChannelMixer {
    src_chan: usize,
    dst_chan: usize,
    /// Routing matrix before volume, dst-major.
    base: Vec<f32>,
    /// Routing matrix with per-destination volume folded in.
    matrix: Vec<f32>,
    base_identity: bool,
    flags: MixFlags,
    /// One-pole low-pass per synthesised LFE row.
    lfe: Vec<Option<OnePole>>,
}

#[derive(Debug, Clone, Copy)]
struct OnePole {
    a: f32,
    y: f32,
}

impl OnePole {
    fn new(cutoff: f32, freq: u32) -> Self {
        let a = 1.0 - (-2.0 * std::f32::consts::PI * cutoff / freq.max(1) as f32).exp();
        Self { a, y: 0.0 }
    }

    #[inline]
    fn run(&mut self, x: f32) -> f32 {
        self.y += self.a * (x - self.y);
        self.y
    }
}

impl ChannelMixer {
    pub fn new(cfg: MixConfig) -> Result<Self> {
        if cfg.src_chan == 0 || cfg.dst_chan == 0 {
            return Err(Error::InvalidArgument("mixer needs channels on both sides"));
        }
        let (base, lfe_rows) = make_matrix(&cfg);
        let src = cfg.src_chan as usize;
        let dst = cfg.dst_chan as usize;
        let base_identity = src == dst && is_identity(&base, dst, src);
        let lfe = lfe_rows
            .into_iter()
            .map(|synth| synth.then(|| OnePole::new(cfg.lfe_cutoff, cfg.freq)))
            .collect();

        let mut mixer = Self {
            src_chan: src,
            dst_chan: dst,
            matrix: base.clone(),
            base,
            base_identity,
            flags: MixFlags::empty(),
            lfe,
        };
        mixer.set_volume(1.0, false, &[]);
        Ok(mixer)
    }

    /// Fold the active volume track into the matrix.
    ///
    /// `volumes` carries one gain per destination channel; missing entries
    /// default to unity. Mute zeroes everything.
    pub fn set_volume(&mut self, master: f32, mute: bool, volumes: &[f32]) {
        let mut identity = self.base_identity && !mute;
        for j in 0..self.dst_chan {
            let vol = if mute {
                0.0
            } else {
                master * volumes.get(j).copied().unwrap_or(1.0)
            };
            if vol != 1.0 {
                identity = false;
            }
            for i in 0..self.src_chan {
                self.matrix[j * self.src_chan + i] = self.base[j * self.src_chan + i] * vol;
            }
        }
        self.flags = if identity {
            MixFlags::IDENTITY
        } else {
            MixFlags::empty()
        };
    }

    #[inline]
    pub fn flags(&self) -> MixFlags {
        self.flags
    }

    /// Mix `n_samples` frames of f32 planes.
    pub fn process(&mut self, dst: &mut [&mut [u8]], src: &[&[u8]], n_samples: usize) {
        for j in 0..self.dst_chan {
            let row = &self.matrix[j * self.src_chan..(j + 1) * self.src_chan];
            let out = plane_f32_mut(&mut *dst[j], n_samples);
            out.fill(0.0);
            for (i, &gain) in row.iter().enumerate() {
                if gain == 0.0 {
                    continue;
                }
                let inp = plane_f32(src[i], n_samples);
                for (o, &x) in out.iter_mut().zip(inp) {
                    *o += gain * x;
                }
            }
            if let Some(filter) = &mut self.lfe[j] {
                for o in out.iter_mut() {
                    *o = filter.run(*o);
                }
            }
        }
    }
}

fn is_identity(matrix: &[f32], dst: usize, src: usize) -> bool {
    if dst != src {
        return false;
    }
    matrix
        .iter()
        .enumerate()
        .all(|(k, &v)| v == if k / src == k % src { 1.0 } else { 0.0 })
}

/// Ascending set-bit positions of a mask.
fn mask_positions(mask: u64) -> Vec<u32> {
    (0..64).filter(|b| mask & (1 << b) != 0).collect()
}

/// Build the routing matrix for a configuration.
///
/// Returns the dst-major matrix and, per destination row, whether the row is
/// a synthesised LFE that needs the low-pass filter.
fn make_matrix(cfg: &MixConfig) -> (Vec<f32>, Vec<bool>) {
    let src_n = cfg.src_chan as usize;
    let dst_n = cfg.dst_chan as usize;
    let mut matrix = vec![0.0f32; src_n * dst_n];
    let mut lfe_rows = vec![false; dst_n];

    let mut src_mask = cfg.src_mask;
    let mut dst_mask = cfg.dst_mask;
    if src_mask & 1 != 0 || src_mask.count_ones() as usize != src_n {
        src_mask = default_mask(cfg.src_chan);
    }
    if dst_mask & 1 != 0 || dst_mask.count_ones() as usize != dst_n {
        dst_mask = default_mask(cfg.dst_chan);
    }

    let src_pos = mask_positions(src_mask);
    let dst_pos = mask_positions(dst_mask);
    if src_pos.len() != src_n || dst_pos.len() != dst_n {
        // Layout still unknown: route lane-for-lane.
        for k in 0..src_n.min(dst_n) {
            matrix[k * src_n + k] = 1.0;
        }
        return (matrix, lfe_rows);
    }

    let find = |positions: &[u32], p: ChannelPosition| positions.iter().position(|&x| x == p.0);

    // A mono destination averages every source lane.
    if dst_n == 1 && dst_pos[0] == ChannelPosition::MONO.0 && src_pos != [ChannelPosition::MONO.0]
    {
        matrix.fill(1.0 / src_n as f32);
        return (matrix, lfe_rows);
    }

    // Direct position matches.
    for (j, &dp) in dst_pos.iter().enumerate() {
        for (i, &sp) in src_pos.iter().enumerate() {
            if dp == sp {
                matrix[j * src_n + i] = 1.0;
            }
        }
    }

    // Fold unmatched source channels into what the destination has.
    for (i, &sp) in src_pos.iter().enumerate() {
        if dst_pos.contains(&sp) {
            continue;
        }
        let sp = ChannelPosition(sp);
        let fold_targets: &[(ChannelPosition, f32)] = if sp == ChannelPosition::MONO {
            &[(ChannelPosition::FL, 1.0), (ChannelPosition::FR, 1.0)]
        } else if sp == ChannelPosition::FC {
            &[(ChannelPosition::FL, SQRT1_2), (ChannelPosition::FR, SQRT1_2)]
        } else if sp == ChannelPosition::LFE {
            if cfg.options.contains(MixOptions::MIX_LFE) {
                &[(ChannelPosition::FL, SQRT1_2), (ChannelPosition::FR, SQRT1_2)]
            } else {
                &[]
            }
        } else if sp == ChannelPosition::FLC {
            &[(ChannelPosition::FL, 1.0)]
        } else if sp == ChannelPosition::FRC {
            &[(ChannelPosition::FR, 1.0)]
        } else if sp == ChannelPosition::SL {
            &[(ChannelPosition::RL, 1.0)]
        } else if sp == ChannelPosition::SR {
            &[(ChannelPosition::RR, 1.0)]
        } else if sp == ChannelPosition::RL {
            &[(ChannelPosition::SL, 1.0)]
        } else if sp == ChannelPosition::RR {
            &[(ChannelPosition::SR, 1.0)]
        } else if sp == ChannelPosition::RC {
            &[(ChannelPosition::RL, SQRT1_2), (ChannelPosition::RR, SQRT1_2)]
        } else {
            &[]
        };

        let mut routed = false;
        for &(target, gain) in fold_targets {
            if let Some(j) = find(&dst_pos, target) {
                matrix[j * src_n + i] += gain;
                routed = true;
            }
        }
        // Side/rear channels with no surround destination land on the
        // fronts; anything still unrouted lands on a mono destination.
        if !routed && sp != ChannelPosition::LFE {
            let front = match sp {
                ChannelPosition::SL | ChannelPosition::RL => Some(ChannelPosition::FL),
                ChannelPosition::SR | ChannelPosition::RR => Some(ChannelPosition::FR),
                _ => None,
            };
            if let Some(front) = front {
                if let Some(j) = find(&dst_pos, front) {
                    matrix[j * src_n + i] += SQRT1_2;
                    routed = true;
                }
            }
        }
        if !routed && sp != ChannelPosition::LFE {
            if let Some(j) = find(&dst_pos, ChannelPosition::MONO) {
                matrix[j * src_n + i] += SQRT1_2;
            }
        }
    }

    // Fill unmatched destination channels.
    for (j, &dp) in dst_pos.iter().enumerate() {
        let dp = ChannelPosition(dp);
        let row = &mut matrix[j * src_n..(j + 1) * src_n];
        if row.iter().any(|&v| v != 0.0) {
            continue;
        }
        if dp == ChannelPosition::MONO {
            // Mono downmix always averages every source lane.
            let gain = 1.0 / src_n as f32;
            row.fill(gain);
            continue;
        }
        if !cfg.options.contains(MixOptions::UPMIX) {
            continue;
        }
        let sources: &[(ChannelPosition, f32)] = if dp == ChannelPosition::FC {
            &[(ChannelPosition::FL, 0.5), (ChannelPosition::FR, 0.5)]
        } else if dp == ChannelPosition::SL || dp == ChannelPosition::RL {
            &[(ChannelPosition::FL, 0.5)]
        } else if dp == ChannelPosition::SR || dp == ChannelPosition::RR {
            &[(ChannelPosition::FR, 0.5)]
        } else if dp == ChannelPosition::LFE && cfg.lfe_cutoff > 0.0 {
            lfe_rows[j] = true;
            &[(ChannelPosition::FL, 0.5), (ChannelPosition::FR, 0.5)]
        } else {
            &[]
        };
        for &(source, gain) in sources {
            if let Some(i) = find(&src_pos, source) {
                row[i] = gain;
            }
        }
    }

    if cfg.options.contains(MixOptions::NORMALIZE) {
        let max = (0..dst_n)
            .map(|j| {
                matrix[j * src_n..(j + 1) * src_n]
                    .iter()
                    .map(|v| v.abs())
                    .sum::<f32>()
            })
            .fold(0.0f32, f32::max);
        if max > 1.0 {
            for v in matrix.iter_mut() {
                *v /= max;
            }
        }
    }

    (matrix, lfe_rows)
}
