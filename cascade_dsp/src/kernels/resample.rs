//! The resample kernel.
//!
//! The native variant is a windowed-sinc polyphase resampler whose tap
//! count scales with the quality level; the peaks variant is a peak-hold
//! decimator used for monitor scopes, where envelope fidelity matters more
//! than waveform fidelity.
//!
//! Both variants stream: input not yet consumed stays in a per-channel
//! history, `in_len(out)` answers the inverse query the rate-match
//! accounting needs, and `update_rate` applies the host's fractional rate
//! correction on top of the configured ratio.

use cascade_core::CpuFlags;

use crate::error::{Error, Result};
use crate::kernels::{plane_f32, plane_f32_mut};

/// Quality level to filter tap count. Index is the quality, 0..=14.
const QUALITY_TAPS: [usize; 15] = [8, 12, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

/// Number of fractional phases in the precomputed filter bank.
const N_PHASES: usize = 256;

/// Pending-input headroom reserved per channel so a steady-state tick never
/// reallocates.
const HISTORY_HEADROOM: usize = 16384;

/// Configuration of a resampler instance.
#[derive(Debug, Clone, Copy)]
pub struct ResampleConfig {
    pub channels: u32,
    pub i_rate: u32,
    pub o_rate: u32,
    /// Quality level 0..=14; larger is sharper and more expensive.
    pub quality: u32,
    pub cpu_flags: CpuFlags,
}

/// A configured resampler.
#[derive(Debug)]
pub struct Resampler {
    channels: usize,
    i_rate: u32,
    o_rate: u32,
    /// Host rate correction multiplied into the ratio.
    pitch: f64,
    variant: Variant,
}

#[derive(Debug)]
enum Variant {
    Native(Sinc),
    Peaks(Peaks),
}

#[derive(Debug)]
struct Sinc {
    taps: usize,
    /// `(N_PHASES + 1) * taps` coefficients, phase-major.
    table: Vec<f32>,
    /// Per-channel pending input, seeded with `taps - 1` zeros.
    hist: Vec<Vec<f32>>,
    /// Position of the next output in pending-input samples.
    phase: f64,
}

#[derive(Debug)]
struct Peaks {
    hist: Vec<Vec<f32>>,
    phase: f64,
}

impl Resampler {
    /// Create the native windowed-sinc resampler.
    pub fn new(cfg: ResampleConfig) -> Result<Self> {
        Self::validate(&cfg)?;
        let taps = QUALITY_TAPS[cfg.quality.min(14) as usize];
        let table = build_table(taps, cfg.i_rate, cfg.o_rate);
        let hist = seeded_history(cfg.channels as usize, taps - 1);
        Ok(Self {
            channels: cfg.channels as usize,
            i_rate: cfg.i_rate,
            o_rate: cfg.o_rate,
            pitch: 1.0,
            variant: Variant::Native(Sinc {
                taps,
                table,
                hist,
                phase: 0.0,
            }),
        })
    }

    /// Create the peak-hold variant used for monitor scopes.
    pub fn new_peaks(cfg: ResampleConfig) -> Result<Self> {
        Self::validate(&cfg)?;
        Ok(Self {
            channels: cfg.channels as usize,
            i_rate: cfg.i_rate,
            o_rate: cfg.o_rate,
            pitch: 1.0,
            variant: Variant::Peaks(Peaks {
                hist: seeded_history(cfg.channels as usize, 0),
                phase: 0.0,
            }),
        })
    }

    fn validate(cfg: &ResampleConfig) -> Result<()> {
        if cfg.channels == 0 {
            return Err(Error::InvalidArgument("resampler needs at least one channel"));
        }
        if cfg.i_rate == 0 || cfg.o_rate == 0 {
            return Err(Error::InvalidArgument("resampler rates must be non-zero"));
        }
        Ok(())
    }

    #[inline]
    pub fn i_rate(&self) -> u32 {
        self.i_rate
    }

    #[inline]
    pub fn o_rate(&self) -> u32 {
        self.o_rate
    }

    /// Input samples consumed per output sample.
    #[inline]
    fn step(&self) -> f64 {
        self.i_rate as f64 / self.o_rate as f64 * self.pitch
    }

    /// Apply a fractional rate correction on top of the configured ratio.
    pub fn update_rate(&mut self, rate: f64) {
        self.pitch = if rate.is_finite() && rate > 0.0 { rate } else { 1.0 };
    }

    /// The filter group delay in input samples.
    pub fn delay(&self) -> u32 {
        match &self.variant {
            Variant::Native(sinc) => (sinc.taps / 2) as u32,
            Variant::Peaks(_) => 0,
        }
    }

    /// Input frames required to produce `out_samples` more output frames,
    /// given what is already pending.
    pub fn in_len(&self, out_samples: u32) -> u32 {
        if out_samples == 0 {
            return 0;
        }
        let step = self.step();
        let (phase, have, taps) = match &self.variant {
            Variant::Native(sinc) => (sinc.phase, sinc.hist[0].len(), sinc.taps),
            Variant::Peaks(peaks) => (peaks.phase, peaks.hist[0].len(), 1),
        };
        let needed = (phase + (out_samples as f64 - 1.0) * step).floor() as usize + taps;
        needed.saturating_sub(have) as u32
    }

    /// Drop pending input and restart from silence.
    pub fn reset(&mut self) {
        match &mut self.variant {
            Variant::Native(sinc) => {
                let seed = sinc.taps - 1;
                for hist in &mut sinc.hist {
                    hist.clear();
                    hist.resize(seed, 0.0);
                }
                sinc.phase = 0.0;
            }
            Variant::Peaks(peaks) => {
                for hist in &mut peaks.hist {
                    hist.clear();
                }
                peaks.phase = 0.0;
            }
        }
    }

    /// Resample up to `*in_len` input frames into at most `*out_len` output
    /// frames; both counts are rewritten with what was actually consumed and
    /// produced. Input is always consumed in full (it is buffered
    /// internally if the output capacity is the limit).
    pub fn process(
        &mut self,
        src: &[&[u8]],
        in_len: &mut u32,
        dst: &mut [&mut [u8]],
        out_len: &mut u32,
    ) {
        let channels = self.channels;
        let step = self.step();
        let n_in = *in_len as usize;
        let capacity = (*out_len as usize).min(
            (0..channels)
                .map(|c| dst[c].len() / 4)
                .min()
                .unwrap_or(0),
        );

        match &mut self.variant {
            Variant::Native(sinc) => {
                for c in 0..channels {
                    sinc.hist[c].extend_from_slice(plane_f32(src[c], n_in));
                }
                let avail = sinc.hist[0].len();
                let taps = sinc.taps;

                let mut produced = 0;
                while produced < capacity {
                    let base = (sinc.phase + produced as f64 * step) as usize;
                    if base + taps > avail {
                        break;
                    }
                    produced += 1;
                }

                for c in 0..channels {
                    let out = plane_f32_mut(&mut *dst[c], produced);
                    let hist = &sinc.hist[c];
                    for (k, o) in out.iter_mut().enumerate() {
                        let pos = sinc.phase + k as f64 * step;
                        let base = pos as usize;
                        let q = ((pos - base as f64) * N_PHASES as f64).round() as usize;
                        let coeffs = &sinc.table[q * taps..(q + 1) * taps];
                        let mut acc = 0.0f32;
                        for (w, coef) in hist[base..base + taps].iter().zip(coeffs) {
                            acc += w * coef;
                        }
                        *o = acc;
                    }
                }

                let next = sinc.phase + produced as f64 * step;
                let drop = (next as usize).min(avail.saturating_sub(taps - 1));
                for hist in &mut sinc.hist {
                    hist.drain(..drop);
                }
                sinc.phase = next - drop as f64;

                *in_len = n_in as u32;
                *out_len = produced as u32;
            }
            Variant::Peaks(peaks) => {
                for c in 0..channels {
                    peaks.hist[c].extend_from_slice(plane_f32(src[c], n_in));
                }
                let avail = peaks.hist[0].len();
                let window = step.ceil().max(1.0) as usize;

                let mut produced = 0;
                while produced < capacity {
                    let base = (peaks.phase + produced as f64 * step) as usize;
                    if base + window > avail {
                        break;
                    }
                    produced += 1;
                }

                for c in 0..channels {
                    let out = plane_f32_mut(&mut *dst[c], produced);
                    let hist = &peaks.hist[c];
                    for (k, o) in out.iter_mut().enumerate() {
                        let base = (peaks.phase + k as f64 * step) as usize;
                        *o = hist[base..base + window]
                            .iter()
                            .fold(0.0f32, |m, &v| m.max(v.abs()));
                    }
                }

                let next = peaks.phase + produced as f64 * step;
                let drop = (next as usize).min(avail);
                for hist in &mut peaks.hist {
                    hist.drain(..drop);
                }
                peaks.phase = next - drop as f64;

                *in_len = n_in as u32;
                *out_len = produced as u32;
            }
        }
    }
}

fn seeded_history(channels: usize, seed: usize) -> Vec<Vec<f32>> {
    (0..channels)
        .map(|_| {
            let mut hist = Vec::with_capacity(seed + HISTORY_HEADROOM);
            hist.resize(seed, 0.0);
            hist
        })
        .collect()
}

/// Precompute the windowed-sinc filter bank.
fn build_table(taps: usize, i_rate: u32, o_rate: u32) -> Vec<f32> {
    let cutoff = (o_rate as f64 / i_rate as f64).min(1.0) * 0.95;
    let half = (taps / 2) as f64;
    let mut table = Vec::with_capacity((N_PHASES + 1) * taps);
    for q in 0..=N_PHASES {
        let frac = q as f64 / N_PHASES as f64;
        for t in 0..taps {
            let x = t as f64 - (half - 1.0) - frac;
            table.push((cutoff * sinc(std::f64::consts::PI * x * cutoff) * blackman(x / half)) as f32);
        }
    }
    table
}

#[inline]
fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-9 { 1.0 } else { x.sin() / x }
}

/// Blackman window over the normalized position `z` in [-1, 1].
#[inline]
fn blackman(z: f64) -> f64 {
    if z.abs() >= 1.0 {
        return 0.0;
    }
    let p = std::f64::consts::PI * z;
    0.42 + 0.5 * p.cos() + 0.08 * (2.0 * p).cos()
}
