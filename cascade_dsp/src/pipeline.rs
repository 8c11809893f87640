//! Pipeline assembly.
//!
//! `Start` materialises the four-stage chain: the two convert kernels with
//! their channel-remap tables, the channel mixer with its masks and the
//! active volume track, and the resampler. Remap tables translate between
//! each side's announced channel order and the canonical (numerically
//! sorted, unknown-last) lane order the DSP-domain stages run in.

use tracing::{debug, info};

use crate::channel::{ChannelPosition, channel_mask, sort_positions};
use crate::error::{Error, Result};
use crate::format::{MAX_PORTS, SampleFormat};
use crate::kernels::{
    ChannelMixer, ConvertConfig, Converter, MixConfig, ResampleConfig, Resampler,
};
use crate::node::AudioConverter;

/// Marks a destination slot as consumed during remap construction. Larger
/// than any real channel identifier.
const CONSUMED: ChannelPosition = ChannelPosition(u32::MAX);

/// Build the scatter/gather tables between `announced` channel order and
/// its sorted counterpart.
///
/// For every announced channel `i`, the first slot `j` of the sorted vector
/// holding the same position is claimed: `src_remap[i] = j`,
/// `dst_remap[j] = i`, and the slot is overwritten with a sentinel so
/// duplicate positions claim distinct slots.
fn build_remap(
    announced: &[ChannelPosition],
    sorted: &mut [ChannelPosition],
    src_remap: &mut [u32; MAX_PORTS],
    dst_remap: &mut [u32; MAX_PORTS],
) {
    for (i, pos) in announced.iter().enumerate() {
        for (j, slot) in sorted.iter_mut().enumerate() {
            if slot != pos {
                continue;
            }
            src_remap[i] = j as u32;
            dst_remap[j] = i as u32;
            debug!(channel = i, lane = j, position = %pos, "remap");
            *slot = CONSUMED;
            break;
        }
    }
}

impl AudioConverter {
    /// Assemble the whole pipeline; fails without touching `started` when
    /// either side has no format or a kernel rejects its configuration.
    pub(crate) fn setup_convert(&mut self) -> Result<()> {
        if self.dirs[0].format.is_none() || self.dirs[1].format.is_none() {
            return Err(Error::NoFormat);
        }
        self.setup_in_convert()?;
        self.setup_channelmix()?;
        self.setup_resample()?;
        self.setup_out_convert()?;
        Ok(())
    }

    fn setup_in_convert(&mut self) -> Result<()> {
        let src_info = self.dirs[0].format.clone().ok_or(Error::NoFormat)?;
        let mut sorted = src_info.positions.clone();
        sort_positions(&mut sorted);

        info!(
            src = ?src_info.format,
            channels = src_info.channels,
            rate = src_info.rate,
            "in convert"
        );

        let dir = &mut self.dirs[0];
        build_remap(
            &src_info.positions,
            &mut sorted,
            &mut dir.src_remap,
            &mut dir.dst_remap,
        );

        let conv = Converter::new(ConvertConfig {
            src_fmt: src_info.format,
            dst_fmt: SampleFormat::DspF32,
            channels: src_info.channels,
            cpu_flags: self.cpu_flags,
        })?;
        debug!(passthrough = conv.is_passthrough(), "in converter ready");
        dir.conv = Some(conv);
        Ok(())
    }

    fn setup_channelmix(&mut self) -> Result<()> {
        let mixer = self.build_channelmix()?;
        debug!(flags = ?mixer.flags(), "channelmix ready");
        self.mix = Some(mixer);
        self.set_volume();
        Ok(())
    }

    /// Build a mixer from the current formats and options.
    pub(crate) fn build_channelmix(&self) -> Result<ChannelMixer> {
        let input = self.dirs[0].format.as_ref().ok_or(Error::NoFormat)?;
        let output = self.dirs[1].format.as_ref().ok_or(Error::NoFormat)?;

        let src_mask = channel_mask(&input.positions);
        let dst_mask = channel_mask(&output.positions);

        info!(
            src_chan = input.channels,
            dst_chan = output.channels,
            rate = input.rate,
            "channelmix {src_mask:08x}:{dst_mask:08x}"
        );

        ChannelMixer::new(MixConfig {
            src_chan: input.channels,
            src_mask,
            dst_chan: output.channels,
            dst_mask,
            freq: input.rate,
            options: self.mix_options,
            lfe_cutoff: self.lfe_cutoff,
            cpu_flags: self.cpu_flags,
        })
    }

    /// Rebuild the mixer in place after an option change.
    pub(crate) fn refresh_channelmix(&mut self) {
        if self.mix.is_none() {
            return;
        }
        match self.build_channelmix() {
            Ok(mixer) => {
                self.mix = Some(mixer);
                self.set_volume();
            }
            Err(err) => debug!(%err, "channelmix refresh failed"),
        }
    }

    fn setup_resample(&mut self) -> Result<()> {
        let input = self.dirs[0].format.as_ref().ok_or(Error::NoFormat)?;
        let output = self.dirs[1].format.as_ref().ok_or(Error::NoFormat)?;

        info!(
            channels = output.channels,
            i_rate = input.rate,
            o_rate = output.rate,
            peaks = self.peaks,
            "resample"
        );

        let config = ResampleConfig {
            channels: output.channels,
            i_rate: input.rate,
            o_rate: output.rate,
            quality: self.props.resample_quality,
            cpu_flags: self.cpu_flags,
        };
        self.resample = Some(if self.peaks {
            Resampler::new_peaks(config)?
        } else {
            Resampler::new(config)?
        });
        Ok(())
    }

    fn setup_out_convert(&mut self) -> Result<()> {
        let dst_info = self.dirs[1].format.clone().ok_or(Error::NoFormat)?;
        let mut sorted = dst_info.positions.clone();
        sort_positions(&mut sorted);

        info!(
            dst = ?dst_info.format,
            channels = dst_info.channels,
            rate = dst_info.rate,
            "out convert"
        );

        // The sorted vector is the announced order here: the DSP lanes are
        // the source side of the output converter.
        let dir = &mut self.dirs[1];
        let mut claimable = dst_info.positions.clone();
        build_remap(
            &sorted,
            &mut claimable,
            &mut dir.src_remap,
            &mut dir.dst_remap,
        );

        let conv = Converter::new(ConvertConfig {
            src_fmt: SampleFormat::DspF32,
            dst_fmt: dst_info.format,
            channels: dst_info.channels,
            cpu_flags: self.cpu_flags,
        })?;
        debug!(passthrough = conv.is_passthrough(), "out converter ready");
        dir.conv = Some(conv);
        Ok(())
    }
}
