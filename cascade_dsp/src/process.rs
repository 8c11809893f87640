//! The per-tick process loop.
//!
//! One call moves one batch of frames through the four-stage chain with
//! ping-pong scratch selection and passthrough skipping. Nothing here
//! allocates, blocks, or logs above trace level; every failure mode inside
//! a tick degrades to silence (missing input) or dropped samples (missing
//! output buffer), never to an error.

use tracing::trace;

use crate::format::MAX_PORTS;
use crate::io::{IoStatus, ProcessStatus, RateMatch, RateMatchFlags};
use crate::kernels::{MixFlags, Resampler, plane_f32, plane_f32_mut};
use crate::node::{AudioConverter, DirState};
use crate::port::{Chunk, Port};
use crate::volume::Props;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cur {
    /// The source lanes gathered from the input ports.
    Ext,
    /// Ping-pong scratch ring A.
    A,
    /// Ping-pong scratch ring B.
    B,
}

impl AudioConverter {
    /// Run one tick of the pipeline.
    ///
    /// Preconditions (host contract): the node is started, both sides have
    /// formats, and every fed port has its IO area attached. A non-started
    /// node returns an empty status.
    pub fn process(&mut self) -> ProcessStatus {
        if !self.started {
            return ProcessStatus::empty();
        }

        let quantum_limit = self.quantum_limit;
        let [din, dout] = &mut self.dirs;
        let DirState {
            ports: in_ports,
            src_remap: in_src_remap,
            conv: in_conv,
            ..
        } = din;
        let DirState {
            ports: out_ports,
            dst_remap: out_dst_remap,
            conv: out_conv,
            ..
        } = dout;

        // Select input buffers and flip their IO slots to NEED_DATA.
        let mut in_sel = [None::<u32>; MAX_PORTS];
        for (i, port) in in_ports.iter_mut().enumerate() {
            in_sel[i] = get_in_buffer(port);
        }

        // Gather source lanes in canonical order; absent ports read the
        // shared zero region.
        let in_ports = &*in_ports;
        let empty = self.empty.as_slice();
        let mut src_lanes: [&[u8]; MAX_PORTS] = [empty; MAX_PORTS];
        let mut n_samples = u32::MAX;
        {
            let mut n_src = 0usize;
            for (i, port) in in_ports.iter().enumerate() {
                for j in 0..port.blocks as usize {
                    let lane = in_src_remap[n_src] as usize;
                    n_src += 1;
                    let Some(id) = in_sel[i] else {
                        continue;
                    };
                    let block = &port.buffers[id as usize].buf.datas[j];
                    let offset = (block.chunk.offset as usize).min(block.data().len());
                    src_lanes[lane] = &block.data()[offset..];
                    if port.stride > 0 {
                        n_samples = n_samples.min(block.chunk.size / port.stride);
                    }
                    trace!(size = block.chunk.size, block = j, lane, "input lane");
                }
            }
        }

        let resample_passthrough = resample_is_passthrough(
            self.resample.as_ref(),
            self.rate_scale,
            &self.props,
            self.io_rate_match.as_ref(),
        );

        if n_samples == u32::MAX {
            // Nothing arrived: refresh the rate-match hint and back off.
            let out_size = self
                .io_position
                .map(|p| p.clock.duration)
                .unwrap_or(quantum_limit);
            if let Some(resample) = self.resample.as_mut() {
                update_rate_match(
                    resample,
                    self.io_rate_match.as_mut(),
                    resample_passthrough,
                    out_size,
                    0,
                    self.rate_scale,
                    self.props.rate,
                );
            }
            return ProcessStatus::NEED_DATA;
        }
        let n_samples = n_samples.min(quantum_limit);
        let n = n_samples as usize;

        // Acquire output buffers; starved lanes write into throw-away
        // scratch, monitor ports are fed directly from the source lanes.
        let mut dst_lane_data: [&mut [u8]; MAX_PORTS] =
            core::array::from_fn(|_| Default::default());
        let mut dst_chunks: [Option<&mut Chunk>; MAX_PORTS] = core::array::from_fn(|_| None);
        let mut dst_strides = [0u32; MAX_PORTS];
        let mut n_dst = 0usize;
        let mut scratch_iter = self.scratch.iter_mut();

        let props = &self.props;
        let monitor_channel_volumes = self.monitor_channel_volumes;

        for port in out_ports.iter_mut() {
            if port.is_monitor {
                let Some(id) = get_out_buffer(port) else {
                    continue;
                };
                let channel = port.id.saturating_sub(1) as usize;
                let lane = in_src_remap.get(channel).copied().unwrap_or(0) as usize;
                let src = src_lanes[lane];
                let volume = if props.monitor.mute {
                    0.0
                } else if monitor_channel_volumes {
                    props.monitor.volumes.get(channel).copied().unwrap_or(1.0)
                } else {
                    1.0
                };
                let stride = port.stride.max(4);
                let block = &mut port.buffers[id as usize].buf.datas[0];
                let (chunk, data) = block.parts_mut();
                let frames = n.min(data.len() / 4).min(src.len() / 4);
                let out = plane_f32_mut(data, frames);
                let inp = plane_f32(src, frames);
                for (o, &x) in out.iter_mut().zip(inp) {
                    *o = x * volume;
                }
                chunk.offset = 0;
                chunk.size = frames as u32 * stride;
                continue;
            }

            let stride = port.stride;
            match get_out_buffer(port) {
                Some(id) => {
                    let buffer = &mut port.buffers[id as usize].buf;
                    for block in buffer.datas.iter_mut() {
                        let lane = out_dst_remap[n_dst] as usize;
                        n_dst += 1;
                        let (chunk, data) = block.parts_mut();
                        chunk.offset = 0;
                        chunk.size = 0;
                        dst_strides[lane] = stride;
                        dst_chunks[lane] = Some(chunk);
                        dst_lane_data[lane] = data;
                        trace!(lane, "output lane");
                    }
                }
                None => {
                    for _ in 0..port.blocks {
                        let lane = out_dst_remap[n_dst] as usize;
                        n_dst += 1;
                        dst_strides[lane] = stride;
                        dst_chunks[lane] = None;
                        dst_lane_data[lane] = scratch_iter
                            .next()
                            .map(|b| b.as_mut_slice())
                            .unwrap_or_default();
                        trace!(lane, "output lane starved");
                    }
                }
            }
        }

        let [tmp_a, tmp_b] = &mut self.tmp;
        let mut it_a = tmp_a.iter_mut();
        let mut tmp_a_lanes: [&mut [u8]; MAX_PORTS] =
            core::array::from_fn(|_| it_a.next().map(|b| b.as_mut_slice()).unwrap_or_default());
        let mut it_b = tmp_b.iter_mut();
        let mut tmp_b_lanes: [&mut [u8]; MAX_PORTS] =
            core::array::from_fn(|_| it_b.next().map(|b| b.as_mut_slice()).unwrap_or_default());

        let in_passthrough = in_conv.as_ref().is_none_or(|c| c.is_passthrough());
        let out_passthrough = out_conv.as_ref().is_none_or(|c| c.is_passthrough());
        let mix_passthrough = props.mix_disabled
            || self
                .mix
                .as_ref()
                .is_none_or(|m| m.flags().contains(MixFlags::IDENTITY));
        let end_passthrough = mix_passthrough && resample_passthrough && out_passthrough;

        let mut cur = Cur::Ext;
        let mut ping = 0usize;

        // Stage 1: input format convert.
        if !in_passthrough || end_passthrough {
            if let Some(conv) = in_conv.as_mut() {
                if end_passthrough {
                    conv.process(&mut dst_lane_data, &src_lanes, n);
                } else if ping & 1 == 0 {
                    conv.process(&mut tmp_a_lanes, &src_lanes, n);
                    cur = Cur::A;
                    ping += 1;
                } else {
                    conv.process(&mut tmp_b_lanes, &src_lanes, n);
                    cur = Cur::B;
                    ping += 1;
                }
            }
        }

        // Stage 2: channel mix and volume.
        if !mix_passthrough {
            if let Some(mix) = self.mix.as_mut() {
                let to_dst = resample_passthrough && out_passthrough;
                match (cur, to_dst) {
                    (Cur::Ext, true) => mix.process(&mut dst_lane_data, &src_lanes, n),
                    (Cur::Ext, false) => {
                        if ping & 1 == 0 {
                            mix.process(&mut tmp_a_lanes, &src_lanes, n);
                            cur = Cur::A;
                        } else {
                            mix.process(&mut tmp_b_lanes, &src_lanes, n);
                            cur = Cur::B;
                        }
                        ping += 1;
                    }
                    (Cur::A, true) => {
                        let v = views(&tmp_a_lanes);
                        mix.process(&mut dst_lane_data, &v, n);
                    }
                    (Cur::A, false) => {
                        let v = views(&tmp_a_lanes);
                        mix.process(&mut tmp_b_lanes, &v, n);
                        cur = Cur::B;
                        ping += 1;
                    }
                    (Cur::B, true) => {
                        let v = views(&tmp_b_lanes);
                        mix.process(&mut dst_lane_data, &v, n);
                    }
                    (Cur::B, false) => {
                        let v = views(&tmp_b_lanes);
                        mix.process(&mut tmp_a_lanes, &v, n);
                        cur = Cur::A;
                        ping += 1;
                    }
                }
            }
        }

        // Stage 3: resample.
        let mut out_len = n_samples;
        if !resample_passthrough {
            if let Some(resample) = self.resample.as_mut() {
                let mut in_len = n_samples;
                let mut capacity = quantum_limit;
                match (cur, out_passthrough) {
                    (Cur::Ext, true) => resample.process(
                        &src_lanes,
                        &mut in_len,
                        &mut dst_lane_data,
                        &mut capacity,
                    ),
                    (Cur::Ext, false) => {
                        if ping & 1 == 0 {
                            resample.process(&src_lanes, &mut in_len, &mut tmp_a_lanes, &mut capacity);
                            cur = Cur::A;
                        } else {
                            resample.process(&src_lanes, &mut in_len, &mut tmp_b_lanes, &mut capacity);
                            cur = Cur::B;
                        }
                        ping += 1;
                    }
                    (Cur::A, true) => {
                        let v = views(&tmp_a_lanes);
                        resample.process(&v, &mut in_len, &mut dst_lane_data, &mut capacity);
                    }
                    (Cur::A, false) => {
                        let v = views(&tmp_a_lanes);
                        resample.process(&v, &mut in_len, &mut tmp_b_lanes, &mut capacity);
                        cur = Cur::B;
                        ping += 1;
                    }
                    (Cur::B, true) => {
                        let v = views(&tmp_b_lanes);
                        resample.process(&v, &mut in_len, &mut dst_lane_data, &mut capacity);
                    }
                    (Cur::B, false) => {
                        let v = views(&tmp_b_lanes);
                        resample.process(&v, &mut in_len, &mut tmp_a_lanes, &mut capacity);
                        cur = Cur::A;
                        ping += 1;
                    }
                }
                out_len = capacity;
            }
        }
        let _ = ping;

        if let Some(resample) = self.resample.as_mut() {
            update_rate_match(
                resample,
                self.io_rate_match.as_mut(),
                resample_passthrough,
                n_samples,
                0,
                self.rate_scale,
                self.props.rate,
            );
        }

        // Stage 4: output format convert.
        if !out_passthrough {
            if let Some(conv) = out_conv.as_mut() {
                match cur {
                    Cur::Ext => conv.process(&mut dst_lane_data, &src_lanes, out_len as usize),
                    Cur::A => {
                        let v = views(&tmp_a_lanes);
                        conv.process(&mut dst_lane_data, &v, out_len as usize);
                    }
                    Cur::B => {
                        let v = views(&tmp_b_lanes);
                        conv.process(&mut dst_lane_data, &v, out_len as usize);
                    }
                }
            }
        }

        // Publish chunk sizes on every lane that has a real buffer.
        for lane in 0..n_dst {
            if let Some(chunk) = &mut dst_chunks[lane] {
                chunk.offset = 0;
                chunk.size = out_len * dst_strides[lane];
                trace!(lane, size = chunk.size, "publish");
            }
        }

        ProcessStatus::NEED_DATA | ProcessStatus::HAVE_DATA
    }
}

/// Immutable views of a mutable lane set, for feeding the next stage.
fn views<'a>(lanes: &'a [&mut [u8]; MAX_PORTS]) -> [&'a [u8]; MAX_PORTS] {
    core::array::from_fn(|i| &*lanes[i])
}

/// Take the filled buffer of an input port, flipping its slot to
/// NEED_DATA. Returns `None` (silence) when the slot is missing, not ready,
/// or references an unknown buffer.
fn get_in_buffer(port: &mut Port) -> Option<u32> {
    let io = port.io.as_mut()?;
    if io.status != IoStatus::HaveData || io.buffer_id as usize >= port.buffers.len() {
        trace!(port = port.id, "empty input port");
        return None;
    }
    let id = io.buffer_id;
    io.status = IoStatus::NeedData;
    Some(id)
}

/// Pick a buffer for an output port: recycle the slot's previous buffer and
/// pop the ready FIFO. Returns `None` when the port is already satisfied or
/// starved; those lanes go to scratch.
fn get_out_buffer(port: &mut Port) -> Option<u32> {
    let io = port.io.as_ref()?;
    if io.status == IoStatus::HaveData {
        return None;
    }
    let prev = io.buffer_id;
    if (prev as usize) < port.buffers.len() {
        port.queue_buffer(prev);
    }
    let id = port.dequeue_buffer()?;
    if let Some(io) = port.io.as_mut() {
        io.status = IoStatus::HaveData;
        io.buffer_id = id;
    }
    Some(id)
}

fn resample_is_passthrough(
    resample: Option<&Resampler>,
    rate_scale: f64,
    props: &Props,
    rate_match: Option<&RateMatch>,
) -> bool {
    if props.resample_disabled {
        return true;
    }
    let Some(resample) = resample else {
        return true;
    };
    resample.i_rate() == resample.o_rate()
        && rate_scale == 1.0
        && props.rate == 1.0
        && rate_match.is_none_or(|rm| !rm.flags.contains(RateMatchFlags::ACTIVE))
}

/// Recompute the rate-match hint: fold the host correction into the
/// resampler, report its delay, and publish the input frames required for
/// the next `out_size` outputs (minus what is already queued).
fn update_rate_match(
    resample: &mut Resampler,
    rate_match: Option<&mut RateMatch>,
    passthrough: bool,
    out_size: u32,
    in_queued: u32,
    rate_scale: f64,
    props_rate: f64,
) {
    let rate = rate_scale / props_rate;
    match rate_match {
        Some(rm) => {
            let match_size = if passthrough {
                rm.delay = 0;
                out_size
            } else {
                if rm.flags.contains(RateMatchFlags::ACTIVE) {
                    resample.update_rate(rate * rm.rate);
                } else {
                    resample.update_rate(rate);
                }
                rm.delay = resample.delay();
                resample.in_len(out_size)
            };
            rm.size = match_size - in_queued.min(match_size);
            trace!(size = rm.size, "next rate match");
        }
        None => resample.update_rate(rate),
    }
}
