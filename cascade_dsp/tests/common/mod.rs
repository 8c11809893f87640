//! Shared helpers for driving an [`AudioConverter`] the way a host graph
//! does: configure sides, attach buffers and IO areas, feed frames, and
//! read converted output back.
#![allow(dead_code)]

use cascade_dsp::prelude::*;

/// Install a log subscriber honouring `RUST_LOG`, once per test binary.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn dsp_raw(rate: u32, positions: &[ChannelPosition]) -> RawFormat {
    RawFormat::new(
        SampleFormat::F32P,
        rate,
        positions.len() as u32,
        positions.to_vec(),
    )
}

/// Configure one side in dsp mode and set the DSP format on all its ports.
pub fn configure_dsp(
    node: &mut AudioConverter,
    direction: Direction,
    rate: u32,
    positions: &[ChannelPosition],
) {
    node.set_param(NodeParam::PortConfig(PortConfig::dsp(
        direction,
        dsp_raw(rate, positions),
    )))
    .unwrap();
    for i in 0..positions.len() as u32 {
        node.port_set_param(
            direction,
            i,
            PortParam::Format(Some(AudioInfo::Dsp(DspFormat::default()))),
        )
        .unwrap();
    }
}

/// Configure one side in convert mode and negotiate `format` on its port.
pub fn configure_convert(node: &mut AudioConverter, direction: Direction, format: RawFormat) {
    node.set_param(NodeParam::PortConfig(PortConfig::convert(direction)))
        .unwrap();
    node.port_set_param(direction, 0, PortParam::Format(Some(AudioInfo::Raw(format))))
        .unwrap();
}

/// Register `n_buffers` buffers of `blocks` x `size` bytes and attach an IO
/// area.
pub fn attach_buffers(
    node: &mut AudioConverter,
    direction: Direction,
    port: u32,
    n_buffers: usize,
    blocks: usize,
    size: usize,
) {
    let buffers = (0..n_buffers).map(|_| HostBuffer::new(blocks, size)).collect();
    node.port_use_buffers(direction, port, buffers).unwrap();
    node.port_set_io(direction, port, PortIo::Buffers(Some(IoBuffers::default())))
        .unwrap();
}

/// Write raw bytes into input buffer 0 of `port` and mark it ready.
pub fn feed_bytes(node: &mut AudioConverter, port: u32, bytes: &[u8]) {
    let data = node
        .buffer_data_mut(Direction::Input, port, 0, 0)
        .expect("input buffer");
    data[..bytes.len()].copy_from_slice(bytes);
    let chunk = node
        .buffer_chunk_mut(Direction::Input, port, 0, 0)
        .expect("input chunk");
    chunk.offset = 0;
    chunk.size = bytes.len() as u32;
    let io = node.port_io_mut(Direction::Input, port).expect("input io");
    io.status = IoStatus::HaveData;
    io.buffer_id = 0;
}

/// Write f32 frames into input buffer 0 of `port` and mark it ready.
pub fn feed_f32(node: &mut AudioConverter, port: u32, samples: &[f32]) {
    let bytes: Vec<u8> = samples.iter().flat_map(|v| v.to_ne_bytes()).collect();
    feed_bytes(node, port, &bytes);
}

/// Read the published region of an output block as f32 samples.
pub fn read_output_f32(node: &AudioConverter, port: u32, block: usize) -> Vec<f32> {
    let io = node.port_io(Direction::Output, port).expect("output io");
    assert_eq!(io.status, IoStatus::HaveData, "port {port} has no data");
    let chunk = node
        .buffer_chunk(Direction::Output, port, io.buffer_id, block)
        .expect("output chunk");
    let data = node
        .buffer_data(Direction::Output, port, io.buffer_id, block)
        .expect("output data");
    let start = chunk.offset as usize;
    (0..chunk.size as usize / 4)
        .map(|i| {
            let o = start + i * 4;
            f32::from_ne_bytes([data[o], data[o + 1], data[o + 2], data[o + 3]])
        })
        .collect()
}

/// Read the published region of an output block as raw bytes.
pub fn read_output_bytes(node: &AudioConverter, port: u32, block: usize) -> Vec<u8> {
    let io = node.port_io(Direction::Output, port).expect("output io");
    assert_eq!(io.status, IoStatus::HaveData, "port {port} has no data");
    let chunk = node
        .buffer_chunk(Direction::Output, port, io.buffer_id, block)
        .expect("output chunk");
    let data = node
        .buffer_data(Direction::Output, port, io.buffer_id, block)
        .expect("output data");
    data[chunk.offset as usize..(chunk.offset + chunk.size) as usize].to_vec()
}

pub fn assert_close(got: &[f32], want: &[f32], tolerance: f32) {
    assert_eq!(got.len(), want.len(), "length mismatch: {got:?} vs {want:?}");
    for (i, (g, w)) in got.iter().zip(want).enumerate() {
        assert!(
            (g - w).abs() <= tolerance,
            "sample {i}: {g} != {w} (tolerance {tolerance})"
        );
    }
}
