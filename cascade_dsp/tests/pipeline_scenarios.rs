//! End-to-end pipeline scenarios, driven the way a host graph schedules the
//! node: negotiate, attach buffers, feed a tick, inspect the output.

mod common;

use cascade_dsp::prelude::*;
use common::*;

const FL: ChannelPosition = ChannelPosition::FL;
const FR: ChannelPosition = ChannelPosition::FR;
const MONO: ChannelPosition = ChannelPosition::MONO;

#[test]
fn s16le_stereo_to_dsp_planes() {
    init_logging();
    let mut node = AudioConverter::with_defaults();

    configure_convert(
        &mut node,
        Direction::Input,
        RawFormat::new(SampleFormat::S16Le, 48000, 2, vec![FL, FR]),
    );
    configure_dsp(&mut node, Direction::Output, 48000, &[FL, FR]);

    attach_buffers(&mut node, Direction::Input, 0, 1, 1, 4096);
    for port in 0..2 {
        attach_buffers(&mut node, Direction::Output, port, 1, 1, 4096);
    }
    node.send_command(Command::Start).unwrap();

    // 4 frames, left and right carrying the same 16-bit word.
    let words: [i16; 4] = [0x0000, 0x4000, -32768, -16384];
    let mut bytes = Vec::new();
    for w in words {
        bytes.extend_from_slice(&w.to_le_bytes());
        bytes.extend_from_slice(&w.to_le_bytes());
    }
    feed_bytes(&mut node, 0, &bytes);

    let status = node.process();
    assert!(status.contains(ProcessStatus::HAVE_DATA));
    assert!(status.contains(ProcessStatus::NEED_DATA));

    let expect = [0.0f32, 0.5, -1.0, -0.5];
    assert_close(&read_output_f32(&node, 0, 0), &expect, 1e-6);
    assert_close(&read_output_f32(&node, 1, 0), &expect, 1e-6);

    // The input slot flipped back to "feed me".
    assert_eq!(
        node.port_io(Direction::Input, 0).unwrap().status,
        IoStatus::NeedData
    );
}

#[test]
fn channel_map_permutation_swaps_planes() {
    let mut node = AudioConverter::with_defaults();

    configure_dsp(&mut node, Direction::Input, 48000, &[FL, FR]);
    configure_dsp(&mut node, Direction::Output, 48000, &[FR, FL]);

    for port in 0..2 {
        attach_buffers(&mut node, Direction::Input, port, 1, 1, 4096);
        attach_buffers(&mut node, Direction::Output, port, 1, 1, 4096);
    }
    node.send_command(Command::Start).unwrap();

    feed_f32(&mut node, 0, &[1.0, 2.0, 3.0, 4.0]);
    feed_f32(&mut node, 1, &[5.0, 6.0, 7.0, 8.0]);
    node.process();

    // Output port 0 is FR, port 1 is FL: an exact swap, no gain change.
    assert_close(&read_output_f32(&node, 0, 0), &[5.0, 6.0, 7.0, 8.0], 0.0);
    assert_close(&read_output_f32(&node, 1, 0), &[1.0, 2.0, 3.0, 4.0], 0.0);
}

#[test]
fn resample_44100_to_48000_with_rate_match() {
    let mut node = AudioConverter::with_defaults();

    configure_dsp(&mut node, Direction::Input, 44100, &[MONO]);
    configure_dsp(&mut node, Direction::Output, 48000, &[MONO]);

    attach_buffers(&mut node, Direction::Input, 0, 1, 1, 8192);
    attach_buffers(&mut node, Direction::Output, 0, 1, 1, 32768);
    node.port_set_io(
        Direction::Input,
        0,
        PortIo::RateMatch(Some(RateMatch::default())),
    )
    .unwrap();
    node.send_command(Command::Start).unwrap();

    let input: Vec<f32> = (0..1024).map(|i| (i as f32 * 0.01).sin()).collect();
    feed_f32(&mut node, 0, &input);
    node.process();

    let out = read_output_f32(&node, 0, 0);
    assert!(
        (1080..=1120).contains(&out.len()),
        "unexpected output length {}",
        out.len()
    );

    let rm = node.rate_match().unwrap();
    assert!(
        (930..=950).contains(&rm.size),
        "unexpected rate-match size {}",
        rm.size
    );
    assert!(rm.delay > 0);
}

#[test]
fn volume_ramp_scales_output() {
    let mut node = AudioConverter::with_defaults();

    configure_dsp(&mut node, Direction::Input, 48000, &[MONO]);
    configure_dsp(&mut node, Direction::Output, 48000, &[MONO]);

    node.set_param(NodeParam::Props(PropsUpdate {
        volume: Some(0.5),
        channel_volumes: Some(vec![1.0]),
        ..Default::default()
    }))
    .unwrap();
    assert!(!node.props().have_soft_volume);

    attach_buffers(&mut node, Direction::Input, 0, 1, 1, 4096);
    attach_buffers(&mut node, Direction::Output, 0, 1, 1, 4096);
    node.send_command(Command::Start).unwrap();

    feed_f32(&mut node, 0, &[1.0; 64]);
    node.process();

    assert_close(&read_output_f32(&node, 0, 0), &[0.5; 64], 1e-6);
}

#[test]
fn soft_volume_track_feeds_the_mix() {
    let mut node = AudioConverter::with_defaults();

    configure_dsp(&mut node, Direction::Input, 48000, &[FL, FR]);
    configure_dsp(&mut node, Direction::Output, 48000, &[FL, FR]);

    node.set_param(NodeParam::Props(PropsUpdate {
        soft_volumes: Some(vec![0.25, 0.25]),
        ..Default::default()
    }))
    .unwrap();
    assert!(node.props().have_soft_volume);

    for port in 0..2 {
        attach_buffers(&mut node, Direction::Input, port, 1, 1, 4096);
        attach_buffers(&mut node, Direction::Output, port, 1, 1, 4096);
    }
    node.send_command(Command::Start).unwrap();

    feed_f32(&mut node, 0, &[1.0; 16]);
    feed_f32(&mut node, 1, &[1.0; 16]);
    node.process();

    assert_close(&read_output_f32(&node, 0, 0), &[0.25; 16], 1e-6);
    assert_close(&read_output_f32(&node, 1, 0), &[0.25; 16], 1e-6);
}

#[test]
fn monitor_ports_mirror_inputs() {
    let mut node = AudioConverter::with_defaults();

    // Output side first: a single raw interleaved port. The input-side
    // monitor configuration then adds per-channel monitor ports after it.
    configure_convert(
        &mut node,
        Direction::Output,
        RawFormat::new(SampleFormat::F32Le, 48000, 2, vec![FL, FR]),
    );
    node.set_param(NodeParam::PortConfig(PortConfig {
        direction: Direction::Input,
        mode: PortConfigMode::Dsp,
        monitor: true,
        format: Some(dsp_raw(48000, &[FL, FR])),
    }))
    .unwrap();
    for port in 0..2 {
        node.port_set_param(
            Direction::Input,
            port,
            PortParam::Format(Some(AudioInfo::Dsp(DspFormat::default()))),
        )
        .unwrap();
    }

    assert_eq!(node.n_ports(Direction::Output), 3);
    assert!(!node.port_info(Direction::Output, 0).unwrap().is_monitor);
    assert!(node.port_info(Direction::Output, 1).unwrap().is_monitor);
    assert!(node.port_info(Direction::Output, 2).unwrap().is_monitor);

    for port in 1..3 {
        node.port_set_param(
            Direction::Output,
            port,
            PortParam::Format(Some(AudioInfo::Dsp(DspFormat::default()))),
        )
        .unwrap();
    }

    node.set_param(NodeParam::Props(PropsUpdate {
        monitor_volumes: Some(vec![0.5, 0.25]),
        params: vec![(
            "monitor.channel-volumes".to_string(),
            PropValue::Bool(true),
        )],
        ..Default::default()
    }))
    .unwrap();

    for port in 0..2 {
        attach_buffers(&mut node, Direction::Input, port, 1, 1, 4096);
    }
    for port in 0..3 {
        attach_buffers(&mut node, Direction::Output, port, 1, 1, 4096);
    }
    node.send_command(Command::Start).unwrap();

    feed_f32(&mut node, 0, &[1.0, 2.0, 3.0, 4.0]);
    feed_f32(&mut node, 1, &[5.0, 6.0, 7.0, 8.0]);
    node.process();

    // Monitors reproduce their input plane scaled by the monitor track.
    assert_close(&read_output_f32(&node, 1, 0), &[0.5, 1.0, 1.5, 2.0], 1e-6);
    assert_close(&read_output_f32(&node, 2, 0), &[1.25, 1.5, 1.75, 2.0], 1e-6);

    // The main port carries the interleaved converted signal, unscaled.
    assert_close(
        &read_output_f32(&node, 0, 0),
        &[1.0, 5.0, 2.0, 6.0, 3.0, 7.0, 4.0, 8.0],
        1e-6,
    );
}

#[test]
fn full_passthrough_copies_bytes_verbatim() {
    let mut node = AudioConverter::with_defaults();

    let format = RawFormat::new(SampleFormat::S16Le, 44100, 2, vec![FL, FR]);
    configure_convert(&mut node, Direction::Input, format.clone());
    configure_convert(&mut node, Direction::Output, format);

    attach_buffers(&mut node, Direction::Input, 0, 1, 1, 4096);
    attach_buffers(&mut node, Direction::Output, 0, 1, 1, 4096);
    node.send_command(Command::Start).unwrap();

    let bytes: Vec<u8> = (0..64u8).collect();
    feed_bytes(&mut node, 0, &bytes);
    node.process();

    assert_eq!(read_output_bytes(&node, 0, 0), bytes);
}

#[test]
fn empty_tick_returns_need_data_only() {
    let mut node = AudioConverter::with_defaults();

    configure_dsp(&mut node, Direction::Input, 48000, &[MONO]);
    configure_dsp(&mut node, Direction::Output, 48000, &[MONO]);
    attach_buffers(&mut node, Direction::Input, 0, 1, 1, 4096);
    attach_buffers(&mut node, Direction::Output, 0, 1, 1, 4096);
    node.send_command(Command::Start).unwrap();

    // Inputs never flagged HAVE_DATA.
    let status = node.process();
    assert_eq!(status, ProcessStatus::NEED_DATA);

    // No output was acquired or advertised.
    let io = node.port_io(Direction::Output, 0).unwrap();
    assert_ne!(io.status, IoStatus::HaveData);
    assert_eq!(node.buffer_chunk(Direction::Output, 0, 0, 0).unwrap().size, 0);
}

#[test]
fn starved_output_port_drops_samples_quietly() {
    let mut node = AudioConverter::with_defaults();

    configure_dsp(&mut node, Direction::Input, 48000, &[FL, FR]);
    configure_dsp(&mut node, Direction::Output, 48000, &[FL, FR]);

    for port in 0..2 {
        attach_buffers(&mut node, Direction::Input, port, 1, 1, 4096);
    }
    // Only port 0 gets buffers; port 1 has an IO area but an empty queue.
    attach_buffers(&mut node, Direction::Output, 0, 1, 1, 4096);
    node.port_set_io(
        Direction::Output,
        1,
        PortIo::Buffers(Some(IoBuffers::default())),
    )
    .unwrap();
    node.send_command(Command::Start).unwrap();

    feed_f32(&mut node, 0, &[1.0, 2.0, 3.0, 4.0]);
    feed_f32(&mut node, 1, &[5.0, 6.0, 7.0, 8.0]);
    let status = node.process();
    assert!(status.contains(ProcessStatus::HAVE_DATA));

    // The fed port produced correct data; the starved one advertised none.
    assert_close(&read_output_f32(&node, 0, 0), &[1.0, 2.0, 3.0, 4.0], 0.0);
    assert_ne!(
        node.port_io(Direction::Output, 1).unwrap().status,
        IoStatus::HaveData
    );
}

#[test]
fn active_rate_match_steers_the_resampler() {
    let mut node = AudioConverter::with_defaults();

    configure_dsp(&mut node, Direction::Input, 48000, &[MONO]);
    configure_dsp(&mut node, Direction::Output, 48000, &[MONO]);
    attach_buffers(&mut node, Direction::Input, 0, 1, 1, 8192);
    attach_buffers(&mut node, Direction::Output, 0, 1, 1, 32768);
    node.port_set_io(
        Direction::Input,
        0,
        PortIo::RateMatch(Some(RateMatch {
            rate: 2.0,
            flags: RateMatchFlags::ACTIVE,
            ..Default::default()
        })),
    )
    .unwrap();
    node.send_command(Command::Start).unwrap();

    // First tick still runs at the unadjusted rate; the correction is
    // folded in by the rate-match accounting at the end of the tick.
    feed_f32(&mut node, 0, &[0.0; 1024]);
    node.process();

    let io = node.port_io_mut(Direction::Output, 0).unwrap();
    io.status = IoStatus::NeedData;

    feed_f32(&mut node, 0, &[0.0; 1024]);
    node.process();

    let out = read_output_f32(&node, 0, 0);
    assert!(
        (480..=600).contains(&out.len()),
        "rate correction not applied: {} output frames",
        out.len()
    );
}

#[test]
fn resample_disable_bypasses_rate_conversion() {
    let mut node = AudioConverter::with_defaults();

    configure_dsp(&mut node, Direction::Input, 44100, &[MONO]);
    configure_dsp(&mut node, Direction::Output, 48000, &[MONO]);

    node.set_param(NodeParam::Props(PropsUpdate {
        params: vec![("resample.disable".to_string(), PropValue::Bool(true))],
        ..Default::default()
    }))
    .unwrap();

    attach_buffers(&mut node, Direction::Input, 0, 1, 1, 4096);
    attach_buffers(&mut node, Direction::Output, 0, 1, 1, 4096);
    node.send_command(Command::Start).unwrap();

    feed_f32(&mut node, 0, &[0.5; 256]);
    node.process();

    // Frames pass through count-for-count despite the rate mismatch.
    let out = read_output_f32(&node, 0, 0);
    assert_eq!(out.len(), 256);
}

#[test]
fn consecutive_ticks_cycle_output_buffers() {
    let mut node = AudioConverter::with_defaults();

    configure_dsp(&mut node, Direction::Input, 48000, &[MONO]);
    configure_dsp(&mut node, Direction::Output, 48000, &[MONO]);
    attach_buffers(&mut node, Direction::Input, 0, 1, 1, 4096);
    attach_buffers(&mut node, Direction::Output, 0, 2, 1, 4096);
    node.send_command(Command::Start).unwrap();

    feed_f32(&mut node, 0, &[1.0; 8]);
    node.process();
    let first = node.port_io(Direction::Output, 0).unwrap().buffer_id;

    // Host consumes the buffer and asks for more.
    node.port_io_mut(Direction::Output, 0).unwrap().status = IoStatus::NeedData;

    feed_f32(&mut node, 0, &[2.0; 8]);
    node.process();
    let second = node.port_io(Direction::Output, 0).unwrap().buffer_id;

    assert_ne!(first, second, "ready FIFO should rotate buffers");
    assert_close(&read_output_f32(&node, 0, 0), &[2.0; 8], 0.0);
}
