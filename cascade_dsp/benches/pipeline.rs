//! Throughput of one process tick through the staged pipeline.

use criterion::{Criterion, criterion_group, criterion_main};

use cascade_dsp::prelude::*;

const FRAMES: usize = 1024;

fn build_node(out_rate: u32) -> AudioConverter {
    let mut node = AudioConverter::with_defaults();

    node.set_param(NodeParam::PortConfig(PortConfig::convert(Direction::Input)))
        .unwrap();
    node.port_set_param(
        Direction::Input,
        0,
        PortParam::Format(Some(AudioInfo::Raw(RawFormat::new(
            SampleFormat::S16Le,
            48000,
            2,
            vec![ChannelPosition::FL, ChannelPosition::FR],
        )))),
    )
    .unwrap();
    node.set_param(NodeParam::PortConfig(PortConfig::dsp(
        Direction::Output,
        RawFormat::new(
            SampleFormat::F32P,
            out_rate,
            2,
            vec![ChannelPosition::FL, ChannelPosition::FR],
        ),
    )))
    .unwrap();
    for port in 0..2 {
        node.port_set_param(
            Direction::Output,
            port,
            PortParam::Format(Some(AudioInfo::Dsp(DspFormat::default()))),
        )
        .unwrap();
    }

    node.port_use_buffers(Direction::Input, 0, vec![HostBuffer::new(1, FRAMES * 4)])
        .unwrap();
    node.port_set_io(Direction::Input, 0, PortIo::Buffers(Some(IoBuffers::default())))
        .unwrap();
    for port in 0..2 {
        node.port_use_buffers(Direction::Output, port, vec![HostBuffer::new(1, FRAMES * 8)])
            .unwrap();
        node.port_set_io(
            Direction::Output,
            port,
            PortIo::Buffers(Some(IoBuffers::default())),
        )
        .unwrap();
    }
    node.send_command(Command::Start).unwrap();
    node
}

fn tick(node: &mut AudioConverter) {
    {
        let chunk = node.buffer_chunk_mut(Direction::Input, 0, 0, 0).unwrap();
        chunk.offset = 0;
        chunk.size = (FRAMES * 4) as u32;
    }
    {
        let io = node.port_io_mut(Direction::Input, 0).unwrap();
        io.status = IoStatus::HaveData;
        io.buffer_id = 0;
    }
    for port in 0..2 {
        node.port_io_mut(Direction::Output, port).unwrap().status = IoStatus::NeedData;
    }
    node.process();
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("process");

    let mut node = build_node(48000);
    group.bench_function("s16_stereo_to_dsp", |b| b.iter(|| tick(&mut node)));

    let mut node = build_node(44100);
    group.bench_function("s16_stereo_to_dsp_resampled", |b| b.iter(|| tick(&mut node)));

    group.finish();
}

criterion_group!(benches, bench_pipeline);
criterion_main!(benches);
