//! The audio-conversion node.
//!
//! [`AudioConverter`] is a node in a realtime audio graph with a
//! configurable number of input and output ports. Each side operates either
//! in dsp mode (one float port per channel) or convert mode (a single port
//! carrying an arbitrary negotiated raw format). Once both sides have
//! formats, `Start` assembles the four-stage pipeline and every `process`
//! tick pushes a batch of frames through it.
//!
//! All methods except `process` belong to the control thread; the host
//! serialises them against the process thread, which the `&mut self`
//! receivers encode directly.

use cascade_core::{AlignedVec, Cpu, CpuFlags, MAX_ALIGN};
use tracing::{debug, info, warn};

use crate::config::{FactoryMode, NodeConfig};
use crate::error::{Error, Result};
use crate::events::{NodeEvents, NodeFlags, NodeInfo, PortInfo};
use crate::format::{AudioInfo, MAX_BUFFERS, MAX_PORTS, RawFormat, SampleFormat};
use crate::io::{IoBuffers, Position, RateMatch};
use crate::kernels::{ChannelMixer, Converter, MixOptions, Resampler};
use crate::param::{
    BufferRequirements, Direction, FormatOffer, FormatParam, IoInfo, IoKind, LatencyInfo,
    MetaInfo, MetaKind, ParamId, ParamInfo, ParamValue, PortConfig, PortConfigMode, PortParam,
    PropInfo, PropKey, PropRange, PropValue, PropsSnapshot, PropsUpdate, RAW_FORMAT_MENU,
    NodeParam,
};
use crate::port::{Chunk, DataFlags, HostBuffer, Port, RegisteredBuffer};
use crate::volume::Props;

/// Fallback rate hint for format offers when no position clock is set.
pub const DEFAULT_RATE: u32 = 48000;
/// Default channel-count hint for format offers.
pub const DEFAULT_CHANNELS: u32 = 2;

/// Graph lifecycle commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Command {
    /// Assemble the pipeline and start processing.
    Start,
    Pause,
    Suspend,
    Flush,
    /// Drain queued data; not handled by this node.
    Drain,
    /// A stream marker; not handled by this node.
    Marker,
}

/// I/O areas a port accepts through `port_set_io`.
#[derive(Debug, Clone, Copy)]
pub enum PortIo {
    Buffers(Option<IoBuffers>),
    RateMatch(Option<RateMatch>),
}

/// One side of the node.
#[derive(Debug)]
pub(crate) struct DirState {
    pub ports: Vec<Port>,
    pub mode: PortConfigMode,
    /// The side's authoritative format (dsp mode: fixed at configure time;
    /// convert mode: copied from the port on set-format).
    pub format: Option<RawFormat>,
    pub have_profile: bool,
    pub latency: LatencyInfo,
    /// Canonical-order scatter table: port block index to DSP lane.
    pub src_remap: [u32; MAX_PORTS],
    /// Canonical-order gather table: DSP lane to port block index.
    pub dst_remap: [u32; MAX_PORTS],
    pub conv: Option<Converter>,
}

impl DirState {
    fn new(direction: Direction) -> Self {
        Self {
            ports: Vec::new(),
            mode: PortConfigMode::Convert,
            format: None,
            have_profile: false,
            latency: LatencyInfo::new(direction),
            src_remap: [0; MAX_PORTS],
            dst_remap: [0; MAX_PORTS],
            conv: None,
        }
    }
}

/// The audio-conversion node.
pub struct AudioConverter {
    pub(crate) cpu_flags: CpuFlags,
    pub(crate) max_align: usize,
    pub(crate) quantum_limit: u32,
    /// The side the volume model follows when remapping.
    pub(crate) direction: Direction,

    pub(crate) props: Props,
    pub(crate) monitor: bool,
    pub(crate) monitor_channel_volumes: bool,
    pub(crate) peaks: bool,
    pub(crate) mix_options: MixOptions,
    pub(crate) lfe_cutoff: f32,

    pub(crate) io_position: Option<Position>,
    pub(crate) io_rate_match: Option<RateMatch>,

    info_flags: NodeFlags,
    params: Vec<ParamInfo>,
    listeners: Vec<Box<dyn NodeEvents>>,

    pub(crate) dirs: [DirState; 2],
    pub(crate) mix: Option<ChannelMixer>,
    pub(crate) resample: Option<Resampler>,
    pub(crate) rate_scale: f64,

    pub(crate) started: bool,
    is_passthrough: bool,

    pub(crate) empty_size: u32,
    pub(crate) empty: AlignedVec<u8>,
    pub(crate) scratch: Vec<AlignedVec<u8>>,
    pub(crate) tmp: [Vec<AlignedVec<u8>>; 2],
}

impl AudioConverter {
    /// Create a node from its startup configuration and the CPU capability.
    pub fn new(config: NodeConfig, cpu: &Cpu) -> Self {
        let mut node = Self {
            cpu_flags: cpu.flags(),
            max_align: cpu.max_align().min(MAX_ALIGN),
            quantum_limit: config.quantum_limit,
            direction: match config.mode {
                FactoryMode::Split => Direction::Input,
                FactoryMode::Merge => Direction::Output,
            },
            props: Props::default(),
            monitor: false,
            monitor_channel_volumes: false,
            peaks: config.peaks,
            mix_options: MixOptions::NORMALIZE,
            lfe_cutoff: 0.0,
            io_position: None,
            io_rate_match: None,
            info_flags: NodeFlags::RT
                | NodeFlags::IN_PORT_CONFIG
                | NodeFlags::OUT_PORT_CONFIG
                | NodeFlags::NEED_CONFIGURE,
            params: vec![
                ParamInfo::new(ParamId::EnumPortConfig, true, false),
                ParamInfo::new(ParamId::PortConfig, true, true),
                ParamInfo::new(ParamId::PropInfo, true, false),
                ParamInfo::new(ParamId::Props, true, true),
            ],
            listeners: Vec::new(),
            dirs: [
                DirState::new(Direction::Input),
                DirState::new(Direction::Output),
            ],
            mix: None,
            resample: None,
            rate_scale: 1.0,
            started: false,
            is_passthrough: true,
            empty_size: 0,
            empty: AlignedVec::zeroed(0),
            scratch: Vec::new(),
            tmp: [Vec::new(), Vec::new()],
        };
        for (key, value) in &config.params {
            if !node.apply_named_param(key, value) {
                debug!(%key, "ignoring unknown startup property");
            }
        }
        node
    }

    /// A node with default configuration and detected CPU features.
    pub fn with_defaults() -> Self {
        Self::new(NodeConfig::default(), &Cpu::detect())
    }

    /// Register an event listener and replay the current state to it.
    pub fn add_listener(&mut self, listener: Box<dyn NodeEvents>) {
        let node_info = self.node_info();
        let mut port_infos = Vec::new();
        for direction in [Direction::Input, Direction::Output] {
            for port in &self.dirs[direction.index()].ports {
                port_infos.push(self.port_info_snapshot(port));
            }
        }
        self.listeners.push(listener);
        let listener = self.listeners.last_mut().expect("just pushed");
        listener.info(&node_info);
        for info in &port_infos {
            listener.port_info(info.direction, info.id, Some(info));
        }
    }

    /// The node-level info snapshot.
    pub fn node_info(&self) -> NodeInfo {
        NodeInfo {
            max_input_ports: MAX_PORTS as u32,
            max_output_ports: MAX_PORTS as u32,
            flags: self.info_flags,
            params: self.params.clone(),
        }
    }

    /// Number of ports on `direction`.
    pub fn n_ports(&self, direction: Direction) -> u32 {
        self.dirs[direction.index()].ports.len() as u32
    }

    /// Info snapshot for one port.
    pub fn port_info(&self, direction: Direction, port_id: u32) -> Option<PortInfo> {
        self.dirs[direction.index()]
            .ports
            .get(port_id as usize)
            .map(|p| self.port_info_snapshot(p))
    }

    /// Whether `Start` succeeded and the pipeline is live.
    #[inline]
    pub fn started(&self) -> bool {
        self.started
    }

    /// Host hint: all output buffers allow in-place dynamic data.
    #[inline]
    pub fn is_passthrough(&self) -> bool {
        self.is_passthrough
    }

    /// The current property state.
    pub fn props(&self) -> &Props {
        &self.props
    }

    /// Set the position clock I/O area.
    pub fn set_io_position(&mut self, position: Option<Position>) {
        debug!(present = position.is_some(), "position io");
        self.io_position = position;
    }

    /// Access the position clock between ticks.
    pub fn position_mut(&mut self) -> Option<&mut Position> {
        self.io_position.as_mut()
    }

    /// Access the rate-match area between ticks.
    pub fn rate_match(&self) -> Option<&RateMatch> {
        self.io_rate_match.as_ref()
    }

    pub fn rate_match_mut(&mut self) -> Option<&mut RateMatch> {
        self.io_rate_match.as_mut()
    }

    /// Access one port's buffer-exchange slot between ticks.
    pub fn port_io_mut(&mut self, direction: Direction, port_id: u32) -> Option<&mut IoBuffers> {
        self.dirs[direction.index()]
            .ports
            .get_mut(port_id as usize)?
            .io
            .as_mut()
    }

    pub fn port_io(&self, direction: Direction, port_id: u32) -> Option<IoBuffers> {
        self.dirs[direction.index()]
            .ports
            .get(port_id as usize)?
            .io
    }

    /// Read one data block of a registered buffer.
    pub fn buffer_data(
        &self,
        direction: Direction,
        port_id: u32,
        buffer_id: u32,
        block: usize,
    ) -> Option<&[u8]> {
        Some(
            self.dirs[direction.index()]
                .ports
                .get(port_id as usize)?
                .buffers
                .get(buffer_id as usize)?
                .buf
                .datas
                .get(block)?
                .data(),
        )
    }

    /// Write one data block of a registered buffer.
    pub fn buffer_data_mut(
        &mut self,
        direction: Direction,
        port_id: u32,
        buffer_id: u32,
        block: usize,
    ) -> Option<&mut [u8]> {
        Some(
            self.dirs[direction.index()]
                .ports
                .get_mut(port_id as usize)?
                .buffers
                .get_mut(buffer_id as usize)?
                .buf
                .datas
                .get_mut(block)?
                .data_mut(),
        )
    }

    /// Read one block's chunk descriptor.
    pub fn buffer_chunk(
        &self,
        direction: Direction,
        port_id: u32,
        buffer_id: u32,
        block: usize,
    ) -> Option<Chunk> {
        Some(
            self.dirs[direction.index()]
                .ports
                .get(port_id as usize)?
                .buffers
                .get(buffer_id as usize)?
                .buf
                .datas
                .get(block)?
                .chunk,
        )
    }

    /// Write one block's chunk descriptor.
    pub fn buffer_chunk_mut(
        &mut self,
        direction: Direction,
        port_id: u32,
        buffer_id: u32,
        block: usize,
    ) -> Option<&mut Chunk> {
        Some(
            &mut self.dirs[direction.index()]
                .ports
                .get_mut(port_id as usize)?
                .buffers
                .get_mut(buffer_id as usize)?
                .buf
                .datas
                .get_mut(block)?
                .chunk,
        )
    }

    /// Enumerate node-level parameters, paged by `start`/`num`.
    pub fn enum_params(&self, id: ParamId, start: u32, num: u32) -> Result<Vec<ParamValue>> {
        if num == 0 {
            return Err(Error::InvalidArgument("num must be non-zero"));
        }
        match id {
            ParamId::EnumPortConfig
            | ParamId::PortConfig
            | ParamId::PropInfo
            | ParamId::Props => {}
            _ => return Err(Error::NotSupported),
        }
        let mut out = Vec::new();
        for index in start..start.saturating_add(num) {
            match self.node_param_at(id, index) {
                Some(value) => out.push(value),
                None => break,
            }
        }
        Ok(out)
    }

    fn node_param_at(&self, id: ParamId, index: u32) -> Option<ParamValue> {
        match id {
            ParamId::EnumPortConfig => {
                let (direction, mode) = match index {
                    0 => (Direction::Input, PortConfigMode::Dsp),
                    1 => (Direction::Output, PortConfigMode::Dsp),
                    2 => (Direction::Input, PortConfigMode::Convert),
                    3 => (Direction::Output, PortConfigMode::Convert),
                    _ => return None,
                };
                Some(ParamValue::PortConfig(PortConfig {
                    direction,
                    mode,
                    monitor: false,
                    format: None,
                }))
            }
            ParamId::PortConfig => {
                let direction = match index {
                    0 => Direction::Input,
                    1 => Direction::Output,
                    _ => return None,
                };
                Some(ParamValue::PortConfig(PortConfig {
                    direction,
                    mode: self.dirs[direction.index()].mode,
                    monitor: self.monitor,
                    format: None,
                }))
            }
            ParamId::PropInfo => self.prop_info_at(index).map(ParamValue::PropInfo),
            ParamId::Props => (index == 0).then(|| ParamValue::Props(self.props_snapshot())),
            _ => None,
        }
    }

    fn prop_info_at(&self, index: u32) -> Option<PropInfo> {
        let p = &self.props;
        let volume_range = Some(PropRange::Float { min: 0.0, max: 10.0 });
        let entry = match index {
            0 => PropInfo {
                key: Some(PropKey::Volume),
                name: "volume",
                description: "Volume",
                value: PropValue::Float(p.volume),
                range: volume_range,
                is_param: false,
            },
            1 => PropInfo {
                key: Some(PropKey::Mute),
                name: "mute",
                description: "Mute",
                value: PropValue::Bool(p.channel.mute),
                range: None,
                is_param: false,
            },
            2 => PropInfo {
                key: Some(PropKey::ChannelVolumes),
                name: "channelVolumes",
                description: "Channel Volumes",
                value: PropValue::FloatArray(p.channel.volumes.clone()),
                range: volume_range,
                is_param: false,
            },
            3 => PropInfo {
                key: Some(PropKey::ChannelMap),
                name: "channelMap",
                description: "Channel Map",
                value: PropValue::IdArray(p.channel_map.clone()),
                range: None,
                is_param: false,
            },
            4 => PropInfo {
                key: Some(PropKey::MonitorMute),
                name: "monitorMute",
                description: "Monitor Mute",
                value: PropValue::Bool(p.monitor.mute),
                range: None,
                is_param: false,
            },
            5 => PropInfo {
                key: Some(PropKey::MonitorVolumes),
                name: "monitorVolumes",
                description: "Monitor Volumes",
                value: PropValue::FloatArray(p.monitor.volumes.clone()),
                range: volume_range,
                is_param: false,
            },
            6 => PropInfo {
                key: Some(PropKey::SoftMute),
                name: "softMute",
                description: "Soft Mute",
                value: PropValue::Bool(p.soft.mute),
                range: None,
                is_param: false,
            },
            7 => PropInfo {
                key: Some(PropKey::SoftVolumes),
                name: "softVolumes",
                description: "Soft Volumes",
                value: PropValue::FloatArray(p.soft.volumes.clone()),
                range: volume_range,
                is_param: false,
            },
            8 => PropInfo {
                key: None,
                name: "monitor.channel-volumes",
                description: "Monitor channel volume",
                value: PropValue::Bool(self.monitor_channel_volumes),
                range: None,
                is_param: true,
            },
            9 => PropInfo {
                key: None,
                name: "channelmix.normalize",
                description: "Normalize Volumes",
                value: PropValue::Bool(self.mix_options.contains(MixOptions::NORMALIZE)),
                range: None,
                is_param: true,
            },
            10 => PropInfo {
                key: None,
                name: "channelmix.mix-lfe",
                description: "Mix LFE into channels",
                value: PropValue::Bool(self.mix_options.contains(MixOptions::MIX_LFE)),
                range: None,
                is_param: true,
            },
            11 => PropInfo {
                key: None,
                name: "channelmix.upmix",
                description: "Enable upmixing",
                value: PropValue::Bool(self.mix_options.contains(MixOptions::UPMIX)),
                range: None,
                is_param: true,
            },
            12 => PropInfo {
                key: None,
                name: "channelmix.lfe-cutoff",
                description: "LFE cutoff frequency",
                value: PropValue::Float(self.lfe_cutoff),
                range: Some(PropRange::Float { min: 0.0, max: 1000.0 }),
                is_param: true,
            },
            13 => PropInfo {
                key: None,
                name: "channelmix.disable",
                description: "Disable Channel mixing",
                value: PropValue::Bool(p.mix_disabled),
                range: None,
                is_param: true,
            },
            14 => PropInfo {
                key: Some(PropKey::Rate),
                name: "rate",
                description: "Rate scaler",
                value: PropValue::Double(p.rate),
                range: Some(PropRange::Double { min: 0.0, max: 10.0 }),
                is_param: false,
            },
            15 => PropInfo {
                key: Some(PropKey::Quality),
                name: "resample.quality",
                description: "Resample Quality",
                value: PropValue::Int(p.resample_quality as i32),
                range: Some(PropRange::Int { min: 0, max: 14 }),
                is_param: true,
            },
            16 => PropInfo {
                key: None,
                name: "resample.disable",
                description: "Disable Resampling",
                value: PropValue::Bool(p.resample_disabled),
                range: None,
                is_param: true,
            },
            _ => return None,
        };
        Some(entry)
    }

    fn props_snapshot(&self) -> PropsSnapshot {
        let p = &self.props;
        PropsSnapshot {
            volume: p.volume,
            mute: p.channel.mute,
            channel_volumes: p.channel.volumes.clone(),
            channel_map: p.channel_map.clone(),
            soft_mute: p.soft.mute,
            soft_volumes: p.soft.volumes.clone(),
            monitor_mute: p.monitor.mute,
            monitor_volumes: p.monitor.volumes.clone(),
            params: vec![
                (
                    "monitor.channel-volumes".into(),
                    PropValue::Bool(self.monitor_channel_volumes),
                ),
                (
                    "channelmix.normalize".into(),
                    PropValue::Bool(self.mix_options.contains(MixOptions::NORMALIZE)),
                ),
                (
                    "channelmix.mix-lfe".into(),
                    PropValue::Bool(self.mix_options.contains(MixOptions::MIX_LFE)),
                ),
                (
                    "channelmix.upmix".into(),
                    PropValue::Bool(self.mix_options.contains(MixOptions::UPMIX)),
                ),
                (
                    "channelmix.lfe-cutoff".into(),
                    PropValue::Float(self.lfe_cutoff),
                ),
                ("channelmix.disable".into(), PropValue::Bool(p.mix_disabled)),
                (
                    "resample.quality".into(),
                    PropValue::Int(p.resample_quality as i32),
                ),
                (
                    "resample.disable".into(),
                    PropValue::Bool(p.resample_disabled),
                ),
            ],
        }
    }

    /// Apply a node-level parameter.
    pub fn set_param(&mut self, param: NodeParam) -> Result<()> {
        match param {
            NodeParam::PortConfig(config) => {
                self.reconfigure_mode(
                    config.mode,
                    config.direction,
                    config.monitor,
                    config.format.as_ref(),
                )?;
                self.emit_node_info();
            }
            NodeParam::Props(update) => {
                if self.apply_props(&update) {
                    self.param_info_mut(ParamId::Props).serial += 1;
                    self.emit_node_info();
                }
            }
        }
        Ok(())
    }

    /// Handle a lifecycle command.
    pub fn send_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Start => {
                if self.started {
                    return Ok(());
                }
                self.setup_convert()?;
                self.started = true;
                Ok(())
            }
            Command::Pause | Command::Suspend | Command::Flush => {
                self.started = false;
                Ok(())
            }
            _ => Err(Error::NotSupported),
        }
    }

    /// Enumerate port-level parameters, paged by `start`/`num`.
    pub fn port_enum_params(
        &self,
        direction: Direction,
        port_id: u32,
        id: ParamId,
        start: u32,
        num: u32,
    ) -> Result<Vec<ParamValue>> {
        if num == 0 {
            return Err(Error::InvalidArgument("num must be non-zero"));
        }
        let port = self
            .dirs[direction.index()]
            .ports
            .get(port_id as usize)
            .ok_or(Error::InvalidArgument("port out of range"))?;

        debug!(?direction, port_id, ?id, "enum params");

        let mut out = Vec::new();
        for index in start..start.saturating_add(num) {
            let value = match id {
                ParamId::EnumFormat => self.port_format_offer(port, index)?,
                ParamId::Format => {
                    let Some(format) = &port.format else {
                        return Err(Error::NoFormat);
                    };
                    (index == 0).then(|| match format {
                        AudioInfo::Dsp(dsp) => ParamValue::Format(FormatParam::Dsp(*dsp)),
                        AudioInfo::Raw(raw) => {
                            ParamValue::Format(FormatParam::Raw(raw.clone()))
                        }
                    })
                }
                ParamId::Buffers => {
                    if !port.have_format() {
                        return Err(Error::NoFormat);
                    }
                    (index == 0).then(|| {
                        ParamValue::Buffers(BufferRequirements {
                            min_buffers: 1,
                            max_buffers: MAX_BUFFERS as u32,
                            blocks: port.blocks,
                            size_default: self.quantum_limit * port.stride,
                            size_min: 16 * port.stride,
                            size_max: i32::MAX as u32,
                            stride: port.stride,
                        })
                    })
                }
                ParamId::Meta => (index == 0).then(|| {
                    ParamValue::Meta(MetaInfo {
                        kind: MetaKind::Header,
                        size: 32,
                    })
                }),
                ParamId::Io => (index == 0).then(|| {
                    ParamValue::Io(IoInfo {
                        kind: IoKind::Buffers,
                        size: size_of::<IoBuffers>() as u32,
                    })
                }),
                ParamId::Latency => match index {
                    0 => Some(ParamValue::Latency(self.dirs[0].latency)),
                    1 => Some(ParamValue::Latency(self.dirs[1].latency)),
                    _ => None,
                },
                _ => return Err(Error::NotSupported),
            };
            match value {
                Some(value) => out.push(value),
                None => break,
            }
        }
        Ok(out)
    }

    fn port_format_offer(&self, port: &Port, index: u32) -> Result<Option<ParamValue>> {
        if index > 0 {
            return Ok(None);
        }
        let value = if port.is_dsp {
            ParamValue::Format(FormatParam::Dsp(Default::default()))
        } else if let Some(AudioInfo::Raw(raw)) = &port.format {
            ParamValue::Format(FormatParam::Raw(raw.clone()))
        } else {
            let rate = self
                .io_position
                .map(|p| p.clock.rate.denom)
                .unwrap_or(DEFAULT_RATE);
            ParamValue::Format(FormatParam::Offer(FormatOffer {
                formats: RAW_FORMAT_MENU,
                default_format: SampleFormat::F32P,
                rate_default: rate,
                rate_min: 1,
                rate_max: i32::MAX as u32,
                channels_default: DEFAULT_CHANNELS,
                channels_min: 1,
                channels_max: MAX_PORTS as u32,
            }))
        };
        Ok(Some(value))
    }

    /// Apply a port-level parameter.
    pub fn port_set_param(
        &mut self,
        direction: Direction,
        port_id: u32,
        param: PortParam,
    ) -> Result<()> {
        debug!(?direction, port_id, "set param");
        if self.dirs[direction.index()].ports.get(port_id as usize).is_none() {
            return Err(Error::InvalidArgument("port out of range"));
        }
        match param {
            PortParam::Format(format) => self.port_set_format(direction, port_id, format),
            PortParam::Latency(latency) => self.port_set_latency(direction, port_id, latency),
        }
    }

    fn port_set_format(
        &mut self,
        direction: Direction,
        port_id: u32,
        format: Option<AudioInfo>,
    ) -> Result<()> {
        let d = direction.index();
        let mut side_format = None;
        {
            let port = &mut self.dirs[d].ports[port_id as usize];
            match format {
                None => {
                    port.format = None;
                    port.clear_buffers();
                    let fmt = port.param_info_mut(ParamId::Format);
                    fmt.readable = false;
                    fmt.serial += 1;
                    let bufs = port.param_info_mut(ParamId::Buffers);
                    bufs.readable = false;
                    bufs.serial += 1;
                }
                Some(info) => {
                    match (&info, port.is_dsp) {
                        (AudioInfo::Dsp(dsp), true) => {
                            if dsp.format != SampleFormat::DspF32 {
                                return Err(Error::UnexpectedFormat(format!(
                                    "dsp port requires 32-bit float, got {:?}",
                                    dsp.format
                                )));
                            }
                            port.blocks = 1;
                            port.stride = 4;
                        }
                        (AudioInfo::Raw(raw), false) => {
                            if raw.channels == 0 || raw.channels as usize > MAX_PORTS {
                                return Err(Error::UnexpectedFormat(format!(
                                    "unsupported channel count {}",
                                    raw.channels
                                )));
                            }
                            if raw.rate == 0 {
                                return Err(Error::UnexpectedFormat("zero sample rate".into()));
                            }
                            if raw.format.is_dsp() {
                                return Err(Error::UnexpectedFormat(
                                    "raw port cannot carry the dsp format".into(),
                                ));
                            }
                            port.stride = raw.stride();
                            port.blocks = raw.blocks();
                            side_format = Some(raw.clone());
                        }
                        (AudioInfo::Raw(_), true) => {
                            return Err(Error::UnexpectedFormat(
                                "dsp port given a raw format".into(),
                            ));
                        }
                        (AudioInfo::Dsp(_), false) => {
                            return Err(Error::UnexpectedFormat(
                                "raw port given a dsp format".into(),
                            ));
                        }
                    }
                    debug!(port_id, stride = port.stride, blocks = port.blocks, "format set");
                    port.format = Some(info);
                    let fmt = port.param_info_mut(ParamId::Format);
                    fmt.readable = true;
                    fmt.serial += 1;
                    let bufs = port.param_info_mut(ParamId::Buffers);
                    bufs.readable = true;
                    bufs.serial += 1;
                }
            }
        }
        if let Some(raw) = side_format {
            self.dirs[d].format = Some(raw);
        }
        self.emit_port_info(direction, port_id);
        Ok(())
    }

    fn port_set_latency(
        &mut self,
        direction: Direction,
        port_id: u32,
        latency: Option<LatencyInfo>,
    ) -> Result<()> {
        let other = direction.reverse();
        if self.dirs[direction.index()].ports[port_id as usize].is_monitor {
            return Ok(());
        }
        let info = match latency {
            None => LatencyInfo::new(other),
            Some(info) => {
                if info.direction != other {
                    return Err(Error::InvalidArgument(
                        "latency must describe the opposite direction",
                    ));
                }
                info
            }
        };
        self.dirs[other.index()].latency = info;

        let other_ports = self.dirs[other.index()].ports.len() as u32;
        for i in 0..other_ports {
            self.dirs[other.index()].ports[i as usize]
                .param_info_mut(ParamId::Latency)
                .serial += 1;
            self.emit_port_info(other, i);
        }
        self.dirs[direction.index()].ports[port_id as usize]
            .param_info_mut(ParamId::Latency)
            .serial += 1;
        self.emit_port_info(direction, port_id);
        Ok(())
    }

    /// Register host buffers on a port.
    pub fn port_use_buffers(
        &mut self,
        direction: Direction,
        port_id: u32,
        buffers: Vec<HostBuffer>,
    ) -> Result<()> {
        let d = direction.index();
        let max_align = self.max_align;
        let (blocks, have_format) = {
            let port = self.dirs[d]
                .ports
                .get(port_id as usize)
                .ok_or(Error::InvalidArgument("port out of range"))?;
            (port.blocks, port.have_format())
        };
        if !have_format {
            return Err(Error::NoFormat);
        }
        if buffers.len() > MAX_BUFFERS {
            return Err(Error::InvalidArgument("too many buffers"));
        }

        debug!(?direction, port_id, n = buffers.len(), "use buffers");

        let mut maxsize = 0usize;
        let mut clear_passthrough = false;
        for (i, buffer) in buffers.iter().enumerate() {
            if buffer.datas.len() != blocks as usize {
                warn!(buffer = i, blocks = buffer.datas.len(), "invalid block count");
                return Err(Error::InvalidArgument(
                    "buffer block count does not match the port layout",
                ));
            }
            for (j, block) in buffer.datas.iter().enumerate() {
                if block.maxsize() == 0 {
                    return Err(Error::InvalidArgument("empty data block"));
                }
                if block.data().as_ptr() as usize % max_align != 0 {
                    warn!(buffer = i, block = j, "buffer memory not aligned");
                }
                if direction == Direction::Output && !block.flags.contains(DataFlags::DYNAMIC) {
                    clear_passthrough = true;
                }
                maxsize = maxsize.max(block.maxsize());
            }
        }

        {
            let port = &mut self.dirs[d].ports[port_id as usize];
            port.clear_buffers();
            port.buffers = buffers
                .into_iter()
                .map(|buf| RegisteredBuffer { buf, queued: false })
                .collect();
            if direction == Direction::Output {
                for i in 0..port.buffers.len() as u32 {
                    port.queue_buffer(i);
                }
            }
        }

        if clear_passthrough {
            self.is_passthrough = false;
        }
        if maxsize as u32 > self.empty_size {
            self.realloc_scratch(maxsize)?;
        }
        Ok(())
    }

    fn realloc_scratch(&mut self, maxsize: usize) -> Result<()> {
        let lane = (4 * maxsize).max(4 * self.quantum_limit as usize) + MAX_ALIGN;
        let scratch_lane = maxsize.max(4 * self.quantum_limit as usize) + MAX_ALIGN;

        let empty = AlignedVec::try_zeroed(maxsize + MAX_ALIGN).ok_or(Error::NoMemory)?;
        let mut scratch = Vec::with_capacity(MAX_PORTS);
        let mut tmp_a = Vec::with_capacity(MAX_PORTS);
        let mut tmp_b = Vec::with_capacity(MAX_PORTS);
        for _ in 0..MAX_PORTS {
            scratch.push(AlignedVec::try_zeroed(scratch_lane).ok_or(Error::NoMemory)?);
            tmp_a.push(AlignedVec::try_zeroed(lane).ok_or(Error::NoMemory)?);
            tmp_b.push(AlignedVec::try_zeroed(lane).ok_or(Error::NoMemory)?);
        }
        self.empty = empty;
        self.scratch = scratch;
        self.tmp = [tmp_a, tmp_b];
        self.empty_size = maxsize as u32;
        Ok(())
    }

    /// Attach or detach an I/O area on a port.
    pub fn port_set_io(&mut self, direction: Direction, port_id: u32, io: PortIo) -> Result<()> {
        debug!(?direction, port_id, "set io");
        let port = self.dirs[direction.index()]
            .ports
            .get_mut(port_id as usize)
            .ok_or(Error::InvalidArgument("port out of range"))?;
        match io {
            PortIo::Buffers(buffers) => port.io = buffers,
            PortIo::RateMatch(rate_match) => self.io_rate_match = rate_match,
        }
        Ok(())
    }

    /// Return an output buffer to the ready queue.
    pub fn port_reuse_buffer(&mut self, port_id: u32, buffer_id: u32) -> Result<()> {
        let port = self.dirs[Direction::Output.index()]
            .ports
            .get_mut(port_id as usize)
            .ok_or(Error::InvalidArgument("port out of range"))?;
        port.queue_buffer(buffer_id);
        Ok(())
    }

    // ---- internals ----

    pub(crate) fn param_info_mut(&mut self, id: ParamId) -> &mut ParamInfo {
        self.params
            .iter_mut()
            .find(|p| p.id == id)
            .expect("node param table covers all ids")
    }

    fn reconfigure_mode(
        &mut self,
        mode: PortConfigMode,
        direction: Direction,
        monitor: bool,
        format: Option<&RawFormat>,
    ) -> Result<()> {
        let d = direction.index();
        {
            let dir = &self.dirs[d];
            let same_format = match (format, &dir.format) {
                (None, _) => true,
                (Some(f), Some(current)) => {
                    let mut dsp = f.clone();
                    if mode == PortConfigMode::Dsp {
                        dsp.format = SampleFormat::DspF32;
                    }
                    *current == dsp
                }
                (Some(_), None) => false,
            };
            if dir.have_profile && self.monitor == monitor && dir.mode == mode && same_format {
                return Ok(());
            }
        }

        info!(
            ?direction,
            monitor,
            ?mode,
            ports = self.dirs[d].ports.len(),
            "port config"
        );

        // Retract every port the old profile announced.
        let old_ports = self.dirs[d].ports.len() as u32;
        let had_monitor = self.monitor;
        for i in 0..old_ports {
            self.emit_port_retract(direction, i);
            if had_monitor && direction == Direction::Input {
                self.emit_port_retract(Direction::Output, i + 1);
            }
        }
        if had_monitor && direction == Direction::Input {
            let out = &mut self.dirs[Direction::Output.index()];
            out.ports.truncate(1);
        }

        self.monitor = monitor;
        let mut announce = Vec::new();

        match mode {
            PortConfigMode::Dsp => {
                let Some(format) = format else {
                    return Err(Error::InvalidArgument("dsp mode requires a format"));
                };
                if format.channels == 0 || format.channels as usize > MAX_PORTS {
                    return Err(Error::InvalidArgument("unsupported channel count"));
                }
                let mut fmt =
                    RawFormat::new(format.format, format.rate, format.channels, format.positions.clone());
                fmt.format = SampleFormat::DspF32;

                let dir = &mut self.dirs[d];
                dir.have_profile = true;
                dir.mode = mode;
                dir.format = Some(fmt.clone());
                dir.ports.clear();
                for i in 0..fmt.channels {
                    let label = fmt.positions[i as usize].to_string();
                    dir.ports
                        .push(Port::new(direction, i, label, true, false));
                    announce.push((direction, i));
                }

                if monitor && direction == Direction::Input {
                    let out = &mut self.dirs[Direction::Output.index()];
                    out.ports.truncate(1);
                    if out.ports.is_empty() {
                        out.ports.push(Port::new(
                            Direction::Output,
                            0,
                            String::new(),
                            false,
                            false,
                        ));
                        announce.push((Direction::Output, 0));
                    }
                    for i in 0..fmt.channels {
                        let label = fmt.positions[i as usize].to_string();
                        out.ports
                            .push(Port::new(Direction::Output, i + 1, label, true, true));
                        announce.push((Direction::Output, i + 1));
                    }
                }
            }
            PortConfigMode::Convert => {
                let dir = &mut self.dirs[d];
                dir.have_profile = true;
                dir.mode = mode;
                dir.format = None;
                dir.ports.clear();
                dir.ports
                    .push(Port::new(direction, 0, String::new(), false, false));
                announce.push((direction, 0));
            }
        }

        self.info_flags.remove(NodeFlags::NEED_CONFIGURE);
        self.param_info_mut(ParamId::Props).serial += 1;
        self.param_info_mut(ParamId::PortConfig).serial += 1;

        for (dir, id) in announce {
            let port = &self.dirs[dir.index()].ports[id as usize];
            info!(?dir, id, position = %port.label, dsp = port.is_dsp, monitor = port.is_monitor, "add port");
            self.emit_port_info(dir, id);
        }
        Ok(())
    }

    fn apply_props(&mut self, update: &PropsUpdate) -> bool {
        let mut changed = 0;
        let mut have_channel_volume = false;
        let mut have_soft_volume = false;

        {
            let p = &mut self.props;
            if let Some(volume) = update.volume {
                p.volume = volume;
                changed += 1;
            }
            if let Some(mute) = update.mute {
                p.channel.mute = mute;
                have_channel_volume = true;
                changed += 1;
            }
            if let Some(volumes) = &update.channel_volumes {
                p.channel.volumes = clipped(volumes);
                have_channel_volume = true;
                changed += 1;
            }
            if let Some(map) = &update.channel_map {
                p.channel_map = map.iter().take(MAX_PORTS).copied().collect();
                changed += 1;
            }
            if let Some(mute) = update.soft_mute {
                p.soft.mute = mute;
                have_soft_volume = true;
                changed += 1;
            }
            if let Some(volumes) = &update.soft_volumes {
                p.soft.volumes = clipped(volumes);
                have_soft_volume = true;
                changed += 1;
            }
            if let Some(mute) = update.monitor_mute {
                p.monitor.mute = mute;
                changed += 1;
            }
            if let Some(volumes) = &update.monitor_volumes {
                p.monitor.volumes = clipped(volumes);
                changed += 1;
            }
            if let Some(rate) = update.rate {
                p.rate = rate;
                changed += 1;
            }
        }

        let mut params_changed = 0;
        for (key, value) in &update.params {
            info!(%key, ?value, "named parameter");
            if self.apply_named_param(key, value) {
                params_changed += 1;
            }
        }
        if params_changed > 0 {
            self.refresh_channelmix();
            changed += params_changed;
        }

        if changed > 0 {
            if have_soft_volume {
                self.props.have_soft_volume = true;
            } else if have_channel_volume {
                self.props.have_soft_volume = false;
            }
            self.set_volume();
            true
        } else {
            false
        }
    }

    /// Dispatch one named parameter; returns whether the key was recognised
    /// and applied.
    pub(crate) fn apply_named_param(&mut self, key: &str, value: &PropValue) -> bool {
        match key {
            "monitor.channel-volumes" => {
                let Some(v) = value.as_bool() else { return false };
                self.monitor_channel_volumes = v;
            }
            "channelmix.normalize" => {
                let Some(v) = value.as_bool() else { return false };
                self.mix_options.set(MixOptions::NORMALIZE, v);
            }
            "channelmix.mix-lfe" => {
                let Some(v) = value.as_bool() else { return false };
                self.mix_options.set(MixOptions::MIX_LFE, v);
            }
            "channelmix.upmix" => {
                let Some(v) = value.as_bool() else { return false };
                self.mix_options.set(MixOptions::UPMIX, v);
            }
            "channelmix.lfe-cutoff" => {
                let Some(v) = value.as_f32() else { return false };
                self.lfe_cutoff = v.clamp(0.0, 1000.0);
            }
            "channelmix.disable" => {
                let Some(v) = value.as_bool() else { return false };
                self.props.mix_disabled = v;
            }
            "resample.quality" => {
                let Some(v) = value.as_i32() else { return false };
                self.props.resample_quality = v.clamp(0, 14) as u32;
            }
            "resample.disable" => {
                let Some(v) = value.as_bool() else { return false };
                self.props.resample_disabled = v;
            }
            _ => return false,
        }
        true
    }

    /// Publish the active volume track into the mix kernel, remapping the
    /// property model against the followed side's format first.
    pub(crate) fn set_volume(&mut self) {
        if let Some(format) = self.dirs[self.direction.index()].format.clone() {
            self.props.remap_volumes(&format);
        }
        let Some(mix) = self.mix.as_mut() else {
            return;
        };
        let track = if self.props.have_soft_volume {
            &self.props.soft
        } else {
            &self.props.channel
        };
        mix.set_volume(self.props.volume, track.mute, &track.volumes);
    }

    pub(crate) fn emit_node_info(&mut self) {
        let info = self.node_info();
        for listener in &mut self.listeners {
            listener.info(&info);
        }
    }

    fn port_info_snapshot(&self, port: &Port) -> PortInfo {
        let mut props = Vec::new();
        if port.is_dsp {
            props.push(("format.dsp".to_string(), "32 bit float mono audio".to_string()));
            props.push(("audio.channel".to_string(), port.label.clone()));
            if port.is_monitor {
                props.push(("port.monitor".to_string(), "true".to_string()));
            }
        }
        PortInfo {
            direction: port.direction,
            id: port.id,
            is_dsp: port.is_dsp,
            is_monitor: port.is_monitor,
            channel: port.label.clone(),
            params: port.params.clone(),
            props,
        }
    }

    pub(crate) fn emit_port_info(&mut self, direction: Direction, port_id: u32) {
        let Some(port) = self.dirs[direction.index()].ports.get(port_id as usize) else {
            return;
        };
        let info = self.port_info_snapshot(port);
        for listener in &mut self.listeners {
            listener.port_info(direction, port_id, Some(&info));
        }
    }

    fn emit_port_retract(&mut self, direction: Direction, port_id: u32) {
        for listener in &mut self.listeners {
            listener.port_info(direction, port_id, None);
        }
    }
}

fn clipped(volumes: &[f32]) -> Vec<f32> {
    volumes.iter().take(MAX_PORTS).copied().collect()
}

impl std::fmt::Debug for AudioConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioConverter")
            .field("started", &self.started)
            .field("monitor", &self.monitor)
            .field("in_ports", &self.dirs[0].ports.len())
            .field("out_ports", &self.dirs[1].ports.len())
            .finish()
    }
}
