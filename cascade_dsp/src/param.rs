//! The typed parameter surface.
//!
//! The node exposes its negotiable state through enumerable parameter
//! objects: port configuration, property descriptors and values, format
//! offers, and buffer requirements. Hosts read them with `enum_params` /
//! `port_enum_params` (paged by `start`/`num`) and write them with
//! `set_param` / `port_set_param`.

use crate::channel::ChannelPosition;
use crate::format::{AudioInfo, DspFormat, RawFormat, SampleFormat};

/// Which side of the node a port or configuration refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    /// The opposite side.
    #[inline]
    pub fn reverse(self) -> Self {
        match self {
            Direction::Input => Direction::Output,
            Direction::Output => Direction::Input,
        }
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        match self {
            Direction::Input => 0,
            Direction::Output => 1,
        }
    }
}

/// How one side of the node exposes its ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortConfigMode {
    /// One 32-bit float port per channel.
    Dsp,
    /// A single port carrying an arbitrary negotiated raw format.
    Convert,
}

/// Identifies a parameter of the node or of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamId {
    // Node level.
    EnumPortConfig,
    PortConfig,
    PropInfo,
    Props,
    // Port level.
    EnumFormat,
    Meta,
    Io,
    Format,
    Buffers,
    Latency,
}

/// Read/write access and change tracking for one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamInfo {
    pub id: ParamId,
    pub readable: bool,
    pub writable: bool,
    /// Bumped whenever the parameter's value changes.
    pub serial: u32,
}

impl ParamInfo {
    pub(crate) fn new(id: ParamId, readable: bool, writable: bool) -> Self {
        Self {
            id,
            readable,
            writable,
            serial: 0,
        }
    }
}

/// One side's port configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PortConfig {
    pub direction: Direction,
    pub mode: PortConfigMode,
    /// Mirror dsp input ports to per-channel monitor outputs.
    pub monitor: bool,
    /// Embedded format; required for dsp mode.
    pub format: Option<RawFormat>,
}

impl PortConfig {
    /// A dsp-mode configuration for `direction` with the given format.
    pub fn dsp(direction: Direction, format: RawFormat) -> Self {
        Self {
            direction,
            mode: PortConfigMode::Dsp,
            monitor: false,
            format: Some(format),
        }
    }

    /// A convert-mode configuration for `direction`.
    pub fn convert(direction: Direction) -> Self {
        Self {
            direction,
            mode: PortConfigMode::Convert,
            monitor: false,
            format: None,
        }
    }
}

/// A dynamically typed property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    Double(f64),
    String(String),
    FloatArray(Vec<f32>),
    IdArray(Vec<ChannelPosition>),
}

impl PropValue {
    /// Coerce to a boolean the way string-typed host properties do.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropValue::Bool(b) => Some(*b),
            PropValue::Int(i) => Some(*i != 0),
            PropValue::String(s) => match s.as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            PropValue::Float(v) => Some(*v),
            PropValue::Double(v) => Some(*v as f32),
            PropValue::Int(v) => Some(*v as f32),
            PropValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            PropValue::Int(v) => Some(*v),
            PropValue::Float(v) => Some(*v as i32),
            PropValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// The allowed range of a property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropRange {
    Float { min: f32, max: f32 },
    Int { min: i32, max: i32 },
    Double { min: f64, max: f64 },
}

/// Well-known property identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropKey {
    Volume,
    Mute,
    ChannelVolumes,
    ChannelMap,
    MonitorMute,
    MonitorVolumes,
    SoftMute,
    SoftVolumes,
    Rate,
    Quality,
}

/// One property descriptor, as enumerated through `PropInfo`.
#[derive(Debug, Clone, PartialEq)]
pub struct PropInfo {
    /// Well-known id, when the property has one.
    pub key: Option<PropKey>,
    pub name: &'static str,
    pub description: &'static str,
    /// The current value, doubling as the type prototype.
    pub value: PropValue,
    pub range: Option<PropRange>,
    /// Whether the property travels in the named-parameter block.
    pub is_param: bool,
}

/// An incoming `Props` update; unset fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct PropsUpdate {
    pub volume: Option<f32>,
    pub mute: Option<bool>,
    pub channel_volumes: Option<Vec<f32>>,
    pub channel_map: Option<Vec<ChannelPosition>>,
    pub soft_mute: Option<bool>,
    pub soft_volumes: Option<Vec<f32>>,
    pub monitor_mute: Option<bool>,
    pub monitor_volumes: Option<Vec<f32>>,
    pub rate: Option<f64>,
    /// Named parameters, dispatched by key (see the parameter table).
    pub params: Vec<(String, PropValue)>,
}

/// The aggregate `Props` readback object.
#[derive(Debug, Clone, PartialEq)]
pub struct PropsSnapshot {
    pub volume: f32,
    pub mute: bool,
    pub channel_volumes: Vec<f32>,
    pub channel_map: Vec<ChannelPosition>,
    pub soft_mute: bool,
    pub soft_volumes: Vec<f32>,
    pub monitor_mute: bool,
    pub monitor_volumes: Vec<f32>,
    /// The nested named-parameter block.
    pub params: Vec<(String, PropValue)>,
}

impl PropsSnapshot {
    /// Look up a named parameter in the nested block.
    pub fn param(&self, name: &str) -> Option<&PropValue> {
        self.params.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }
}

/// The format menu offered on an unfixed raw port.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatOffer {
    pub formats: &'static [SampleFormat],
    pub default_format: SampleFormat,
    pub rate_default: u32,
    pub rate_min: u32,
    pub rate_max: u32,
    pub channels_default: u32,
    pub channels_min: u32,
    pub channels_max: u32,
}

/// The full raw sample-format menu, default entry first.
pub static RAW_FORMAT_MENU: &[SampleFormat] = &[
    SampleFormat::F32P,
    SampleFormat::F32Le,
    SampleFormat::F32Be,
    SampleFormat::F64P,
    SampleFormat::F64Le,
    SampleFormat::F64Be,
    SampleFormat::S32P,
    SampleFormat::S32Le,
    SampleFormat::S32Be,
    SampleFormat::S24In32P,
    SampleFormat::S24In32Le,
    SampleFormat::S24In32Be,
    SampleFormat::S24P,
    SampleFormat::S24Le,
    SampleFormat::S24Be,
    SampleFormat::S16P,
    SampleFormat::S16Le,
    SampleFormat::S16Be,
    SampleFormat::S8P,
    SampleFormat::S8,
    SampleFormat::U8P,
    SampleFormat::U8,
    SampleFormat::Ulaw,
    SampleFormat::Alaw,
];

/// An `EnumFormat` / `Format` result.
#[derive(Debug, Clone, PartialEq)]
pub enum FormatParam {
    Dsp(DspFormat),
    Raw(RawFormat),
    Offer(FormatOffer),
}

/// Buffer requirements advertised on a formatted port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRequirements {
    pub min_buffers: u32,
    pub max_buffers: u32,
    pub blocks: u32,
    pub size_default: u32,
    pub size_min: u32,
    pub size_max: u32,
    pub stride: u32,
}

/// Metadata slots a buffer may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaKind {
    Header,
}

/// A metadata requirement advertised on a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaInfo {
    pub kind: MetaKind,
    pub size: u32,
}

/// The kinds of I/O control block a port accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoKind {
    Buffers,
    RateMatch,
}

/// An I/O slot advertised on a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoInfo {
    pub kind: IoKind,
    pub size: u32,
}

/// A latency descriptor for one side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyInfo {
    pub direction: Direction,
    pub min_quantum: f32,
    pub max_quantum: f32,
    pub min_rate: u32,
    pub max_rate: u32,
    pub min_ns: u64,
    pub max_ns: u64,
}

impl LatencyInfo {
    /// The zero latency descriptor for `direction`.
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            min_quantum: 0.0,
            max_quantum: 0.0,
            min_rate: 0,
            max_rate: 0,
            min_ns: 0,
            max_ns: 0,
        }
    }
}

/// A value produced by parameter enumeration.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    PortConfig(PortConfig),
    PropInfo(PropInfo),
    Props(PropsSnapshot),
    Format(FormatParam),
    Buffers(BufferRequirements),
    Meta(MetaInfo),
    Io(IoInfo),
    Latency(LatencyInfo),
}

/// A write to the node-level parameter surface.
#[derive(Debug, Clone)]
pub enum NodeParam {
    PortConfig(PortConfig),
    Props(PropsUpdate),
}

/// A write to a port-level parameter.
#[derive(Debug, Clone)]
pub enum PortParam {
    /// `None` clears the negotiated format.
    Format(Option<AudioInfo>),
    /// `None` resets the latency of the opposite side.
    Latency(Option<LatencyInfo>),
}
