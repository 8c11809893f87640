//! Commonly used types, re-exported for convenient glob import.

pub use crate::channel::ChannelPosition;
pub use crate::config::{FactoryMode, NodeConfig};
pub use crate::error::{Error, Result};
pub use crate::events::{NodeEvents, NodeFlags, NodeInfo, PortInfo};
pub use crate::format::{AudioInfo, DspFormat, RawFormat, SampleFormat};
pub use crate::io::{Clock, IoBuffers, IoStatus, Position, ProcessStatus, RateMatch, RateMatchFlags};
pub use crate::node::{AudioConverter, Command, PortIo};
pub use crate::param::{
    Direction, FormatParam, LatencyInfo, NodeParam, ParamId, ParamValue, PortConfig,
    PortConfigMode, PortParam, PropValue, PropsUpdate,
};
pub use crate::port::{DataFlags, HostBuffer};
