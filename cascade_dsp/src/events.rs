//! Node and port information events.
//!
//! The node pushes state changes to registered listeners: a node-level info
//! snapshot, and per-port snapshots where `None` retracts a previously
//! announced port.

use bitflags::bitflags;

use crate::param::{Direction, ParamInfo};

bitflags! {
    /// Node capability and state flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NodeFlags: u32 {
        /// The process entry point is realtime safe.
        const RT = 1 << 0;
        /// The input side accepts port configuration.
        const IN_PORT_CONFIG = 1 << 1;
        /// The output side accepts port configuration.
        const OUT_PORT_CONFIG = 1 << 2;
        /// The node needs a port configuration before it can be started.
        const NEED_CONFIGURE = 1 << 3;
    }
}

/// Node-level information snapshot.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub max_input_ports: u32,
    pub max_output_ports: u32,
    pub flags: NodeFlags,
    pub params: Vec<ParamInfo>,
}

/// Per-port information snapshot.
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub direction: Direction,
    pub id: u32,
    pub is_dsp: bool,
    pub is_monitor: bool,
    /// The channel position label (dsp ports).
    pub channel: String,
    pub params: Vec<ParamInfo>,
    /// Free-form port properties announced to the host.
    pub props: Vec<(String, String)>,
}

/// Listener interface for node events.
///
/// All callbacks run on the control thread.
pub trait NodeEvents: Send {
    /// Node-level info changed.
    fn info(&mut self, _info: &NodeInfo) {}

    /// Port info changed; `None` retracts the port.
    fn port_info(&mut self, _direction: Direction, _id: u32, _info: Option<&PortInfo>) {}
}
