//! The per-port registry: formats, registered buffers, and the ready queue.

use std::collections::VecDeque;

use bitflags::bitflags;
use cascade_core::AlignedVec;

use crate::format::AudioInfo;
use crate::io::IoBuffers;
use crate::param::{Direction, ParamId, ParamInfo};

bitflags! {
    /// Properties of one data block of a host buffer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DataFlags: u32 {
        /// The block's memory may be rewritten each tick.
        const DYNAMIC = 1 << 0;
    }
}

/// The valid region of a data block, maintained by the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Chunk {
    pub offset: u32,
    pub size: u32,
}

/// One data block of a host buffer.
#[derive(Debug)]
pub struct DataBlock {
    data: AlignedVec<u8>,
    pub flags: DataFlags,
    pub chunk: Chunk,
}

impl DataBlock {
    /// Allocate a zeroed block of `maxsize` bytes.
    pub fn new(maxsize: usize) -> Self {
        Self {
            data: AlignedVec::zeroed(maxsize),
            flags: DataFlags::DYNAMIC,
            chunk: Chunk::default(),
        }
    }

    /// The block's capacity in bytes.
    #[inline]
    pub fn maxsize(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        self.data.as_slice()
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.data.as_mut_slice()
    }

    /// Split into the chunk descriptor and the data bytes.
    #[inline]
    pub fn parts_mut(&mut self) -> (&mut Chunk, &mut [u8]) {
        (&mut self.chunk, self.data.as_mut_slice())
    }
}

/// A buffer registered by the host on one port.
#[derive(Debug)]
pub struct HostBuffer {
    pub datas: Vec<DataBlock>,
}

impl HostBuffer {
    /// Allocate a buffer with `blocks` zeroed data blocks of `maxsize`
    /// bytes each.
    pub fn new(blocks: usize, maxsize: usize) -> Self {
        Self {
            datas: (0..blocks).map(|_| DataBlock::new(maxsize)).collect(),
        }
    }

    /// Clear the given flags on every block.
    pub fn clear_flags(&mut self, flags: DataFlags) {
        for block in &mut self.datas {
            block.flags.remove(flags);
        }
    }
}

/// A registered buffer together with its queue state.
#[derive(Debug)]
pub(crate) struct RegisteredBuffer {
    pub buf: HostBuffer,
    pub queued: bool,
}

/// One port of the node.
#[derive(Debug)]
pub(crate) struct Port {
    pub direction: Direction,
    pub id: u32,
    /// Channel position label, announced in the port properties.
    pub label: String,
    pub is_dsp: bool,
    pub is_monitor: bool,

    pub format: Option<AudioInfo>,
    pub blocks: u32,
    pub stride: u32,

    pub io: Option<IoBuffers>,
    pub buffers: Vec<RegisteredBuffer>,
    /// Ready FIFO of dequeued output buffer ids.
    pub queue: VecDeque<u32>,

    pub params: Vec<ParamInfo>,
}

impl Port {
    pub fn new(direction: Direction, id: u32, label: String, is_dsp: bool, is_monitor: bool) -> Self {
        Self {
            direction,
            id,
            label,
            is_dsp,
            is_monitor,
            format: None,
            blocks: 0,
            stride: 0,
            io: None,
            buffers: Vec::new(),
            queue: VecDeque::with_capacity(crate::format::MAX_BUFFERS),
            params: vec![
                ParamInfo::new(ParamId::EnumFormat, true, false),
                ParamInfo::new(ParamId::Meta, true, false),
                ParamInfo::new(ParamId::Io, true, false),
                ParamInfo::new(ParamId::Format, false, true),
                ParamInfo::new(ParamId::Buffers, false, false),
                ParamInfo::new(ParamId::Latency, true, true),
            ],
        }
    }

    /// Returns `true` once a format has been accepted on this port.
    #[inline]
    pub fn have_format(&self) -> bool {
        self.format.is_some()
    }

    /// Push a buffer onto the ready FIFO unless it is already queued.
    pub fn queue_buffer(&mut self, id: u32) {
        let Some(buffer) = self.buffers.get_mut(id as usize) else {
            return;
        };
        if buffer.queued {
            return;
        }
        buffer.queued = true;
        self.queue.push_back(id);
    }

    /// Pop the head of the ready FIFO.
    pub fn dequeue_buffer(&mut self) -> Option<u32> {
        let id = self.queue.pop_front()?;
        if let Some(buffer) = self.buffers.get_mut(id as usize) {
            buffer.queued = false;
        }
        Some(id)
    }

    /// Drop all registered buffers and reset the queue.
    pub fn clear_buffers(&mut self) {
        self.buffers.clear();
        self.queue.clear();
    }

    pub fn param_info_mut(&mut self, id: ParamId) -> &mut ParamInfo {
        self.params
            .iter_mut()
            .find(|p| p.id == id)
            .expect("port param table covers all ids")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port() -> Port {
        let mut port = Port::new(Direction::Output, 0, "FL".into(), true, false);
        port.buffers = (0..3)
            .map(|_| RegisteredBuffer {
                buf: HostBuffer::new(1, 64),
                queued: false,
            })
            .collect();
        port
    }

    #[test]
    fn queue_is_fifo() {
        let mut p = port();
        p.queue_buffer(2);
        p.queue_buffer(0);
        p.queue_buffer(1);
        assert_eq!(p.dequeue_buffer(), Some(2));
        assert_eq!(p.dequeue_buffer(), Some(0));
        assert_eq!(p.dequeue_buffer(), Some(1));
        assert_eq!(p.dequeue_buffer(), None);
    }

    #[test]
    fn double_queue_is_ignored() {
        let mut p = port();
        p.queue_buffer(1);
        p.queue_buffer(1);
        assert_eq!(p.dequeue_buffer(), Some(1));
        assert_eq!(p.dequeue_buffer(), None);
    }

    #[test]
    fn out_of_range_queue_is_ignored() {
        let mut p = port();
        p.queue_buffer(17);
        assert_eq!(p.dequeue_buffer(), None);
    }
}
