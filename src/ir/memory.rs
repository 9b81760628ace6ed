// This module models where tensors live. MemorySpace is the closed set of allocators the
// NPU runtime knows about: the constant pool embedded in the graph file, the programmable
// input/output windows the host fills, two DDR tiers (heap and BSS scratch) and two on-chip
// SRAM tiers (per-cluster NN CMX and the UPA shave CMX). Its name and wire tables are
// static const lookups. Buffers are owned by a BufferArena and addressed by BufferId; an
// aliased or view buffer names its master buffer by id instead of sharing ownership, and
// the arena resolves the top of a master chain when the resolver needs the allocation that
// actually owns the bytes. A hashbrown index maps (tensor, space) to its buffer.

//! Memory spaces and the buffer arena.

use super::tensor::TensorId;
use crate::core::error::LowerError;
use hashbrown::HashMap;
use std::fmt;
use std::str::FromStr;

/// Allocator a tensor can be placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemorySpace {
    /// Constant pool inside the graph file.
    GraphFile,
    /// Network input window.
    ProgrammableInput,
    /// Network output window.
    ProgrammableOutput,
    /// Off-chip heap.
    DdrHeap,
    /// Off-chip scratch.
    DdrBss,
    /// Per-cluster on-chip memory of the DPUs.
    CmxNn,
    /// On-chip memory of the UPA shaves.
    CmxUpa,
}

impl MemorySpace {
    pub const ALL: [MemorySpace; 7] = [
        MemorySpace::GraphFile,
        MemorySpace::ProgrammableInput,
        MemorySpace::ProgrammableOutput,
        MemorySpace::DdrHeap,
        MemorySpace::DdrBss,
        MemorySpace::CmxNn,
        MemorySpace::CmxUpa,
    ];

    /// Allocator name used by upstream passes.
    pub const fn name(self) -> &'static str {
        match self {
            MemorySpace::GraphFile => "GraphFile",
            MemorySpace::ProgrammableInput => "ProgrammableInput",
            MemorySpace::ProgrammableOutput => "ProgrammableOutput",
            MemorySpace::DdrHeap => "VPU_DDR_Heap",
            MemorySpace::DdrBss => "VPU_DDR_BSS",
            MemorySpace::CmxNn => "VPU_CMX_NN",
            MemorySpace::CmxUpa => "VPU_CMX_UPA",
        }
    }

    /// Memory location tag in the graph file.
    pub const fn wire(self) -> u8 {
        match self {
            MemorySpace::ProgrammableInput => 1,
            MemorySpace::ProgrammableOutput => 2,
            MemorySpace::DdrHeap => 3,
            MemorySpace::GraphFile => 4,
            MemorySpace::CmxNn => 5,
            MemorySpace::CmxUpa => 6,
            MemorySpace::DdrBss => 7,
        }
    }

    pub fn from_wire(tag: u8) -> Option<MemorySpace> {
        MemorySpace::ALL.iter().copied().find(|m| m.wire() == tag)
    }

    /// Host-visible network input or output window.
    pub const fn is_io_window(self) -> bool {
        matches!(self, MemorySpace::ProgrammableInput | MemorySpace::ProgrammableOutput)
    }

    pub const fn is_ddr(self) -> bool {
        matches!(self, MemorySpace::DdrHeap | MemorySpace::DdrBss)
    }

    pub const fn is_cmx(self) -> bool {
        matches!(self, MemorySpace::CmxNn | MemorySpace::CmxUpa)
    }
}

impl fmt::Display for MemorySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MemorySpace {
    type Err = LowerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MemorySpace::ALL
            .iter()
            .copied()
            .find(|m| m.name() == s)
            .ok_or_else(|| LowerError::unknown_name("allocator", s))
    }
}

/// Index of a buffer in the [`BufferArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

/// One allocation of a tensor inside a memory space.
#[derive(Debug, Clone)]
pub struct Buffer {
    pub tensor: TensorId,
    pub space: MemorySpace,
    /// Byte offset inside the space.
    pub offset: u64,
    pub size: u64,
    /// Padding in bytes before the first element.
    pub leading_pad: u64,
    /// Buffer this one aliases; its offset and strides take precedence.
    pub master: Option<BufferId>,
}

impl Buffer {
    pub fn new(tensor: TensorId, space: MemorySpace, offset: u64, size: u64) -> Self {
        Self {
            tensor,
            space,
            offset,
            size,
            leading_pad: 0,
            master: None,
        }
    }

    pub fn with_leading_pad(mut self, pad: u64) -> Self {
        self.leading_pad = pad;
        self
    }

    pub fn view_of(mut self, master: BufferId) -> Self {
        self.master = Some(master);
        self
    }
}

/// Owns every buffer of a graph.
#[derive(Debug, Clone, Default)]
pub struct BufferArena {
    buffers: Vec<Buffer>,
    index: HashMap<(TensorId, MemorySpace), BufferId>,
}

impl BufferArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a buffer. A later buffer for the same tensor and space replaces
    /// the earlier one in the lookup index.
    pub fn add(&mut self, buffer: Buffer) -> BufferId {
        let id = BufferId(self.buffers.len() as u32);
        self.index.insert((buffer.tensor, buffer.space), id);
        self.buffers.push(buffer);
        id
    }

    pub fn get(&self, id: BufferId) -> Option<&Buffer> {
        self.buffers.get(id.0 as usize)
    }

    pub fn lookup(&self, tensor: TensorId, space: MemorySpace) -> Option<&Buffer> {
        self.index
            .get(&(tensor, space))
            .and_then(|&id| self.get(id))
    }

    /// Follow the master chain of `buffer` to the allocation owning the bytes.
    ///
    /// Chains longer than the arena (a cycle) stop at the last buffer visited.
    pub fn top_master<'a>(&'a self, buffer: &'a Buffer) -> &'a Buffer {
        let mut current = buffer;
        for _ in 0..self.buffers.len() {
            match current.master.and_then(|id| self.get(id)) {
                Some(master) => current = master,
                None => break,
            }
        }
        current
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Buffer> {
        self.buffers.iter()
    }
}
