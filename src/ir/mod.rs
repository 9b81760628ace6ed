//! Data model of a scheduled graph.
//!
//! Everything lowering reads: tensors with their subtensors and quantization,
//! buffers in an arena keyed by id, ops with a closed per-kind attribute set,
//! and the target description.

pub mod dtype;
pub mod order;
pub mod memory;
pub mod tensor;
pub mod op;
pub mod graph;
pub mod target;

pub use dtype::DType;
pub use order::{element_count, round_up, Order, Shape, DIM_C, DIM_H, DIM_N, DIM_W};
pub use memory::{Buffer, BufferArena, BufferId, MemorySpace};
pub use tensor::{AlignAxis, Quantization, SubTensor, Tensor, TensorId};
pub use op::{
    Axis, Barrier, BarrierDeps, DmaAttrs, DmaDirection, DpuTaskType, MpeMode, NceAttrs, Op, OpId,
    OpKind, Padding, PpeAttrs, PpeLayerType, SoftwareLayer, SplitStrategy, UpaAttrs, Workload,
};
pub use graph::{Graph, GraphBuilder};
pub use target::{BarrierMode, Capabilities, TargetConfig, Version};
