// This module defines the in-memory form of a graph file: the value every lowering component
// builds and the only input serialization reads. Tensor references carry dimensions and byte
// strides in wire order (batch outermost, element size first), a memory-location tag with
// its locale indices, an indirect data reference (byte offset plus optional sparsity and
// storage-element offsets) and reduced quantization vectors. Tasks pair a name, source op
// ids and barrier references with one engine-specific payload: NCE (invariant plus variants),
// DMA, UPA software layer or barrier configuration. The codec and container submodules turn
// a GraphFile into bytes and back; equality on these types is what round-trip tests compare.

//! Wire-level types of the graph file.

pub mod codec;
pub mod wire;
pub mod container;

use crate::ir::{DType, DpuTaskType, MemorySpace, MpeMode, PpeLayerType, SoftwareLayer, Version};

/// Byte offsets of a tensor's data and sparse companions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndirectDataReference {
    pub data_index: u64,
    pub sparsity_index: Option<u64>,
    pub storage_element_index: Option<u64>,
}

/// Fully resolved reference to a tensor or one of its subtensors.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorReference {
    pub name: String,
    /// Dimensions in N, C, H, W order.
    pub dimensions: Vec<u32>,
    /// Element size followed by the N, C, H, W byte strides.
    pub strides: Vec<u32>,
    pub locale: MemorySpace,
    pub locale_index: Vec<u32>,
    pub data: IndirectDataReference,
    pub data_dtype: DType,
    pub quant_zero: Vec<i32>,
    pub quant_scale: Vec<f32>,
    pub quant_mult: Vec<u16>,
    pub quant_shift: Vec<u8>,
}

/// Wait and update barriers of a physical task.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BarrierReference {
    pub wait_barriers: Vec<u32>,
    pub update_barriers: Vec<u32>,
}

/// Barrier index with its producer and consumer task counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierDescriptor {
    pub barrier_id: u32,
    pub producer_count: u32,
    pub consumer_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PpeFixedFunction {
    pub ops: Vec<PpeLayerType>,
    pub clamp_low: i32,
    pub clamp_high: i32,
    pub lrelu_mult: i32,
    pub lrelu_shift: u32,
}

impl Default for PpeFixedFunction {
    fn default() -> Self {
        Self {
            ops: Vec::new(),
            clamp_low: i32::MIN,
            clamp_high: i32::MAX,
            lrelu_mult: 1,
            lrelu_shift: 0,
        }
    }
}

/// Fields shared by every workload of one DPU task.
#[derive(Debug, Clone, PartialEq)]
pub struct NceInvariantFields {
    pub dpu_task_type: DpuTaskType,
    pub ppe_task: PpeFixedFunction,
    pub mpe_frequent_mode: MpeMode,
    pub kernel_w: u16,
    pub kernel_h: u16,
    pub kernel_stride_w: u16,
    pub kernel_stride_h: u16,
    pub kernel_pad_left: u16,
    pub kernel_pad_right: u16,
    pub kernel_pad_top: u16,
    pub kernel_pad_bottom: u16,
    pub input_data: TensorReference,
    pub output_data: TensorReference,
    pub parent_input_tensor: TensorReference,
    pub parent_output_tensor: TensorReference,
    pub weights_data: Option<TensorReference>,
    pub weights_table: Option<TensorReference>,
    pub activation_window: Option<TensorReference>,
    pub activation_window_channel_length: u32,
    pub out_channel_offset: u32,
}

/// Per-workload fields of a DPU task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NceVariantFields {
    pub mpe_mode: MpeMode,
    pub padding_left: u16,
    pub padding_right: u16,
    pub padding_top: u16,
    pub padding_bottom: u16,
    pub workload_start_x: u32,
    pub workload_start_y: u32,
    pub workload_start_z: u32,
    pub workload_end_x: u32,
    pub workload_end_y: u32,
    pub workload_end_z: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NceTask {
    pub invariant: NceInvariantFields,
    pub variants: Vec<NceVariantFields>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DmaTask {
    pub src: TensorReference,
    pub dst: TensorReference,
    pub compression: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpaLayerTask {
    pub layer: SoftwareLayer,
    pub inputs: Vec<TensorReference>,
    pub outputs: Vec<TensorReference>,
}

/// Engine-specific payload of a task.
#[derive(Debug, Clone, PartialEq)]
pub enum SpecificTask {
    Nce(NceTask),
    Dma(DmaTask),
    Upa(UpaLayerTask),
    BarrierConfiguration(BarrierDescriptor),
}

impl SpecificTask {
    /// Engine label used in logs and statistics.
    pub const fn engine(&self) -> &'static str {
        match self {
            SpecificTask::Nce(_) => "DPU",
            SpecificTask::Dma(_) => "DMA",
            SpecificTask::Upa(_) => "UPA",
            SpecificTask::BarrierConfiguration(_) => "Controller",
        }
    }
}

/// One physical hardware task.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub name: String,
    pub node_id: u32,
    pub source_task_ids: Vec<u32>,
    pub associated_barriers: BarrierReference,
    pub task: SpecificTask,
}

impl Task {
    /// Times this task individually signals each of its update barriers.
    ///
    /// Every DPU workload signals on its own.
    pub fn barrier_signal_count(&self) -> u32 {
        match &self.task {
            SpecificTask::Nce(nce) => nce.variants.len() as u32,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TaskList {
    pub content: Vec<Task>,
}

/// Constant-pool entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryData {
    pub underlying_type: DType,
    /// Payload length in bytes.
    pub length: u64,
    pub data: Vec<u64>,
    pub compressed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resources {
    pub upa_shaves: u32,
    pub nce2_blocks: u32,
    pub nn_cmx_per_slice: u64,
    pub nn_cmx_slice_amount: u32,
    pub ddr_scratch: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceNode {
    pub name: String,
    pub this_id: u32,
    pub source_ids: Vec<u32>,
    pub sink_ids: Vec<u32>,
}

/// Topology of the graph the file was lowered from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceStructure {
    pub first_ids: Vec<u32>,
    pub nodes: Vec<SourceNode>,
}

/// Feature flags the runtime must honour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionFlag {
    DynamicBarriers,
}

impl ExecutionFlag {
    pub const fn wire(self) -> u8 {
        match self {
            ExecutionFlag::DynamicBarriers => 1,
        }
    }

    pub fn from_wire(tag: u8) -> Option<ExecutionFlag> {
        match tag {
            1 => Some(ExecutionFlag::DynamicBarriers),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryHeader {
    pub version: Version,
    pub resources: Resources,
    pub original_structure: SourceStructure,
    pub net_input: Vec<TensorReference>,
    pub net_output: Vec<TensorReference>,
    pub task_count: u32,
    pub layer_count: u32,
    pub options: Vec<ExecutionFlag>,
}

impl SummaryHeader {
    pub fn has_dynamic_barriers(&self) -> bool {
        self.options.contains(&ExecutionFlag::DynamicBarriers)
    }
}

/// Complete graph file.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphFile {
    pub header: SummaryHeader,
    /// Compute, DMA and barrier-control lists, in that order.
    pub task_lists: Vec<TaskList>,
    /// Present only under static barrier assignment.
    pub barrier_table: Vec<BarrierDescriptor>,
    pub binary_data: Vec<BinaryData>,
}

/// Task list holding DPU and UPA tasks.
pub const COMPUTE_LIST: usize = 0;
/// Task list holding DMA tasks.
pub const DMA_LIST: usize = 1;
/// Task list holding barrier configuration tasks.
pub const BARRIER_LIST: usize = 2;

impl GraphFile {
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.task_lists.iter().flat_map(|list| list.content.iter())
    }
}
