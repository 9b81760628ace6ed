// This module defines the task nodes of a scheduled graph. The attribute set of each op is
// a closed tagged variant (OpKind) chosen by its type tag, so the lowering code matches
// exhaustively instead of probing a string-keyed attribute bag. Attributes that upstream
// passes may legitimately fail to attach (split strategy, scheduling number, workloads) stay
// Option/Vec typed and are checked once at lowering time, producing a MissingAttribute
// error that names the op. The static name/wire tables for DPU task types, PPE layers, MPE
// modes and software layers live next to their enums as const lookups with FromStr parsing
// for callers that still speak in upstream names.

//! Op nodes and their per-kind attributes.

use super::tensor::TensorId;
use crate::core::error::LowerError;
use std::fmt;
use std::str::FromStr;

/// Index of an op in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub u32);

/// How a tensor or op is partitioned across clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SplitStrategy {
    /// Replicated on every cluster.
    Clustering,
    SplitOverH,
    SplitOverK,
    SplitOverHOverlapped,
    /// Input split over H, output broadcast over K.
    HKSwitch,
}

impl SplitStrategy {
    pub const fn name(self) -> &'static str {
        match self {
            SplitStrategy::Clustering => "Clustering",
            SplitStrategy::SplitOverH => "SplitOverH",
            SplitStrategy::SplitOverK => "SplitOverK",
            SplitStrategy::SplitOverHOverlapped => "SplitOverHOverlapped",
            SplitStrategy::HKSwitch => "HKSwitch",
        }
    }

    pub const fn splits_height(self) -> bool {
        matches!(self, SplitStrategy::SplitOverH | SplitStrategy::SplitOverHOverlapped)
    }
}

impl FromStr for SplitStrategy {
    type Err = LowerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use SplitStrategy::*;
        [Clustering, SplitOverH, SplitOverK, SplitOverHOverlapped, HKSwitch]
            .into_iter()
            .find(|st| st.name() == s)
            .ok_or_else(|| LowerError::unknown_name("split strategy", s))
    }
}

/// Direction of a DMA transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    DdrToCmx,
    CmxToDdr,
    DdrToDdr,
    CmxToCmx,
    DdrToUpa,
    UpaToDdr,
}

impl DmaDirection {
    /// Whether the source side is per-cluster NN CMX.
    pub const fn src_is_cluster_local(self) -> bool {
        matches!(self, DmaDirection::CmxToDdr | DmaDirection::CmxToCmx)
    }

    /// Whether the destination side is per-cluster NN CMX.
    pub const fn dst_is_cluster_local(self) -> bool {
        matches!(self, DmaDirection::DdrToCmx | DmaDirection::CmxToCmx)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DmaAttrs {
    pub direction: DmaDirection,
    pub strategy: Option<SplitStrategy>,
    /// Upstream requested hardware decompression of the source.
    pub compression: bool,
}

impl DmaAttrs {
    pub fn new(direction: DmaDirection) -> Self {
        Self {
            direction,
            strategy: None,
            compression: false,
        }
    }

    pub fn with_strategy(mut self, strategy: SplitStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn compressed(mut self) -> Self {
        self.compression = true;
        self
    }
}

/// Operation a DPU task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DpuTaskType {
    Conv,
    DepthwiseConv,
    MaxPool,
    AveragePool,
    FullyConnected,
    Eltwise,
    Identity,
    ChannelMajorConvolution,
}

impl DpuTaskType {
    pub const ALL: [DpuTaskType; 8] = [
        DpuTaskType::Conv,
        DpuTaskType::DepthwiseConv,
        DpuTaskType::MaxPool,
        DpuTaskType::AveragePool,
        DpuTaskType::FullyConnected,
        DpuTaskType::Eltwise,
        DpuTaskType::Identity,
        DpuTaskType::ChannelMajorConvolution,
    ];

    /// Task-op name used upstream.
    pub const fn name(self) -> &'static str {
        match self {
            DpuTaskType::Conv => "Conv",
            DpuTaskType::DepthwiseConv => "DepthwiseConv",
            DpuTaskType::MaxPool => "MaxPool",
            DpuTaskType::AveragePool => "AveragePool",
            DpuTaskType::FullyConnected => "FullyConnected",
            DpuTaskType::Eltwise => "Eltwise",
            DpuTaskType::Identity => "Identity",
            DpuTaskType::ChannelMajorConvolution => "ChannelMajorConvolution",
        }
    }

    pub const fn wire(self) -> u8 {
        match self {
            DpuTaskType::Conv => 0,
            DpuTaskType::DepthwiseConv => 1,
            DpuTaskType::MaxPool => 2,
            DpuTaskType::AveragePool => 3,
            DpuTaskType::FullyConnected => 4,
            DpuTaskType::Eltwise => 5,
            DpuTaskType::Identity => 6,
            DpuTaskType::ChannelMajorConvolution => 7,
        }
    }

    pub fn from_wire(tag: u8) -> Option<DpuTaskType> {
        DpuTaskType::ALL.iter().copied().find(|t| t.wire() == tag)
    }

    /// Ops that stream a weights tensor.
    pub const fn has_weights(self) -> bool {
        matches!(
            self,
            DpuTaskType::Conv
                | DpuTaskType::DepthwiseConv
                | DpuTaskType::ChannelMajorConvolution
                | DpuTaskType::FullyConnected
                | DpuTaskType::Eltwise
        )
    }

    /// Ops that need an activation window.
    pub const fn has_activation_window(self) -> bool {
        matches!(
            self,
            DpuTaskType::MaxPool | DpuTaskType::DepthwiseConv | DpuTaskType::ChannelMajorConvolution
        )
    }

    pub const fn has_weights_table(self) -> bool {
        !matches!(self, DpuTaskType::Eltwise)
    }
}

impl fmt::Display for DpuTaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DpuTaskType {
    type Err = LowerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DpuTaskType::ALL
            .iter()
            .copied()
            .find(|t| t.name() == s)
            .ok_or_else(|| LowerError::unknown_name("DPU task op", s))
    }
}

/// Fixed-function post-processing layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PpeLayerType {
    Store,
    Load,
    Clear,
    Noop,
    Halt,
    Add,
    Sub,
    Mult,
    Relu,
    ReluX,
    LeakyRelu,
    LeakyReluX,
    Sigmoid,
    Tanh,
}

impl PpeLayerType {
    pub const ALL: [PpeLayerType; 14] = [
        PpeLayerType::Store,
        PpeLayerType::Load,
        PpeLayerType::Clear,
        PpeLayerType::Noop,
        PpeLayerType::Halt,
        PpeLayerType::Add,
        PpeLayerType::Sub,
        PpeLayerType::Mult,
        PpeLayerType::Relu,
        PpeLayerType::ReluX,
        PpeLayerType::LeakyRelu,
        PpeLayerType::LeakyReluX,
        PpeLayerType::Sigmoid,
        PpeLayerType::Tanh,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            PpeLayerType::Store => "STORE",
            PpeLayerType::Load => "LOAD",
            PpeLayerType::Clear => "CLEAR",
            PpeLayerType::Noop => "NOOP",
            PpeLayerType::Halt => "HALT",
            PpeLayerType::Add => "ADD",
            PpeLayerType::Sub => "SUB",
            PpeLayerType::Mult => "MULT",
            PpeLayerType::Relu => "RELU",
            PpeLayerType::ReluX => "RELUX",
            PpeLayerType::LeakyRelu => "LPRELU",
            PpeLayerType::LeakyReluX => "LRELUX",
            PpeLayerType::Sigmoid => "SIGMOID",
            PpeLayerType::Tanh => "TANH",
        }
    }

    pub const fn wire(self) -> u8 {
        self as u8
    }

    pub fn from_wire(tag: u8) -> Option<PpeLayerType> {
        PpeLayerType::ALL.get(tag as usize).copied()
    }
}

impl FromStr for PpeLayerType {
    type Err = LowerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PpeLayerType::ALL
            .iter()
            .copied()
            .find(|t| t.name() == s)
            .ok_or_else(|| LowerError::unknown_name("PPE layer", s))
    }
}

/// DPU execution lane mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MpeMode {
    Vector,
    Matrix,
    VectorFp16,
}

impl MpeMode {
    pub const fn wire(self) -> u8 {
        match self {
            MpeMode::Vector => 0,
            MpeMode::Matrix => 1,
            MpeMode::VectorFp16 => 2,
        }
    }

    pub fn from_wire(tag: u8) -> Option<MpeMode> {
        match tag {
            0 => Some(MpeMode::Vector),
            1 => Some(MpeMode::Matrix),
            2 => Some(MpeMode::VectorFp16),
            _ => None,
        }
    }
}

impl FromStr for MpeMode {
    type Err = LowerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Vector" => Ok(MpeMode::Vector),
            "Matrix" => Ok(MpeMode::Matrix),
            "Vector_FP16" => Ok(MpeMode::VectorFp16),
            _ => Err(LowerError::unknown_name("MPE mode", s)),
        }
    }
}

/// Kernel padding in left, right, top, bottom order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Padding {
    pub left: u16,
    pub right: u16,
    pub top: u16,
    pub bottom: u16,
}

impl Padding {
    pub const fn new(left: u16, right: u16, top: u16, bottom: u16) -> Self {
        Self { left, right, top, bottom }
    }

    pub const fn uniform(p: u16) -> Self {
        Self::new(p, p, p, p)
    }
}

/// Hardware-sized box over the output tensor of a compute op.
///
/// Coordinates are inclusive and global to the whole output tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workload {
    pub min_x: usize,
    pub max_x: usize,
    pub min_y: usize,
    pub max_y: usize,
    pub min_z: usize,
    pub max_z: usize,
    pub mpe_mode: MpeMode,
}

impl Workload {
    pub fn new(x: (usize, usize), y: (usize, usize), z: (usize, usize), mpe_mode: MpeMode) -> Self {
        Self {
            min_x: x.0,
            max_x: x.1,
            min_y: y.0,
            max_y: y.1,
            min_z: z.0,
            max_z: z.1,
            mpe_mode,
        }
    }

    pub fn volume(&self) -> usize {
        (self.max_x + 1 - self.min_x) * (self.max_y + 1 - self.min_y) * (self.max_z + 1 - self.min_z)
    }

    pub fn overlaps(&self, other: &Workload) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
            && self.min_z <= other.max_z
            && other.min_z <= self.max_z
    }
}

/// Fixed-function post-processing requested by upstream fusion.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PpeAttrs {
    pub layers: Vec<PpeLayerType>,
    pub clamp_low: Option<i32>,
    pub clamp_high: Option<i32>,
    pub lrelu_mult: Option<i32>,
    pub lrelu_shift: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NceAttrs {
    pub task: DpuTaskType,
    pub strategy: Option<SplitStrategy>,
    /// Kernel width and height.
    pub kernel: [u16; 2],
    /// Stride along width and height.
    pub stride: [u16; 2],
    pub padding: Padding,
    /// One workload list per cluster; a single list under Clustering.
    pub workloads: Vec<Vec<Workload>>,
    pub weights: Option<TensorId>,
    pub weights_table: Option<TensorId>,
    pub activation_window: Option<TensorId>,
    pub activation_window_channel_length: u32,
    /// Every cluster writes its slice into one shared output buffer.
    pub multicast: bool,
    pub ppe: PpeAttrs,
}

impl NceAttrs {
    pub fn new(task: DpuTaskType) -> Self {
        Self {
            task,
            strategy: None,
            kernel: [1, 1],
            stride: [1, 1],
            padding: Padding::default(),
            workloads: Vec::new(),
            weights: None,
            weights_table: None,
            activation_window: None,
            activation_window_channel_length: 0,
            multicast: false,
            ppe: PpeAttrs::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: SplitStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_kernel(mut self, kernel: [u16; 2], stride: [u16; 2], padding: Padding) -> Self {
        self.kernel = kernel;
        self.stride = stride;
        self.padding = padding;
        self
    }

    pub fn with_workloads(mut self, workloads: Vec<Vec<Workload>>) -> Self {
        self.workloads = workloads;
        self
    }

    pub fn with_weights(mut self, weights: TensorId, table: TensorId) -> Self {
        self.weights = Some(weights);
        self.weights_table = Some(table);
        self
    }

    pub fn with_activation_window(mut self, window: TensorId, channel_length: u32) -> Self {
        self.activation_window = Some(window);
        self.activation_window_channel_length = channel_length;
        self
    }

    /// Tensors the op reads besides its activation input.
    pub fn role_tensors(&self) -> impl Iterator<Item = TensorId> + '_ {
        [self.weights, self.weights_table, self.activation_window]
            .into_iter()
            .flatten()
    }
}

/// Axis argument of software layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    W,
    H,
    C,
    N,
}

impl Axis {
    pub const fn wire(self) -> u32 {
        match self {
            Axis::N => 0,
            Axis::C => 1,
            Axis::H => 2,
            Axis::W => 3,
        }
    }

    pub fn from_wire(tag: u32) -> Option<Axis> {
        match tag {
            0 => Some(Axis::N),
            1 => Some(Axis::C),
            2 => Some(Axis::H),
            3 => Some(Axis::W),
            _ => None,
        }
    }
}

/// Layer a UPA shave runs, with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum SoftwareLayer {
    Softmax { axis: Axis },
    Passthrough,
    Dummy,
    Normalize { eps: f32, across_spatial: bool, channel_shared: bool },
    Permute { order: [u8; 4] },
    Argmax { out_max_val: bool, top_k: u32, axis: Axis },
    Reshape { shape: [u32; 4] },
}

impl SoftwareLayer {
    pub const fn name(&self) -> &'static str {
        match self {
            SoftwareLayer::Softmax { .. } => "Softmax",
            SoftwareLayer::Passthrough => "Passthrough",
            SoftwareLayer::Dummy => "Dummy",
            SoftwareLayer::Normalize { .. } => "Normalize",
            SoftwareLayer::Permute { .. } => "Permute",
            SoftwareLayer::Argmax { .. } => "Argmax",
            SoftwareLayer::Reshape { .. } => "Reshape",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpaAttrs {
    pub layer: SoftwareLayer,
}

/// Barrier indices an op waits on and signals.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BarrierDeps {
    pub wait: Vec<u32>,
    pub update: Vec<u32>,
}

impl BarrierDeps {
    pub fn is_empty(&self) -> bool {
        self.wait.is_empty() && self.update.is_empty()
    }
}

/// Counting synchronization primitive inserted by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Barrier {
    pub index: u32,
}

/// Per-kind attributes of an op.
#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    Input,
    Output,
    Constant,
    Dma(DmaAttrs),
    Nce(NceAttrs),
    Upa(UpaAttrs),
    BarrierControl(Barrier),
    Controller,
}

impl OpKind {
    pub const fn tag(&self) -> &'static str {
        match self {
            OpKind::Input => "Input",
            OpKind::Output => "Output",
            OpKind::Constant => "Constant",
            OpKind::Dma(_) => "DMATask",
            OpKind::Nce(_) => "DPUTask",
            OpKind::Upa(_) => "UPATask",
            OpKind::BarrierControl(_) => "BarrierTask",
            OpKind::Controller => "ControllerTask",
        }
    }
}

/// A node of the scheduled graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Op {
    pub name: String,
    pub kind: OpKind,
    pub inputs: Vec<TensorId>,
    pub outputs: Vec<TensorId>,
    /// Position in the dispatch order decided by the scheduler.
    pub schedule: Option<u32>,
    pub barrier_deps: Option<BarrierDeps>,
}

impl Op {
    pub fn new(name: impl Into<String>, kind: OpKind, inputs: Vec<TensorId>, outputs: Vec<TensorId>) -> Self {
        Self {
            name: name.into(),
            kind,
            inputs,
            outputs,
            schedule: None,
            barrier_deps: None,
        }
    }

    pub fn input(name: impl Into<String>, tensor: TensorId) -> Self {
        Self::new(name, OpKind::Input, Vec::new(), vec![tensor])
    }

    pub fn output(name: impl Into<String>, tensor: TensorId) -> Self {
        Self::new(name, OpKind::Output, vec![tensor], Vec::new())
    }

    pub fn constant(name: impl Into<String>, tensor: TensorId) -> Self {
        Self::new(name, OpKind::Constant, Vec::new(), vec![tensor])
    }

    pub fn dma(name: impl Into<String>, src: TensorId, dst: TensorId, attrs: DmaAttrs) -> Self {
        Self::new(name, OpKind::Dma(attrs), vec![src], vec![dst])
    }

    /// Compute op; role tensors of `attrs` follow `input` in the input list.
    pub fn nce(name: impl Into<String>, input: TensorId, output: TensorId, attrs: NceAttrs) -> Self {
        let mut inputs = vec![input];
        inputs.extend(attrs.role_tensors());
        Self::new(name, OpKind::Nce(attrs), inputs, vec![output])
    }

    pub fn upa(name: impl Into<String>, inputs: Vec<TensorId>, outputs: Vec<TensorId>, layer: SoftwareLayer) -> Self {
        Self::new(name, OpKind::Upa(UpaAttrs { layer }), inputs, outputs)
    }

    pub fn scheduled(mut self, number: u32) -> Self {
        self.schedule = Some(number);
        self
    }

    /// Whether the op becomes hardware tasks.
    pub fn is_task(&self) -> bool {
        matches!(
            self.kind,
            OpKind::Dma(_) | OpKind::Nce(_) | OpKind::Upa(_) | OpKind::BarrierControl(_) | OpKind::Controller
        )
    }
}
