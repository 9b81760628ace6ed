//! Tensors, subtensors and quantization parameters.
//!
//! Tensors are created by upstream passes and are read-only during lowering,
//! except for the compression outcome that the constant packer records.

use super::dtype::DType;
use super::memory::MemorySpace;
use super::op::SplitStrategy;
use super::order::{element_count, Order, Shape};

/// Index of a tensor in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(pub u32);

/// Quantization parameters, one entry per channel or a single shared entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Quantization {
    pub zero_point: Vec<i64>,
    pub scale: Vec<f64>,
    pub mult: Vec<u16>,
    pub shift: Vec<u8>,
}

impl Quantization {
    pub fn new(zero_point: Vec<i64>, scale: Vec<f64>) -> Self {
        Self {
            zero_point,
            scale,
            mult: Vec::new(),
            shift: Vec::new(),
        }
    }

    pub fn with_mult_shift(mut self, mult: Vec<u16>, shift: Vec<u8>) -> Self {
        self.mult = mult;
        self.shift = shift;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.zero_point.is_empty() && self.scale.is_empty() && self.mult.is_empty() && self.shift.is_empty()
    }
}

/// Axis padded up to a hardware alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignAxis {
    Channel,
    Width,
}

/// Per-cluster slice of a tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct SubTensor {
    pub shape: Shape,
    /// Offset of the slice inside the parent, in W, H, C, N order.
    pub offset: Shape,
    pub address: Option<u64>,
    pub pool_index: Option<u32>,
    /// Pre-packed payload for sparse constants.
    pub data: Option<Vec<i64>>,
    /// Stored size in bytes when the packer compressed this slice.
    pub compressed_size: Option<u64>,
}

impl SubTensor {
    pub fn new(shape: Shape, offset: Shape) -> Self {
        Self {
            shape,
            offset,
            address: None,
            pool_index: None,
            data: None,
            compressed_size: None,
        }
    }

    pub fn element_count(&self) -> usize {
        element_count(&self.shape)
    }
}

/// A logical tensor of the scheduled graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub name: String,
    pub shape: Shape,
    pub dtype: DType,
    pub order: Order,
    pub quantization: Option<Quantization>,
    /// Candidate allocators; the first one is where the tensor is read from.
    pub allocators: Vec<MemorySpace>,
    pub address: Option<u64>,
    pub strategy: Option<SplitStrategy>,
    pub subtensors: Vec<SubTensor>,
    /// Constant payload, one value per element (or per packed element if sparse).
    pub data: Option<Vec<i64>>,
    pub pool_index: Option<u32>,
    pub sparse: bool,
    pub sparsity_map: Option<TensorId>,
    pub storage_element: Option<TensorId>,
    /// Transferred once and shared by every cluster.
    pub broadcast: bool,
    pub alignment: Option<AlignAxis>,
    /// Written by the constant packer.
    pub compression: Option<bool>,
    /// Written by the constant packer.
    pub compressed_size: Option<u64>,
}

impl Tensor {
    pub fn new(name: impl Into<String>, shape: Shape, dtype: DType, order: Order) -> Self {
        Self {
            name: name.into(),
            shape,
            dtype,
            order,
            quantization: None,
            allocators: Vec::new(),
            address: None,
            strategy: None,
            subtensors: Vec::new(),
            data: None,
            pool_index: None,
            sparse: false,
            sparsity_map: None,
            storage_element: None,
            broadcast: false,
            alignment: None,
            compression: None,
            compressed_size: None,
        }
    }

    pub fn in_space(mut self, space: MemorySpace) -> Self {
        self.allocators.push(space);
        self
    }

    pub fn with_address(mut self, address: u64) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_quantization(mut self, quant: Quantization) -> Self {
        self.quantization = Some(quant);
        self
    }

    pub fn with_data(mut self, data: Vec<i64>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_pool_index(mut self, index: u32) -> Self {
        self.pool_index = Some(index);
        self
    }

    pub fn with_alignment(mut self, axis: AlignAxis) -> Self {
        self.alignment = Some(axis);
        self
    }

    pub fn broadcast(mut self) -> Self {
        self.broadcast = true;
        self
    }

    /// Mark the tensor sparse with its companion tensors.
    pub fn sparse(mut self, map: TensorId, storage_element: Option<TensorId>) -> Self {
        self.sparse = true;
        self.sparsity_map = Some(map);
        self.storage_element = storage_element;
        self
    }

    pub fn with_subtensors(mut self, strategy: SplitStrategy, subtensors: Vec<SubTensor>) -> Self {
        self.strategy = Some(strategy);
        self.subtensors = subtensors;
        self
    }

    /// Split evenly along `axis` into `clusters` slices; the last slice takes the remainder.
    pub fn split(self, strategy: SplitStrategy, axis: usize, clusters: usize) -> Self {
        let extent = self.shape[axis];
        let base = extent / clusters.max(1);
        let mut subtensors = Vec::with_capacity(clusters);
        for k in 0..clusters {
            let mut shape = self.shape;
            let mut offset = [0; 4];
            offset[axis] = k * base;
            shape[axis] = if k + 1 == clusters { extent - k * base } else { base };
            subtensors.push(SubTensor::new(shape, offset));
        }
        self.with_subtensors(strategy, subtensors)
    }

    /// One full copy per cluster.
    pub fn replicate(self, clusters: usize) -> Self {
        let subtensors = (0..clusters).map(|_| SubTensor::new(self.shape, [0; 4])).collect();
        self.with_subtensors(SplitStrategy::Clustering, subtensors)
    }

    /// Constant tensors carry their payload in the graph file.
    pub fn is_populated(&self) -> bool {
        self.data.is_some()
    }

    pub fn element_count(&self) -> usize {
        element_count(&self.shape)
    }

    /// Allocator the tensor is read from.
    pub fn default_space(&self) -> Option<MemorySpace> {
        self.allocators.first().copied()
    }

    pub fn subtensor(&self, cluster: usize) -> Option<&SubTensor> {
        self.subtensors.get(cluster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_over_h() {
        let t = Tensor::new("act", [416, 416, 16, 1], DType::UInt8, Order::Z_MAJOR)
            .in_space(MemorySpace::CmxNn)
            .split(SplitStrategy::SplitOverH, 1, 3);

        assert_eq!(t.subtensors.len(), 3);
        assert_eq!(t.subtensors[0].shape, [416, 138, 16, 1]);
        assert_eq!(t.subtensors[2].offset, [0, 276, 0, 0]);
        assert_eq!(t.subtensors[2].shape, [416, 140, 16, 1]);
        let rows: usize = t.subtensors.iter().map(|s| s.shape[1]).sum();
        assert_eq!(rows, 416);
    }

    #[test]
    fn test_replicate_and_defaults() {
        let t = Tensor::new("w", [3, 3, 16, 32], DType::UInt8, Order::Z_MAJOR)
            .in_space(MemorySpace::GraphFile)
            .in_space(MemorySpace::CmxNn)
            .with_data(vec![0; 3 * 3 * 16 * 32])
            .replicate(4);

        assert_eq!(t.strategy, Some(SplitStrategy::Clustering));
        assert!(t.subtensors.iter().all(|s| s.shape == t.shape));
        assert_eq!(t.default_space(), Some(MemorySpace::GraphFile));
        assert!(t.is_populated());
        assert!(Quantization::default().is_empty());
    }
}
