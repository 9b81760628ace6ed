// This module implements tensor address resolution: turning a logical tensor, or one of its
// per-cluster subtensors, into the TensorReference the runtime dereferences. Dimensions and
// byte strides are converted from the internal W,H,C,N convention into wire order (reversed,
// element size first). The data offset depends on the memory space: constant-pool tensors
// are addressed by pool index, the programmable I/O windows by their leading buffer padding,
// and DDR/CMX scratch by fixed address or (master) buffer offset plus leading padding, with
// sparsity-map and storage-element offsets for sparse activations. For subtensors the offset
// inside the parent is added wherever clusters share one allocation (constant pool and DDR);
// NN CMX is partitioned per cluster, so there the slice's own strides and address apply.

//! Tensor address resolution.

use crate::core::error::{LowerError, LowerResult};
use crate::core::session::LoweringSession;
use crate::ir::{
    element_count, round_up, AlignAxis, Graph, MemorySpace, Shape, SplitStrategy, SubTensor,
    TargetConfig, Tensor, TensorId, DIM_C, DIM_W,
};
use crate::schema::{IndirectDataReference, TensorReference};

/// Resolves tensors to wire-format references.
#[derive(Clone, Copy)]
pub struct AddressResolver<'a, 'arena> {
    graph: &'a Graph,
    target: &'a TargetConfig,
    session: &'a LoweringSession<'arena>,
}

impl<'a, 'arena> AddressResolver<'a, 'arena> {
    pub fn new(graph: &'a Graph, target: &'a TargetConfig, session: &'a LoweringSession<'arena>) -> Self {
        Self { graph, target, session }
    }

    /// Resolve `tensor` as a whole, or its slice for `cluster`, read from
    /// `hint` or else from its default allocator.
    pub fn resolve(
        &self,
        tensor: TensorId,
        cluster: Option<usize>,
        hint: Option<MemorySpace>,
    ) -> LowerResult<TensorReference> {
        let t = self.graph.tensor(tensor)?;
        let space = self.space_of(t, hint)?;
        if t.sparse && t.sparsity_map.is_none() {
            return Err(LowerError::MissingSparsityMap {
                tensor: t.name.clone(),
                what: "sparsity map",
            });
        }

        match cluster {
            None => self.resolve_whole(tensor, t, space),
            Some(k) => self.resolve_slice(tensor, t, space, k),
        }
    }

    /// Allocator a reference to `tensor` would use.
    pub fn space_of(&self, t: &Tensor, hint: Option<MemorySpace>) -> LowerResult<MemorySpace> {
        match hint {
            Some(space) if t.allocators.contains(&space) => Ok(space),
            Some(space) => Err(LowerError::AllocatorMismatch {
                tensor: t.name.clone(),
                space: space.name(),
            }),
            None => t.default_space().ok_or(LowerError::AllocatorMismatch {
                tensor: t.name.clone(),
                space: "any allocator",
            }),
        }
    }

    fn resolve_whole(&self, id: TensorId, t: &Tensor, space: MemorySpace) -> LowerResult<TensorReference> {
        let shape = self.aligned_shape(t);
        let (dimensions, mut strides) = wire_layout(t, &shape);
        if let Some((master_id, master)) = self.master_tensor(id, space) {
            if master_id != id {
                strides = wire_layout(master, &self.aligned_shape(master)).1;
            }
        }

        let (locale_index, data) = match space {
            MemorySpace::GraphFile => {
                let index = t.pool_index.ok_or_else(|| LowerError::MissingPoolIndex {
                    tensor: t.name.clone(),
                })?;
                (vec![index], IndirectDataReference::default())
            }
            s if s.is_io_window() => {
                let data_index = self.graph.buffer(id, space).map_or(0, |b| b.leading_pad);
                (vec![0], IndirectDataReference { data_index, ..Default::default() })
            }
            _ => {
                let base = match t.address {
                    Some(address) => address,
                    None => self.master_offset(id, t, space)?,
                };
                let leading = self.graph.buffer(id, space).map_or(0, |b| b.leading_pad);
                let mut data = IndirectDataReference {
                    data_index: base + leading,
                    ..Default::default()
                };
                if t.sparse {
                    self.attach_sparsity(t, space, &mut data, None)?;
                }
                (vec![0], data)
            }
        };

        Ok(self.reference(t.name.clone(), t, dimensions, strides, space, locale_index, data))
    }

    fn resolve_slice(&self, id: TensorId, t: &Tensor, space: MemorySpace, k: usize) -> LowerResult<TensorReference> {
        let sub = subtensor(t, k)?;
        let name = self.session.subtensor_name(&t.name, k).to_string();
        let dimensions = wire_dims(&sub.shape);

        let strides = if space == MemorySpace::CmxNn {
            let (master, master_sub) = match self.master_tensor(id, space) {
                Some((_, m)) => (m, m.subtensor(k).unwrap_or(sub)),
                None => (t, sub),
            };
            wire_layout(master, &master_sub.shape).1
        } else {
            wire_layout(t, &self.aligned_shape(t)).1
        };

        let byte_index = t.order.sub_to_ind(&t.shape, &sub.offset) * t.dtype.bits() as u64 / 8;

        let (locale_index, data) = match space {
            MemorySpace::GraphFile => {
                if pooled_per_cluster(t, self.target) {
                    let index = sub.pool_index.ok_or_else(|| LowerError::MissingPoolIndex {
                        tensor: name.clone(),
                    })?;
                    (vec![index], IndirectDataReference::default())
                } else {
                    let index = t.pool_index.ok_or_else(|| LowerError::MissingPoolIndex {
                        tensor: t.name.clone(),
                    })?;
                    (vec![index], IndirectDataReference { data_index: byte_index, ..Default::default() })
                }
            }
            s if s.is_io_window() || s.is_ddr() => {
                let base = match t.address {
                    Some(address) => address,
                    None if s.is_io_window() => self
                        .graph
                        .buffer(id, space)
                        .map_or(0, |b| self.graph.buffers.top_master(b).offset),
                    None => self.master_offset(id, t, space)?,
                };
                let leading = self.graph.buffer(id, space).map_or(0, |b| b.leading_pad);
                (vec![0], IndirectDataReference {
                    data_index: base + byte_index + leading,
                    ..Default::default()
                })
            }
            _ => {
                let base = match (sub.address, t.address) {
                    (Some(address), _) => address,
                    (None, Some(address)) => address,
                    (None, None) => self.master_offset(id, t, space)?,
                };
                let mut data = IndirectDataReference { data_index: base, ..Default::default() };
                if t.sparse {
                    self.attach_sparsity(t, space, &mut data, Some(k))?;
                }
                (vec![k as u32], data)
            }
        };

        Ok(self.reference(name, t, dimensions, strides, space, locale_index, data))
    }

    /// Fill sparsity-map and storage-element offsets for a sparse scratch tensor.
    fn attach_sparsity(
        &self,
        t: &Tensor,
        space: MemorySpace,
        data: &mut IndirectDataReference,
        cluster: Option<usize>,
    ) -> LowerResult<()> {
        let map_id = t.sparsity_map.ok_or_else(|| LowerError::MissingSparsityMap {
            tensor: t.name.clone(),
            what: "sparsity map",
        })?;
        data.sparsity_index = Some(self.companion_address(map_id, space, cluster)?);

        if !t.is_populated() {
            let se_id = t.storage_element.ok_or_else(|| LowerError::MissingSparsityMap {
                tensor: t.name.clone(),
                what: "storage element table",
            })?;
            data.storage_element_index = Some(self.companion_address(se_id, space, cluster)?);
        }
        Ok(())
    }

    /// Address of a sparse companion tensor, which may live in another space.
    fn companion_address(&self, id: TensorId, space: MemorySpace, cluster: Option<usize>) -> LowerResult<u64> {
        let companion = self.graph.tensor(id)?;
        if let Some(address) = cluster
            .and_then(|k| companion.subtensor(k))
            .and_then(|sub| sub.address)
            .or(companion.address)
        {
            return Ok(address);
        }
        let companion_space = if companion.allocators.contains(&space) {
            space
        } else {
            self.space_of(companion, None)?
        };
        self.master_offset(id, companion, companion_space)
    }

    fn master_offset(&self, id: TensorId, t: &Tensor, space: MemorySpace) -> LowerResult<u64> {
        let buffer = self.graph.buffer(id, space).ok_or_else(|| LowerError::MissingBuffer {
            tensor: t.name.clone(),
            space: space.name(),
        })?;
        Ok(self.graph.buffers.top_master(buffer).offset)
    }

    fn master_tensor(&self, id: TensorId, space: MemorySpace) -> Option<(TensorId, &'a Tensor)> {
        let buffer = self.graph.buffer(id, space)?;
        let master = self.graph.buffers.top_master(buffer).tensor;
        self.graph.tensor(master).ok().map(|t| (master, t))
    }

    fn aligned_shape(&self, t: &Tensor) -> Shape {
        let mut shape = t.shape;
        match t.alignment {
            Some(AlignAxis::Channel) => shape[DIM_C] = round_up(shape[DIM_C], self.target.channel_alignment),
            Some(AlignAxis::Width) => shape[DIM_W] = round_up(shape[DIM_W], self.target.width_alignment),
            None => {}
        }
        shape
    }

    #[allow(clippy::too_many_arguments)]
    fn reference(
        &self,
        name: String,
        t: &Tensor,
        dimensions: Vec<u32>,
        strides: Vec<u32>,
        locale: MemorySpace,
        locale_index: Vec<u32>,
        data: IndirectDataReference,
    ) -> TensorReference {
        let mut reference = TensorReference {
            name,
            dimensions,
            strides,
            locale,
            locale_index,
            data,
            data_dtype: t.dtype,
            quant_zero: Vec::new(),
            quant_scale: Vec::new(),
            quant_mult: Vec::new(),
            quant_shift: Vec::new(),
        };
        if let Some(q) = t.quantization.as_ref().filter(|q| !q.is_empty()) {
            reference.quant_zero = reduce(&q.zero_point.iter().map(|&z| z as i32).collect::<Vec<_>>());
            reference.quant_scale = reduce(&q.scale.iter().map(|&s| s as f32).collect::<Vec<_>>());
            reference.quant_mult = reduce(&q.mult);
            reference.quant_shift = reduce(&q.shift);
        }
        reference
    }
}

fn subtensor(t: &Tensor, k: usize) -> LowerResult<&SubTensor> {
    t.subtensor(k).ok_or_else(|| LowerError::MissingSubtensor {
        tensor: t.name.clone(),
        cluster: k,
    })
}

/// Whether each subtensor of constant `t` gets its own constant-pool entry.
///
/// Only SplitOverK constants are sliced. Sparse ones are packed per slice, and
/// byte-typed ones are sliced so the DMA engine can decompress each slice on
/// its own. Replicated constants keep a single entry.
pub fn pooled_per_cluster(t: &Tensor, target: &TargetConfig) -> bool {
    !t.subtensors.is_empty()
        && t.strategy == Some(SplitStrategy::SplitOverK)
        && (t.sparse || (t.dtype.is_byte_integer() && target.capabilities.hardware_decompression))
}

/// Collapse a vector whose elements are all equal into that one element.
pub fn reduce<T: PartialEq + Copy>(values: &[T]) -> Vec<T> {
    match values.first() {
        Some(&first) if values.iter().all(|&v| v == first) => vec![first],
        _ => values.to_vec(),
    }
}

/// Dimensions in wire order.
pub fn wire_dims(shape: &Shape) -> Vec<u32> {
    shape.iter().rev().map(|&d| d as u32).collect()
}

/// Dimensions and byte strides of `shape` laid out in `t`'s order, in wire order.
pub fn wire_layout(t: &Tensor, shape: &Shape) -> (Vec<u32>, Vec<u32>) {
    let elem = t.dtype.size_bytes();
    let mut strides: Vec<u32> = t
        .order
        .byte_strides(shape, elem)
        .iter()
        .map(|&s| s as u32)
        .collect();
    strides.push(elem as u32);
    strides.reverse();
    (wire_dims(shape), strides)
}

/// Bytes a full tensor or slice occupies when streamed without strides.
pub fn flat_bytes(t: &Tensor, sub: Option<&SubTensor>) -> u64 {
    let compressed = match sub {
        Some(s) => s.compressed_size,
        None => t.compressed_size,
    };
    compressed.unwrap_or_else(|| uncompressed_bytes(t, sub))
}

/// Like [`flat_bytes`], ignoring any compression the packer applied.
pub fn uncompressed_bytes(t: &Tensor, sub: Option<&SubTensor>) -> u64 {
    let elements = match (t.sparse, sub) {
        (true, Some(s)) => s.data.as_ref().map_or(s.element_count(), |d| d.len()),
        (true, None) => t.data.as_ref().map_or(t.element_count(), |d| d.len()),
        (false, Some(s)) => s.element_count(),
        (false, None) => element_count(&t.shape),
    };
    t.dtype.payload_bytes(elements)
}
