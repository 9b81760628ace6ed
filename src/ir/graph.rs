//! The scheduled graph consumed by lowering.
//!
//! Data adjacency is implicit in op inputs/outputs; control adjacency is an
//! explicit edge list connecting task ops to the barriers they signal and
//! barriers to the ops that wait on them.

use super::memory::{Buffer, BufferArena, BufferId, MemorySpace};
use super::op::{Barrier, BarrierDeps, Op, OpId, OpKind};
use super::tensor::{Tensor, TensorId};
use crate::core::error::{LowerError, LowerResult};

#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub name: String,
    pub tensors: Vec<Tensor>,
    pub ops: Vec<Op>,
    pub buffers: BufferArena,
    /// Control-flow edges (from, to).
    pub control_edges: Vec<(OpId, OpId)>,
}

impl Graph {
    pub fn tensor(&self, id: TensorId) -> LowerResult<&Tensor> {
        self.tensors
            .get(id.0 as usize)
            .ok_or(LowerError::UnknownTensor { id: id.0 })
    }

    pub fn tensor_mut(&mut self, id: TensorId) -> LowerResult<&mut Tensor> {
        self.tensors
            .get_mut(id.0 as usize)
            .ok_or(LowerError::UnknownTensor { id: id.0 })
    }

    pub fn op(&self, id: OpId) -> LowerResult<&Op> {
        self.ops
            .get(id.0 as usize)
            .ok_or(LowerError::UnknownOp { id: id.0 })
    }

    pub fn op_ids(&self) -> impl Iterator<Item = OpId> {
        (0..self.ops.len() as u32).map(OpId)
    }

    pub fn buffer(&self, tensor: TensorId, space: MemorySpace) -> Option<&Buffer> {
        self.buffers.lookup(tensor, space)
    }

    /// Ops with a control edge into `op`.
    pub fn control_parents(&self, op: OpId) -> impl Iterator<Item = OpId> + '_ {
        self.control_edges
            .iter()
            .filter(move |(_, to)| *to == op)
            .map(|(from, _)| *from)
    }

    /// Ops with a control edge out of `op`.
    pub fn control_children(&self, op: OpId) -> impl Iterator<Item = OpId> + '_ {
        self.control_edges
            .iter()
            .filter(move |(from, _)| *from == op)
            .map(|(_, to)| *to)
    }

    /// Op producing `tensor`, if any.
    pub fn producer(&self, tensor: TensorId) -> Option<OpId> {
        self.op_ids()
            .find(|&id| self.ops[id.0 as usize].outputs.contains(&tensor))
    }

    /// Data-graph parents of `op`.
    pub fn data_parents(&self, op: OpId) -> Vec<OpId> {
        let mut parents: Vec<OpId> = Vec::new();
        for parent in self.ops[op.0 as usize].inputs.iter().filter_map(|&t| self.producer(t)) {
            if !parents.contains(&parent) {
                parents.push(parent);
            }
        }
        parents
    }

    /// Data-graph children of `op`.
    pub fn data_children(&self, op: OpId) -> Vec<OpId> {
        let outputs = &self.ops[op.0 as usize].outputs;
        self.op_ids()
            .filter(|&id| {
                self.ops[id.0 as usize]
                    .inputs
                    .iter()
                    .any(|t| outputs.contains(t))
            })
            .collect()
    }
}

/// Incremental construction of a [`Graph`].
#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            graph: Graph {
                name: name.into(),
                ..Graph::default()
            },
        }
    }

    pub fn tensor(&mut self, tensor: Tensor) -> TensorId {
        let id = TensorId(self.graph.tensors.len() as u32);
        self.graph.tensors.push(tensor);
        id
    }

    /// Allocate `tensor` at `offset` in `space`.
    pub fn buffer(&mut self, tensor: TensorId, space: MemorySpace, offset: u64) -> BufferId {
        let size = self
            .graph
            .tensors
            .get(tensor.0 as usize)
            .map(|t| t.dtype.payload_bytes(t.element_count()))
            .unwrap_or(0);
        self.graph.buffers.add(Buffer::new(tensor, space, offset, size))
    }

    pub fn add_buffer(&mut self, buffer: Buffer) -> BufferId {
        self.graph.buffers.add(buffer)
    }

    pub fn op(&mut self, op: Op) -> OpId {
        let id = OpId(self.graph.ops.len() as u32);
        self.graph.ops.push(op);
        id
    }

    pub fn barrier(&mut self, index: u32) -> OpId {
        self.op(Op::new(
            format!("BarrierTask_{}", index),
            OpKind::BarrierControl(Barrier { index }),
            Vec::new(),
            Vec::new(),
        ))
    }

    /// `producer` signals `barrier` when done.
    pub fn signals(&mut self, producer: OpId, barrier: OpId) {
        if let Some(index) = self.barrier_index(barrier) {
            self.graph.control_edges.push((producer, barrier));
            if let Some(op) = self.graph.ops.get_mut(producer.0 as usize) {
                op.barrier_deps
                    .get_or_insert_with(BarrierDeps::default)
                    .update
                    .push(index);
            }
        }
    }

    /// `consumer` waits on `barrier` before starting.
    pub fn waits(&mut self, barrier: OpId, consumer: OpId) {
        if let Some(index) = self.barrier_index(barrier) {
            self.graph.control_edges.push((barrier, consumer));
            if let Some(op) = self.graph.ops.get_mut(consumer.0 as usize) {
                op.barrier_deps
                    .get_or_insert_with(BarrierDeps::default)
                    .wait
                    .push(index);
            }
        }
    }

    fn barrier_index(&self, barrier: OpId) -> Option<u32> {
        match self.graph.ops.get(barrier.0 as usize).map(|op| &op.kind) {
            Some(OpKind::BarrierControl(b)) => Some(b.index),
            _ => None,
        }
    }

    pub fn tensor_mut(&mut self, id: TensorId) -> Option<&mut Tensor> {
        self.graph.tensors.get_mut(id.0 as usize)
    }

    pub fn build(self) -> Graph {
        self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{DType, DmaAttrs, DmaDirection, Order, SoftwareLayer};

    #[test]
    fn test_barrier_wiring() {
        let mut b = GraphBuilder::new("g");
        let src = b.tensor(Tensor::new("a", [4, 4, 16, 1], DType::UInt8, Order::Z_MAJOR));
        let dst = b.tensor(Tensor::new("b", [4, 4, 16, 1], DType::UInt8, Order::Z_MAJOR));
        let dma = b.op(Op::dma("dma", src, dst, DmaAttrs::new(DmaDirection::DdrToCmx)).scheduled(0));
        let bar = b.barrier(7);
        let out = b.op(Op::output("out", dst));
        b.signals(dma, bar);
        b.waits(bar, out);
        let g = b.build();

        assert_eq!(g.ops[dma.0 as usize].barrier_deps.as_ref().unwrap().update, vec![7]);
        assert_eq!(g.ops[out.0 as usize].barrier_deps.as_ref().unwrap().wait, vec![7]);
        assert_eq!(g.control_parents(bar).collect::<Vec<_>>(), vec![dma]);
        assert_eq!(g.control_children(bar).collect::<Vec<_>>(), vec![out]);
        assert_eq!(g.data_children(dma), vec![out]);
        assert_eq!(g.producer(dst), Some(dma));
        assert!(g.tensor(TensorId(9)).is_err());
    }

    #[test]
    fn test_data_parents_listed_once_in_input_order() {
        let mut b = GraphBuilder::new("g");
        let [x, x2, y, z] =
            ["x", "x2", "y", "z"].map(|name| b.tensor(Tensor::new(name, [4, 4, 16, 1], DType::UInt8, Order::Z_MAJOR)));
        let split = b.op(Op::upa("split", vec![], vec![x, x2], SoftwareLayer::Passthrough));
        let other = b.op(Op::upa("other", vec![], vec![y], SoftwareLayer::Passthrough));
        let join = b.op(Op::upa("join", vec![x, y, x2], vec![z], SoftwareLayer::Dummy));
        let g = b.build();

        assert_eq!(g.data_parents(join), vec![split, other]);
        assert_eq!(g.data_children(split), vec![join]);
    }
}
