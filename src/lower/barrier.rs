//! Barrier producer/consumer counting.
//!
//! A barrier's counts are the number of times the runtime will see it
//! signalled or awaited, not the number of control edges: a logical op that
//! expands into many physical tasks signals once per task, and a DPU task
//! once per workload. [`physical_signal_count`] therefore reuses the DMA
//! pattern selection of the task expander instead of re-deriving it.

use super::expand::{dma_pattern, has_sparsity_companion};
use crate::core::error::{LowerError, LowerResult};
use crate::ir::{Graph, OpId, OpKind, SplitStrategy, TargetConfig};
use crate::schema::BarrierDescriptor;
use log::trace;

pub struct BarrierGraphBuilder<'a> {
    graph: &'a Graph,
    target: &'a TargetConfig,
}

impl<'a> BarrierGraphBuilder<'a> {
    pub fn new(graph: &'a Graph, target: &'a TargetConfig) -> Self {
        Self { graph, target }
    }

    /// Descriptor of the barrier configured by `barrier_op`.
    pub fn build_barrier(&self, barrier_op: OpId) -> LowerResult<BarrierDescriptor> {
        let op = self.graph.op(barrier_op)?;
        let barrier = match &op.kind {
            OpKind::BarrierControl(barrier) => *barrier,
            other => {
                return Err(LowerError::unsupported(
                    &op.name,
                    format!("{} op does not configure a barrier", other.tag()),
                ))
            }
        };

        let mut producer_count = 0;
        for parent in self.graph.control_parents(barrier_op) {
            producer_count += physical_signal_count(self.graph, self.target, parent)?;
        }
        let mut consumer_count = 0;
        for child in self.graph.control_children(barrier_op) {
            consumer_count += physical_signal_count(self.graph, self.target, child)?;
        }
        trace!(
            "Barrier {} ({}): {} producers, {} consumers",
            barrier.index,
            op.name,
            producer_count,
            consumer_count
        );

        Ok(BarrierDescriptor {
            barrier_id: barrier.index,
            producer_count: producer_count as u32,
            consumer_count: consumer_count as u32,
        })
    }

    /// Descriptors of every barrier in the graph, ascending by index.
    pub fn barrier_table(&self) -> LowerResult<Vec<BarrierDescriptor>> {
        let mut table = Vec::new();
        for id in self.graph.op_ids() {
            if let OpKind::BarrierControl(_) = self.graph.op(id)?.kind {
                table.push(self.build_barrier(id)?);
            }
        }
        table.sort_by_key(|b| b.barrier_id);
        Ok(table)
    }
}

/// Times the tasks expanded from `id` signal (or await) one adjacent barrier.
///
/// DMA and UPA tasks signal once each. DPU tasks signal once per workload.
pub fn physical_signal_count(graph: &Graph, target: &TargetConfig, id: OpId) -> LowerResult<usize> {
    let op = graph.op(id)?;
    let count = match &op.kind {
        OpKind::Dma(attrs) => {
            let src_id = op
                .inputs
                .first()
                .ok_or_else(|| LowerError::missing(&op.name, "source tensor"))?;
            let src = graph.tensor(*src_id)?;
            let tasks = dma_pattern(src, attrs, target.clusters).task_count(target.clusters);
            if has_sparsity_companion(src) {
                tasks * 2
            } else {
                tasks
            }
        }
        OpKind::Nce(nce) => {
            let strategy = nce.strategy.ok_or_else(|| LowerError::missing(&op.name, "split strategy"))?;
            let shared = nce
                .workloads
                .first()
                .ok_or_else(|| LowerError::missing(&op.name, "workloads"))?;
            if target.clusters == 1 {
                shared.len()
            } else if strategy == SplitStrategy::Clustering {
                shared.len() * target.clusters
            } else {
                (0..target.clusters)
                    .map(|k| {
                        nce.workloads
                            .get(k)
                            .map(Vec::len)
                            .ok_or_else(|| LowerError::missing(&op.name, "workloads"))
                    })
                    .sum::<LowerResult<usize>>()?
            }
        }
        OpKind::Upa(_) => 1,
        OpKind::Input | OpKind::Output | OpKind::Constant | OpKind::BarrierControl(_) | OpKind::Controller => 0,
    };
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        DType, DmaAttrs, DmaDirection, DpuTaskType, GraphBuilder, MpeMode, NceAttrs, Op, Order,
        SoftwareLayer, Tensor, Workload,
    };

    fn rows(y0: usize, y1: usize) -> Workload {
        Workload::new((0, 15), (y0, y1), (0, 15), MpeMode::Matrix)
    }

    #[test]
    fn test_counts_follow_expansion() {
        let target = TargetConfig::default().with_clusters(2);
        let mut b = GraphBuilder::new("g");
        let a = b.tensor(Tensor::new("a", [16, 8, 16, 1], DType::UInt8, Order::Z_MAJOR));
        let c = b.tensor(Tensor::new("c", [16, 8, 16, 1], DType::UInt8, Order::Z_MAJOR));
        let d = b.tensor(Tensor::new("d", [16, 8, 16, 1], DType::UInt8, Order::Z_MAJOR));

        let dma = b.op(Op::dma(
            "dma",
            a,
            c,
            DmaAttrs::new(DmaDirection::DdrToCmx).with_strategy(SplitStrategy::SplitOverH),
        ));
        let nce = b.op(Op::nce(
            "pool",
            c,
            d,
            NceAttrs::new(DpuTaskType::Identity)
                .with_strategy(SplitStrategy::SplitOverH)
                .with_workloads(vec![vec![rows(0, 1), rows(2, 3)], vec![rows(4, 7)]]),
        ));
        let upa = b.op(Op::upa("softmax", vec![d], vec![], SoftwareLayer::Dummy));
        let barrier = b.barrier(0);
        b.signals(dma, barrier);
        b.signals(nce, barrier);
        b.waits(barrier, upa);
        let g = b.build();

        assert_eq!(physical_signal_count(&g, &target, dma).unwrap(), 2);
        assert_eq!(physical_signal_count(&g, &target, nce).unwrap(), 3);
        let descriptor = BarrierGraphBuilder::new(&g, &target).build_barrier(barrier).unwrap();
        assert_eq!(
            descriptor,
            BarrierDescriptor { barrier_id: 0, producer_count: 5, consumer_count: 1 }
        );
    }

    #[test]
    fn test_table_sorted_by_index() {
        let target = TargetConfig::default();
        let mut b = GraphBuilder::new("g");
        b.barrier(3);
        b.barrier(1);
        b.barrier(2);
        let g = b.build();
        let ids: Vec<u32> = BarrierGraphBuilder::new(&g, &target)
            .barrier_table()
            .unwrap()
            .iter()
            .map(|d| d.barrier_id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_missing_strategy_is_reported() {
        let target = TargetConfig::default();
        let mut b = GraphBuilder::new("g");
        let a = b.tensor(Tensor::new("a", [16, 8, 16, 1], DType::UInt8, Order::Z_MAJOR));
        let c = b.tensor(Tensor::new("c", [16, 8, 16, 1], DType::UInt8, Order::Z_MAJOR));
        let nce = b.op(Op::nce("conv", a, c, NceAttrs::new(DpuTaskType::Identity)));
        let g = b.build();
        let err = physical_signal_count(&g, &target, nce).unwrap_err();
        assert!(err.to_string().contains("split strategy"));
    }
}
