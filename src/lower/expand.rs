// This module expands one logical op of the scheduled graph into the physical hardware tasks
// the runtime dispatches. Dispatch is an exhaustive match over OpKind. DMA ops pick one of
// four transfer patterns from their strategy and the source tensor: a single whole-tensor
// move, a full copy per cluster, a single broadcast to every cluster, or one subtensor move
// per cluster. Populated sparse sources add a companion task for their sparsity map.
// Compute ops become one task per cluster; under Clustering the invariant is built once and
// only the locale of each role reference changes between clusters. Software layers and
// barrier configuration stay one task each. The pattern choice is exposed through
// dma_pattern and has_sparsity_companion so barrier counting predicts exactly what this
// module emits.

//! Expansion of logical ops into physical tasks.

use super::address::{flat_bytes, uncompressed_bytes, AddressResolver};
use super::barrier::BarrierGraphBuilder;
use super::workload::{validate_tiling, WorkloadFieldBuilder};
use crate::core::error::{LowerError, LowerResult};
use crate::core::session::LoweringSession;
use crate::ir::{
    DType, DmaAttrs, Graph, MemorySpace, NceAttrs, Op, OpId, OpKind, SplitStrategy, SubTensor,
    TargetConfig, Tensor, TensorId, UpaAttrs,
};
use crate::schema::{
    BarrierReference, DmaTask, NceTask, SpecificTask, Task, TensorReference, UpaLayerTask,
};
use log::{debug, trace};

/// Transfer pattern of a DMA op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaPattern {
    /// One task moving the whole tensor.
    Single,
    /// One task per cluster, each moving the whole tensor.
    PerClusterFull,
    /// One task writing every cluster at once.
    Broadcast,
    /// One task per cluster, each moving that cluster's subtensor.
    PerClusterSplit,
}

impl DmaPattern {
    /// Physical tasks the pattern emits, companions excluded.
    pub fn task_count(self, clusters: usize) -> usize {
        match self {
            DmaPattern::Single | DmaPattern::Broadcast => 1,
            DmaPattern::PerClusterFull | DmaPattern::PerClusterSplit => clusters,
        }
    }
}

/// Pattern a DMA moving `src` under `attrs` expands to.
pub fn dma_pattern(src: &Tensor, attrs: &DmaAttrs, clusters: usize) -> DmaPattern {
    let strategy = match attrs.strategy {
        Some(strategy) if clusters > 1 => strategy,
        _ => return DmaPattern::Single,
    };
    if src.broadcast || (strategy == SplitStrategy::Clustering && src.is_populated()) {
        DmaPattern::Broadcast
    } else if strategy == SplitStrategy::Clustering {
        DmaPattern::PerClusterFull
    } else {
        DmaPattern::PerClusterSplit
    }
}

/// Whether every transfer of `src` is paired with one for its sparsity map.
pub fn has_sparsity_companion(src: &Tensor) -> bool {
    src.sparse && src.is_populated()
}

/// Expands logical ops into physical tasks.
pub struct TaskExpander<'a, 'arena> {
    graph: &'a Graph,
    target: &'a TargetConfig,
    session: &'a LoweringSession<'arena>,
    resolver: AddressResolver<'a, 'arena>,
    fields: WorkloadFieldBuilder<'a, 'arena>,
}

impl<'a, 'arena> TaskExpander<'a, 'arena> {
    pub fn new(graph: &'a Graph, target: &'a TargetConfig, session: &'a LoweringSession<'arena>) -> Self {
        let resolver = AddressResolver::new(graph, target, session);
        Self {
            graph,
            target,
            session,
            resolver,
            fields: WorkloadFieldBuilder::new(graph, target, resolver),
        }
    }

    /// Physical tasks of `id`, with node ids left at zero.
    ///
    /// Input, output and constant ops produce no tasks.
    pub fn expand(&self, id: OpId) -> LowerResult<Vec<Task>> {
        let op = self.graph.op(id)?;
        self.session.set_current_op(&op.name);

        let payloads = match &op.kind {
            OpKind::Input | OpKind::Output | OpKind::Constant => return Ok(Vec::new()),
            OpKind::Dma(attrs) => self.expand_dma(op, attrs)?,
            OpKind::Nce(nce) => self.expand_nce(op, nce)?,
            OpKind::Upa(upa) => vec![(op.name.clone(), self.expand_upa(op, upa)?)],
            OpKind::BarrierControl(_) => {
                let descriptor = BarrierGraphBuilder::new(self.graph, self.target).build_barrier(id)?;
                self.session.record_barrier();
                vec![(op.name.clone(), SpecificTask::BarrierConfiguration(descriptor))]
            }
            OpKind::Controller => {
                return Err(LowerError::unsupported(&op.name, "controller tasks have no lowering rule"));
            }
        };

        let barriers = match (&op.kind, &op.barrier_deps) {
            (OpKind::BarrierControl(_), _) | (_, None) => BarrierReference::default(),
            (_, Some(deps)) => BarrierReference {
                wait_barriers: deps.wait.clone(),
                update_barriers: deps.update.clone(),
            },
        };

        let tasks: Vec<Task> = payloads
            .into_iter()
            .map(|(name, task)| Task {
                name,
                node_id: 0,
                source_task_ids: vec![id.0],
                associated_barriers: barriers.clone(),
                task,
            })
            .collect();

        for task in &tasks {
            trace!("  {} task {}", task.task.engine(), task.name);
        }
        let engine = tasks.first().map_or("none", |t| t.task.engine());
        debug!("Lowered {} '{}' into {} {} task(s)", op.kind.tag(), op.name, tasks.len(), engine);
        self.session.record_op_lowered(engine, tasks.len());
        Ok(tasks)
    }

    fn expand_dma(&self, op: &Op, attrs: &DmaAttrs) -> LowerResult<Vec<(String, SpecificTask)>> {
        let src_id = first(&op.inputs, op, "source tensor")?;
        let dst_id = first(&op.outputs, op, "destination tensor")?;
        let src = self.graph.tensor(src_id)?;
        let dst = self.graph.tensor(dst_id)?;
        let clusters = self.target.clusters;
        let companion = has_sparsity_companion(src);

        let mut tasks = Vec::new();
        match dma_pattern(src, attrs, clusters) {
            DmaPattern::Single => {
                tasks.push((op.name.clone(), self.transfer(attrs, (src_id, None), (dst_id, None), None)?));
                if companion {
                    let (src_map, dst_map) = self.sparsity_maps(src, dst)?;
                    tasks.push((
                        format!("{}_map", op.name),
                        self.map_transfer(attrs, src_map, dst_map, None, None)?,
                    ));
                }
            }
            DmaPattern::PerClusterFull => {
                for k in 0..clusters {
                    let mut src_ref = self.resolver.resolve(src_id, None, None)?;
                    let mut dst_ref = self.resolver.resolve(dst_id, None, None)?;
                    for side in [&mut src_ref, &mut dst_ref] {
                        if side.locale.is_cmx() {
                            side.locale_index = vec![k as u32];
                        }
                    }
                    let name = self.session.subtensor_name(&op.name, k).to_string();
                    tasks.push((name, self.dma_task(attrs, src_ref, dst_ref, src, None)));
                }
            }
            DmaPattern::Broadcast => {
                let all: Vec<u32> = (0..clusters as u32).rev().collect();
                tasks.push((
                    op.name.clone(),
                    self.transfer(attrs, (src_id, None), (dst_id, None), Some(&all))?,
                ));
                if companion {
                    let (src_map, dst_map) = self.sparsity_maps(src, dst)?;
                    tasks.push((
                        format!("{}_map", op.name),
                        self.map_transfer(attrs, src_map, dst_map, None, Some(&all))?,
                    ));
                }
            }
            DmaPattern::PerClusterSplit => {
                for k in 0..clusters {
                    let name = self.session.subtensor_name(&op.name, k).to_string();
                    tasks.push((
                        name.clone(),
                        self.transfer(attrs, (src_id, Some(k)), (dst_id, Some(k)), None)?,
                    ));
                    if companion {
                        let (src_map, dst_map) = self.sparsity_maps(src, dst)?;
                        tasks.push((
                            format!("{}_map", name),
                            self.map_transfer(attrs, src_map, dst_map, Some(k), None)?,
                        ));
                    }
                }
            }
        }
        Ok(tasks)
    }

    /// Transfer between two tensors, optionally sliced and broadcast.
    fn transfer(
        &self,
        attrs: &DmaAttrs,
        (src_id, src_k): (TensorId, Option<usize>),
        (dst_id, dst_k): (TensorId, Option<usize>),
        broadcast: Option<&[u32]>,
    ) -> LowerResult<SpecificTask> {
        let src = self.graph.tensor(src_id)?;
        let src_ref = self.resolver.resolve(src_id, src_k, None)?;
        let mut dst_ref = self.resolver.resolve(dst_id, dst_k, None)?;
        if let (Some(all), true) = (broadcast, dst_ref.locale.is_cmx()) {
            dst_ref.locale_index = all.to_vec();
        }
        let sub = src_k.and_then(|k| src.subtensor(k));
        Ok(self.dma_task(attrs, src_ref, dst_ref, src, sub))
    }

    /// Sparsity-map transfer from the constant pool into NN CMX.
    fn map_transfer(
        &self,
        attrs: &DmaAttrs,
        src_map: TensorId,
        dst_map: TensorId,
        cluster: Option<usize>,
        broadcast: Option<&[u32]>,
    ) -> LowerResult<SpecificTask> {
        let map = self.graph.tensor(src_map)?;
        let src_ref = self.resolver.resolve(src_map, cluster, Some(MemorySpace::GraphFile))?;
        let mut dst_ref = self.resolver.resolve(dst_map, cluster, Some(MemorySpace::CmxNn))?;
        if let Some(all) = broadcast {
            dst_ref.locale_index = all.to_vec();
        }
        let sub = cluster.and_then(|k| map.subtensor(k));
        Ok(self.dma_task(attrs, src_ref, dst_ref, map, sub))
    }

    fn sparsity_maps(&self, src: &Tensor, dst: &Tensor) -> LowerResult<(TensorId, TensorId)> {
        let map_of = |t: &Tensor| {
            t.sparsity_map.ok_or_else(|| LowerError::MissingSparsityMap {
                tensor: t.name.clone(),
                what: "sparsity map",
            })
        };
        Ok((map_of(src)?, map_of(dst)?))
    }

    /// Final DMA payload; constant-pool reads are streamed as flat bytes.
    fn dma_task(
        &self,
        attrs: &DmaAttrs,
        mut src: TensorReference,
        mut dst: TensorReference,
        src_tensor: &Tensor,
        sub: Option<&SubTensor>,
    ) -> SpecificTask {
        let collapsed = src.locale == MemorySpace::GraphFile;
        if collapsed {
            collapse(&mut src, flat_bytes(src_tensor, sub));
            collapse(&mut dst, uncompressed_bytes(src_tensor, sub));
        }
        let compression = if collapsed && self.target.capabilities.hardware_decompression {
            src.dimensions[0] != dst.dimensions[0]
        } else {
            attrs.compression
        };
        SpecificTask::Dma(DmaTask { src, dst, compression })
    }

    fn expand_nce(&self, op: &Op, nce: &NceAttrs) -> LowerResult<Vec<(String, SpecificTask)>> {
        let strategy = nce.strategy.ok_or_else(|| LowerError::missing(&op.name, "split strategy"))?;
        let clusters = self.target.clusters;
        let shared = nce
            .workloads
            .first()
            .ok_or_else(|| LowerError::missing(&op.name, "workloads"))?;

        if clusters == 1 {
            let invariant = self.fields.build_invariant(op, nce, None)?;
            let variants = shared
                .iter()
                .map(|w| self.fields.build_variant(w, op, nce, None))
                .collect::<LowerResult<Vec<_>>>()?;
            return Ok(vec![(op.name.clone(), SpecificTask::Nce(NceTask { invariant, variants }))]);
        }

        let mut tasks = Vec::with_capacity(clusters);
        if strategy == SplitStrategy::Clustering {
            let invariant = self.fields.build_invariant(op, nce, None)?;
            let variants = shared
                .iter()
                .map(|w| self.fields.build_variant(w, op, nce, None))
                .collect::<LowerResult<Vec<_>>>()?;
            let everyone: Vec<u32> = (0..clusters as u32).rev().collect();

            for k in 0..clusters {
                let here = vec![k as u32];
                let mut invariant = invariant.clone();
                invariant.input_data.locale_index = here.clone();
                invariant.output_data.locale_index = if nce.multicast { everyone.clone() } else { here.clone() };
                for role in [
                    &mut invariant.weights_data,
                    &mut invariant.weights_table,
                    &mut invariant.activation_window,
                ]
                .into_iter()
                .flatten()
                {
                    role.locale_index = here.clone();
                }
                let name = self.session.subtensor_name(&op.name, k).to_string();
                tasks.push((name, SpecificTask::Nce(NceTask { invariant, variants: variants.clone() })));
            }
            return Ok(tasks);
        }

        let output_id = first(&op.outputs, op, "output tensor")?;
        let output = self.graph.tensor(output_id)?;
        for k in 0..clusters {
            let workloads = nce
                .workloads
                .get(k)
                .ok_or_else(|| LowerError::missing(&op.name, "workloads"))?;
            let sub = output.subtensor(k).ok_or_else(|| LowerError::MissingSubtensor {
                tensor: output.name.clone(),
                cluster: k,
            })?;
            validate_tiling(workloads, &sub.offset, &sub.shape).map_err(|reason| LowerError::InvalidTiling {
                op: op.name.clone(),
                cluster: k,
                reason,
            })?;

            let invariant = self.fields.build_invariant(op, nce, Some(k))?;
            let variants = workloads
                .iter()
                .map(|w| self.fields.build_variant(w, op, nce, Some(k)))
                .collect::<LowerResult<Vec<_>>>()?;
            let name = self.session.subtensor_name(&op.name, k).to_string();
            tasks.push((name, SpecificTask::Nce(NceTask { invariant, variants })));
        }
        Ok(tasks)
    }

    fn expand_upa(&self, op: &Op, upa: &UpaAttrs) -> LowerResult<SpecificTask> {
        let resolve_all = |ids: &[TensorId]| {
            ids.iter()
                .map(|&t| self.resolver.resolve(t, None, None))
                .collect::<LowerResult<Vec<_>>>()
        };
        Ok(SpecificTask::Upa(UpaLayerTask {
            layer: upa.layer.clone(),
            inputs: resolve_all(&op.inputs)?,
            outputs: resolve_all(&op.outputs)?,
        }))
    }
}

fn first(ids: &[TensorId], op: &Op, what: &'static str) -> LowerResult<TensorId> {
    ids.first().copied().ok_or_else(|| LowerError::missing(&op.name, what))
}

/// Rewrite a reference as a flat run of `bytes` bytes.
fn collapse(reference: &mut TensorReference, bytes: u64) {
    reference.dimensions = vec![bytes as u32, 1, 1, 1];
    reference.strides = vec![1; 5];
    reference.data_dtype = DType::UInt8;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{DmaDirection, Order};

    fn activation() -> Tensor {
        Tensor::new("a", [16, 16, 16, 1], DType::UInt8, Order::Z_MAJOR)
    }

    #[test]
    fn test_dma_patterns() {
        let clustering = DmaAttrs::new(DmaDirection::DdrToCmx).with_strategy(SplitStrategy::Clustering);
        let soh = DmaAttrs::new(DmaDirection::DdrToCmx).with_strategy(SplitStrategy::SplitOverH);
        let plain = DmaAttrs::new(DmaDirection::DdrToCmx);

        assert_eq!(dma_pattern(&activation(), &plain, 4), DmaPattern::Single);
        assert_eq!(dma_pattern(&activation(), &soh, 1), DmaPattern::Single);
        assert_eq!(dma_pattern(&activation(), &clustering, 4), DmaPattern::PerClusterFull);
        assert_eq!(dma_pattern(&activation(), &soh, 4), DmaPattern::PerClusterSplit);
        assert_eq!(dma_pattern(&activation().broadcast(), &soh, 4), DmaPattern::Broadcast);
        assert_eq!(
            dma_pattern(&activation().with_data(vec![0; 4096]), &clustering, 4),
            DmaPattern::Broadcast
        );
    }

    #[test]
    fn test_pattern_counts() {
        assert_eq!(DmaPattern::Single.task_count(4), 1);
        assert_eq!(DmaPattern::Broadcast.task_count(4), 1);
        assert_eq!(DmaPattern::PerClusterFull.task_count(4), 4);
        assert_eq!(DmaPattern::PerClusterSplit.task_count(3), 3);
    }

    #[test]
    fn test_companion_needs_populated_sparse_source() {
        let mut t = activation();
        t.sparse = true;
        assert!(!has_sparsity_companion(&t));
        assert!(has_sparsity_companion(&t.with_data(vec![1; 16])));
    }
}
