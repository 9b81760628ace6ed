// This module converts the workload partitioning of a DPU op into hardware descriptor fields.
// The invariant descriptor is built once per physical task: task type, PPE fixed function,
// dominant MPE mode of the cluster's workloads, kernel geometry with its padding, and the
// resolved input/output/weights/weights-table/activation-window references. Each workload
// then becomes a variant with its box and padding. Padding on an output edge survives only
// where the workload (and its cluster's slice) touches the true edge of the whole output;
// interior edges adjoining another cluster or workload get zero. Channel-major convolutions,
// and depthwise convolutions hit by the odd-top-padding erratum under height splitting,
// additionally get cluster-corrected kernel padding on the invariant.

//! DPU invariant and variant field construction.

use super::address::{wire_layout, AddressResolver};
use crate::core::error::{LowerError, LowerResult};
use crate::ir::{
    round_up, AlignAxis, DpuTaskType, Graph, MpeMode, NceAttrs, Op, Padding, PpeAttrs, PpeLayerType,
    Shape, SplitStrategy, SubTensor, TargetConfig, Tensor, TensorId, Workload, DIM_C, DIM_H, DIM_W,
};
use crate::schema::{NceInvariantFields, NceVariantFields, PpeFixedFunction, TensorReference};

/// Builds DPU invariant and variant descriptors.
pub struct WorkloadFieldBuilder<'a, 'arena> {
    graph: &'a Graph,
    target: &'a TargetConfig,
    resolver: AddressResolver<'a, 'arena>,
}

impl<'a, 'arena> WorkloadFieldBuilder<'a, 'arena> {
    pub fn new(graph: &'a Graph, target: &'a TargetConfig, resolver: AddressResolver<'a, 'arena>) -> Self {
        Self { graph, target, resolver }
    }

    /// Variant fields of one workload, for the task running on `cluster`.
    pub fn build_variant(
        &self,
        workload: &Workload,
        op: &Op,
        nce: &NceAttrs,
        cluster: Option<usize>,
    ) -> LowerResult<NceVariantFields> {
        let output = self.graph.tensor(output_of(op)?)?;

        let padding = if nce.task == DpuTaskType::Eltwise {
            Padding::default()
        } else {
            let cp = match cluster {
                Some(k) => cluster_padding(nce.padding, output, subtensor(output, k)?),
                None => nce.padding,
            };
            Padding {
                left: if workload.min_x == 0 { cp.left } else { 0 },
                right: if workload.max_x + 1 == output.shape[DIM_W] { cp.right } else { 0 },
                top: if workload.min_y == 0 { cp.top } else { 0 },
                bottom: if workload.max_y + 1 == output.shape[DIM_H] { cp.bottom } else { 0 },
            }
        };

        let mut end_x = workload.max_x;
        let mut end_z = workload.max_z;
        match output.alignment {
            Some(AlignAxis::Channel) if workload.max_z + 1 == output.shape[DIM_C] => {
                end_z = round_up(output.shape[DIM_C], self.target.channel_alignment) - 1;
            }
            Some(AlignAxis::Width) if workload.max_x + 1 == output.shape[DIM_W] => {
                end_x = round_up(output.shape[DIM_W], self.target.width_alignment) - 1;
            }
            _ => {}
        }

        Ok(NceVariantFields {
            mpe_mode: workload.mpe_mode,
            padding_left: padding.left,
            padding_right: padding.right,
            padding_top: padding.top,
            padding_bottom: padding.bottom,
            workload_start_x: workload.min_x as u32,
            workload_start_y: workload.min_y as u32,
            workload_start_z: workload.min_z as u32,
            workload_end_x: end_x as u32,
            workload_end_y: workload.max_y as u32,
            workload_end_z: end_z as u32,
        })
    }

    /// Invariant fields of the task running on `cluster`, or of the shared
    /// descriptor when `cluster` is `None`.
    pub fn build_invariant(&self, op: &Op, nce: &NceAttrs, cluster: Option<usize>) -> LowerResult<NceInvariantFields> {
        let strategy = nce.strategy.ok_or_else(|| LowerError::missing(&op.name, "split strategy"))?;
        let input_id = *op
            .inputs
            .first()
            .ok_or_else(|| LowerError::missing(&op.name, "input tensor"))?;
        let output_id = output_of(op)?;

        let workloads = match cluster {
            Some(k) => nce.workloads.get(k),
            None => nce.workloads.first(),
        }
        .ok_or_else(|| LowerError::missing(&op.name, "workloads"))?;

        let input_data = match cluster {
            Some(k) if strategy == SplitStrategy::SplitOverK => {
                let mut input = self.resolver.resolve(input_id, None, None)?;
                input.locale_index = vec![k as u32];
                input
            }
            _ => self.resolver.resolve(input_id, cluster, None)?,
        };

        let mut output_data = self.resolver.resolve(output_id, cluster, None)?;
        if let (Some(k), true) = (cluster, nce.multicast) {
            self.multicast(&mut output_data, output_id, strategy, k)?;
        }

        let mut parent_input_tensor = self.resolver.resolve(input_id, None, None)?;
        strip_sparsity(&mut parent_input_tensor);
        let mut parent_output_tensor = self.resolver.resolve(output_id, None, None)?;
        strip_sparsity(&mut parent_output_tensor);

        let weights_data = if nce.task.has_weights() {
            let weights = nce.weights.ok_or_else(|| LowerError::missing(&op.name, "weights"))?;
            Some(self.resolver.resolve(weights, cluster, None)?)
        } else {
            None
        };
        let weights_table = match nce.weights_table {
            Some(table) if nce.task.has_weights_table() => Some(self.resolver.resolve(table, cluster, None)?),
            _ => None,
        };
        let activation_window = if nce.task.has_activation_window() {
            let window = nce
                .activation_window
                .ok_or_else(|| LowerError::missing(&op.name, "activation window"))?;
            Some(self.resolver.resolve(window, cluster, None)?)
        } else {
            None
        };

        let padding = match cluster {
            Some(k) if nce.task == DpuTaskType::ChannelMajorConvolution || depthwise_erratum(nce) => {
                corrected_padding(nce.padding, k, self.target.clusters)
            }
            _ => nce.padding,
        };

        let out_channel_offset = match cluster {
            Some(k) if strategy == SplitStrategy::SplitOverK && self.target.capabilities.out_channel_offset => {
                let output = self.graph.tensor(output_id)?;
                output.subtensors.iter().take(k).map(|s| s.shape[DIM_C] as u32).sum()
            }
            _ => 0,
        };

        Ok(NceInvariantFields {
            dpu_task_type: nce.task,
            ppe_task: build_ppe(&nce.ppe),
            mpe_frequent_mode: frequent_mode(workloads),
            kernel_w: nce.kernel[0],
            kernel_h: nce.kernel[1],
            kernel_stride_w: nce.stride[0],
            kernel_stride_h: nce.stride[1],
            kernel_pad_left: padding.left,
            kernel_pad_right: padding.right,
            kernel_pad_top: padding.top,
            kernel_pad_bottom: padding.bottom,
            input_data,
            output_data,
            parent_input_tensor,
            parent_output_tensor,
            weights_data,
            weights_table,
            activation_window,
            activation_window_channel_length: nce.activation_window_channel_length,
            out_channel_offset,
        })
    }

    /// Point a cluster's output at the shared buffer every cluster writes into.
    fn multicast(
        &self,
        output: &mut TensorReference,
        output_id: TensorId,
        strategy: SplitStrategy,
        k: usize,
    ) -> LowerResult<()> {
        let tensor = self.graph.tensor(output_id)?;
        output.locale_index = (0..self.target.clusters as u32).rev().collect();
        output.strides = wire_layout(tensor, &tensor.shape).1;
        if matches!(strategy, SplitStrategy::HKSwitch | SplitStrategy::SplitOverK) {
            let sub = subtensor(tensor, k)?;
            let index = tensor.order.sub_to_ind(&tensor.shape, &sub.offset);
            output.data.data_index += index * tensor.dtype.bits() as u64 / 8;
        }
        Ok(())
    }
}

fn output_of(op: &Op) -> LowerResult<TensorId> {
    op.outputs
        .first()
        .copied()
        .ok_or_else(|| LowerError::missing(&op.name, "output tensor"))
}

fn subtensor(t: &Tensor, k: usize) -> LowerResult<&SubTensor> {
    t.subtensor(k).ok_or_else(|| LowerError::MissingSubtensor {
        tensor: t.name.clone(),
        cluster: k,
    })
}

fn strip_sparsity(reference: &mut TensorReference) {
    reference.data.sparsity_index = None;
    reference.data.storage_element_index = None;
}

/// Keep padding only on the edges of `sub` that lie on the edge of `output`.
pub fn cluster_padding(padding: Padding, output: &Tensor, sub: &SubTensor) -> Padding {
    let touches_end = |dim: usize| sub.offset[dim] + sub.shape[dim] == output.shape[dim];
    Padding {
        left: if sub.offset[DIM_W] == 0 { padding.left } else { 0 },
        right: if touches_end(DIM_W) { padding.right } else { 0 },
        top: if sub.offset[DIM_H] == 0 { padding.top } else { 0 },
        bottom: if touches_end(DIM_H) { padding.bottom } else { 0 },
    }
}

/// Kernel padding of cluster `k` when rows are split across `clusters`:
/// the first keeps its top, the last keeps its bottom.
pub fn corrected_padding(padding: Padding, k: usize, clusters: usize) -> Padding {
    if clusters <= 1 {
        return padding;
    }
    let mut p = padding;
    if k > 0 {
        p.top = 0;
    }
    if k + 1 < clusters {
        p.bottom = 0;
    }
    p
}

/// Depthwise convolutions split over H with odd top padding and a kernel
/// taller than one row read the wrong halo rows on interior clusters.
pub fn depthwise_erratum(nce: &NceAttrs) -> bool {
    nce.task == DpuTaskType::DepthwiseConv
        && nce.strategy.is_some_and(|s| s.splits_height())
        && nce.padding.top % 2 == 1
        && nce.kernel[1] > 1
}

/// Most frequent MPE mode; ties go to the mode seen first.
pub fn frequent_mode(workloads: &[Workload]) -> MpeMode {
    let mut counts: Vec<(MpeMode, usize)> = Vec::new();
    for w in workloads {
        match counts.iter_mut().find(|(mode, _)| *mode == w.mpe_mode) {
            Some((_, n)) => *n += 1,
            None => counts.push((w.mpe_mode, 1)),
        }
    }
    let mut best: Option<(MpeMode, usize)> = None;
    for (mode, n) in counts {
        if best.map_or(true, |(_, m)| n > m) {
            best = Some((mode, n));
        }
    }
    best.map_or(MpeMode::Matrix, |(mode, _)| mode)
}

fn build_ppe(attrs: &PpeAttrs) -> PpeFixedFunction {
    let mut ppe = PpeFixedFunction {
        ops: attrs.layers.clone(),
        clamp_low: attrs.clamp_low.unwrap_or(i32::MIN),
        clamp_high: attrs.clamp_high.unwrap_or(i32::MAX),
        lrelu_mult: attrs.lrelu_mult.unwrap_or(1),
        lrelu_shift: attrs.lrelu_shift.unwrap_or(0),
    };
    if ppe.lrelu_mult > 1 {
        let alpha = ppe.lrelu_mult as f64 / (1u64 << ppe.lrelu_shift.min(63)) as f64;
        ppe.clamp_low = (ppe.clamp_low as f64 / alpha) as i32;
    }
    ppe
}

/// Check that `workloads` tile the box at `offset` with extent `shape` exactly.
pub fn validate_tiling(workloads: &[Workload], offset: &Shape, shape: &Shape) -> Result<(), String> {
    let inside = |w: &Workload| {
        w.min_x >= offset[DIM_W]
            && w.max_x < offset[DIM_W] + shape[DIM_W]
            && w.min_y >= offset[DIM_H]
            && w.max_y < offset[DIM_H] + shape[DIM_H]
            && w.min_z >= offset[DIM_C]
            && w.max_z < offset[DIM_C] + shape[DIM_C]
            && w.min_x <= w.max_x
            && w.min_y <= w.max_y
            && w.min_z <= w.max_z
    };
    for (i, w) in workloads.iter().enumerate() {
        if !inside(w) {
            return Err(format!("workload {} lies outside the cluster's output slice", i));
        }
        if let Some(j) = workloads[..i].iter().position(|o| o.overlaps(w)) {
            return Err(format!("workloads {} and {} overlap", j, i));
        }
    }
    let covered: usize = workloads.iter().map(Workload::volume).sum();
    let expected = shape[DIM_W] * shape[DIM_H] * shape[DIM_C];
    if covered != expected {
        return Err(format!("workloads cover {} of {} output elements", covered, expected));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{DType, Order};

    fn wl(y: (usize, usize), mode: MpeMode) -> Workload {
        Workload::new((0, 15), y, (0, 15), mode)
    }

    #[test]
    fn test_frequent_mode_tie_goes_to_first() {
        let ws = [wl((0, 0), MpeMode::Vector), wl((1, 1), MpeMode::Matrix)];
        assert_eq!(frequent_mode(&ws), MpeMode::Vector);
        let ws = [
            wl((0, 0), MpeMode::Vector),
            wl((1, 1), MpeMode::Matrix),
            wl((2, 2), MpeMode::Matrix),
        ];
        assert_eq!(frequent_mode(&ws), MpeMode::Matrix);
    }

    #[test]
    fn test_cluster_padding_interior() {
        let out = Tensor::new("o", [16, 12, 16, 1], DType::UInt8, Order::Z_MAJOR)
            .split(SplitStrategy::SplitOverH, DIM_H, 3);
        let p = Padding::uniform(1);
        assert_eq!(cluster_padding(p, &out, &out.subtensors[0]), Padding::new(1, 1, 1, 0));
        assert_eq!(cluster_padding(p, &out, &out.subtensors[1]), Padding::new(1, 1, 0, 0));
        assert_eq!(cluster_padding(p, &out, &out.subtensors[2]), Padding::new(1, 1, 0, 1));
    }

    #[test]
    fn test_corrected_padding() {
        let p = Padding::uniform(1);
        assert_eq!(corrected_padding(p, 0, 4), Padding::new(1, 1, 1, 0));
        assert_eq!(corrected_padding(p, 2, 4), Padding::new(1, 1, 0, 0));
        assert_eq!(corrected_padding(p, 3, 4), Padding::new(1, 1, 0, 1));
        assert_eq!(corrected_padding(p, 0, 1), p);
    }

    #[test]
    fn test_depthwise_erratum_conditions() {
        let base = NceAttrs::new(DpuTaskType::DepthwiseConv)
            .with_strategy(SplitStrategy::SplitOverH)
            .with_kernel([3, 3], [1, 1], Padding::uniform(1));
        assert!(depthwise_erratum(&base));

        let even = base.clone().with_kernel([3, 3], [1, 1], Padding::uniform(2));
        assert!(!depthwise_erratum(&even));
        let flat = base.clone().with_kernel([3, 1], [1, 1], Padding::uniform(1));
        assert!(!depthwise_erratum(&flat));
        let sok = base.clone().with_strategy(SplitStrategy::SplitOverK);
        assert!(!depthwise_erratum(&sok));
    }

    #[test]
    fn test_validate_tiling() {
        let shape = [16, 8, 16, 1];
        let offset = [0, 8, 0, 0];
        let good = [wl((8, 11), MpeMode::Matrix), wl((12, 15), MpeMode::Matrix)];
        assert!(validate_tiling(&good, &offset, &shape).is_ok());

        let gap = [wl((8, 11), MpeMode::Matrix)];
        assert!(validate_tiling(&gap, &offset, &shape).is_err());
        let overlap = [wl((8, 12), MpeMode::Matrix), wl((12, 15), MpeMode::Matrix)];
        assert!(validate_tiling(&overlap, &offset, &shape).unwrap_err().contains("overlap"));
        let outside = [wl((0, 7), MpeMode::Matrix), wl((8, 15), MpeMode::Matrix)];
        assert!(validate_tiling(&outside, &offset, &shape).is_err());
    }

    #[test]
    fn test_ppe_leaky_relu_clamp() {
        let attrs = PpeAttrs {
            layers: vec![PpeLayerType::LeakyRelu],
            clamp_low: Some(-1024),
            lrelu_mult: Some(4),
            lrelu_shift: Some(1),
            ..PpeAttrs::default()
        };
        let ppe = build_ppe(&attrs);
        assert_eq!(ppe.clamp_low, -512);
        assert_eq!(ppe.clamp_high, i32::MAX);
        assert_eq!(build_ppe(&PpeAttrs::default()), PpeFixedFunction::default());
    }
}
