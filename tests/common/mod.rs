//! Shared graph fixtures for the integration tests.

#![allow(dead_code)]

use npu_graphfile::ir::{
    DType, DmaAttrs, DmaDirection, DpuTaskType, GraphBuilder, MemorySpace, MpeMode, NceAttrs, Op,
    OpId, Order, Padding, Quantization, SplitStrategy, Tensor, TensorId, Workload, DIM_C, DIM_H,
    DIM_N,
};
use npu_graphfile::lower::address::pooled_per_cluster;
use npu_graphfile::{Graph, TargetConfig};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Workloads tiling each subtensor of `t` in two halves along `axis`.
pub fn halved_workloads(t: &Tensor, axis: usize) -> Vec<Vec<Workload>> {
    t.subtensors
        .iter()
        .map(|sub| {
            let lo = |d: usize| sub.offset[d];
            let hi = |d: usize| sub.offset[d] + sub.shape[d] - 1;
            let mid = lo(axis) + sub.shape[axis] / 2;
            let range = |d: usize, first: bool| {
                if d != axis {
                    (lo(d), hi(d))
                } else if first {
                    (lo(d), mid - 1)
                } else {
                    (mid, hi(d))
                }
            };
            [(true, MpeMode::Matrix), (false, MpeMode::Vector)]
                .into_iter()
                .map(|(first, mode)| Workload::new(range(0, first), range(1, first), range(2, first), mode))
                .collect()
        })
        .collect()
}

/// Ids of interest in [`soh_network`].
pub struct SohNetwork {
    pub input: TensorId,
    pub input_cmx: TensorId,
    pub pool_cmx: TensorId,
    pub pool_ddr: TensorId,
    pub conv_in: TensorId,
    pub conv_out: TensorId,
    pub output: TensorId,
    pub weights: TensorId,
    pub weights_cmx: TensorId,
    pub input_dma: OpId,
    pub window_dma: OpId,
    pub pool: OpId,
    pub spill: OpId,
    pub fill: OpId,
    pub weights_dma: OpId,
    pub table_dma: OpId,
    pub conv: OpId,
    pub output_dma: OpId,
    pub barriers: Vec<OpId>,
}

pub const POOL_DDR_OFFSET: u64 = 0x1000;
pub const POOL_CMX_OFFSET: u64 = 0xA_9000;

/// 416x416x16 input, 2x2 max-pool and 3x3 convolution, both split over H.
pub fn soh_network(target: &TargetConfig) -> (Graph, SohNetwork) {
    let n = target.clusters;
    let mut b = GraphBuilder::new("soh_head");
    let act = |name: &str, w: usize, space: MemorySpace| {
        Tensor::new(name, [w, w, 16, 1], DType::UInt8, Order::Z_MAJOR)
            .in_space(space)
            .split(SplitStrategy::SplitOverH, DIM_H, n)
    };

    let input = b.tensor(
        act("input", 416, MemorySpace::ProgrammableInput)
            .with_quantization(Quantization::new(vec![128; 16], vec![0.25; 16])),
    );
    b.buffer(input, MemorySpace::ProgrammableInput, 0);
    let input_cmx = b.tensor(act("input_cmx", 416, MemorySpace::CmxNn));
    b.buffer(input_cmx, MemorySpace::CmxNn, 0);

    let pool_t = act("pool_cmx", 208, MemorySpace::CmxNn);
    let pool_workloads = halved_workloads(&pool_t, DIM_H);
    let pool_cmx = b.tensor(pool_t);
    b.buffer(pool_cmx, MemorySpace::CmxNn, POOL_CMX_OFFSET);
    let pool_ddr = b.tensor(act("pool_ddr", 208, MemorySpace::DdrHeap));
    b.buffer(pool_ddr, MemorySpace::DdrHeap, POOL_DDR_OFFSET);

    let conv_in = b.tensor(act("conv_in", 208, MemorySpace::CmxNn));
    b.buffer(conv_in, MemorySpace::CmxNn, 0);
    let conv_t = act("conv_out", 208, MemorySpace::CmxNn);
    let conv_workloads = halved_workloads(&conv_t, DIM_H);
    let conv_out = b.tensor(conv_t);
    b.buffer(conv_out, MemorySpace::CmxNn, 0x2_A400);
    let output = b.tensor(act("output", 208, MemorySpace::ProgrammableOutput));
    b.buffer(output, MemorySpace::ProgrammableOutput, 0);

    let constant = |name: &str, shape, dtype, data: Vec<i64>, index| {
        Tensor::new(name, shape, dtype, Order::Z_MAJOR)
            .in_space(MemorySpace::GraphFile)
            .with_data(data)
            .with_pool_index(index)
    };
    let on_cmx = |name: &str, shape, dtype| {
        Tensor::new(name, shape, dtype, Order::Z_MAJOR)
            .in_space(MemorySpace::CmxNn)
            .replicate(n)
    };

    let window = b.tensor(constant("pool_window", [16, 1, 1, 1], DType::UInt8, vec![1; 16], 0));
    let window_cmx = b.tensor(on_cmx("pool_window_cmx", [16, 1, 1, 1], DType::UInt8));
    b.buffer(window_cmx, MemorySpace::CmxNn, 0xF_0000);
    let weights = b.tensor(constant(
        "conv_weights",
        [3, 3, 16, 16],
        DType::UInt8,
        (0..2304).map(|i| i % 7).collect(),
        1,
    ));
    let weights_cmx = b.tensor(on_cmx("conv_weights_cmx", [3, 3, 16, 16], DType::UInt8));
    b.buffer(weights_cmx, MemorySpace::CmxNn, 0xF_1000);
    let table = b.tensor(constant("conv_table", [1, 1, 4, 16], DType::Int32, vec![0; 64], 2));
    let table_cmx = b.tensor(on_cmx("conv_table_cmx", [1, 1, 4, 16], DType::Int32));
    b.buffer(table_cmx, MemorySpace::CmxNn, 0xF_2000);

    b.op(Op::input("input", input));
    b.op(Op::constant("pool_window", window));
    b.op(Op::constant("conv_weights", weights));
    b.op(Op::constant("conv_table", table));

    let soh = |dir| DmaAttrs::new(dir).with_strategy(SplitStrategy::SplitOverH);
    let clustering = || DmaAttrs::new(DmaDirection::DdrToCmx).with_strategy(SplitStrategy::Clustering);

    let input_dma = b.op(Op::dma("input_dma", input, input_cmx, soh(DmaDirection::DdrToCmx)).scheduled(0));
    let window_dma = b.op(Op::dma("pool_window_dma", window, window_cmx, clustering()).scheduled(1));
    let pool = b.op(
        Op::nce(
            "pool",
            input_cmx,
            pool_cmx,
            NceAttrs::new(DpuTaskType::MaxPool)
                .with_strategy(SplitStrategy::SplitOverH)
                .with_kernel([2, 2], [2, 2], Padding::default())
                .with_workloads(pool_workloads)
                .with_activation_window(window_cmx, 16),
        )
        .scheduled(2),
    );
    let spill = b.op(Op::dma("pool_spill", pool_cmx, pool_ddr, soh(DmaDirection::CmxToDdr)).scheduled(3));
    let fill = b.op(Op::dma("conv_fill", pool_ddr, conv_in, soh(DmaDirection::DdrToCmx)).scheduled(4));
    let weights_dma = b.op(Op::dma("conv_weights_dma", weights, weights_cmx, clustering()).scheduled(5));
    let table_dma = b.op(Op::dma("conv_table_dma", table, table_cmx, clustering()).scheduled(6));
    let conv = b.op(
        Op::nce(
            "conv",
            conv_in,
            conv_out,
            NceAttrs::new(DpuTaskType::Conv)
                .with_strategy(SplitStrategy::SplitOverH)
                .with_kernel([3, 3], [1, 1], Padding::uniform(1))
                .with_workloads(conv_workloads)
                .with_weights(weights_cmx, table_cmx),
        )
        .scheduled(7),
    );
    let output_dma = b.op(Op::dma("output_dma", conv_out, output, soh(DmaDirection::CmxToDdr)).scheduled(8));
    b.op(Op::output("output", output));

    let mut barriers = Vec::new();
    let stages: [(&[OpId], &[OpId]); 5] = [
        (&[input_dma, window_dma], &[pool]),
        (&[pool], &[spill]),
        (&[spill], &[fill]),
        (&[fill, weights_dma, table_dma], &[conv]),
        (&[conv], &[output_dma]),
    ];
    for (index, (producers, consumers)) in stages.iter().enumerate() {
        let barrier = b.barrier(index as u32);
        for &p in producers.iter() {
            b.signals(p, barrier);
        }
        for &c in consumers.iter() {
            b.waits(barrier, c);
        }
        barriers.push(barrier);
    }

    let ids = SohNetwork {
        input,
        input_cmx,
        pool_cmx,
        pool_ddr,
        conv_in,
        conv_out,
        output,
        weights,
        weights_cmx,
        input_dma,
        window_dma,
        pool,
        spill,
        fill,
        weights_dma,
        table_dma,
        conv,
        output_dma,
        barriers,
    };
    (b.build(), ids)
}

/// Ids of interest in [`sok_conv`].
pub struct SokConv {
    pub activation: TensorId,
    pub weights: TensorId,
    pub weights_cmx: TensorId,
    pub output: TensorId,
    pub input_dma: OpId,
    pub weights_dma: OpId,
    pub table_dma: OpId,
    pub conv: OpId,
    pub output_dma: OpId,
    pub barriers: Vec<OpId>,
}

/// Sparse-valued 64x64 weights, large enough per slice to be worth compressing.
pub fn sok_weight_values() -> Vec<i64> {
    (0..3 * 3 * 64 * 64).map(|i| if i % 11 == 0 { (i % 5) + 1 } else { 0 }).collect()
}

/// 3x3 convolution split over output channels.
pub fn sok_conv(target: &TargetConfig) -> (Graph, SokConv) {
    let n = target.clusters;
    let mut b = GraphBuilder::new("sok_conv");
    let shape = [32, 32, 64, 1];

    let net_in = b.tensor(Tensor::new("net_in", shape, DType::UInt8, Order::Z_MAJOR).in_space(MemorySpace::ProgrammableInput));
    b.buffer(net_in, MemorySpace::ProgrammableInput, 0);
    let activation = b.tensor(
        Tensor::new("act", shape, DType::UInt8, Order::Z_MAJOR)
            .in_space(MemorySpace::CmxNn)
            .replicate(n),
    );
    b.buffer(activation, MemorySpace::CmxNn, 0);

    let mut weights_t = Tensor::new("w", [3, 3, 64, 64], DType::UInt8, Order::Z_MAJOR)
        .in_space(MemorySpace::GraphFile)
        .with_data(sok_weight_values())
        .split(SplitStrategy::SplitOverK, DIM_N, n);
    for (k, sub) in weights_t.subtensors.iter_mut().enumerate() {
        sub.pool_index = Some(k as u32);
    }
    let weights = b.tensor(weights_t);
    let weights_cmx = b.tensor(
        Tensor::new("w_cmx", [3, 3, 64, 64], DType::UInt8, Order::Z_MAJOR)
            .in_space(MemorySpace::CmxNn)
            .split(SplitStrategy::SplitOverK, DIM_N, n),
    );
    b.buffer(weights_cmx, MemorySpace::CmxNn, 0x1_0000);

    let table = b.tensor(
        Tensor::new("wt", [1, 1, 4, 64], DType::Int32, Order::Z_MAJOR)
            .in_space(MemorySpace::GraphFile)
            .with_data(vec![0; 256])
            .with_pool_index(n as u32)
            .split(SplitStrategy::SplitOverK, DIM_N, n),
    );
    let table_cmx = b.tensor(
        Tensor::new("wt_cmx", [1, 1, 4, 64], DType::Int32, Order::Z_MAJOR)
            .in_space(MemorySpace::CmxNn)
            .split(SplitStrategy::SplitOverK, DIM_N, n),
    );
    b.buffer(table_cmx, MemorySpace::CmxNn, 0x2_0000);

    let out_t = Tensor::new("out_cmx", shape, DType::UInt8, Order::Z_MAJOR)
        .in_space(MemorySpace::CmxNn)
        .split(SplitStrategy::SplitOverK, DIM_C, n);
    let workloads = halved_workloads(&out_t, DIM_H);
    let output = b.tensor(out_t);
    b.buffer(output, MemorySpace::CmxNn, 0x3_0000);
    let net_out = b.tensor(
        Tensor::new("net_out", shape, DType::UInt8, Order::Z_MAJOR)
            .in_space(MemorySpace::ProgrammableOutput)
            .split(SplitStrategy::SplitOverK, DIM_C, n),
    );
    b.buffer(net_out, MemorySpace::ProgrammableOutput, 0);

    b.op(Op::input("net_in", net_in));
    b.op(Op::constant("w", weights));
    b.op(Op::constant("wt", table));

    let sok = |dir| DmaAttrs::new(dir).with_strategy(SplitStrategy::SplitOverK);
    let input_dma = b.op(
        Op::dma(
            "act_dma",
            net_in,
            activation,
            DmaAttrs::new(DmaDirection::DdrToCmx).with_strategy(SplitStrategy::Clustering),
        )
        .scheduled(0),
    );
    let weights_dma = b.op(Op::dma("w_dma", weights, weights_cmx, sok(DmaDirection::DdrToCmx)).scheduled(1));
    let table_dma = b.op(Op::dma("wt_dma", table, table_cmx, sok(DmaDirection::DdrToCmx)).scheduled(2));
    let conv = b.op(
        Op::nce(
            "conv",
            activation,
            output,
            NceAttrs::new(DpuTaskType::Conv)
                .with_strategy(SplitStrategy::SplitOverK)
                .with_kernel([3, 3], [1, 1], Padding::uniform(1))
                .with_workloads(workloads)
                .with_weights(weights_cmx, table_cmx),
        )
        .scheduled(3),
    );
    let output_dma = b.op(Op::dma("out_dma", output, net_out, sok(DmaDirection::CmxToDdr)).scheduled(4));
    b.op(Op::output("net_out", net_out));

    let b0 = b.barrier(0);
    for p in [input_dma, weights_dma, table_dma] {
        b.signals(p, b0);
    }
    b.waits(b0, conv);
    let b1 = b.barrier(1);
    b.signals(conv, b1);
    b.waits(b1, output_dma);

    let ids = SokConv {
        activation,
        weights,
        weights_cmx,
        output,
        input_dma,
        weights_dma,
        table_dma,
        conv,
        output_dma,
        barriers: vec![b0, b1],
    };
    (b.build(), ids)
}

/// Ids of interest in [`sparse_weights`].
pub struct SparseWeights {
    pub weights: TensorId,
    pub map: TensorId,
    pub weights_cmx: TensorId,
    pub weights_dma: OpId,
    pub drain: OpId,
    pub barrier: OpId,
    /// Pool index of the weights, or of their first slice.
    pub weights_pool_base: u32,
}

/// Packed non-zero values of slice `k` of the sparse weights.
pub fn sparse_slice_values(k: usize) -> Vec<i64> {
    vec![k as i64 + 1; 96 + 16 * k]
}

/// A sparse 1x1x16x64 weight constant moved into CMX under `strategy`.
///
/// The sparsity map comes first in the pool, one entry per slice when the
/// target pools it per cluster. The weights follow, one entry per slice under
/// SplitOverK. A plain transfer of a scratch tensor waits on the weight barrier.
pub fn sparse_weights(target: &TargetConfig, strategy: SplitStrategy) -> (Graph, SparseWeights) {
    let n = target.clusters;
    let mut b = GraphBuilder::new("sparse_weights");
    let shard = |t: Tensor| match strategy {
        SplitStrategy::SplitOverK => t.split(SplitStrategy::SplitOverK, DIM_N, n),
        _ => t.replicate(n),
    };

    let mut map_t = shard(
        Tensor::new("w_map", [1, 1, 2, 64], DType::UInt8, Order::Z_MAJOR)
            .in_space(MemorySpace::GraphFile)
            .with_data(vec![0x55; 128]),
    );
    let weights_pool_base = if pooled_per_cluster(&map_t, target) {
        for (k, sub) in map_t.subtensors.iter_mut().enumerate() {
            sub.pool_index = Some(k as u32);
        }
        n as u32
    } else {
        map_t = map_t.with_pool_index(0);
        1
    };
    let map = b.tensor(map_t);

    let values: Vec<i64> = (0..n).flat_map(sparse_slice_values).collect();
    let mut weights_t = shard(
        Tensor::new("w", [1, 1, 16, 64], DType::UInt8, Order::Z_MAJOR)
            .in_space(MemorySpace::GraphFile)
            .with_data(values)
            .sparse(map, None),
    );
    if strategy == SplitStrategy::SplitOverK {
        for (k, sub) in weights_t.subtensors.iter_mut().enumerate() {
            sub.data = Some(sparse_slice_values(k));
            sub.pool_index = Some(weights_pool_base + k as u32);
        }
    } else {
        weights_t = weights_t.with_pool_index(weights_pool_base);
    }
    let weights = b.tensor(weights_t);

    let map_cmx = b.tensor(shard(
        Tensor::new("w_map_cmx", [1, 1, 2, 64], DType::UInt8, Order::Z_MAJOR).in_space(MemorySpace::CmxNn),
    ));
    b.buffer(map_cmx, MemorySpace::CmxNn, 0x4000);
    let se_cmx = b.tensor(shard(
        Tensor::new("w_se_cmx", [1, 1, 1, 64], DType::Int32, Order::Z_MAJOR).in_space(MemorySpace::CmxNn),
    ));
    b.buffer(se_cmx, MemorySpace::CmxNn, 0x5000);
    let weights_cmx = b.tensor(shard(
        Tensor::new("w_cmx", [1, 1, 16, 64], DType::UInt8, Order::Z_MAJOR)
            .in_space(MemorySpace::CmxNn)
            .sparse(map_cmx, Some(se_cmx)),
    ));
    b.buffer(weights_cmx, MemorySpace::CmxNn, 0);

    let scratch = b.tensor(Tensor::new("scratch", [4, 4, 16, 1], DType::UInt8, Order::Z_MAJOR).in_space(MemorySpace::CmxNn));
    b.buffer(scratch, MemorySpace::CmxNn, 0x6000);
    let spill = b.tensor(Tensor::new("spill", [4, 4, 16, 1], DType::UInt8, Order::Z_MAJOR).in_space(MemorySpace::DdrHeap));
    b.buffer(spill, MemorySpace::DdrHeap, 0);

    b.op(Op::constant("w", weights));
    let weights_dma = b.op(
        Op::dma(
            "w_dma",
            weights,
            weights_cmx,
            DmaAttrs::new(DmaDirection::DdrToCmx).with_strategy(strategy),
        )
        .scheduled(0),
    );
    let drain = b.op(Op::dma("drain", scratch, spill, DmaAttrs::new(DmaDirection::CmxToDdr)).scheduled(1));
    let barrier = b.barrier(0);
    b.signals(weights_dma, barrier);
    b.waits(barrier, drain);

    let ids = SparseWeights {
        weights,
        map,
        weights_cmx,
        weights_dma,
        drain,
        barrier,
        weights_pool_base,
    };
    (b.build(), ids)
}
