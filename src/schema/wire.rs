//! Encoding of the graph-file types.

use super::codec::{ByteReader, ByteWriter, WireDecode, WireEncode};
use super::*;
use crate::core::error::FormatError;
use crate::ir::Axis;

fn tag<T>(kind: &'static str, raw: u8, value: Option<T>) -> Result<T, FormatError> {
    value.ok_or(FormatError::InvalidTag { kind, tag: raw as u32 })
}

impl WireEncode for DType {
    fn encode(&self, w: &mut ByteWriter) {
        w.put_u8(self.wire());
    }
}

impl WireDecode for DType {
    fn decode(r: &mut ByteReader<'_>) -> Result<Self, FormatError> {
        let raw = r.get_u8()?;
        tag("dtype", raw, DType::from_wire(raw))
    }
}

impl WireEncode for MemorySpace {
    fn encode(&self, w: &mut ByteWriter) {
        w.put_u8(self.wire());
    }
}

impl WireDecode for MemorySpace {
    fn decode(r: &mut ByteReader<'_>) -> Result<Self, FormatError> {
        let raw = r.get_u8()?;
        tag("memory location", raw, MemorySpace::from_wire(raw))
    }
}

impl WireEncode for PpeLayerType {
    fn encode(&self, w: &mut ByteWriter) {
        w.put_u8(self.wire());
    }
}

impl WireDecode for PpeLayerType {
    fn decode(r: &mut ByteReader<'_>) -> Result<Self, FormatError> {
        let raw = r.get_u8()?;
        tag("PPE layer", raw, PpeLayerType::from_wire(raw))
    }
}

impl WireEncode for ExecutionFlag {
    fn encode(&self, w: &mut ByteWriter) {
        w.put_u8(self.wire());
    }
}

impl WireDecode for ExecutionFlag {
    fn decode(r: &mut ByteReader<'_>) -> Result<Self, FormatError> {
        let raw = r.get_u8()?;
        tag("execution flag", raw, ExecutionFlag::from_wire(raw))
    }
}

fn get_mpe(r: &mut ByteReader<'_>) -> Result<MpeMode, FormatError> {
    let raw = r.get_u8()?;
    tag("MPE mode", raw, MpeMode::from_wire(raw))
}

fn get_axis(r: &mut ByteReader<'_>) -> Result<Axis, FormatError> {
    let raw = r.get_u32()?;
    Axis::from_wire(raw).ok_or(FormatError::InvalidTag { kind: "axis", tag: raw })
}

impl WireEncode for Version {
    fn encode(&self, w: &mut ByteWriter) {
        w.put_u32(self.major);
        w.put_u32(self.minor);
        w.put_u32(self.patch);
        w.put_str(&self.hash);
    }
}

impl WireDecode for Version {
    fn decode(r: &mut ByteReader<'_>) -> Result<Self, FormatError> {
        Ok(Version {
            major: r.get_u32()?,
            minor: r.get_u32()?,
            patch: r.get_u32()?,
            hash: r.get_str()?,
        })
    }
}

impl WireEncode for TensorReference {
    fn encode(&self, w: &mut ByteWriter) {
        w.put_str(&self.name);
        w.put_vec(&self.dimensions);
        w.put_vec(&self.strides);
        self.locale.encode(w);
        w.put_vec(&self.locale_index);
        w.put_u64(self.data.data_index);
        w.put_opt_u64(self.data.sparsity_index);
        w.put_opt_u64(self.data.storage_element_index);
        self.data_dtype.encode(w);
        w.put_vec(&self.quant_zero);
        w.put_vec(&self.quant_scale);
        w.put_vec(&self.quant_mult);
        w.put_vec(&self.quant_shift);
    }
}

impl WireDecode for TensorReference {
    const MIN_SIZE: usize = 40;

    fn decode(r: &mut ByteReader<'_>) -> Result<Self, FormatError> {
        Ok(TensorReference {
            name: r.get_str()?,
            dimensions: r.get_vec()?,
            strides: r.get_vec()?,
            locale: MemorySpace::decode(r)?,
            locale_index: r.get_vec()?,
            data: IndirectDataReference {
                data_index: r.get_u64()?,
                sparsity_index: r.get_opt_u64()?,
                storage_element_index: r.get_opt_u64()?,
            },
            data_dtype: DType::decode(r)?,
            quant_zero: r.get_vec()?,
            quant_scale: r.get_vec()?,
            quant_mult: r.get_vec()?,
            quant_shift: r.get_vec()?,
        })
    }
}

impl WireEncode for BarrierReference {
    fn encode(&self, w: &mut ByteWriter) {
        w.put_vec(&self.wait_barriers);
        w.put_vec(&self.update_barriers);
    }
}

impl WireDecode for BarrierReference {
    const MIN_SIZE: usize = 8;

    fn decode(r: &mut ByteReader<'_>) -> Result<Self, FormatError> {
        Ok(BarrierReference {
            wait_barriers: r.get_vec()?,
            update_barriers: r.get_vec()?,
        })
    }
}

impl WireEncode for BarrierDescriptor {
    fn encode(&self, w: &mut ByteWriter) {
        w.put_u32(self.barrier_id);
        w.put_u32(self.producer_count);
        w.put_u32(self.consumer_count);
    }
}

impl WireDecode for BarrierDescriptor {
    const MIN_SIZE: usize = 12;

    fn decode(r: &mut ByteReader<'_>) -> Result<Self, FormatError> {
        Ok(BarrierDescriptor {
            barrier_id: r.get_u32()?,
            producer_count: r.get_u32()?,
            consumer_count: r.get_u32()?,
        })
    }
}

impl WireEncode for PpeFixedFunction {
    fn encode(&self, w: &mut ByteWriter) {
        w.put_vec(&self.ops);
        w.put_i32(self.clamp_low);
        w.put_i32(self.clamp_high);
        w.put_i32(self.lrelu_mult);
        w.put_u32(self.lrelu_shift);
    }
}

impl WireDecode for PpeFixedFunction {
    fn decode(r: &mut ByteReader<'_>) -> Result<Self, FormatError> {
        Ok(PpeFixedFunction {
            ops: r.get_vec()?,
            clamp_low: r.get_i32()?,
            clamp_high: r.get_i32()?,
            lrelu_mult: r.get_i32()?,
            lrelu_shift: r.get_u32()?,
        })
    }
}

impl WireEncode for NceInvariantFields {
    fn encode(&self, w: &mut ByteWriter) {
        w.put_u8(self.dpu_task_type.wire());
        self.ppe_task.encode(w);
        w.put_u8(self.mpe_frequent_mode.wire());
        for v in [
            self.kernel_w,
            self.kernel_h,
            self.kernel_stride_w,
            self.kernel_stride_h,
            self.kernel_pad_left,
            self.kernel_pad_right,
            self.kernel_pad_top,
            self.kernel_pad_bottom,
        ] {
            w.put_u16(v);
        }
        self.input_data.encode(w);
        self.output_data.encode(w);
        self.parent_input_tensor.encode(w);
        self.parent_output_tensor.encode(w);
        w.put_opt(self.weights_data.as_ref());
        w.put_opt(self.weights_table.as_ref());
        w.put_opt(self.activation_window.as_ref());
        w.put_u32(self.activation_window_channel_length);
        w.put_u32(self.out_channel_offset);
    }
}

impl WireDecode for NceInvariantFields {
    fn decode(r: &mut ByteReader<'_>) -> Result<Self, FormatError> {
        let raw = r.get_u8()?;
        let dpu_task_type = tag("DPU task type", raw, DpuTaskType::from_wire(raw))?;
        let ppe_task = PpeFixedFunction::decode(r)?;
        let mpe_frequent_mode = get_mpe(r)?;
        Ok(NceInvariantFields {
            dpu_task_type,
            ppe_task,
            mpe_frequent_mode,
            kernel_w: r.get_u16()?,
            kernel_h: r.get_u16()?,
            kernel_stride_w: r.get_u16()?,
            kernel_stride_h: r.get_u16()?,
            kernel_pad_left: r.get_u16()?,
            kernel_pad_right: r.get_u16()?,
            kernel_pad_top: r.get_u16()?,
            kernel_pad_bottom: r.get_u16()?,
            input_data: TensorReference::decode(r)?,
            output_data: TensorReference::decode(r)?,
            parent_input_tensor: TensorReference::decode(r)?,
            parent_output_tensor: TensorReference::decode(r)?,
            weights_data: r.get_opt()?,
            weights_table: r.get_opt()?,
            activation_window: r.get_opt()?,
            activation_window_channel_length: r.get_u32()?,
            out_channel_offset: r.get_u32()?,
        })
    }
}

impl WireEncode for NceVariantFields {
    fn encode(&self, w: &mut ByteWriter) {
        w.put_u8(self.mpe_mode.wire());
        w.put_u16(self.padding_left);
        w.put_u16(self.padding_right);
        w.put_u16(self.padding_top);
        w.put_u16(self.padding_bottom);
        w.put_u32(self.workload_start_x);
        w.put_u32(self.workload_start_y);
        w.put_u32(self.workload_start_z);
        w.put_u32(self.workload_end_x);
        w.put_u32(self.workload_end_y);
        w.put_u32(self.workload_end_z);
    }
}

impl WireDecode for NceVariantFields {
    const MIN_SIZE: usize = 33;

    fn decode(r: &mut ByteReader<'_>) -> Result<Self, FormatError> {
        Ok(NceVariantFields {
            mpe_mode: get_mpe(r)?,
            padding_left: r.get_u16()?,
            padding_right: r.get_u16()?,
            padding_top: r.get_u16()?,
            padding_bottom: r.get_u16()?,
            workload_start_x: r.get_u32()?,
            workload_start_y: r.get_u32()?,
            workload_start_z: r.get_u32()?,
            workload_end_x: r.get_u32()?,
            workload_end_y: r.get_u32()?,
            workload_end_z: r.get_u32()?,
        })
    }
}

impl WireEncode for SoftwareLayer {
    fn encode(&self, w: &mut ByteWriter) {
        match self {
            SoftwareLayer::Softmax { axis } => {
                w.put_u8(0);
                w.put_u32(axis.wire());
            }
            SoftwareLayer::Passthrough => w.put_u8(1),
            SoftwareLayer::Dummy => w.put_u8(2),
            SoftwareLayer::Normalize { eps, across_spatial, channel_shared } => {
                w.put_u8(3);
                w.put_f32(*eps);
                w.put_bool(*across_spatial);
                w.put_bool(*channel_shared);
            }
            SoftwareLayer::Permute { order } => {
                w.put_u8(4);
                w.put_bytes(order);
            }
            SoftwareLayer::Argmax { out_max_val, top_k, axis } => {
                w.put_u8(5);
                w.put_bool(*out_max_val);
                w.put_u32(*top_k);
                w.put_u32(axis.wire());
            }
            SoftwareLayer::Reshape { shape } => {
                w.put_u8(6);
                for d in shape {
                    w.put_u32(*d);
                }
            }
        }
    }
}

impl WireDecode for SoftwareLayer {
    fn decode(r: &mut ByteReader<'_>) -> Result<Self, FormatError> {
        let raw = r.get_u8()?;
        Ok(match raw {
            0 => SoftwareLayer::Softmax { axis: get_axis(r)? },
            1 => SoftwareLayer::Passthrough,
            2 => SoftwareLayer::Dummy,
            3 => SoftwareLayer::Normalize {
                eps: r.get_f32()?,
                across_spatial: r.get_bool()?,
                channel_shared: r.get_bool()?,
            },
            4 => {
                let mut order = [0u8; 4];
                order.copy_from_slice(r.take(4)?);
                SoftwareLayer::Permute { order }
            }
            5 => SoftwareLayer::Argmax {
                out_max_val: r.get_bool()?,
                top_k: r.get_u32()?,
                axis: get_axis(r)?,
            },
            6 => SoftwareLayer::Reshape {
                shape: [r.get_u32()?, r.get_u32()?, r.get_u32()?, r.get_u32()?],
            },
            other => return Err(FormatError::InvalidTag { kind: "software layer", tag: other as u32 }),
        })
    }
}

impl WireEncode for Task {
    fn encode(&self, w: &mut ByteWriter) {
        w.put_str(&self.name);
        w.put_u32(self.node_id);
        w.put_vec(&self.source_task_ids);
        self.associated_barriers.encode(w);
        match &self.task {
            SpecificTask::Nce(nce) => {
                w.put_u8(0);
                nce.invariant.encode(w);
                w.put_vec(&nce.variants);
            }
            SpecificTask::Dma(dma) => {
                w.put_u8(1);
                dma.src.encode(w);
                dma.dst.encode(w);
                w.put_bool(dma.compression);
            }
            SpecificTask::Upa(upa) => {
                w.put_u8(2);
                upa.layer.encode(w);
                w.put_vec(&upa.inputs);
                w.put_vec(&upa.outputs);
            }
            SpecificTask::BarrierConfiguration(barrier) => {
                w.put_u8(3);
                barrier.encode(w);
            }
        }
    }
}

impl WireDecode for Task {
    const MIN_SIZE: usize = 21;

    fn decode(r: &mut ByteReader<'_>) -> Result<Self, FormatError> {
        let name = r.get_str()?;
        let node_id = r.get_u32()?;
        let source_task_ids = r.get_vec()?;
        let associated_barriers = BarrierReference::decode(r)?;
        let task = match r.get_u8()? {
            0 => SpecificTask::Nce(NceTask {
                invariant: NceInvariantFields::decode(r)?,
                variants: r.get_vec()?,
            }),
            1 => SpecificTask::Dma(DmaTask {
                src: TensorReference::decode(r)?,
                dst: TensorReference::decode(r)?,
                compression: r.get_bool()?,
            }),
            2 => SpecificTask::Upa(UpaLayerTask {
                layer: SoftwareLayer::decode(r)?,
                inputs: r.get_vec()?,
                outputs: r.get_vec()?,
            }),
            3 => SpecificTask::BarrierConfiguration(BarrierDescriptor::decode(r)?),
            other => return Err(FormatError::InvalidTag { kind: "task", tag: other as u32 }),
        };
        Ok(Task {
            name,
            node_id,
            source_task_ids,
            associated_barriers,
            task,
        })
    }
}

impl WireEncode for TaskList {
    fn encode(&self, w: &mut ByteWriter) {
        w.put_vec(&self.content);
    }
}

impl WireDecode for TaskList {
    const MIN_SIZE: usize = 4;

    fn decode(r: &mut ByteReader<'_>) -> Result<Self, FormatError> {
        Ok(TaskList { content: r.get_vec()? })
    }
}

impl WireEncode for BinaryData {
    fn encode(&self, w: &mut ByteWriter) {
        self.underlying_type.encode(w);
        w.put_u64(self.length);
        w.put_bool(self.compressed);
        w.put_vec(&self.data);
    }
}

impl WireDecode for BinaryData {
    const MIN_SIZE: usize = 14;

    fn decode(r: &mut ByteReader<'_>) -> Result<Self, FormatError> {
        Ok(BinaryData {
            underlying_type: DType::decode(r)?,
            length: r.get_u64()?,
            compressed: r.get_bool()?,
            data: r.get_vec()?,
        })
    }
}

impl WireEncode for SourceNode {
    fn encode(&self, w: &mut ByteWriter) {
        w.put_str(&self.name);
        w.put_u32(self.this_id);
        w.put_vec(&self.source_ids);
        w.put_vec(&self.sink_ids);
    }
}

impl WireDecode for SourceNode {
    const MIN_SIZE: usize = 16;

    fn decode(r: &mut ByteReader<'_>) -> Result<Self, FormatError> {
        Ok(SourceNode {
            name: r.get_str()?,
            this_id: r.get_u32()?,
            source_ids: r.get_vec()?,
            sink_ids: r.get_vec()?,
        })
    }
}

impl WireEncode for SummaryHeader {
    fn encode(&self, w: &mut ByteWriter) {
        self.version.encode(w);
        w.put_u32(self.resources.upa_shaves);
        w.put_u32(self.resources.nce2_blocks);
        w.put_u64(self.resources.nn_cmx_per_slice);
        w.put_u32(self.resources.nn_cmx_slice_amount);
        w.put_u64(self.resources.ddr_scratch);
        w.put_vec(&self.original_structure.first_ids);
        w.put_vec(&self.original_structure.nodes);
        w.put_vec(&self.net_input);
        w.put_vec(&self.net_output);
        w.put_u32(self.task_count);
        w.put_u32(self.layer_count);
        w.put_vec(&self.options);
    }
}

impl WireDecode for SummaryHeader {
    fn decode(r: &mut ByteReader<'_>) -> Result<Self, FormatError> {
        Ok(SummaryHeader {
            version: Version::decode(r)?,
            resources: Resources {
                upa_shaves: r.get_u32()?,
                nce2_blocks: r.get_u32()?,
                nn_cmx_per_slice: r.get_u64()?,
                nn_cmx_slice_amount: r.get_u32()?,
                ddr_scratch: r.get_u64()?,
            },
            original_structure: SourceStructure {
                first_ids: r.get_vec()?,
                nodes: r.get_vec()?,
            },
            net_input: r.get_vec()?,
            net_output: r.get_vec()?,
            task_count: r.get_u32()?,
            layer_count: r.get_u32()?,
            options: r.get_vec()?,
        })
    }
}
