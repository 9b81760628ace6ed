// This module builds the constant pool of a graph file. Every tensor produced by a Constant
// op is packed into fixed-width bus words: element j occupies bits [j*bits, (j+1)*bits) of a
// little-endian bit stream that is cut into words of the target width, with the tail of the
// last word zero-filled. Byte-typed payloads above COMPRESSION_THRESHOLD bytes are run through
// the block Huffman coder when the target enables it; the coded stream replaces the payload
// only when it is strictly smaller, otherwise the tensor is flagged uncompressed. The
// outcome (compression flag and stored size) is written back onto the tensor or subtensor,
// and is the only graph state lowering mutates. Pool entries are ordered by the pool index
// upstream assigned; sparse constants contribute their sparsity map, and constants whose
// slices are pooled per cluster contribute one entry per subtensor. The sorted indices must
// cover 0..n exactly, so every reference lands on the entry it names.

//! Constant payload packing and the constant pool.

use super::address::pooled_per_cluster;
use super::huffman;
use crate::core::error::{LowerError, LowerResult};
use crate::core::session::LoweringSession;
use crate::ir::{element_count, DType, Graph, OpKind, Order, Shape, TargetConfig, Tensor, TensorId};
use crate::schema::BinaryData;
use log::{debug, warn};

/// Payloads at or below this many bytes are never compressed.
pub const COMPRESSION_THRESHOLD: usize = 4096;

/// Pack `values` of `elem_bits` bits each into words of `word_bits` bits.
///
/// Values are truncated to `elem_bits`; both widths are clamped to `1..=64`.
pub fn pack_words(values: &[i64], elem_bits: u32, word_bits: u32) -> Vec<u64> {
    let elem_bits = elem_bits.clamp(1, 64);
    let word_bits = word_bits.clamp(1, 64);
    let elem_mask = low_mask(elem_bits);
    let word_mask = low_mask(word_bits);

    let total_bits = values.len() as u64 * elem_bits as u64;
    let mut words = Vec::with_capacity(total_bits.div_ceil(word_bits as u64) as usize);
    let mut acc: u128 = 0;
    let mut filled = 0u32;
    for &v in values {
        acc |= ((v as u64 & elem_mask) as u128) << filled;
        filled += elem_bits;
        while filled >= word_bits {
            words.push(acc as u64 & word_mask);
            acc >>= word_bits;
            filled -= word_bits;
        }
    }
    if filled > 0 {
        words.push(acc as u64 & word_mask);
    }
    words
}

/// Inverse of [`pack_words`]: read back `count` values, sign-extending when `signed`.
pub fn unpack_words(words: &[u64], elem_bits: u32, word_bits: u32, count: usize, signed: bool) -> Vec<i64> {
    let elem_bits = elem_bits.clamp(1, 64);
    let word_bits = word_bits.clamp(1, 64);
    let elem_mask = low_mask(elem_bits);
    let word_mask = low_mask(word_bits);

    let mut out = Vec::with_capacity(count);
    let mut words = words.iter();
    let mut acc: u128 = 0;
    let mut filled = 0u32;
    while out.len() < count {
        while filled < elem_bits {
            match words.next() {
                Some(&w) => {
                    acc |= ((w & word_mask) as u128) << filled;
                    filled += word_bits;
                }
                None => return out,
            }
        }
        let raw = acc as u64 & elem_mask;
        acc >>= elem_bits;
        filled -= elem_bits;
        out.push(if signed && elem_bits < 64 {
            let shift = 64 - elem_bits;
            ((raw << shift) as i64) >> shift
        } else {
            raw as i64
        });
    }
    out
}

fn low_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// A packed constant with the outcome to write back onto its tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedBlock {
    pub binary: BinaryData,
    /// Bytes of the payload before compression.
    pub raw_bytes: u64,
}

impl PackedBlock {
    pub fn compressed_size(&self) -> Option<u64> {
        self.binary.compressed.then_some(self.binary.length)
    }
}

pub struct BinaryDataPacker<'a, 'arena> {
    target: &'a TargetConfig,
    session: &'a LoweringSession<'arena>,
}

impl<'a, 'arena> BinaryDataPacker<'a, 'arena> {
    pub fn new(target: &'a TargetConfig, session: &'a LoweringSession<'arena>) -> Self {
        Self { target, session }
    }

    /// Pack the payload of `tensor` and record the compression outcome on it.
    pub fn pack(&self, tensor: &mut Tensor) -> LowerResult<PackedBlock> {
        let values = tensor.data.as_deref().ok_or_else(|| LowerError::MissingData {
            tensor: tensor.name.clone(),
        })?;
        let block = self.pack_values(&tensor.name, values, tensor.dtype);
        tensor.compression = Some(block.binary.compressed);
        tensor.compressed_size = block.compressed_size();
        Ok(block)
    }

    /// Pack the payload of subtensor `k` of `tensor`.
    ///
    /// Slices without their own data are cut out of the parent payload.
    pub fn pack_subtensor(&self, tensor: &mut Tensor, k: usize) -> LowerResult<PackedBlock> {
        let sub = tensor.subtensor(k).ok_or_else(|| LowerError::MissingSubtensor {
            tensor: tensor.name.clone(),
            cluster: k,
        })?;
        let values = match &sub.data {
            Some(data) => data.clone(),
            None => {
                let parent = tensor.data.as_deref().ok_or_else(|| LowerError::MissingData {
                    tensor: tensor.name.clone(),
                })?;
                slice_payload(parent, tensor.order, &tensor.shape, &sub.offset, &sub.shape).ok_or_else(|| {
                    LowerError::MissingData {
                        tensor: self.session.subtensor_name(&tensor.name, k).to_string(),
                    }
                })?
            }
        };

        let name = self.session.subtensor_name(&tensor.name, k);
        let block = self.pack_values(name, &values, tensor.dtype);
        if let Some(sub) = tensor.subtensors.get_mut(k) {
            sub.compressed_size = block.compressed_size();
        }
        tensor.compression = Some(tensor.subtensors.iter().any(|s| s.compressed_size.is_some()));
        Ok(block)
    }

    fn pack_values(&self, name: &str, values: &[i64], dtype: DType) -> PackedBlock {
        let raw_bytes = dtype.payload_bytes(values.len());
        let compressible =
            self.target.huffman_compression && dtype.is_byte_integer() && raw_bytes as usize > COMPRESSION_THRESHOLD;

        if compressible {
            let bytes: Vec<u8> = values.iter().map(|&v| v as u8).collect();
            let coded = huffman::compress(&bytes);
            if coded.len() < bytes.len() {
                let stream: Vec<i64> = coded.iter().map(|&b| b as i64).collect();
                debug!("Compressed '{}': {} -> {} bytes", name, raw_bytes, coded.len());
                self.session.record_constant(raw_bytes as usize, coded.len(), true);
                return PackedBlock {
                    binary: BinaryData {
                        underlying_type: dtype,
                        length: coded.len() as u64,
                        data: pack_words(&stream, 8, self.target.word_bits),
                        compressed: true,
                    },
                    raw_bytes,
                };
            }
            warn!(
                "Compression of '{}' does not shrink it ({} -> {} bytes); storing uncompressed",
                name,
                raw_bytes,
                coded.len()
            );
        }

        self.session.record_constant(raw_bytes as usize, raw_bytes as usize, false);
        PackedBlock {
            binary: BinaryData {
                underlying_type: dtype,
                length: raw_bytes,
                data: pack_words(values, dtype.bits(), self.target.word_bits),
                compressed: false,
            },
            raw_bytes,
        }
    }
}

/// Elements of the box at `offset` with extent `shape` inside `parent`, in `order`.
fn slice_payload(parent: &[i64], order: Order, parent_shape: &Shape, offset: &Shape, shape: &Shape) -> Option<Vec<i64>> {
    (0..element_count(shape) as u64)
        .map(|i| {
            let local = order.ind_to_sub(shape, i);
            let mut coords = [0usize; 4];
            for d in 0..4 {
                coords[d] = offset[d] + local[d];
            }
            parent.get(order.sub_to_ind(parent_shape, &coords) as usize).copied()
        })
        .collect()
}

/// Pool slot before sorting: a whole tensor or one of its subtensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolEntry {
    Whole(TensorId),
    Slice(TensorId, usize),
}

/// Pack every constant of `graph` into pool order.
///
/// Writes the compression outcome back onto the packed tensors.
pub fn build_constant_pool(
    graph: &mut Graph,
    target: &TargetConfig,
    session: &LoweringSession<'_>,
) -> LowerResult<Vec<BinaryData>> {
    let mut entries: Vec<(u32, PoolEntry)> = Vec::new();
    for op in &graph.ops {
        if !matches!(op.kind, OpKind::Constant) {
            continue;
        }
        for &id in &op.outputs {
            let t = graph.tensor(id)?;
            if t.sparse {
                let map = t.sparsity_map.ok_or_else(|| LowerError::MissingSparsityMap {
                    tensor: t.name.clone(),
                    what: "sparsity map",
                })?;
                pool_entries(graph, target, map, &mut entries)?;
            }
            pool_entries(graph, target, id, &mut entries)?;
        }
    }
    entries.sort_by_key(|(index, _)| *index);
    // The same tensor may be reached twice, e.g. a map that is also its own constant.
    entries.dedup();
    check_pool_indices(graph, session, &entries)?;

    let packer = BinaryDataPacker::new(target, session);
    let mut pool = Vec::with_capacity(entries.len());
    for (_, entry) in entries {
        let block = match entry {
            PoolEntry::Whole(id) => packer.pack(graph.tensor_mut(id)?)?,
            PoolEntry::Slice(id, k) => packer.pack_subtensor(graph.tensor_mut(id)?, k)?,
        };
        pool.push(block.binary);
    }
    debug!("Constant pool: {} entries", pool.len());
    Ok(pool)
}

/// Sorted pool indices must be exactly `0..n`, one entry each.
fn check_pool_indices(graph: &Graph, session: &LoweringSession<'_>, entries: &[(u32, PoolEntry)]) -> LowerResult<()> {
    for (position, &(index, entry)) in entries.iter().enumerate() {
        let reason = if index < position as u32 {
            "is already taken by another entry"
        } else if index > position as u32 {
            "leaves a gap in the pool"
        } else {
            continue;
        };
        let tensor = match entry {
            PoolEntry::Whole(id) => graph.tensor(id)?.name.clone(),
            PoolEntry::Slice(id, k) => session.subtensor_name(&graph.tensor(id)?.name, k).to_string(),
        };
        return Err(LowerError::InvalidPoolIndex { tensor, index, reason });
    }
    Ok(())
}

fn pool_entries(
    graph: &Graph,
    target: &TargetConfig,
    id: TensorId,
    entries: &mut Vec<(u32, PoolEntry)>,
) -> LowerResult<()> {
    let t = graph.tensor(id)?;
    if pooled_per_cluster(t, target) {
        for (k, sub) in t.subtensors.iter().enumerate() {
            let index = sub.pool_index.ok_or_else(|| LowerError::MissingPoolIndex {
                tensor: format!("{}sub{}", t.name, k),
            })?;
            entries.push((index, PoolEntry::Slice(id, k)));
        }
    } else {
        let index = t.pool_index.ok_or_else(|| LowerError::MissingPoolIndex {
            tensor: t.name.clone(),
        })?;
        entries.push((index, PoolEntry::Whole(id)));
    }
    Ok(())
}
