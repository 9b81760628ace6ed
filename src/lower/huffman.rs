//! Block-wise canonical Huffman coding for byte-typed constants.
//!
//! Stream layout: the original length as a little-endian `u32`, then one
//! block per 4096 input bytes. A block starts with a mode byte:
//!
//! * `0`: the block's bytes stored verbatim;
//! * `1`: 256 code lengths packed as nibbles (128 bytes), the bitstream
//!   length as a little-endian `u16`, then the MSB-first canonical code
//!   bitstream.
//!
//! A block falls back to verbatim storage when a code would exceed
//! [`MAX_CODE_LEN`] bits or when coding does not make it smaller.

use crate::core::error::FormatError;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

pub const BLOCK_SIZE: usize = 4096;
pub const MAX_CODE_LEN: usize = 15;

const MODE_RAW: u8 = 0;
const MODE_HUFFMAN: u8 = 1;
const LENGTH_TABLE_BYTES: usize = 128;

/// Compress `data`. The output always decodes back to `data`.
pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / 2 + 4);
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    for block in data.chunks(BLOCK_SIZE) {
        match encode_block(block) {
            Some(encoded) => out.extend_from_slice(&encoded),
            None => {
                out.push(MODE_RAW);
                out.extend_from_slice(block);
            }
        }
    }
    out
}

/// Inverse of [`compress`].
pub fn decompress(stream: &[u8]) -> Result<Vec<u8>, FormatError> {
    let mut pos = 0;
    let total = u32::from_le_bytes(take(stream, &mut pos, 4)?.try_into().map_err(|_| corrupt("length"))?) as usize;

    let mut out = Vec::new();
    while out.len() < total {
        let block_len = (total - out.len()).min(BLOCK_SIZE);
        match take(stream, &mut pos, 1)?[0] {
            MODE_RAW => out.extend_from_slice(take(stream, &mut pos, block_len)?),
            MODE_HUFFMAN => {
                let table = take(stream, &mut pos, LENGTH_TABLE_BYTES)?;
                let mut lengths = [0u8; 256];
                for (i, byte) in table.iter().enumerate() {
                    lengths[2 * i] = byte & 0x0f;
                    lengths[2 * i + 1] = byte >> 4;
                }
                let size = take(stream, &mut pos, 2)?;
                let size = u16::from_le_bytes([size[0], size[1]]) as usize;
                let bits = take(stream, &mut pos, size)?;
                decode_block(&lengths, bits, block_len, &mut out)?;
            }
            _ => return Err(corrupt("unknown block mode")),
        }
    }
    if pos != stream.len() {
        return Err(corrupt("trailing bytes after last block"));
    }
    Ok(out)
}

fn corrupt(reason: &'static str) -> FormatError {
    FormatError::CorruptStream { reason }
}

fn take<'a>(stream: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8], FormatError> {
    if stream.len() - *pos < n {
        return Err(FormatError::Truncated {
            offset: *pos,
            needed: n,
            available: stream.len() - *pos,
        });
    }
    let slice = &stream[*pos..*pos + n];
    *pos += n;
    Ok(slice)
}

fn encode_block(block: &[u8]) -> Option<Vec<u8>> {
    let mut freq = [0u32; 256];
    for &b in block {
        freq[b as usize] += 1;
    }
    let lengths = code_lengths(&freq)?;
    let codes = canonical_codes(&lengths);

    let mut writer = BitWriter::default();
    for &b in block {
        writer.push(codes[b as usize], lengths[b as usize]);
    }
    let bits = writer.finish();

    let encoded_len = 1 + LENGTH_TABLE_BYTES + 2 + bits.len();
    if encoded_len >= 1 + block.len() || bits.len() > u16::MAX as usize {
        return None;
    }

    let mut out = Vec::with_capacity(encoded_len);
    out.push(MODE_HUFFMAN);
    for pair in lengths.chunks(2) {
        out.push(pair[0] | (pair[1] << 4));
    }
    out.extend_from_slice(&(bits.len() as u16).to_le_bytes());
    out.extend_from_slice(&bits);
    Some(out)
}

/// Huffman code length per symbol, or `None` if one exceeds the limit.
fn code_lengths(freq: &[u32; 256]) -> Option<[u8; 256]> {
    let mut lengths = [0u8; 256];
    let used: Vec<usize> = (0..256).filter(|&s| freq[s] > 0).collect();
    match used.as_slice() {
        [] => return Some(lengths),
        [only] => {
            lengths[*only] = 1;
            return Some(lengths);
        }
        _ => {}
    }

    // Leaves are nodes 0..used.len(); internal nodes are appended.
    let mut parent: Vec<usize> = vec![usize::MAX; used.len()];
    let mut heap: BinaryHeap<Reverse<(u64, usize)>> = used
        .iter()
        .enumerate()
        .map(|(node, &s)| Reverse((freq[s] as u64, node)))
        .collect();
    while heap.len() > 1 {
        let (Some(Reverse((fa, a))), Some(Reverse((fb, b)))) = (heap.pop(), heap.pop()) else {
            break;
        };
        let node = parent.len();
        parent.push(usize::MAX);
        parent[a] = node;
        parent[b] = node;
        heap.push(Reverse((fa + fb, node)));
    }

    for (leaf, &s) in used.iter().enumerate() {
        let mut depth = 0;
        let mut node = leaf;
        while parent[node] != usize::MAX {
            node = parent[node];
            depth += 1;
        }
        if depth > MAX_CODE_LEN {
            return None;
        }
        lengths[s] = depth as u8;
    }
    Some(lengths)
}

/// Canonical codes: symbols ordered by (length, value) get consecutive codes.
fn canonical_codes(lengths: &[u8; 256]) -> [u16; 256] {
    let mut symbols: Vec<usize> = (0..256).filter(|&s| lengths[s] > 0).collect();
    symbols.sort_by_key(|&s| (lengths[s], s));

    let mut codes = [0u16; 256];
    let mut code: u32 = 0;
    let mut prev_len = 0;
    for s in symbols {
        let len = lengths[s];
        code <<= len - prev_len;
        codes[s] = code as u16;
        code += 1;
        prev_len = len;
    }
    codes
}

fn decode_block(lengths: &[u8; 256], bits: &[u8], count: usize, out: &mut Vec<u8>) -> Result<(), FormatError> {
    let mut per_len = [0u32; MAX_CODE_LEN + 1];
    for &len in lengths.iter() {
        per_len[len as usize] += 1;
    }
    per_len[0] = 0;

    let mut symbols: Vec<u8> = (0..=255u8).filter(|&s| lengths[s as usize] > 0).collect();
    symbols.sort_by_key(|&s| (lengths[s as usize], s));

    let mut first = [0u32; MAX_CODE_LEN + 1];
    let mut index = [0usize; MAX_CODE_LEN + 1];
    let mut code = 0u32;
    let mut seen = 0usize;
    for len in 1..=MAX_CODE_LEN {
        code <<= 1;
        first[len] = code;
        index[len] = seen;
        code += per_len[len];
        seen += per_len[len] as usize;
    }

    let mut reader = BitReader { bits, pos: 0 };
    for _ in 0..count {
        let mut code = 0u32;
        let mut len = 0;
        loop {
            code = (code << 1) | reader.next_bit().ok_or_else(|| corrupt("bitstream exhausted"))?;
            len += 1;
            if len > MAX_CODE_LEN {
                return Err(corrupt("invalid code"));
            }
            if code >= first[len] && code - first[len] < per_len[len] {
                out.push(symbols[index[len] + (code - first[len]) as usize]);
                break;
            }
        }
    }
    Ok(())
}

#[derive(Default)]
struct BitWriter {
    bytes: Vec<u8>,
    current: u8,
    filled: u8,
}

impl BitWriter {
    fn push(&mut self, code: u16, len: u8) {
        for i in (0..len).rev() {
            self.current = (self.current << 1) | ((code >> i) & 1) as u8;
            self.filled += 1;
            if self.filled == 8 {
                self.bytes.push(self.current);
                self.current = 0;
                self.filled = 0;
            }
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.filled > 0 {
            self.bytes.push(self.current << (8 - self.filled));
        }
        self.bytes
    }
}

struct BitReader<'a> {
    bits: &'a [u8],
    pos: usize,
}

impl BitReader<'_> {
    fn next_bit(&mut self) -> Option<u32> {
        let byte = self.bits.get(self.pos / 8)?;
        let bit = (byte >> (7 - self.pos % 8)) & 1;
        self.pos += 1;
        Some(bit as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skewed_data_shrinks() {
        let data: Vec<u8> = (0..10_000u32).map(|i| if i % 7 == 0 { 3 } else { 0 }).collect();
        let packed = compress(&data);
        assert!(packed.len() < data.len() / 3);
        assert_eq!(decompress(&packed).unwrap(), data);
    }

    #[test]
    fn test_uniform_data_falls_back_to_raw() {
        let data: Vec<u8> = (0..BLOCK_SIZE).map(|i| i as u8).collect();
        let packed = compress(&data);
        assert_eq!(packed.len(), 4 + 1 + BLOCK_SIZE);
        assert_eq!(packed[4], MODE_RAW);
        assert_eq!(decompress(&packed).unwrap(), data);
    }

    #[test]
    fn test_single_symbol_block() {
        let data = vec![0xAAu8; 5000];
        assert_eq!(decompress(&compress(&data)).unwrap(), data);
    }

    #[test]
    fn test_empty() {
        assert_eq!(compress(&[]), vec![0, 0, 0, 0]);
        assert!(decompress(&[0, 0, 0, 0]).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_streams() {
        let data = vec![1u8; 6000];
        let mut packed = compress(&data);
        assert!(decompress(&packed[..packed.len() - 1]).is_err());
        packed[4] = 9;
        assert_eq!(decompress(&packed), Err(FormatError::CorruptStream { reason: "unknown block mode" }));
        assert!(matches!(decompress(&[1, 0]), Err(FormatError::Truncated { .. })));
    }

    #[test]
    fn test_code_lengths_respect_limit() {
        let mut freq = [0u32; 256];
        // Fibonacci weights build the deepest possible tree.
        let (mut a, mut b) = (1u32, 1u32);
        for f in freq.iter_mut().take(20) {
            *f = a;
            let next = a + b;
            a = b;
            b = next;
        }
        assert!(code_lengths(&freq).is_none());
        freq.iter_mut().skip(10).for_each(|f| *f = 0);
        let lengths = code_lengths(&freq).unwrap();
        assert!(lengths.iter().all(|&l| (l as usize) <= MAX_CODE_LEN));
    }
}
