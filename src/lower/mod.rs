//! Lowering of a scheduled graph into graph-file components.
//!
//! - [`address`] - tensor and subtensor references
//! - [`workload`] - DPU invariant and variant fields
//! - [`expand`] - logical op to physical task expansion
//! - [`barrier`] - barrier producer/consumer counts
//! - [`packer`] - constant packing and the constant pool
//! - [`huffman`] - entropy codec for byte-typed constants

pub mod address;
pub mod workload;
pub mod expand;
pub mod barrier;
pub mod packer;
pub mod huffman;

pub use address::AddressResolver;
pub use barrier::{physical_signal_count, BarrierGraphBuilder};
pub use expand::{dma_pattern, DmaPattern, TaskExpander};
pub use packer::{build_constant_pool, pack_words, unpack_words, BinaryDataPacker, PackedBlock};
pub use workload::WorkloadFieldBuilder;
