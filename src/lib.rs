//! npu-graphfile - graph-file lowering for multi-cluster NPUs.
//!
//! Takes a scheduled graph whose ops already carry split strategies,
//! workloads, scheduling numbers and barrier attributes, and produces the
//! versioned graph file the device runtime loads: physical DMA, DPU and UPA
//! tasks in dispatch order, barrier arities, and the packed constant pool.
//!
//! # Primary Usage
//!
//! ```ignore
//! use npu_graphfile::{GraphFileSerializer, LoweringSession, TargetConfig};
//! use bumpalo::Bump;
//!
//! let arena = Bump::new();
//! let session = LoweringSession::new(&arena);
//! let target = TargetConfig::default();
//!
//! let serializer = GraphFileSerializer::new(&target, &session);
//! let graph_file = serializer.build_graph_file(&mut graph)?;
//! GraphFileSerializer::serialize(&graph_file, Path::new("net.blob"))?;
//! ```
//!
//! # Architecture
//!
//! - [`ir`] - scheduled graph, tensors, buffers and target description
//! - [`lower`] - address resolution, workloads, task expansion, barriers, packing
//! - [`schema`] - wire types, byte codec and the ELF container
//! - [`serializer`] - graph-file assembly and file I/O
//! - [`core`] - errors and the lowering session

pub mod core;
pub mod ir;
pub mod lower;
pub mod schema;
pub mod serializer;

pub use core::{FormatError, LowerError, LowerResult, LoweringSession, LoweringStats};
pub use ir::{BarrierMode, Capabilities, Graph, GraphBuilder, TargetConfig};
pub use schema::GraphFile;
pub use serializer::GraphFileSerializer;
