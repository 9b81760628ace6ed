// This module assembles and persists a complete graph file. build_graph_file runs the stage
// end to end over one scheduled graph: the constant pool is packed first (it is the only step
// that writes tensor state), then every DMA, DPU and UPA op is expanded in scheduling order,
// DPU and UPA tasks into the compute list and DMA tasks into the DMA list, and finally the
// barrier-control ops are expanded in ascending barrier index into the third list. Node ids
// are assigned in list order after expansion. Under static barrier assignment the barrier
// table is attached as well. The header echoes the data-graph topology, the network inputs
// and outputs, and the resource description of the target. serialize writes the container
// to a sibling temporary file and renames it over the target so a failed write never leaves
// a truncated artifact behind; deserialize verifies the container before decoding any field.

//! Graph-file assembly and (de)serialization.

use crate::core::error::{LowerError, LowerResult};
use crate::core::session::LoweringSession;
use crate::ir::{BarrierMode, Graph, OpId, OpKind, TargetConfig};
use crate::lower::{build_constant_pool, AddressResolver, BarrierGraphBuilder, TaskExpander};
use crate::schema::container;
use crate::schema::{
    ExecutionFlag, GraphFile, Resources, SourceNode, SourceStructure, SpecificTask, SummaryHeader,
    TaskList, TensorReference, BARRIER_LIST, COMPUTE_LIST, DMA_LIST,
};
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

/// Builds graph files and moves them to and from disk.
pub struct GraphFileSerializer<'a, 'arena> {
    target: &'a TargetConfig,
    session: &'a LoweringSession<'arena>,
}

impl<'a, 'arena> GraphFileSerializer<'a, 'arena> {
    pub fn new(target: &'a TargetConfig, session: &'a LoweringSession<'arena>) -> Self {
        Self { target, session }
    }

    /// Lower `graph` into a graph file.
    ///
    /// Packing the constant pool records the compression outcome on the
    /// graph's constant tensors; nothing else in `graph` changes.
    pub fn build_graph_file(&self, graph: &mut Graph) -> LowerResult<GraphFile> {
        debug!("Building graph file for '{}'", graph.name);
        let binary_data = build_constant_pool(graph, self.target, self.session)?;
        let graph: &Graph = graph;

        let mut scheduled: Vec<(u32, OpId)> = Vec::new();
        let mut barriers: Vec<(u32, OpId)> = Vec::new();
        for id in graph.op_ids() {
            let op = graph.op(id)?;
            match &op.kind {
                OpKind::Dma(_) | OpKind::Nce(_) | OpKind::Upa(_) | OpKind::Controller => {
                    let number = op
                        .schedule
                        .ok_or_else(|| LowerError::missing(&op.name, "scheduling number"))?;
                    scheduled.push((number, id));
                }
                OpKind::BarrierControl(barrier) => barriers.push((barrier.index, id)),
                OpKind::Input | OpKind::Output | OpKind::Constant => {}
            }
        }
        scheduled.sort();
        barriers.sort();

        let expander = TaskExpander::new(graph, self.target, self.session);
        let mut task_lists = vec![TaskList::default(), TaskList::default(), TaskList::default()];
        for &(_, id) in &scheduled {
            for task in expander.expand(id)? {
                let list = match task.task {
                    SpecificTask::Dma(_) => DMA_LIST,
                    _ => COMPUTE_LIST,
                };
                task_lists[list].content.push(task);
            }
        }
        for &(_, id) in &barriers {
            task_lists[BARRIER_LIST].content.extend(expander.expand(id)?);
        }

        let mut node_id = 0;
        for task in task_lists.iter_mut().flat_map(|list| list.content.iter_mut()) {
            task.node_id = node_id;
            node_id += 1;
        }

        let barrier_table = match self.target.barrier_mode {
            BarrierMode::Static => BarrierGraphBuilder::new(graph, self.target).barrier_table()?,
            BarrierMode::Dynamic => Vec::new(),
        };

        let header = self.build_header(graph, node_id, scheduled.len() as u32)?;
        debug!(
            "Graph file '{}': {} compute, {} DMA, {} barrier tasks, {} constants",
            graph.name,
            task_lists[COMPUTE_LIST].content.len(),
            task_lists[DMA_LIST].content.len(),
            task_lists[BARRIER_LIST].content.len(),
            binary_data.len()
        );

        Ok(GraphFile {
            header,
            task_lists,
            barrier_table,
            binary_data,
        })
    }

    fn build_header(&self, graph: &Graph, task_count: u32, layer_count: u32) -> LowerResult<SummaryHeader> {
        let resolver = AddressResolver::new(graph, self.target, self.session);
        let mut structure = SourceStructure::default();
        let mut net_input: Vec<TensorReference> = Vec::new();
        let mut net_output: Vec<TensorReference> = Vec::new();

        for id in graph.op_ids() {
            let op = graph.op(id)?;
            match op.kind {
                OpKind::Input => {
                    structure.first_ids.push(id.0);
                    for &t in &op.outputs {
                        net_input.push(resolver.resolve(t, None, None)?);
                    }
                }
                OpKind::Output => {
                    for &t in &op.inputs {
                        net_output.push(resolver.resolve(t, None, None)?);
                    }
                }
                _ => {}
            }
            structure.nodes.push(SourceNode {
                name: op.name.clone(),
                this_id: id.0,
                source_ids: graph.data_parents(id).iter().map(|p| p.0).collect(),
                sink_ids: graph.data_children(id).iter().map(|c| c.0).collect(),
            });
        }

        let t = self.target;
        let mut options = Vec::new();
        if t.barrier_mode == BarrierMode::Dynamic {
            options.push(ExecutionFlag::DynamicBarriers);
        }
        Ok(SummaryHeader {
            version: t.version.clone(),
            resources: Resources {
                upa_shaves: t.upa_shaves,
                nce2_blocks: t.dpus_per_cluster * t.clusters as u32,
                nn_cmx_per_slice: t.cmx_per_cluster,
                nn_cmx_slice_amount: t.clusters as u32,
                ddr_scratch: t.ddr_scratch,
            },
            original_structure: structure,
            net_input,
            net_output,
            task_count,
            layer_count,
            options,
        })
    }

    /// Write `graph_file` to `path`, replacing any existing file atomically.
    pub fn serialize(graph_file: &GraphFile, path: &Path) -> LowerResult<()> {
        let bytes = container::to_bytes(graph_file)?;
        let tmp = temp_path(path);
        let io = |source| LowerError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Err(e) = fs::write(&tmp, &bytes) {
            let _ = fs::remove_file(&tmp);
            return Err(io(e));
        }
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(io(e));
        }
        debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }

    /// Read and verify the graph file at `path`.
    pub fn deserialize(path: &Path) -> LowerResult<GraphFile> {
        let bytes = fs::read(path).map_err(|source| LowerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(container::from_bytes(&bytes)?)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_path_is_sibling() {
        let p = Path::new("/tmp/out/net.blob");
        assert_eq!(temp_path(p), PathBuf::from("/tmp/out/.net.blob.tmp"));
    }
}
