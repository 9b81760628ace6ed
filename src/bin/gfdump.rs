//! Graph-file inspection tool.
//!
//! Prints the header, task-list sizes, barrier table and constant-pool
//! summary of a serialized graph file, or only verifies it with `--verify`.

use clap::Parser;
use npu_graphfile::schema::{BARRIER_LIST, COMPUTE_LIST, DMA_LIST};
use npu_graphfile::{GraphFile, GraphFileSerializer};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about = "Inspect an NPU graph file")]
struct Args {
    /// Path to the graph file.
    path: PathBuf,

    #[arg(long)]
    /// Only verify the container and exit.
    verify: bool,

    #[arg(long, short)]
    /// Also list every task.
    tasks: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let graph_file = match GraphFileSerializer::deserialize(&args.path) {
        Ok(graph_file) => graph_file,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    if args.verify {
        println!("{}: ok", args.path.display());
        return;
    }
    dump(&graph_file, args.tasks);
}

fn dump(gf: &GraphFile, tasks: bool) {
    let h = &gf.header;
    println!(
        "version {}.{}.{} {}",
        h.version.major, h.version.minor, h.version.patch, h.version.hash
    );
    println!(
        "resources: {} shaves, {} DPUs, {} x {} bytes CMX, {} bytes DDR scratch",
        h.resources.upa_shaves,
        h.resources.nce2_blocks,
        h.resources.nn_cmx_slice_amount,
        h.resources.nn_cmx_per_slice,
        h.resources.ddr_scratch
    );
    println!(
        "{} layers, {} tasks, dynamic barriers: {}",
        h.layer_count,
        h.task_count,
        h.has_dynamic_barriers()
    );
    for input in &h.net_input {
        println!("input  {} {:?} {}", input.name, input.dimensions, input.data_dtype);
    }
    for output in &h.net_output {
        println!("output {} {:?} {}", output.name, output.dimensions, output.data_dtype);
    }

    for (label, index) in [("compute", COMPUTE_LIST), ("dma", DMA_LIST), ("barrier", BARRIER_LIST)] {
        let list = gf.task_lists.get(index).map_or(&[][..], |l| &l.content[..]);
        println!("{} list: {} tasks", label, list.len());
        if tasks {
            for task in list {
                println!(
                    "  #{:<4} {:<10} {:<32} wait {:?} update {:?}",
                    task.node_id,
                    task.task.engine(),
                    task.name,
                    task.associated_barriers.wait_barriers,
                    task.associated_barriers.update_barriers
                );
            }
        }
    }

    if !gf.barrier_table.is_empty() {
        println!("barrier table:");
        for b in &gf.barrier_table {
            println!("  {:>4}: {} producers, {} consumers", b.barrier_id, b.producer_count, b.consumer_count);
        }
    }

    let stored: u64 = gf.binary_data.iter().map(|b| b.length).sum();
    let compressed = gf.binary_data.iter().filter(|b| b.compressed).count();
    println!(
        "constant pool: {} entries, {} bytes, {} compressed",
        gf.binary_data.len(),
        stored,
        compressed
    );
}
