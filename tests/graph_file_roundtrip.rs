mod common;

use bumpalo::Bump;
use common::{init_logging, sok_conv, soh_network};
use npu_graphfile::ir::OpKind;
use npu_graphfile::schema::container::{from_bytes, to_bytes};
use npu_graphfile::schema::{SpecificTask, BARRIER_LIST, COMPUTE_LIST, DMA_LIST};
use npu_graphfile::{
    BarrierMode, FormatError, GraphFile, GraphFileSerializer, LowerError, LoweringSession, TargetConfig,
};
use std::path::PathBuf;

fn scratch_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("npu-graphfile-{}-{}.blob", std::process::id(), name))
}

fn soh_graph_file(target: &TargetConfig) -> GraphFile {
    let (mut graph, _) = soh_network(target);
    let arena = Bump::new();
    let session = LoweringSession::new(&arena);
    GraphFileSerializer::new(target, &session).build_graph_file(&mut graph).unwrap()
}

#[test]
fn test_task_lists_and_header() {
    init_logging();
    let target = TargetConfig::default();
    let (mut graph, ids) = soh_network(&target);
    let arena = Bump::new();
    let session = LoweringSession::new(&arena);
    let gf = GraphFileSerializer::new(&target, &session).build_graph_file(&mut graph).unwrap();

    assert_eq!(gf.task_lists.len(), 3);
    assert_eq!(gf.task_lists[COMPUTE_LIST].content.len(), 8);
    assert_eq!(gf.task_lists[DMA_LIST].content.len(), 19);
    assert_eq!(gf.task_lists[BARRIER_LIST].content.len(), 5);
    assert_eq!(gf.header.task_count, 32);
    assert_eq!(gf.header.layer_count, 9);

    let node_ids: Vec<u32> = gf.tasks().map(|t| t.node_id).collect();
    assert_eq!(node_ids, (0..32).collect::<Vec<_>>());

    // Dispatch order follows the scheduling numbers.
    let dma_sources: Vec<u32> = gf.task_lists[DMA_LIST]
        .content
        .iter()
        .map(|t| t.source_task_ids[0])
        .collect();
    let mut expected = vec![ids.input_dma.0; 4];
    expected.push(ids.window_dma.0);
    expected.extend([ids.spill.0; 4]);
    expected.extend([ids.fill.0; 4]);
    expected.extend([ids.weights_dma.0, ids.table_dma.0]);
    expected.extend([ids.output_dma.0; 4]);
    assert_eq!(dma_sources, expected);
    assert_eq!(gf.task_lists[COMPUTE_LIST].content[0].name, "poolsub0");
    assert_eq!(gf.task_lists[COMPUTE_LIST].content[4].name, "convsub0");

    let barrier_ids: Vec<u32> = gf.task_lists[BARRIER_LIST]
        .content
        .iter()
        .map(|t| match t.task {
            SpecificTask::BarrierConfiguration(d) => d.barrier_id,
            _ => u32::MAX,
        })
        .collect();
    assert_eq!(barrier_ids, vec![0, 1, 2, 3, 4]);

    let header = &gf.header;
    assert_eq!(header.resources.nce2_blocks, 20);
    assert_eq!(header.resources.nn_cmx_slice_amount, 4);
    assert_eq!(header.net_input.len(), 1);
    assert_eq!(header.net_input[0].name, "input");
    assert_eq!(header.net_output.len(), 1);
    assert_eq!(header.original_structure.nodes.len(), graph.ops.len());
    let input_op = graph
        .op_ids()
        .find(|&id| matches!(graph.ops[id.0 as usize].kind, OpKind::Input))
        .unwrap();
    assert_eq!(header.original_structure.first_ids, vec![input_op.0]);
    assert_eq!(gf.binary_data.len(), 3);
}

#[test]
fn test_bytes_round_trip() {
    init_logging();
    for target in [TargetConfig::default(), TargetConfig::default().with_barrier_mode(BarrierMode::Dynamic)] {
        let gf = soh_graph_file(&target);
        let bytes = to_bytes(&gf).unwrap();
        assert_eq!(from_bytes(&bytes).unwrap(), gf);
    }

    let target = TargetConfig::default();
    let (mut graph, _) = sok_conv(&target);
    let arena = Bump::new();
    let session = LoweringSession::new(&arena);
    let gf = GraphFileSerializer::new(&target, &session).build_graph_file(&mut graph).unwrap();
    assert_eq!(from_bytes(&to_bytes(&gf).unwrap()).unwrap(), gf);
}

#[test]
fn test_output_is_deterministic() {
    init_logging();
    let target = TargetConfig::default();
    let first = to_bytes(&soh_graph_file(&target)).unwrap();
    let second = to_bytes(&soh_graph_file(&target)).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_file_round_trip() {
    init_logging();
    let target = TargetConfig::default();
    let gf = soh_graph_file(&target);
    let path = scratch_path("roundtrip");

    GraphFileSerializer::serialize(&gf, &path).unwrap();
    let read = GraphFileSerializer::deserialize(&path).unwrap();
    assert_eq!(read, gf);

    // Overwriting leaves no temporary file behind.
    GraphFileSerializer::serialize(&gf, &path).unwrap();
    let leftovers = std::fs::read_dir(std::env::temp_dir())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with("roundtrip.blob.tmp"))
        .count();
    assert_eq!(leftovers, 0);
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn test_truncated_file_rejected() {
    init_logging();
    let target = TargetConfig::default();
    let bytes = to_bytes(&soh_graph_file(&target)).unwrap();
    let path = scratch_path("truncated");
    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

    let err = GraphFileSerializer::deserialize(&path).unwrap_err();
    std::fs::remove_file(&path).unwrap();
    assert!(matches!(err, LowerError::Format(_)), "{}", err);
}

fn magic_offset(bytes: &[u8]) -> usize {
    bytes.windows(4).position(|w| w == b"NPGF").unwrap()
}

#[test]
fn test_corrupted_sections_rejected() {
    init_logging();
    let target = TargetConfig::default();
    let bytes = to_bytes(&soh_graph_file(&target)).unwrap();

    let mut bad_magic = bytes.clone();
    let at = magic_offset(&bad_magic);
    bad_magic[at] = b'X';
    assert!(matches!(from_bytes(&bad_magic), Err(FormatError::BadMagic { .. })));

    let mut stale = bytes.clone();
    let at = magic_offset(&stale) + 4;
    stale[at..at + 4].copy_from_slice(&99u32.to_le_bytes());
    assert!(matches!(
        from_bytes(&stale),
        Err(FormatError::VersionMismatch { major: 99, .. })
    ));

    assert!(from_bytes(&bytes[..64]).is_err());
}

#[test]
fn test_missing_file_is_io_error() {
    init_logging();
    let path = scratch_path("does-not-exist");
    let err = GraphFileSerializer::deserialize(&path).unwrap_err();
    assert!(matches!(err, LowerError::Io { .. }));
}

#[test]
fn test_unscheduled_task_rejected() {
    init_logging();
    let target = TargetConfig::default();
    let (mut graph, ids) = soh_network(&target);
    graph.ops[ids.conv.0 as usize].schedule = None;
    let arena = Bump::new();
    let session = LoweringSession::new(&arena);
    let err = GraphFileSerializer::new(&target, &session)
        .build_graph_file(&mut graph)
        .unwrap_err();
    assert!(matches!(err, LowerError::MissingAttribute { attribute: "scheduling number", .. }));
}

#[test]
fn test_dynamic_mode_flagged() {
    init_logging();
    let target = TargetConfig::default().with_barrier_mode(BarrierMode::Dynamic);
    let gf = soh_graph_file(&target);
    assert!(gf.barrier_table.is_empty());
    assert!(gf.header.has_dynamic_barriers());
    assert!(!soh_graph_file(&TargetConfig::default()).header.has_dynamic_barriers());
}
