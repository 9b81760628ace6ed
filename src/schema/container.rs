// This module wraps an encoded graph file in an ELF relocatable object built with the object
// crate. Each block of the graph file gets its own read-only section: the summary header,
// the constant pool, the three task lists and, under static barrier assignment only, the
// barrier table. Every section body starts with a magic and the format version so a reader
// can reject a foreign or stale artifact before decoding any field, and each body must be
// consumed exactly. Parsing goes through object::File::parse, so a truncated or corrupted
// container surfaces as a FormatError rather than an out-of-bounds read.

//! ELF container for graph files.

use super::codec::{ByteReader, ByteWriter, WireDecode, WireEncode};
use super::{BarrierDescriptor, BinaryData, GraphFile, SummaryHeader, TaskList};
use crate::core::error::FormatError;
use crate::ir::Version;
use object::write::Object as ObjectWriter;
use object::{Architecture, BinaryFormat, Endianness, Object, ObjectSection, SectionKind};

pub const HEADER_SECTION: &str = ".gf.header";
pub const CONSTANTS_SECTION: &str = ".gf.constants";
pub const TASKS_SECTION: &str = ".gf.tasks";
pub const BARRIERS_SECTION: &str = ".gf.barriers";

const MAGIC: [u8; 4] = *b"NPGF";

fn section_body<F>(version: &Version, write: F) -> Vec<u8>
where
    F: FnOnce(&mut ByteWriter),
{
    let mut w = ByteWriter::new();
    w.put_bytes(&MAGIC);
    w.put_u32(version.major);
    w.put_u32(version.minor);
    write(&mut w);
    w.into_inner()
}

/// Encode `graph_file` into container bytes.
///
/// The output depends only on the value of `graph_file`.
pub fn to_bytes(graph_file: &GraphFile) -> Result<Vec<u8>, FormatError> {
    let version = &graph_file.header.version;
    // The runtime that loads graph files runs on the A53 host complex.
    let mut obj = ObjectWriter::new(BinaryFormat::Elf, Architecture::Aarch64, Endianness::Little);

    let mut sections = vec![
        (HEADER_SECTION, section_body(version, |w| graph_file.header.encode(w))),
        (CONSTANTS_SECTION, section_body(version, |w| w.put_vec(&graph_file.binary_data))),
        (TASKS_SECTION, section_body(version, |w| w.put_vec(&graph_file.task_lists))),
    ];
    if !graph_file.header.has_dynamic_barriers() {
        sections.push((
            BARRIERS_SECTION,
            section_body(version, |w| w.put_vec(&graph_file.barrier_table)),
        ));
    }

    for (name, body) in sections {
        let id = obj.add_section(Vec::new(), name.as_bytes().to_vec(), SectionKind::ReadOnlyData);
        obj.append_section_data(id, &body, 8);
    }

    obj.write().map_err(|e| FormatError::Container {
        reason: e.to_string(),
    })
}

/// Verify and decode container bytes.
pub fn from_bytes(bytes: &[u8]) -> Result<GraphFile, FormatError> {
    let file = object::File::parse(bytes).map_err(|e| FormatError::Container {
        reason: e.to_string(),
    })?;
    if file.format() != BinaryFormat::Elf {
        return Err(FormatError::Container {
            reason: format!("expected an ELF container, found {:?}", file.format()),
        });
    }

    let header: SummaryHeader = read_section(&file, HEADER_SECTION, |r| SummaryHeader::decode(r))?;
    if header.version.major != Version::MAJOR {
        return Err(FormatError::VersionMismatch {
            major: header.version.major,
            minor: header.version.minor,
            expected: Version::MAJOR,
        });
    }

    let binary_data: Vec<BinaryData> = read_section(&file, CONSTANTS_SECTION, |r| r.get_vec())?;
    let task_lists: Vec<TaskList> = read_section(&file, TASKS_SECTION, |r| r.get_vec())?;

    let has_table = file.section_by_name(BARRIERS_SECTION).is_some();
    let barrier_table: Vec<BarrierDescriptor> = match (header.has_dynamic_barriers(), has_table) {
        (false, true) => read_section(&file, BARRIERS_SECTION, |r| r.get_vec())?,
        (false, false) => return Err(FormatError::MissingSection { section: BARRIERS_SECTION }),
        (true, true) => return Err(FormatError::UnexpectedSection { section: BARRIERS_SECTION }),
        (true, false) => Vec::new(),
    };

    Ok(GraphFile {
        header,
        task_lists,
        barrier_table,
        binary_data,
    })
}

fn read_section<'data, T, F>(file: &object::File<'data>, name: &'static str, decode: F) -> Result<T, FormatError>
where
    F: FnOnce(&mut ByteReader<'data>) -> Result<T, FormatError>,
{
    let section = file
        .section_by_name(name)
        .ok_or(FormatError::MissingSection { section: name })?;
    let data = section.data().map_err(|e| FormatError::Container {
        reason: e.to_string(),
    })?;

    let mut r = ByteReader::new(data);
    if r.take(MAGIC.len())? != MAGIC {
        return Err(FormatError::BadMagic { section: name });
    }
    let major = r.get_u32()?;
    let minor = r.get_u32()?;
    if major != Version::MAJOR {
        return Err(FormatError::VersionMismatch {
            major,
            minor,
            expected: Version::MAJOR,
        });
    }

    let value = decode(&mut r)?;
    r.finish(name)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ExecutionFlag, Resources, SourceStructure};

    fn empty_graph_file(options: Vec<ExecutionFlag>) -> GraphFile {
        GraphFile {
            header: SummaryHeader {
                version: Version::current(),
                resources: Resources {
                    upa_shaves: 16,
                    nce2_blocks: 20,
                    nn_cmx_per_slice: 1 << 20,
                    nn_cmx_slice_amount: 4,
                    ddr_scratch: 0,
                },
                original_structure: SourceStructure::default(),
                net_input: Vec::new(),
                net_output: Vec::new(),
                task_count: 0,
                layer_count: 0,
                options,
            },
            task_lists: vec![TaskList::default(), TaskList::default(), TaskList::default()],
            barrier_table: Vec::new(),
            binary_data: Vec::new(),
        }
    }

    #[test]
    fn test_sections_present() {
        let bytes = to_bytes(&empty_graph_file(Vec::new())).unwrap();
        let file = object::File::parse(&*bytes).unwrap();
        assert!(file.section_by_name(HEADER_SECTION).is_some());
        assert!(file.section_by_name(BARRIERS_SECTION).is_some());
        assert_eq!(from_bytes(&bytes).unwrap(), empty_graph_file(Vec::new()));
    }

    #[test]
    fn test_dynamic_mode_has_no_table() {
        let gf = empty_graph_file(vec![ExecutionFlag::DynamicBarriers]);
        let bytes = to_bytes(&gf).unwrap();
        let file = object::File::parse(&*bytes).unwrap();
        assert!(file.section_by_name(BARRIERS_SECTION).is_none());
        assert_eq!(from_bytes(&bytes).unwrap(), gf);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            from_bytes(b"definitely not an object file"),
            Err(FormatError::Container { .. })
        ));
    }
}
