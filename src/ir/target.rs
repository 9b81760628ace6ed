// This module holds the resource-and-target description lowering is configured with. It
// replaces a loaded target descriptor with a plain struct plus two presets: `legacy()` for
// the older NPU generation and `Default` for the newer one. The two generations share one
// lowering implementation; where they diverge, Capabilities flags select the behaviour:
// the SplitOverK output-channel offset on DPU invariants, and hardware-decompression aware
// handling of byte-typed SplitOverK constants and compressed DMA descriptors. The barrier
// assignment mode, bus word width for constant packing, entropy compression switch and the
// format version emitted into the header are configured here as well.

//! Target description and lowering configuration.

/// Graph-file format version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub hash: String,
}

impl Version {
    pub const MAJOR: u32 = 3;
    pub const MINOR: u32 = 11;

    pub fn current() -> Self {
        Self {
            major: Self::MAJOR,
            minor: Self::MINOR,
            patch: 0,
            hash: String::new(),
        }
    }
}

/// How barrier indices are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierMode {
    /// Indices fixed at compile time; a barrier table is emitted.
    Static,
    /// Indices resolved by the runtime at load time.
    Dynamic,
}

/// Behaviour that differs between NPU generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// SplitOverK DPU invariants carry the output-channel offset of their cluster.
    pub out_channel_offset: bool,
    /// The DMA engine decompresses constants; byte-typed SplitOverK constants
    /// are pooled per cluster.
    pub hardware_decompression: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetConfig {
    pub clusters: usize,
    pub cmx_per_cluster: u64,
    pub upa_shaves: u32,
    pub dpus_per_cluster: u32,
    pub ddr_scratch: u64,
    pub channel_alignment: usize,
    pub width_alignment: usize,
    /// Word width of the constant-pool bus, in bits.
    pub word_bits: u32,
    pub barrier_mode: BarrierMode,
    pub huffman_compression: bool,
    pub capabilities: Capabilities,
    pub version: Version,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            clusters: 4,
            cmx_per_cluster: 1024 * 1024,
            upa_shaves: 16,
            dpus_per_cluster: 5,
            ddr_scratch: 32 * 1024 * 1024,
            channel_alignment: 16,
            width_alignment: 16,
            word_bits: 64,
            barrier_mode: BarrierMode::Static,
            huffman_compression: true,
            capabilities: Capabilities {
                out_channel_offset: true,
                hardware_decompression: true,
            },
            version: Version::current(),
        }
    }
}

impl TargetConfig {
    /// Older generation: no capability flags, no compression.
    pub fn legacy() -> Self {
        Self {
            huffman_compression: false,
            capabilities: Capabilities {
                out_channel_offset: false,
                hardware_decompression: false,
            },
            ..Self::default()
        }
    }

    pub fn with_clusters(mut self, clusters: usize) -> Self {
        self.clusters = clusters;
        self
    }

    pub fn with_barrier_mode(mut self, mode: BarrierMode) -> Self {
        self.barrier_mode = mode;
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.huffman_compression = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let newer = TargetConfig::default();
        let older = TargetConfig::legacy().with_clusters(2);
        assert!(newer.capabilities.hardware_decompression);
        assert!(!older.capabilities.out_channel_offset);
        assert_eq!(older.clusters, 2);
        assert_eq!(older.version, Version::current());
    }
}
