// This module provides arena-based lowering session management using the bumpalo crate.
// LoweringSession owns a borrowed arena with the same lifetime as one graph-file build and
// tracks everything the build observes but does not feed back into the artifact: interned
// physical-task and subtensor names (a subtensor reference is named "<tensor>sub<cluster>"
// and the same name is requested by the DMA that fills it and the DPU task that reads it),
// the op currently being lowered for log context, and LoweringStats. LoweringStats counts
// logical ops lowered, physical tasks per engine, barriers configured, constant-pool entries
// and the raw versus stored byte totals of the packer, and renders them through Display for
// the gfdump tool and debug logging.

//! Arena-based lowering session management.
//!
//! All names built while expanding tasks are interned in the session arena,
//! so repeated lookups of the same subtensor name share one allocation.

use bumpalo::Bump;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

/// Arena-based lowering session.
pub struct LoweringSession<'arena> {
    /// Arena allocator for interned names.
    arena: &'arena Bump,

    /// Session statistics.
    stats: RefCell<LoweringStats>,

    /// String interning for task and reference names.
    interned_strings: RefCell<HashMap<String, &'arena str>>,

    /// Op currently being lowered.
    current_op: RefCell<Option<String>>,
}

impl<'arena> LoweringSession<'arena> {
    /// Create a new lowering session with the given arena.
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(LoweringStats::default()),
            interned_strings: RefCell::new(HashMap::new()),
            current_op: RefCell::new(None),
        }
    }

    /// Get access to the arena allocator.
    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Intern a string in the arena.
    pub fn intern_str(&self, s: &str) -> &'arena str {
        let mut strings = self.interned_strings.borrow_mut();
        if let Some(&interned) = strings.get(s) {
            return interned;
        }

        let interned = self.arena.alloc_str(s);
        strings.insert(s.to_string(), interned);
        interned
    }

    /// Name of the per-cluster slice of a tensor.
    pub fn subtensor_name(&self, tensor: &str, cluster: usize) -> &'arena str {
        self.intern_str(&format!("{}sub{}", tensor, cluster))
    }

    /// Set the op currently being lowered.
    pub fn set_current_op(&self, name: &str) {
        *self.current_op.borrow_mut() = Some(name.to_string());
    }

    /// Op currently being lowered, if any.
    pub fn current_op(&self) -> Option<String> {
        self.current_op.borrow().clone()
    }

    /// Record that a logical op was lowered into `tasks` physical tasks.
    pub fn record_op_lowered(&self, engine: &str, tasks: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.ops_lowered += 1;
        stats.tasks_emitted += tasks;
        *stats.tasks_per_engine.entry(engine.to_string()).or_insert(0) += tasks;
        *self.current_op.borrow_mut() = None;
    }

    /// Record a barrier configuration.
    pub fn record_barrier(&self) {
        self.stats.borrow_mut().barriers += 1;
    }

    /// Record a constant-pool entry.
    pub fn record_constant(&self, raw_bytes: usize, stored_bytes: usize, compressed: bool) {
        let mut stats = self.stats.borrow_mut();
        stats.constants_packed += 1;
        stats.raw_constant_bytes += raw_bytes;
        stats.stored_constant_bytes += stored_bytes;
        if compressed {
            stats.constants_compressed += 1;
        }
    }

    /// Get lowering statistics.
    pub fn stats(&self) -> LoweringStats {
        self.stats.borrow().clone()
    }
}

/// Lowering session statistics.
#[derive(Debug, Default, Clone)]
pub struct LoweringStats {
    /// Logical ops lowered into physical tasks.
    pub ops_lowered: usize,

    /// Physical tasks emitted across all engines.
    pub tasks_emitted: usize,

    /// Physical task count per engine.
    pub tasks_per_engine: HashMap<String, usize>,

    /// Barriers configured.
    pub barriers: usize,

    /// Constant-pool entries written.
    pub constants_packed: usize,

    /// Entries stored compressed.
    pub constants_compressed: usize,

    /// Packed bytes before compression.
    pub raw_constant_bytes: usize,

    /// Bytes actually stored in the pool.
    pub stored_constant_bytes: usize,
}

impl fmt::Display for LoweringStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Lowering Session Statistics:")?;
        writeln!(f, "  Ops lowered: {}", self.ops_lowered)?;
        writeln!(f, "  Physical tasks: {}", self.tasks_emitted)?;
        writeln!(f, "  Barriers: {}", self.barriers)?;
        writeln!(
            f,
            "  Constants: {} ({} compressed, {} -> {} bytes)",
            self.constants_packed,
            self.constants_compressed,
            self.raw_constant_bytes,
            self.stored_constant_bytes
        )?;

        if !self.tasks_per_engine.is_empty() {
            writeln!(f, "  Tasks per engine:")?;
            let mut sorted: Vec<_> = self.tasks_per_engine.iter().collect();
            sorted.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));

            for (engine, count) in sorted {
                writeln!(f, "    {}: {}", engine, count)?;
            }
        }

        Ok(())
    }
}
