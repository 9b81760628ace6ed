// This module groups the infrastructure every lowering component shares. The error module
// holds LowerError, whose variants follow the malformed-input, unsupported-configuration and
// format failure classes, and FormatError for the byte-level reader and entropy decoder.
// The session module provides the arena-backed LoweringSession that interns physical task
// and subtensor names and accumulates LoweringStats across one graph-file build. The
// test_utils module gives unit tests a bounded arena and a ready session.

//! Shared lowering infrastructure.
//!
//! ## Errors (`error`)
//! - [`LowerError`] with a [`LowerResult`] alias
//! - [`FormatError`] for verification of binary artifacts
//!
//! ## Session Management (`session`)
//! - Arena-based name interning using `bumpalo`
//! - Lowering statistics per engine

pub mod error;
pub mod session;
pub mod test_utils;

pub use error::{FormatError, LowerError, LowerResult};
pub use session::{LoweringSession, LoweringStats};
