//! Test utilities for arena-based testing.
//!
//! Each test gets its own bounded arena, so the names a lowering session
//! interns are released when the test ends.
