//! Stable exit codes for the fanout CLI and for synthetic leaf results.

/// Every host succeeded, or the interactive session ended cleanly.
pub const OK: i32 = 0;
/// At least one host reported a non-zero exit code.
pub const FAILED: i32 = 1;
/// Arguments were missing or malformed; nothing was executed.
pub const USAGE: i32 = 2;
/// Host spec, config, or agent protocol was invalid.
pub const INVALID: i32 = 3;

/// Leaf was killed because its own or an enclosing timeout elapsed.
pub const TIMED_OUT: i32 = 124;
/// Leaf process ended without an exit code (terminated by a signal).
pub const TERMINATED: i32 = 137;
/// Connection or session could not be established (mirrors `ssh`'s 255).
pub const TRANSPORT_FAILURE: i32 = 255;
