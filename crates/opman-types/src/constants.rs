//! System-wide constants for OpMan.

/// Number of managed units bound at bootstrap.
pub const UNIT_COUNT: usize = 9;

/// Default approval threshold (M in M-of-N).
pub const DEFAULT_THRESHOLD: usize = 3;

/// Default limit on simultaneously open (non-terminal) operations.
pub const DEFAULT_MAX_PENDING_OPERATIONS: usize = 1_000;

/// Domain separator for operation digests.
pub const OPERATION_DIGEST_DOMAIN: &[u8] = b"opman:op:v1:";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "OpMan";
