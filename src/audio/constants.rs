//! Central constants for stream acquisition and probing.

// ── Stream transport ─────────────────────────────────────────────────────────

/// Bytes requested per read from the extractor's stdout.
pub const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Chunks buffered between the stdout pump and the consumer (~1 MiB).
pub const STREAM_CHANNEL_CAPACITY: usize = 64;

// ── Probing ──────────────────────────────────────────────────────────────────

/// Minimum bytes needed before container magic can be sniffed.
pub const PROBE_MIN_BYTES: usize = 12;

/// Upper bound on bytes inspected when looking for an Opus codec marker.
pub const PROBE_MAX_BYTES: usize = 64 * 1024;
