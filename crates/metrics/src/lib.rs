//! Metrics facade for tessera tiles.
//!
//! Provides a [`MetricsRecorder`] trait with domain-specific methods and default
//! no-op implementations. A global singleton recorder is accessed via [`recorder()`],
//! and convenience free functions delegate to it.
//!
//! # Usage
//!
//! Tiles publish cumulative counter snapshots from their housekeeping step:
//! ```ignore
//! tessera_metrics::set_stem_counters("dedup", 0, &counters);
//! tessera_metrics::record_tile_fatal("exec", 1);
//! ```
//!
//! At startup, install a backend with [`set_global_recorder`]. Without one,
//! every call is a no-op.

use std::sync::OnceLock;

// ═══════════════════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════════════════

/// Run-loop counters kept by every tile.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StemCounters {
    /// Fragments handed to the tile's processing callback.
    pub processed: u64,
    /// Fragments dropped by the tile's pre-validation filter.
    pub filtered: u64,
    /// Fragments lost because the producer lapped the consumer while polling.
    pub overrun_polling: u64,
    /// Fragments lost because the producer overwrote them during validation.
    pub overrun_reading: u64,
    /// Loop iterations that found no credits toward reliable consumers.
    pub backpressure: u64,
    /// Loop iterations that found no input ready.
    pub caught_up: u64,
}

/// Counters specific to the deduplication tile.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DedupCounters {
    /// Transactions dropped because their signature was seen before.
    pub dedup_fail: u64,
    /// Bundles marked failed by a duplicate member.
    pub bundle_fail: u64,
    /// Bundle members dropped because an earlier member failed.
    pub bundle_peer_failure: u64,
    /// Votes received through the gossip path.
    pub gossiped_votes: u64,
}

/// Counters specific to the execution tile.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExecCounters {
    pub epochs: u64,
    pub slots: u64,
    pub txns_executed: u64,
    pub txns_failed_sanitize: u64,
    pub txns_failed_signature: u64,
    pub txns_failed_execution: u64,
    pub hash_requests: u64,
}

// ═══════════════════════════════════════════════════════════════════════
// Trait
// ═══════════════════════════════════════════════════════════════════════

/// Domain-specific metrics recording trait.
///
/// All methods have default no-op implementations so backends only need
/// to override the metrics they care about.
#[allow(unused_variables)]
pub trait MetricsRecorder: Send + Sync + 'static {
    // ── Topology ─────────────────────────────────────────────────────

    /// Record a workspace laid out at topology finalization.
    fn record_workspace(&self, name: &str, footprint: u64, page_sz: u64, page_cnt: u64) {}

    // ── Run loop ─────────────────────────────────────────────────────

    /// Set the cumulative run-loop counters of a tile.
    fn set_stem_counters(&self, tile: &str, kind_id: usize, counters: &StemCounters) {}

    /// Record a tile terminating on an unrecoverable error.
    fn record_tile_fatal(&self, tile: &str, kind_id: usize) {}

    // ── Stages ───────────────────────────────────────────────────────

    /// Set the cumulative deduplication counters of a tile.
    fn set_dedup_counters(&self, kind_id: usize, counters: &DedupCounters) {}

    /// Set the cumulative execution counters of a tile.
    fn set_exec_counters(&self, kind_id: usize, counters: &ExecCounters) {}

    /// Set the compute units consumed by the last executed transaction.
    fn set_exec_last_cus(&self, kind_id: usize, cus: u64) {}
}

// ═══════════════════════════════════════════════════════════════════════
// Global singleton
// ═══════════════════════════════════════════════════════════════════════

struct NoopRecorder;
impl MetricsRecorder for NoopRecorder {}

static RECORDER: OnceLock<Box<dyn MetricsRecorder>> = OnceLock::new();

/// Install a global metrics recorder.
///
/// Can only be called once. Subsequent calls are silently ignored.
pub fn set_global_recorder(recorder: Box<dyn MetricsRecorder>) {
    let _ = RECORDER.set(recorder);
}

/// Get the global metrics recorder.
///
/// Returns a no-op recorder if none has been installed.
#[inline]
fn recorder() -> &'static dyn MetricsRecorder {
    RECORDER.get().map(|r| r.as_ref()).unwrap_or(&NoopRecorder)
}

// ═══════════════════════════════════════════════════════════════════════
// Convenience free functions
// ═══════════════════════════════════════════════════════════════════════

// ── Topology ─────────────────────────────────────────────────────────

/// Record a workspace laid out at topology finalization.
#[inline]
pub fn record_workspace(name: &str, footprint: u64, page_sz: u64, page_cnt: u64) {
    recorder().record_workspace(name, footprint, page_sz, page_cnt);
}

// ── Run loop ─────────────────────────────────────────────────────────

/// Set the cumulative run-loop counters of a tile.
#[inline]
pub fn set_stem_counters(tile: &str, kind_id: usize, counters: &StemCounters) {
    recorder().set_stem_counters(tile, kind_id, counters);
}

/// Record a tile terminating on an unrecoverable error.
#[inline]
pub fn record_tile_fatal(tile: &str, kind_id: usize) {
    recorder().record_tile_fatal(tile, kind_id);
}

// ── Stages ───────────────────────────────────────────────────────────

/// Set the cumulative deduplication counters of a tile.
#[inline]
pub fn set_dedup_counters(kind_id: usize, counters: &DedupCounters) {
    recorder().set_dedup_counters(kind_id, counters);
}

/// Set the cumulative execution counters of a tile.
#[inline]
pub fn set_exec_counters(kind_id: usize, counters: &ExecCounters) {
    recorder().set_exec_counters(kind_id, counters);
}

/// Set the compute units consumed by the last executed transaction.
#[inline]
pub fn set_exec_last_cus(kind_id: usize, cus: u64) {
    recorder().set_exec_last_cus(kind_id, cus);
}
