//! Metrics backend for the node binary.
//!
//! Keeps the latest counter snapshot of every tile and writes it to the
//! tracing log: per-update at `trace`, and as a periodic summary at `info`
//! through [`LogRecorder::log_summary`].

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tessera_metrics::{DedupCounters, ExecCounters, MetricsRecorder, StemCounters};
use tracing::{error, info, trace};

type TileKey = (String, usize);

#[derive(Debug, Default)]
struct Snapshots {
    stem: BTreeMap<TileKey, StemCounters>,
    dedup: BTreeMap<usize, DedupCounters>,
    exec: BTreeMap<usize, ExecCounters>,
    exec_last_cus: BTreeMap<usize, u64>,
    fatal: BTreeMap<TileKey, u64>,
}

/// Records counter snapshots and logs them through `tracing`.
///
/// Cheap to clone; clones share the same snapshots, so one clone can be
/// installed globally while another is kept for summaries.
#[derive(Debug, Default, Clone)]
pub struct LogRecorder {
    inner: Arc<Mutex<Snapshots>>,
}

impl LogRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a clone of this recorder as the global metrics backend.
    pub fn install(&self) {
        tessera_metrics::set_global_recorder(Box::new(self.clone()));
    }

    pub fn stem(&self, tile: &str, kind_id: usize) -> Option<StemCounters> {
        self.inner
            .lock()
            .stem
            .get(&(tile.to_string(), kind_id))
            .cloned()
    }

    pub fn dedup(&self, kind_id: usize) -> Option<DedupCounters> {
        self.inner.lock().dedup.get(&kind_id).cloned()
    }

    pub fn exec(&self, kind_id: usize) -> Option<ExecCounters> {
        self.inner.lock().exec.get(&kind_id).cloned()
    }

    pub fn exec_last_cus(&self, kind_id: usize) -> Option<u64> {
        self.inner.lock().exec_last_cus.get(&kind_id).copied()
    }

    /// Number of fatal errors recorded for a tile.
    pub fn fatal_count(&self, tile: &str, kind_id: usize) -> u64 {
        self.inner
            .lock()
            .fatal
            .get(&(tile.to_string(), kind_id))
            .copied()
            .unwrap_or(0)
    }

    /// Logs the latest snapshot of every tile at `info`.
    pub fn log_summary(&self) {
        let snap = self.inner.lock();
        for ((tile, kind_id), c) in &snap.stem {
            info!(
                tile = tile.as_str(),
                kind_id,
                processed = c.processed,
                filtered = c.filtered,
                overrun_polling = c.overrun_polling,
                overrun_reading = c.overrun_reading,
                backpressure = c.backpressure,
                "tile counters"
            );
        }
        for (kind_id, c) in &snap.dedup {
            info!(
                kind_id,
                dedup_fail = c.dedup_fail,
                bundle_fail = c.bundle_fail,
                bundle_peer_failure = c.bundle_peer_failure,
                gossiped_votes = c.gossiped_votes,
                "dedup counters"
            );
        }
        for (kind_id, c) in &snap.exec {
            info!(
                kind_id,
                epochs = c.epochs,
                slots = c.slots,
                txns_executed = c.txns_executed,
                txns_failed_sanitize = c.txns_failed_sanitize,
                txns_failed_signature = c.txns_failed_signature,
                txns_failed_execution = c.txns_failed_execution,
                hash_requests = c.hash_requests,
                last_cus = snap.exec_last_cus.get(kind_id).copied().unwrap_or(0),
                "exec counters"
            );
        }
    }
}

impl MetricsRecorder for LogRecorder {
    fn record_workspace(&self, name: &str, footprint: u64, page_sz: u64, page_cnt: u64) {
        info!(wksp = name, footprint, page_sz, page_cnt, "workspace recorded");
    }

    fn set_stem_counters(&self, tile: &str, kind_id: usize, counters: &StemCounters) {
        trace!(tile, kind_id, ?counters, "stem counters");
        self.inner
            .lock()
            .stem
            .insert((tile.to_string(), kind_id), counters.clone());
    }

    fn record_tile_fatal(&self, tile: &str, kind_id: usize) {
        error!(tile, kind_id, "tile fatal");
        *self
            .inner
            .lock()
            .fatal
            .entry((tile.to_string(), kind_id))
            .or_default() += 1;
    }

    fn set_dedup_counters(&self, kind_id: usize, counters: &DedupCounters) {
        trace!(kind_id, ?counters, "dedup counters");
        self.inner.lock().dedup.insert(kind_id, counters.clone());
    }

    fn set_exec_counters(&self, kind_id: usize, counters: &ExecCounters) {
        trace!(kind_id, ?counters, "exec counters");
        self.inner.lock().exec.insert(kind_id, counters.clone());
    }

    fn set_exec_last_cus(&self, kind_id: usize, cus: u64) {
        self.inner.lock().exec_last_cus.insert(kind_id, cus);
    }
}
