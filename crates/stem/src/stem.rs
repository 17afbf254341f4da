use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tessera_metrics::StemCounters;
use tessera_tango::{FragMeta, Poll, DIAG_FILT_CNT, DIAG_FILT_SZ, DIAG_OVRNR_CNT};
use tessera_topo::{TileId, TopoRuntime};
use tracing::{debug, error, info};

use crate::error::StemError;
use crate::link::{InLink, OutLink};
use crate::tile::{StemContext, Tile};

/// Loop iterations between two metric reports.
const HOUSEKEEPING_INTERVAL: u64 = 4096;

/// What one iteration of the loop did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Processed { in_idx: usize },
    Filtered { in_idx: usize },
    /// Fragments on `in_idx` were overwritten before they could be read.
    Overrun { in_idx: usize, lost: u64 },
    /// No polled input had a fragment ready.
    CaughtUp,
    /// A reliable consumer downstream has no room for a burst.
    Backpressure,
}

/// The run loop of one tile.
pub struct Stem<T: Tile> {
    tile: T,
    name: &'static str,
    kind_id: usize,
    ins: Vec<InLink>,
    outs: Vec<OutLink>,
    polled: Vec<usize>,
    next: usize,
    burst: u64,
    counters: StemCounters,
    halt: Arc<AtomicBool>,
    iter: u64,
}

impl<T: Tile> std::fmt::Debug for Stem<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stem")
            .field("tile", &self.name)
            .field("kind_id", &self.kind_id)
            .field("ins", &self.ins.len())
            .field("outs", &self.outs.len())
            .field("counters", &self.counters)
            .finish()
    }
}

impl<T: Tile> Stem<T> {
    /// Joins every link of `tile_id` and wraps `tile` in a run loop.
    pub fn new(
        tile: T,
        rt: &TopoRuntime,
        tile_id: TileId,
        halt: Arc<AtomicBool>,
    ) -> Result<Self, StemError> {
        let topo_tile = rt.topo().tile(tile_id);
        let ins = topo_tile
            .ins
            .iter()
            .map(|i| InLink::join(rt, i))
            .collect::<Result<Vec<_>, _>>()?;
        let outs = topo_tile
            .outs
            .iter()
            .map(|&l| OutLink::join(rt, l))
            .collect::<Result<Vec<_>, _>>()?;
        let polled = ins
            .iter()
            .enumerate()
            .filter(|(_, l)| l.is_polled())
            .map(|(i, _)| i)
            .collect();
        let burst = tile.burst().max(1);

        Ok(Self {
            name: topo_tile.name(),
            kind_id: topo_tile.kind_id,
            tile,
            ins,
            outs,
            polled,
            next: 0,
            burst,
            counters: StemCounters::default(),
            halt,
            iter: 0,
        })
    }

    pub fn tile(&self) -> &T {
        &self.tile
    }

    pub fn tile_mut(&mut self) -> &mut T {
        &mut self.tile
    }

    pub fn counters(&self) -> &StemCounters {
        &self.counters
    }

    pub fn ins(&self) -> &[InLink] {
        &self.ins
    }

    pub fn outs(&self) -> &[OutLink] {
        &self.outs
    }

    /// Runs until the halt flag is raised, returning the tile.
    ///
    /// A fatal error is logged and recorded before it is returned.
    pub fn run(mut self) -> Result<T, StemError> {
        info!(
            tile = self.name,
            kind_id = self.kind_id,
            ins = self.ins.len(),
            outs = self.outs.len(),
            allowed_fds = ?self.tile.allowed_fds(),
            syscall_policy = self.tile.syscall_policy(),
            "tile running"
        );
        while !self.halt.load(Ordering::Acquire) {
            if let Err(e) = self.poll_once() {
                error!(
                    tile = self.name,
                    kind_id = self.kind_id,
                    error = %e,
                    "tile terminated"
                );
                tessera_metrics::record_tile_fatal(self.name, self.kind_id);
                self.report();
                return Err(e);
            }
            if self.iter % HOUSEKEEPING_INTERVAL == 0 {
                self.report();
            }
        }
        self.report();
        info!(tile = self.name, kind_id = self.kind_id, "tile halted");
        Ok(self.tile)
    }

    /// One pass of the loop: secure credits, then handle at most one
    /// input fragment.
    pub fn poll_once(&mut self) -> Result<PollOutcome, StemError> {
        self.iter += 1;

        let burst = self.burst;
        let mut backpressured = false;
        for out in &mut self.outs {
            if out.cr_avail() < burst && out.refresh_credits() < burst {
                backpressured = true;
            }
        }
        if backpressured {
            self.counters.backpressure += 1;
            return Ok(PollOutcome::Backpressure);
        }

        let mut ctx = StemContext::new(&mut self.ins, &mut self.outs);
        self.tile.after_credit(&mut ctx).map_err(StemError::tile)?;

        let n = self.polled.len();
        for k in 0..n {
            let pos = (self.next + k) % n;
            let in_idx = self.polled[pos];
            let link = &self.ins[in_idx];
            match link.mcache.poll(link.seq) {
                Poll::NotReady => continue,
                Poll::Overrun { seq_found } => {
                    self.next = (pos + 1) % n;
                    let link = &mut self.ins[in_idx];
                    let lost = link.resync(seq_found);
                    self.counters.overrun_polling += lost;
                    debug!(link = link.name(), lost, "overrun while polling");
                    return Ok(PollOutcome::Overrun { in_idx, lost });
                }
                Poll::Ready(meta) => {
                    self.next = (pos + 1) % n;
                    return self.handle(in_idx, meta);
                }
            }
        }

        self.counters.caught_up += 1;
        Ok(PollOutcome::CaughtUp)
    }

    fn handle(&mut self, in_idx: usize, meta: FragMeta) -> Result<PollOutcome, StemError> {
        if self.tile.filter(in_idx, meta.seq, meta.sig) {
            let link = &mut self.ins[in_idx];
            link.fseq().diag_add(DIAG_FILT_CNT, 1);
            link.fseq().diag_add(DIAG_FILT_SZ, meta.sz as u64);
            link.advance();
            self.counters.filtered += 1;
            return Ok(PollOutcome::Filtered { in_idx });
        }

        let link = &self.ins[in_idx];
        self.tile
            .validate(in_idx, &link.frag(meta))
            .map_err(StemError::tile)?;

        if !link.mcache.still_valid(meta.seq) {
            link.fseq().diag_add(DIAG_OVRNR_CNT, 1);
            self.ins[in_idx].advance();
            self.counters.overrun_reading += 1;
            return Ok(PollOutcome::Overrun { in_idx, lost: 1 });
        }

        let mut ctx = StemContext::new(&mut self.ins, &mut self.outs);
        self.tile
            .process(in_idx, &meta, &mut ctx)
            .map_err(StemError::tile)?;
        self.ins[in_idx].advance();
        self.counters.processed += 1;
        Ok(PollOutcome::Processed { in_idx })
    }

    fn report(&self) {
        tessera_metrics::set_stem_counters(self.name, self.kind_id, &self.counters);
        self.tile.report_metrics(self.kind_id);
    }
}
