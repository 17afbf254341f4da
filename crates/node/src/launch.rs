//! Starts the in-process tiles, one pinned thread each.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use tessera_dedup::DedupTile;
use tessera_exec::ExecTile;
use tessera_stem::Stem;
use tessera_topo::{TileId, TileKind, TopoRuntime};
use tracing::{debug, info, warn};

use crate::error::NodeError;
use crate::feed::Feed;
use crate::standin::{PackForwarder, ReplayScheduler, VerifyFeeder};

/// A tile running on its own thread.
#[derive(Debug)]
pub struct TileThread {
    name: &'static str,
    kind_id: usize,
    handle: JoinHandle<Result<(), NodeError>>,
}

impl TileThread {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind_id(&self) -> usize {
        self.kind_id
    }

    /// Whether the run loop has returned, either halted or on a fatal error.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> Result<(), NodeError> {
        self.handle.join().map_err(|_| NodeError::TilePanicked {
            name: self.name,
            kind_id: self.kind_id,
        })?
    }
}

/// What a tile thread needs beyond the topology.
enum Seed {
    None,
    Verify(Vec<Vec<u8>>),
    Pack(Sender<Vec<u8>>),
    Replay(Feed, Receiver<Vec<u8>>),
}

/// Spawns a thread for every tile of `rt` that runs in this process.
///
/// Verify tiles publish their round-robin share of `feed`, pack forwards
/// what dedup lets through to replay, and replay runs it on the exec tiles.
/// Gossip, voter and sign tiles only have their links laid out.
pub fn spawn_tiles(
    rt: &Arc<TopoRuntime>,
    halt: &Arc<AtomicBool>,
    feed: &Feed,
) -> Result<Vec<TileThread>, NodeError> {
    let topo = rt.topo();
    let verify_cnt = topo
        .tiles()
        .iter()
        .filter(|t| matches!(t.kind, TileKind::Verify))
        .count();
    let (tx, rx) = channel::unbounded();

    let mut threads = Vec::new();
    for tile in topo.tiles() {
        if !tile.kind.is_in_process() {
            debug!(tile = tile.name(), kind_id = tile.kind_id, "tile not launched here");
            continue;
        }
        let seed = match &tile.kind {
            TileKind::Verify => Seed::Verify(feed.txns_for_verify(tile.kind_id, verify_cnt)),
            TileKind::Pack => Seed::Pack(tx.clone()),
            TileKind::Replay => Seed::Replay(feed.clone(), rx.clone()),
            _ => Seed::None,
        };
        let (name, kind_id, id, cpu) = (tile.name(), tile.kind_id, tile.id, tile.cpu);
        let rt = Arc::clone(rt);
        let halt = Arc::clone(halt);
        let handle = thread::Builder::new()
            .name(format!("{name}:{kind_id}"))
            .spawn(move || run_tile(&rt, id, cpu, halt, seed))
            .map_err(|source| NodeError::Spawn {
                name,
                kind_id,
                source,
            })?;
        threads.push(TileThread {
            name,
            kind_id,
            handle,
        });
    }
    info!(threads = threads.len(), txns = feed.txns.len(), "tiles launched");
    Ok(threads)
}

fn run_tile(
    rt: &TopoRuntime,
    id: TileId,
    cpu: Option<usize>,
    halt: Arc<AtomicBool>,
    seed: Seed,
) -> Result<(), NodeError> {
    let tile = rt.topo().tile(id);
    match cpu {
        Some(core) => match pin_thread_to_core(core) {
            Ok(()) => debug!(tile = tile.name(), kind_id = tile.kind_id, core, "pinned tile"),
            Err(e) => warn!(
                tile = tile.name(),
                kind_id = tile.kind_id,
                core,
                error = %e,
                "failed to pin tile; it will float"
            ),
        },
        None => debug!(tile = tile.name(), kind_id = tile.kind_id, "tile floats"),
    }

    match (&tile.kind, seed) {
        (TileKind::Dedup(_), _) => {
            let dedup = DedupTile::from_topo(rt, id)?;
            Stem::new(dedup, rt, id, halt)?.run()?;
        }
        (TileKind::Exec(_), _) => {
            let exec = ExecTile::from_topo(rt, id)?;
            Stem::new(exec, rt, id, halt)?.run()?;
        }
        (TileKind::Verify, Seed::Verify(txns)) => {
            Stem::new(VerifyFeeder::new(txns), rt, id, halt)?.run()?;
        }
        (TileKind::Pack, Seed::Pack(tx)) => {
            Stem::new(PackForwarder::new(tx), rt, id, halt)?.run()?;
        }
        (TileKind::Replay, Seed::Replay(feed, rx)) => {
            let replay = ReplayScheduler::from_topo(rt, id, feed, rx)?;
            Stem::new(replay, rt, id, halt)?.run()?;
        }
        (kind, _) => debug!(tile = kind.name(), kind_id = tile.kind_id, "nothing to run"),
    }
    Ok(())
}

/// Pin the calling thread to a specific CPU core.
#[cfg(target_os = "linux")]
pub fn pin_thread_to_core(core_id: usize) -> Result<(), NodeError> {
    use std::mem;

    // SAFETY: cpuset is a plain bitset owned by this frame and
    // sched_setaffinity only reads it.
    unsafe {
        let mut cpuset: libc::cpu_set_t = mem::zeroed();
        libc::CPU_ZERO(&mut cpuset);
        libc::CPU_SET(core_id, &mut cpuset);

        let result = libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &cpuset);

        if result == 0 {
            Ok(())
        } else {
            Err(NodeError::CorePinning(format!(
                "sched_setaffinity failed for core {}",
                core_id
            )))
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn pin_thread_to_core(core_id: usize) -> Result<(), NodeError> {
    warn!(core = core_id, "Core pinning not implemented for this platform");
    Ok(())
}
