use tessera_tango::TCache;
use tessera_types::TPU_PARSED_MTU;

use crate::error::TopoError;
use crate::layout::ScratchLayout;
use crate::{LinkId, ObjId, TileId, WkspId};

/// Where a dedup input link comes from. Gossip and voter inputs carry raw
/// transaction bytes that still need to be parsed; verify inputs carry a
/// parsed transaction descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DedupInKind {
    Gossip,
    Voter,
    Verify,
}

impl DedupInKind {
    pub fn from_link_name(name: &str) -> Result<Self, TopoError> {
        match name {
            "gossip_dedup" => Ok(DedupInKind::Gossip),
            "voter_dedup" => Ok(DedupInKind::Voter),
            "verify_dedup" => Ok(DedupInKind::Verify),
            other => Err(TopoError::UnknownDedupInput(other.to_string())),
        }
    }

    /// Whether payloads on this input are raw wire transactions.
    pub fn is_raw(&self) -> bool {
        matches!(self, DedupInKind::Gossip | DedupInKind::Voter)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupTileConfig {
    pub tcache_depth: usize,
    /// Zero selects the default map size.
    pub tcache_map_cnt: usize,
    /// One entry per input link, filled in when the topology is finished.
    pub in_kinds: Vec<DedupInKind>,
}

impl DedupTileConfig {
    pub fn new(tcache_depth: usize) -> Self {
        Self {
            tcache_depth,
            tcache_map_cnt: 0,
            in_kinds: Vec::new(),
        }
    }

    pub fn map_cnt(&self) -> usize {
        if self.tcache_map_cnt == 0 {
            TCache::map_cnt_default(self.tcache_depth)
        } else {
            self.tcache_map_cnt
        }
    }

    pub fn scratch_layout(&self) -> ScratchLayout {
        let mut l = ScratchLayout::new();
        l.append(8, TCache::footprint(self.tcache_depth, self.map_cnt()));
        l.append(64, TPU_PARSED_MTU);
        l
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecTileConfig {
    /// Largest replay message the tile will receive.
    pub msg_mtu: usize,
    pub spad_mem_max: usize,
}

impl ExecTileConfig {
    pub fn scratch_layout(&self) -> ScratchLayout {
        let mut l = ScratchLayout::new();
        l.append(64, self.msg_mtu);
        l
    }
}

/// Closed set of tile kinds the topology knows about.
///
/// Only dedup and exec run in this process; the others are collaborators
/// whose links and objects are laid out here but whose run loops live
/// elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileKind {
    Verify,
    Gossip,
    Voter,
    Dedup(DedupTileConfig),
    Pack,
    Replay,
    Exec(ExecTileConfig),
    Sign,
}

impl TileKind {
    pub fn name(&self) -> &'static str {
        match self {
            TileKind::Verify => "verify",
            TileKind::Gossip => "gossip",
            TileKind::Voter => "voter",
            TileKind::Dedup(_) => "dedup",
            TileKind::Pack => "pack",
            TileKind::Replay => "replay",
            TileKind::Exec(_) => "exec",
            TileKind::Sign => "sign",
        }
    }

    pub fn scratch_layout(&self) -> ScratchLayout {
        match self {
            TileKind::Dedup(cfg) => cfg.scratch_layout(),
            TileKind::Exec(cfg) => cfg.scratch_layout(),
            _ => ScratchLayout::new(),
        }
    }

    pub fn scratch_footprint(&self) -> usize {
        self.scratch_layout().footprint()
    }

    /// Whether the node binary runs this tile on one of its own threads.
    pub fn is_in_process(&self) -> bool {
        !matches!(self, TileKind::Gossip | TileKind::Voter | TileKind::Sign)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reliability {
    /// The producer waits for this consumer's credits.
    Reliable,
    /// The producer ignores this consumer; it may be overrun.
    Unreliable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polling {
    /// Read by the run loop.
    Polled,
    /// Joined but read directly by the tile, outside the run loop.
    Unpolled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileIn {
    pub link: LinkId,
    /// Consumer progress, published back to the producer.
    pub fseq: ObjId,
    pub reliability: Reliability,
    pub polling: Polling,
}

impl TileIn {
    pub fn is_reliable(&self) -> bool {
        self.reliability == Reliability::Reliable
    }

    pub fn is_polled(&self) -> bool {
        self.polling == Polling::Polled
    }
}

#[derive(Debug, Clone)]
pub struct TopoTile {
    pub id: TileId,
    pub kind: TileKind,
    pub kind_id: usize,
    pub wksp: WkspId,
    pub scratch: ObjId,
    pub ins: Vec<TileIn>,
    pub outs: Vec<LinkId>,
    pub uses: Vec<(ObjId, crate::JoinMode)>,
    /// `None` means floating: the OS schedules the thread.
    pub cpu: Option<usize>,
}

impl TopoTile {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}
