use std::sync::Arc;

use tessera_funk::{Funk, FunkXid};
use tessera_metrics::ExecCounters;
use tessera_stem::{InFrag, StemContext, Tile};
use tessera_tango::{FSeq, FragMeta, Region, Spad, SpadAlloc};
use tessera_topo::{ExecTileConfig, ObjKind, TileId, TileKind, TopoRuntime};
use tessera_types::Pubkey;
use tracing::{debug, info};

use crate::error::ExecError;
use crate::frame::{FramePending, FrameStack};
use crate::msg::{EpochMsg, ExecMsg, HashAccountsMsg, PubRef, SlotMsg, TxnMsg};
use crate::runtime::{
    self, BlockHashQueue, EpochState, SlotState, Stakes, SysvarCache, TxnError, TxnResult,
};
use crate::status::{ExecResult, ExecState, EXEC_RESULT_SZ};

/// Executes the epoch, slot, transaction and hash requests of the replay
/// tile, one at a time, acknowledging each through its fseq.
#[derive(Debug)]
pub struct ExecTile {
    kind_id: usize,
    frames: FrameStack,
    funk: Arc<Funk>,
    runtime_pub: Region,
    fseq: FSeq,
    result_alloc: SpadAlloc,
    result: ExecResult,
    buf: Vec<u8>,
    len: usize,
    counters: ExecCounters,
}

impl ExecTile {
    /// Joins the tile's spad, fseq, funk and `runtime_pub`, then reports
    /// itself booted with the offset of its result record.
    pub fn from_topo(rt: &TopoRuntime, tile_id: TileId) -> Result<Self, ExecError> {
        let topo = rt.topo();
        let tile = topo.tile(tile_id);
        let TileKind::Exec(cfg) = &tile.kind else {
            return Err(ExecError::WrongKind(tile.name().to_string()));
        };
        if let ObjKind::Tile { scratch_sz } = topo.obj_kind_from_props(tile.scratch)? {
            cfg.scratch_layout().finish(scratch_sz)?;
        }
        let kind_id = tile.kind_id;

        let (spad_region, mem_max) = rt.spad(topo.named_obj("exec_spad", kind_id)?)?;
        let fseq = rt.fseq(topo.named_obj("exec_fseq", kind_id)?)?;
        let funk = rt.funk(topo.named_obj("funk", 0)?)?;
        let runtime_pub = rt.blob(topo.named_obj("runtime_pub", 0)?)?;

        Self::boot(
            kind_id,
            cfg,
            Spad::new(spad_region, mem_max)?,
            fseq,
            funk,
            runtime_pub,
        )
    }

    pub fn boot(
        kind_id: usize,
        cfg: &ExecTileConfig,
        spad: Spad,
        fseq: FSeq,
        funk: Arc<Funk>,
        runtime_pub: Region,
    ) -> Result<Self, ExecError> {
        fseq.update(ExecState::NotBooted.encode());

        let mut frames = FrameStack::new(spad)?;
        let result_alloc = frames.alloc_base(8, EXEC_RESULT_SZ)?;
        let mut this = Self {
            kind_id,
            frames,
            funk,
            runtime_pub,
            fseq,
            result_alloc,
            result: ExecResult::default(),
            buf: vec![0; cfg.msg_mtu],
            len: 0,
            counters: ExecCounters::default(),
        };
        this.write_result()?;

        let result_off = u32::try_from(result_alloc.off)
            .map_err(|e| ExecError::codec("result offset", e))?;
        this.fseq.update(ExecState::Booted { result_off }.encode());
        info!(
            kind_id,
            result_off,
            spad_mem_max = this.frames.spad().mem_max(),
            "exec tile booted"
        );
        Ok(this)
    }

    pub fn counters(&self) -> &ExecCounters {
        &self.counters
    }

    pub fn pending(&self) -> FramePending {
        self.frames.pending()
    }

    pub fn frames(&self) -> &FrameStack {
        &self.frames
    }

    pub fn result(&self) -> &ExecResult {
        &self.result
    }

    /// Handle one decoded message, returning the state to acknowledge.
    pub fn handle(&mut self, msg: ExecMsg, seq: u64) -> Result<ExecState, ExecError> {
        let seq = seq as u32;
        match msg {
            ExecMsg::NewEpoch(m) => {
                self.new_epoch(m)?;
                Ok(ExecState::EpochDone { seq })
            }
            ExecMsg::NewSlot(m) => {
                self.new_slot(m)?;
                Ok(ExecState::SlotDone { seq })
            }
            ExecMsg::NewTxn(m) => {
                self.new_txn(m)?;
                Ok(ExecState::TxnDone { seq })
            }
            ExecMsg::HashAccounts(m) => {
                self.hash_accounts(m)?;
                Ok(ExecState::HashDone { seq })
            }
        }
    }

    fn new_epoch(&mut self, msg: EpochMsg) -> Result<(), ExecError> {
        let raw = self.read_pub(msg.stakes)?;
        let stakes: Stakes = borsh::from_slice(&raw).map_err(|e| ExecError::codec("stakes", e))?;
        let state = EpochState {
            epoch: msg.epoch,
            slots_per_epoch: msg.slots_per_epoch,
            features: msg.features,
            rent: msg.rent,
            stakes,
        };
        debug!(
            kind_id = self.kind_id,
            epoch = state.epoch,
            vote_accounts = state.stakes.vote_accounts.len(),
            total_stake = state.stakes.total(),
            "new epoch"
        );
        self.frames.enter_epoch(state, &[&raw])?;
        self.counters.epochs += 1;
        Ok(())
    }

    fn new_slot(&mut self, msg: SlotMsg) -> Result<(), ExecError> {
        let xid = FunkXid::from_slot(msg.slot);
        let funk_txn = self.funk.txn_query(xid).ok_or(ExecError::MissingSlotTxn {
            slot: msg.slot,
            xid,
        })?;

        let raw_bhq = self.read_pub(msg.block_hash_queue)?;
        let raw_sysvars = self.read_pub(msg.sysvars)?;
        let block_hash_queue: BlockHashQueue = borsh::from_slice(&raw_bhq)
            .map_err(|e| ExecError::codec("block hash queue", e))?;
        let sysvars: SysvarCache =
            borsh::from_slice(&raw_sysvars).map_err(|e| ExecError::codec("sysvar cache", e))?;

        let state = SlotState {
            slot: msg.slot,
            funk_txn,
            prev_lamports_per_signature: msg.prev_lamports_per_signature,
            lamports_per_signature: msg.lamports_per_signature,
            block_hash_queue,
            sysvars,
        };
        debug!(kind_id = self.kind_id, slot = msg.slot, "new slot");
        self.frames.enter_slot(state, &[&raw_bhq, &raw_sysvars])?;
        self.counters.slots += 1;
        Ok(())
    }

    fn new_txn(&mut self, msg: TxnMsg) -> Result<(), ExecError> {
        let funk = Arc::clone(&self.funk);
        let frame = self.frames.enter_txn(&msg.payload, |epoch, slot| {
            runtime::execute_txn(epoch, slot, &funk, &msg.payload)
        })?;
        let ctx = &frame.ctx;
        let result = ctx.result();

        if result.flags == 0 {
            match ctx.exec_err {
                Some(TxnError::SignatureFailure) => self.counters.txns_failed_signature += 1,
                _ => self.counters.txns_failed_sanitize += 1,
            }
        } else if ctx.exec_err.is_some() {
            self.counters.txns_failed_execution += 1;
        } else {
            self.counters.txns_executed += 1;
        }
        tessera_metrics::set_exec_last_cus(self.kind_id, result.cus_consumed);

        self.record_txn(result)
    }

    fn hash_accounts(&mut self, msg: HashAccountsMsg) -> Result<(), ExecError> {
        let slot = match self.frames.slot_scope() {
            Some((_, slot)) => slot.funk_txn,
            None => return Err(ExecError::NoSlot("hash_accounts")),
        };
        let raw = self.read_pub(msg.keys)?;
        let keys: Vec<Pubkey> =
            borsh::from_slice(&raw).map_err(|e| ExecError::codec("hash key list", e))?;

        let range = usize::try_from(msg.start_idx)
            .ok()
            .zip(usize::try_from(msg.end_idx).ok())
            .filter(|&(start, end)| start <= end && end < keys.len())
            .ok_or(ExecError::HashRange {
                start: msg.start_idx,
                end: msg.end_idx,
                cnt: keys.len(),
            })?;

        self.result.lthash = runtime::hash_accounts(&self.funk, &slot, &keys[range.0..=range.1]);
        self.counters.hash_requests += 1;
        self.write_result()
    }

    fn record_txn(&mut self, result: TxnResult) -> Result<(), ExecError> {
        self.result.txn = result;
        self.write_result()
    }

    fn write_result(&self) -> Result<(), ExecError> {
        let bytes =
            borsh::to_vec(&self.result).map_err(|e| ExecError::codec("exec result", e))?;
        self.frames.spad().write(&self.result_alloc, &bytes)?;
        Ok(())
    }

    fn read_pub(&self, blob: PubRef) -> Result<Vec<u8>, ExecError> {
        let out_of_range = ExecError::PubRange {
            off: blob.off,
            sz: blob.sz,
            region_sz: self.runtime_pub.sz(),
        };
        let region_sz = self.runtime_pub.sz();
        let (off, sz) = match (usize::try_from(blob.off), usize::try_from(blob.sz)) {
            (Ok(off), Ok(sz)) if off.checked_add(sz).is_some_and(|end| end <= region_sz) => {
                (off, sz)
            }
            _ => return Err(out_of_range),
        };
        let mut raw = vec![0u8; sz];
        self.runtime_pub.read_bytes(off, &mut raw)?;
        Ok(raw)
    }
}

impl Tile for ExecTile {
    type Error = ExecError;

    fn validate(&mut self, _in_idx: usize, frag: &InFrag<'_>) -> Result<(), ExecError> {
        let meta = &frag.meta;
        let sz = meta.sz as usize;
        if meta.chunk < frag.chunk0() || meta.chunk > frag.wmark() {
            return Err(ExecError::CorruptChunk {
                chunk: meta.chunk,
                sz,
                chunk0: frag.chunk0(),
                wmark: frag.wmark(),
            });
        }
        if sz > self.buf.len() {
            return Err(ExecError::MessageTooLarge {
                sz,
                mtu: self.buf.len(),
            });
        }
        self.len = frag.read_payload_unchecked(&mut self.buf)?;
        Ok(())
    }

    fn process(
        &mut self,
        _in_idx: usize,
        meta: &FragMeta,
        _ctx: &mut StemContext<'_>,
    ) -> Result<(), ExecError> {
        let msg = ExecMsg::decode(meta.sig, &self.buf[..self.len])?;
        let state = self.handle(msg, meta.seq)?;
        self.fseq.update(state.encode());
        Ok(())
    }

    fn syscall_policy(&self) -> &'static str {
        "exec"
    }

    fn report_metrics(&self, kind_id: usize) {
        tessera_metrics::set_exec_counters(kind_id, &self.counters);
    }
}
