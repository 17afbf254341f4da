//! In-process stand-ins for the verify, pack and replay tiles.
//!
//! They carry a [`Feed`] through the real dedup and exec tiles: verify
//! publishes the feed's transactions as parsed fragments, pack hands what
//! dedup forwards to replay over a channel, and replay boots the exec tiles
//! into the feed's epoch and slot and then runs the transactions.

use std::collections::VecDeque;
use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender, TryRecvError};
use tessera_exec::runtime::{
    BlockHashQueue, Clock, FeatureSet, Stakes, SysvarCache, MAX_PROCESSING_AGE,
};
use tessera_exec::{EpochMsg, ExecError, ExecMsg, ExecState, PubRef, SlotMsg, TxnMsg};
use tessera_funk::{Funk, FunkXid};
use tessera_stem::{InFrag, StemContext, Tile};
use tessera_tango::{tempo, FSeq, FragMeta, Region};
use tessera_topo::{TileId, TopoRuntime};
use tessera_types::{
    parse_txn, txn_m_encode, txn_m_payload, Account, Rent, TxnMHeader, SYSTEM_PROGRAM_ID,
    TPU_PARSED_MTU,
};
use tracing::{debug, info};

use crate::error::NodeError;
use crate::feed::Feed;

const SLOTS_PER_EPOCH: u64 = 432_000;

fn now() -> u32 {
    tempo::ts_comp(tempo::tickcount())
}

/// Publishes feed transactions on its verify link, one per loop iteration.
#[derive(Debug)]
pub struct VerifyFeeder {
    txns: VecDeque<Vec<u8>>,
    buf: Vec<u8>,
    published: u64,
}

impl VerifyFeeder {
    pub fn new(txns: Vec<Vec<u8>>) -> Self {
        Self {
            txns: txns.into(),
            buf: vec![0; TPU_PARSED_MTU],
            published: 0,
        }
    }

    pub fn published(&self) -> u64 {
        self.published
    }
}

impl Tile for VerifyFeeder {
    type Error = NodeError;

    fn validate(&mut self, _in_idx: usize, _frag: &InFrag<'_>) -> Result<(), NodeError> {
        Ok(())
    }

    fn process(
        &mut self,
        _in_idx: usize,
        _meta: &FragMeta,
        _ctx: &mut StemContext<'_>,
    ) -> Result<(), NodeError> {
        Ok(())
    }

    fn after_credit(&mut self, ctx: &mut StemContext<'_>) -> Result<(), NodeError> {
        let Some(txn) = self.txns.pop_front() else {
            return Ok(());
        };
        let desc = parse_txn(&txn)?;
        let sz = txn_m_encode(&mut self.buf, 0, 0, &txn, Some(&desc))?;
        ctx.publish(0, 0, &self.buf[..sz], now())?;
        self.published += 1;
        if self.txns.is_empty() {
            info!(published = self.published, "feed published");
        }
        Ok(())
    }

    fn syscall_policy(&self) -> &'static str {
        "verify"
    }
}

/// Hands every transaction dedup forwards to the replay stand-in.
#[derive(Debug)]
pub struct PackForwarder {
    tx: Sender<Vec<u8>>,
    buf: Vec<u8>,
    len: usize,
}

impl PackForwarder {
    pub fn new(tx: Sender<Vec<u8>>) -> Self {
        Self {
            tx,
            buf: vec![0; TPU_PARSED_MTU],
            len: 0,
        }
    }
}

impl Tile for PackForwarder {
    type Error = NodeError;

    fn validate(&mut self, _in_idx: usize, frag: &InFrag<'_>) -> Result<(), NodeError> {
        self.len = frag.read_payload(&mut self.buf)?;
        Ok(())
    }

    fn process(
        &mut self,
        _in_idx: usize,
        _meta: &FragMeta,
        _ctx: &mut StemContext<'_>,
    ) -> Result<(), NodeError> {
        let frag = &self.buf[..self.len];
        let hdr = TxnMHeader::read(frag)?;
        let payload = txn_m_payload(frag, &hdr)?.to_vec();
        if self.tx.send(payload).is_err() {
            debug!("replay gone; dropping transaction");
        }
        Ok(())
    }

    fn syscall_policy(&self) -> &'static str {
        "pack"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Booting,
    Epoch,
    Slot,
    Dispatch,
}

#[derive(Debug)]
struct ExecLane {
    fseq: FSeq,
    awaiting: Option<ExecState>,
}

impl ExecLane {
    fn state(&self) -> Option<ExecState> {
        ExecState::decode(self.fseq.query())
    }

    /// Clears `awaiting` once the tile acknowledged it.
    fn poll(&mut self) -> bool {
        match self.awaiting {
            Some(expected) if self.state() == Some(expected) => {
                self.awaiting = None;
                true
            }
            _ => false,
        }
    }
}

/// Boots the exec tiles into the feed's slot, then runs the transactions
/// pack forwards.
///
/// Transactions run one at a time, rotating across exec tiles, so no two
/// ever touch the same accounts concurrently.
#[derive(Debug)]
pub struct ReplayScheduler {
    feed: Feed,
    funk: Arc<Funk>,
    runtime_pub: Region,
    pub_top: usize,
    lanes: Vec<ExecLane>,
    next_lane: usize,
    rx: Receiver<Vec<u8>>,
    phase: Phase,
    executed: u64,
}

impl ReplayScheduler {
    pub fn from_topo(
        rt: &TopoRuntime,
        tile_id: TileId,
        feed: Feed,
        rx: Receiver<Vec<u8>>,
    ) -> Result<Self, NodeError> {
        let topo = rt.topo();
        let exec_cnt = topo.tile(tile_id).outs.len();
        let lanes = (0..exec_cnt)
            .map(|i| {
                Ok(ExecLane {
                    fseq: rt.fseq(topo.named_obj("exec_fseq", i)?)?,
                    awaiting: None,
                })
            })
            .collect::<Result<Vec<_>, NodeError>>()?;
        Ok(Self {
            feed,
            funk: rt.funk(topo.named_obj("funk", 0)?)?,
            runtime_pub: rt.blob(topo.named_obj("runtime_pub", 0)?)?,
            pub_top: 0,
            lanes,
            next_lane: 0,
            rx,
            phase: Phase::Booting,
            executed: 0,
        })
    }

    /// Transactions the exec tiles acknowledged.
    pub fn executed(&self) -> u64 {
        self.executed
    }

    fn publish_blob<T: borsh::BorshSerialize>(&mut self, value: &T) -> Result<PubRef, NodeError> {
        let bytes = borsh::to_vec(value).map_err(|e| ExecError::Codec {
            what: "runtime_pub blob",
            reason: e.to_string(),
        })?;
        let off = self.pub_top.next_multiple_of(8);
        self.runtime_pub.write_bytes(off, &bytes)?;
        self.pub_top = off + bytes.len();
        Ok(PubRef {
            off: off as u64,
            sz: bytes.len() as u64,
        })
    }

    /// Publish `msg` to exec tile `lane`, expecting `done(seq)` back.
    fn send(
        &mut self,
        ctx: &mut StemContext<'_>,
        lane: usize,
        msg: &ExecMsg,
        done: fn(u32) -> ExecState,
    ) -> Result<(), NodeError> {
        let payload = msg.encode()?;
        let seq = ctx.publish(lane, msg.sig().as_sig(), &payload, now())?;
        if let Some(l) = self.lanes.get_mut(lane) {
            l.awaiting = Some(done(seq as u32));
        }
        Ok(())
    }

    fn broadcast(
        &mut self,
        ctx: &mut StemContext<'_>,
        msg: &ExecMsg,
        done: fn(u32) -> ExecState,
    ) -> Result<(), NodeError> {
        for lane in 0..self.lanes.len() {
            self.send(ctx, lane, msg, done)?;
        }
        Ok(())
    }

    fn enter_epoch(&mut self, ctx: &mut StemContext<'_>) -> Result<(), NodeError> {
        for &(key, lamports) in &self.feed.accounts {
            self.funk
                .root_insert(key, Account::new(lamports, 0, &SYSTEM_PROGRAM_ID))?;
        }
        self.pub_top = 0;
        let stakes = self.publish_blob(&Stakes::default())?;
        let msg = ExecMsg::NewEpoch(EpochMsg {
            epoch: self.feed.slot / SLOTS_PER_EPOCH,
            slots_per_epoch: SLOTS_PER_EPOCH,
            features: FeatureSet::default(),
            rent: Rent::default(),
            stakes,
        });
        self.broadcast(ctx, &msg, |seq| ExecState::EpochDone { seq })?;
        info!(
            exec_tiles = self.lanes.len(),
            funded = self.feed.accounts.len(),
            "exec tiles booted; entering epoch"
        );
        Ok(())
    }

    fn enter_slot(&mut self, ctx: &mut StemContext<'_>) -> Result<(), NodeError> {
        self.funk.txn_prepare(None, FunkXid::from_slot(self.feed.slot))?;
        let mut bhq = BlockHashQueue::new(MAX_PROCESSING_AGE);
        bhq.register(self.feed.blockhash, self.feed.lamports_per_signature);
        let sysvars = SysvarCache {
            clock: Clock {
                slot: self.feed.slot,
                epoch: self.feed.slot / SLOTS_PER_EPOCH,
                unix_timestamp: 0,
            },
        };
        let block_hash_queue = self.publish_blob(&bhq)?;
        let sysvars = self.publish_blob(&sysvars)?;
        let msg = ExecMsg::NewSlot(SlotMsg {
            slot: self.feed.slot,
            prev_lamports_per_signature: self.feed.lamports_per_signature,
            lamports_per_signature: self.feed.lamports_per_signature,
            block_hash_queue,
            sysvars,
        });
        self.broadcast(ctx, &msg, |seq| ExecState::SlotDone { seq })
    }

    fn dispatch(&mut self, ctx: &mut StemContext<'_>) -> Result<(), NodeError> {
        if self.lanes.iter().any(|l| l.awaiting.is_some()) {
            return Ok(());
        }
        let payload = match self.rx.try_recv() {
            Ok(payload) => payload,
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => return Ok(()),
        };
        let lane = self.next_lane;
        self.next_lane = (lane + 1) % self.lanes.len().max(1);
        self.send(ctx, lane, &ExecMsg::NewTxn(TxnMsg { payload }), |seq| {
            ExecState::TxnDone { seq }
        })
    }
}

impl Tile for ReplayScheduler {
    type Error = NodeError;

    fn validate(&mut self, _in_idx: usize, _frag: &InFrag<'_>) -> Result<(), NodeError> {
        Ok(())
    }

    fn process(
        &mut self,
        _in_idx: usize,
        _meta: &FragMeta,
        _ctx: &mut StemContext<'_>,
    ) -> Result<(), NodeError> {
        Ok(())
    }

    fn after_credit(&mut self, ctx: &mut StemContext<'_>) -> Result<(), NodeError> {
        let phase = self.phase;
        for lane in &mut self.lanes {
            if lane.poll() && phase == Phase::Dispatch {
                self.executed += 1;
            }
        }
        let idle = self.lanes.iter().all(|l| l.awaiting.is_none());

        match self.phase {
            Phase::Booting => {
                let booted = self
                    .lanes
                    .iter()
                    .all(|l| matches!(l.state(), Some(ExecState::Booted { .. })));
                if booted {
                    self.enter_epoch(ctx)?;
                    self.phase = Phase::Epoch;
                }
            }
            Phase::Epoch if idle => {
                self.enter_slot(ctx)?;
                self.phase = Phase::Slot;
            }
            Phase::Slot if idle => {
                info!(slot = self.feed.slot, "slot open; executing transactions");
                self.phase = Phase::Dispatch;
            }
            Phase::Dispatch => self.dispatch(ctx)?,
            Phase::Epoch | Phase::Slot => {}
        }
        Ok(())
    }

    fn syscall_policy(&self) -> &'static str {
        "replay"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;
    use std::sync::atomic::AtomicBool;
    use tessera_stem::{InLink, OutLink, Stem};
    use tessera_test_helpers::{exec_topology, transfer, TestKeys, TxnBuilder};
    use tessera_topo::{
        DedupTileConfig, FinishOptions, Polling, Reliability, TileKind, TopoBuilder,
    };
    use tessera_types::Hash;

    #[test]
    fn test_replay_walks_exec_tiles_through_epoch_and_slot() {
        let rt = TopoRuntime::new(exec_topology(2, 1 << 16)).unwrap();
        let topo = rt.topo();
        let replay = topo.find_tile("replay", 0).unwrap();
        let halt = Arc::new(AtomicBool::new(false));

        // Stand in for the exec tiles by acknowledging through their fseqs.
        let fseqs: Vec<_> = (0..2)
            .map(|i| rt.fseq(topo.named_obj("exec_fseq", i).unwrap()).unwrap())
            .collect();
        let (tx, rx) = channel::unbounded();
        let scheduler = ReplayScheduler::from_topo(&rt, replay, Feed::default(), rx).unwrap();
        let mut stem = Stem::new(scheduler, &rt, replay, halt).unwrap();

        stem.poll_once().unwrap();
        assert_eq!(stem.tile().phase, Phase::Booting);
        for f in &fseqs {
            f.update(ExecState::Booted { result_off: 0 }.encode());
        }
        stem.poll_once().unwrap();
        assert_eq!(stem.tile().phase, Phase::Epoch);

        for f in &fseqs {
            f.update(ExecState::EpochDone { seq: 0 }.encode());
        }
        stem.poll_once().unwrap();
        assert_eq!(stem.tile().phase, Phase::Slot);
        assert!(stem
            .tile()
            .funk
            .txn_query(FunkXid::from_slot(1))
            .is_some());

        for f in &fseqs {
            f.update(ExecState::SlotDone { seq: 1 }.encode());
        }
        stem.poll_once().unwrap();
        assert_eq!(stem.tile().phase, Phase::Dispatch);

        // One transaction in flight at a time.
        tx.send(vec![1]).unwrap();
        tx.send(vec![2]).unwrap();
        stem.poll_once().unwrap();
        stem.poll_once().unwrap();
        assert_eq!(stem.tile().lanes[0].awaiting, Some(ExecState::TxnDone { seq: 2 }));
        assert_eq!(stem.tile().lanes[1].awaiting, None);

        fseqs[0].update(ExecState::TxnDone { seq: 2 }.encode());
        stem.poll_once().unwrap();
        assert_eq!(stem.tile().executed(), 1);
        assert_eq!(stem.tile().lanes[1].awaiting, Some(ExecState::TxnDone { seq: 2 }));
    }

    #[test]
    fn test_verify_feeder_publishes_parsed_fragments() {
        let mut b = TopoBuilder::new();
        for w in ["metric_in", "verify_dedup", "tiles"] {
            b.wksp(w).unwrap();
        }
        let link = b
            .link("verify_dedup", "verify_dedup", 8, TPU_PARSED_MTU, 1)
            .unwrap();
        let verify = b.tile(TileKind::Verify, "tiles").unwrap();
        let dedup = b
            .tile(TileKind::Dedup(DedupTileConfig::new(16)), "tiles")
            .unwrap();
        b.tile_out(verify, link).unwrap();
        b.tile_in(dedup, "metric_in", link, Reliability::Reliable, Polling::Polled)
            .unwrap();
        let rt = TopoRuntime::new(b.finish(&FinishOptions::default()).unwrap()).unwrap();

        let keys = TestKeys::new(2, 4);
        let txn = TxnBuilder::new(keys.pubkey(0))
            .instruction(transfer(keys.pubkey(0), keys.pubkey(1), 1000))
            .blockhash(Hash::from_bytes(b"tessera genesis"))
            .sign(&[keys.signing_key(0)]);
        let mut feeder = VerifyFeeder::new(vec![txn.clone()]);

        let mut outs = vec![OutLink::join(&rt, link).unwrap()];
        let mut ins: Vec<InLink> = Vec::new();
        let mut ctx = StemContext::new(&mut ins, &mut outs);
        feeder.after_credit(&mut ctx).unwrap();
        feeder.after_credit(&mut ctx).unwrap();
        assert_eq!(feeder.published(), 1);

        let mut consumer = InLink::join(&rt, &rt.topo().tile(dedup).ins[0]).unwrap();
        let mut buf = vec![0u8; TPU_PARSED_MTU];
        let (_, sz) = consumer.try_recv(&mut buf).unwrap().unwrap();
        let hdr = TxnMHeader::read(&buf[..sz]).unwrap();
        assert_eq!(hdr.bundle_id, 0);
        assert_eq!(txn_m_payload(&buf[..sz], &hdr).unwrap(), &txn[..]);
        assert!(consumer.try_recv(&mut buf).unwrap().is_none());
    }
}
