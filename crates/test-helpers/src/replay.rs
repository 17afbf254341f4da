//! Drives exec tiles the way the replay tile does.

use std::sync::Arc;
use std::time::{Duration, Instant};

use borsh::BorshSerialize;
use tessera_exec::runtime::{BlockHashQueue, FeatureSet, Stakes, SysvarCache};
use tessera_exec::{
    EpochMsg, ExecMsg, ExecResult, ExecState, HashAccountsMsg, PubRef, SlotMsg, TxnMsg,
    EXEC_MSG_MTU, EXEC_RESULT_SZ,
};
use tessera_funk::Funk;
use tessera_stem::OutLink;
use tessera_tango::{FSeq, Region, Spad};
use tessera_topo::{
    ExecTileConfig, FinishOptions, JoinMode, ObjKind, Polling, Reliability, TileKind, Topo,
    TopoBuilder, TopoRuntime,
};
use tessera_types::{Epoch, Pubkey, Rent, Slot};

/// Size of the `runtime_pub` blob in [`exec_topology`].
pub const RUNTIME_PUB_SZ: usize = 1 << 16;

const REPLAY_EXEC_DEPTH: u64 = 128;

/// A replay tile feeding `exec_cnt` exec tiles over `replay_exec` links,
/// all sharing one funk and one `runtime_pub` blob.
pub fn exec_topology(exec_cnt: usize, spad_mem_max: usize) -> Topo {
    let mut b = TopoBuilder::new();
    for w in [
        "metric_in",
        "replay_exec",
        "tiles",
        "funk",
        "runtime_pub",
        "exec_spad",
        "exec_fseq",
    ] {
        b.wksp(w).unwrap();
    }

    let replay = b.tile(TileKind::Replay, "tiles").unwrap();
    let funk = b
        .named_obj(
            ObjKind::Funk {
                rec_max: 1024,
                txn_max: 64,
            },
            "funk",
            "funk",
            0,
        )
        .unwrap();
    let runtime_pub = b
        .named_obj(ObjKind::Blob { sz: RUNTIME_PUB_SZ }, "runtime_pub", "runtime_pub", 0)
        .unwrap();
    b.tile_uses(replay, funk, JoinMode::ReadWrite).unwrap();
    b.tile_uses(replay, runtime_pub, JoinMode::ReadWrite).unwrap();

    for i in 0..exec_cnt {
        let link = b
            .link("replay_exec", "replay_exec", REPLAY_EXEC_DEPTH, EXEC_MSG_MTU, 1)
            .unwrap();
        let exec = b
            .tile(
                TileKind::Exec(ExecTileConfig {
                    msg_mtu: EXEC_MSG_MTU,
                    spad_mem_max,
                }),
                "tiles",
            )
            .unwrap();
        b.tile_out(replay, link).unwrap();
        b.tile_in(exec, "metric_in", link, Reliability::Reliable, Polling::Polled)
            .unwrap();

        let spad = b
            .named_obj(ObjKind::Spad { mem_max: spad_mem_max }, "exec_spad", "exec_spad", i)
            .unwrap();
        let fseq = b
            .named_obj(ObjKind::FSeq, "exec_fseq", "exec_fseq", i)
            .unwrap();
        b.tile_uses(exec, funk, JoinMode::ReadWrite).unwrap();
        b.tile_uses(exec, runtime_pub, JoinMode::ReadOnly).unwrap();
        b.tile_uses(exec, spad, JoinMode::ReadWrite).unwrap();
        b.tile_uses(exec, fseq, JoinMode::ReadWrite).unwrap();
        b.tile_uses(replay, spad, JoinMode::ReadOnly).unwrap();
        b.tile_uses(replay, fseq, JoinMode::ReadOnly).unwrap();
    }

    let opts = FinishOptions {
        cpu_cnt: exec_cnt + 2,
        ..FinishOptions::default()
    };
    b.finish(&opts).unwrap()
}

/// The replay side of one exec tile: publishes blobs and messages, then
/// reads back the tile's state word and result record.
///
/// Every method panics on failure.
#[derive(Debug)]
pub struct ReplayDriver {
    kind_id: usize,
    link: OutLink,
    fseq: FSeq,
    spad: Region,
    runtime_pub: Region,
    pub_top: usize,
    funk: Arc<Funk>,
    result_off: Option<u32>,
}

impl ReplayDriver {
    /// Join the objects of exec tile `kind_id` in a runtime built from
    /// [`exec_topology`].
    pub fn join(rt: &TopoRuntime, kind_id: usize) -> Self {
        let topo = rt.topo();
        let link = topo.find_link("replay_exec", kind_id).unwrap();
        let (spad, _) = rt.spad(topo.named_obj("exec_spad", kind_id).unwrap()).unwrap();
        Self {
            kind_id,
            link: OutLink::join(rt, link).unwrap(),
            fseq: rt.fseq(topo.named_obj("exec_fseq", kind_id).unwrap()).unwrap(),
            spad,
            runtime_pub: rt.blob(topo.named_obj("runtime_pub", 0).unwrap()).unwrap(),
            pub_top: 0,
            funk: rt.funk(topo.named_obj("funk", 0).unwrap()).unwrap(),
            result_off: None,
        }
    }

    pub fn kind_id(&self) -> usize {
        self.kind_id
    }

    pub fn funk(&self) -> &Arc<Funk> {
        &self.funk
    }

    pub fn state(&self) -> Option<ExecState> {
        ExecState::decode(self.fseq.query())
    }

    /// Spin until the tile reports `expected`.
    ///
    /// # Panics
    ///
    /// Panics if the state has not been reached after ten seconds.
    pub fn wait_for(&mut self, expected: ExecState) {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let state = self.state();
            if state == Some(expected) {
                break;
            }
            assert!(
                Instant::now() < deadline,
                "exec {} stuck in {state:?}, waiting for {expected:?}",
                self.kind_id
            );
            std::thread::yield_now();
        }
        if let ExecState::Booted { result_off } = expected {
            self.result_off = Some(result_off);
        }
    }

    /// Record the result offset of a tile that already booted.
    pub fn observe_boot(&mut self) -> u32 {
        match self.state() {
            Some(ExecState::Booted { result_off }) => {
                self.result_off = Some(result_off);
                result_off
            }
            other => panic!("exec {} not booted: {other:?}", self.kind_id),
        }
    }

    /// Copy `value` into `runtime_pub` after the previous blob.
    pub fn publish_blob<T: BorshSerialize>(&mut self, value: &T) -> PubRef {
        let bytes = borsh::to_vec(value).unwrap();
        let off = self.pub_top.next_multiple_of(8);
        self.runtime_pub.write_bytes(off, &bytes).unwrap();
        self.pub_top = off + bytes.len();
        PubRef {
            off: off as u64,
            sz: bytes.len() as u64,
        }
    }

    /// Start reusing `runtime_pub` from the beginning.
    pub fn reset_blobs(&mut self) {
        self.pub_top = 0;
    }

    /// Publish `msg`, returning its sequence number.
    pub fn send(&mut self, msg: &ExecMsg) -> u64 {
        if self.link.cr_avail() == 0 {
            assert!(self.link.refresh_credits() > 0, "exec {} backpressured", self.kind_id);
        }
        let payload = msg.encode().unwrap();
        self.link.publish(msg.sig().as_sig(), &payload, 0).unwrap()
    }

    pub fn new_epoch(
        &mut self,
        epoch: Epoch,
        features: FeatureSet,
        rent: Rent,
        stakes: &Stakes,
    ) -> u64 {
        let stakes = self.publish_blob(stakes);
        self.send(&ExecMsg::NewEpoch(EpochMsg {
            epoch,
            slots_per_epoch: 432_000,
            features,
            rent,
            stakes,
        }))
    }

    pub fn new_slot(
        &mut self,
        slot: Slot,
        lamports_per_signature: u64,
        block_hash_queue: &BlockHashQueue,
        sysvars: &SysvarCache,
    ) -> u64 {
        let block_hash_queue = self.publish_blob(block_hash_queue);
        let sysvars = self.publish_blob(sysvars);
        self.send(&ExecMsg::NewSlot(SlotMsg {
            slot,
            prev_lamports_per_signature: lamports_per_signature,
            lamports_per_signature,
            block_hash_queue,
            sysvars,
        }))
    }

    pub fn new_txn(&mut self, payload: &[u8]) -> u64 {
        self.send(&ExecMsg::NewTxn(TxnMsg {
            payload: payload.to_vec(),
        }))
    }

    /// Request the hash of `keys[start_idx..=end_idx]`.
    pub fn hash_accounts(&mut self, keys: &[Pubkey], start_idx: u64, end_idx: u64) -> u64 {
        let keys = self.publish_blob(&keys.to_vec());
        self.send(&ExecMsg::HashAccounts(HashAccountsMsg {
            start_idx,
            end_idx,
            keys,
        }))
    }

    /// The tile's result record.
    ///
    /// # Panics
    ///
    /// Panics unless the boot state was observed first.
    pub fn result(&self) -> ExecResult {
        let off = self.result_off.expect("boot state not observed");
        let mut raw = vec![0u8; EXEC_RESULT_SZ];
        Spad::read_at(&self.spad, off as usize, &mut raw).unwrap();
        borsh::from_slice(&raw).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_names_every_exec_object() {
        let topo = exec_topology(2, 1 << 16);
        for i in 0..2 {
            assert!(topo.named_obj("exec_spad", i).is_ok());
            assert!(topo.named_obj("exec_fseq", i).is_ok());
            assert!(topo.find_link("replay_exec", i).is_ok());
            assert!(topo.find_tile("exec", i).is_ok());
        }
        assert!(topo.named_obj("funk", 0).is_ok());
        assert!(topo.named_obj("runtime_pub", 0).is_ok());
    }

    #[test]
    fn test_blobs_are_word_aligned() {
        let rt = TopoRuntime::new(exec_topology(1, 1 << 16)).unwrap();
        let mut driver = ReplayDriver::join(&rt, 0);
        let a = driver.publish_blob(&vec![1u8; 3]);
        let b = driver.publish_blob(&7u64);
        assert_eq!(a, PubRef { off: 0, sz: 7 });
        assert_eq!(b, PubRef { off: 8, sz: 8 });
        driver.reset_blobs();
        assert_eq!(driver.publish_blob(&1u8).off, 0);
    }
}
