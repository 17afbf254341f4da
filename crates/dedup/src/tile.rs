use rand::rngs::OsRng;
use rand::RngCore;
use tessera_metrics::DedupCounters;
use tessera_stem::{InFrag, StemContext, Tile};
use tessera_tango::{tempo, FragMeta, TCache};
use tessera_topo::{DedupInKind, DedupTileConfig, ObjKind, TileId, TileKind, TopoRuntime};
use tessera_types::{
    parse_txn, txn_m_attach_descriptor, txn_m_descriptor, txn_m_payload, TxnMHeader, TPU_MTU,
    TPU_PARSED_MTU, TXN_M_HEADER_SZ,
};
use tracing::{debug, info};

use crate::bundle::BundleState;
use crate::error::DedupError;

const TAG_CONTEXT: &str = "tessera dedup tag";

/// Deduplicates several transaction streams into one parsed stream.
#[derive(Debug)]
pub struct DedupTile {
    in_kinds: Vec<DedupInKind>,
    tcache: TCache,
    tag_key: [u8; 32],
    buf: Vec<u8>,
    bundle: BundleState,
    counters: DedupCounters,
}

impl DedupTile {
    /// Builds the tile with an explicit hash seed.
    pub fn new(cfg: &DedupTileConfig, seed: u64) -> Result<Self, DedupError> {
        Ok(Self {
            in_kinds: cfg.in_kinds.clone(),
            tcache: TCache::new(cfg.tcache_depth, cfg.map_cnt())?,
            tag_key: blake3::derive_key(TAG_CONTEXT, &seed.to_le_bytes()),
            buf: vec![0u8; TPU_PARSED_MTU],
            bundle: BundleState::default(),
            counters: DedupCounters::default(),
        })
    }

    /// Builds the tile for `tile_id`, drawing the hash seed from the OS.
    ///
    /// The seed is never persisted, so tags cannot be predicted from
    /// outside the process.
    pub fn from_topo(rt: &TopoRuntime, tile_id: TileId) -> Result<Self, DedupError> {
        let topo = rt.topo();
        let tile = topo.tile(tile_id);
        let TileKind::Dedup(cfg) = &tile.kind else {
            return Err(DedupError::WrongKind(tile.name().to_string()));
        };
        if let ObjKind::Tile { scratch_sz } = topo.obj_kind_from_props(tile.scratch)? {
            cfg.scratch_layout().finish(scratch_sz)?;
        }

        let seed = OsRng.next_u64();
        let this = Self::new(cfg, seed)?;
        info!(
            kind_id = tile.kind_id,
            tcache_depth = this.tcache.depth(),
            tcache_map_cnt = this.tcache.map_cnt(),
            ins = ?this.in_kinds,
            "dedup tile initialized"
        );
        Ok(this)
    }

    pub fn counters(&self) -> &DedupCounters {
        &self.counters
    }

    pub fn bundle(&self) -> &BundleState {
        &self.bundle
    }

    /// Keyed hash of a transaction signature.
    pub fn tag(&self, sig: &[u8; 64]) -> u64 {
        let hash = blake3::keyed_hash(&self.tag_key, sig);
        let mut word = [0u8; 8];
        word.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(word)
    }

    fn in_kind(&self, in_idx: usize) -> Result<DedupInKind, DedupError> {
        self.in_kinds
            .get(in_idx)
            .copied()
            .ok_or(DedupError::UnknownInput(in_idx))
    }

    /// Whether `sig` is a duplicate, updating the cache or bundle state.
    pub fn check_duplicate(&mut self, bundle_id: u64, sig: &[u8; 64]) -> Result<bool, DedupError> {
        if bundle_id == 0 {
            return Ok(self.tcache.insert(self.tag(sig)));
        }
        let is_dup = self.bundle.contains(sig);
        self.bundle.push(sig).map_err(DedupError::BundleOverflow)?;
        Ok(is_dup)
    }
}

impl Tile for DedupTile {
    type Error = DedupError;

    fn validate(&mut self, in_idx: usize, frag: &InFrag<'_>) -> Result<(), DedupError> {
        let meta = &frag.meta;
        let sz = meta.sz as usize;
        if meta.chunk < frag.chunk0() || meta.chunk > frag.wmark() || sz > TPU_PARSED_MTU {
            return Err(DedupError::CorruptChunk {
                chunk: meta.chunk,
                sz,
                chunk0: frag.chunk0(),
                wmark: frag.wmark(),
            });
        }

        if self.in_kind(in_idx)?.is_raw() {
            if sz > TPU_MTU {
                return Err(DedupError::RawTooLarge(sz));
            }
            frag.read_payload_unchecked(&mut self.buf[TXN_M_HEADER_SZ..])?;
            TxnMHeader {
                payload_sz: sz as u16,
                ..TxnMHeader::default()
            }
            .write(&mut self.buf)?;
        } else {
            frag.read_payload_unchecked(&mut self.buf)?;
        }
        Ok(())
    }

    fn process(
        &mut self,
        in_idx: usize,
        meta: &FragMeta,
        ctx: &mut StemContext<'_>,
    ) -> Result<(), DedupError> {
        let mut hdr = TxnMHeader::read(&self.buf)?;
        if hdr.payload_sz as usize > TPU_MTU {
            return Err(DedupError::PayloadTooLarge(hdr.payload_sz as usize));
        }

        self.bundle.observe(hdr.bundle_id);
        if hdr.bundle_id != 0 && self.bundle.failed() {
            self.counters.bundle_peer_failure += 1;
            return Ok(());
        }

        let kind = self.in_kind(in_idx)?;
        let desc = if kind.is_raw() {
            let desc = parse_txn(txn_m_payload(&self.buf, &hdr)?).map_err(DedupError::VoteParse)?;
            txn_m_attach_descriptor(&mut self.buf, &mut hdr, &desc)?;
            if kind == DedupInKind::Gossip {
                self.counters.gossiped_votes += 1;
            }
            desc
        } else {
            txn_m_descriptor(&self.buf, &hdr)?
        };

        let sig = desc
            .first_signature(txn_m_payload(&self.buf, &hdr)?)
            .ok_or(DedupError::NoSignature)?;

        if self.check_duplicate(hdr.bundle_id, sig.as_bytes())? {
            if hdr.bundle_id != 0 && !self.bundle.failed() {
                self.bundle.fail();
                self.counters.bundle_fail += 1;
                debug!(bundle_id = hdr.bundle_id, "bundle failed on duplicate member");
            }
            self.counters.dedup_fail += 1;
            return Ok(());
        }

        let realized_sz = hdr.realized_sz();
        ctx.publish(0, 0, &self.buf[..realized_sz], meta.tsorig)?;
        Ok(())
    }

    fn syscall_policy(&self) -> &'static str {
        "dedup"
    }

    fn report_metrics(&self, kind_id: usize) {
        tessera_metrics::set_dedup_counters(kind_id, &self.counters);
    }
}

/// Current compressed tick, for producers stamping `tsorig`.
pub fn now_ts() -> u32 {
    tempo::ts_comp(tempo::tickcount())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(depth: usize) -> DedupTile {
        let mut cfg = DedupTileConfig::new(depth);
        cfg.in_kinds = vec![DedupInKind::Verify];
        DedupTile::new(&cfg, 42).unwrap()
    }

    #[test]
    fn test_tag_depends_on_seed() {
        let cfg = DedupTileConfig::new(4);
        let a = DedupTile::new(&cfg, 1).unwrap();
        let b = DedupTile::new(&cfg, 2).unwrap();
        let sig = [9u8; 64];
        assert_eq!(a.tag(&sig), DedupTile::new(&cfg, 1).unwrap().tag(&sig));
        assert_ne!(a.tag(&sig), b.tag(&sig));
    }

    #[test]
    fn test_standalone_duplicate_and_eviction() {
        let mut t = tile(2);
        assert!(!t.check_duplicate(0, &[1; 64]).unwrap());
        assert!(t.check_duplicate(0, &[1; 64]).unwrap());
        assert!(!t.check_duplicate(0, &[2; 64]).unwrap());
        assert!(!t.check_duplicate(0, &[3; 64]).unwrap());
        // [1; 64] was the oldest of three distinct tags in a depth-2 cache.
        assert!(!t.check_duplicate(0, &[1; 64]).unwrap());
    }

    #[test]
    fn test_bundle_members_bypass_tcache() {
        let mut t = tile(8);
        assert!(!t.check_duplicate(0, &[1; 64]).unwrap());
        t.bundle.observe(5);
        assert!(!t.check_duplicate(5, &[1; 64]).unwrap());
        assert!(!t.check_duplicate(5, &[2; 64]).unwrap());
        assert!(t.check_duplicate(5, &[1; 64]).unwrap());
    }

    #[test]
    fn test_sixth_bundle_member_is_fatal() {
        let mut t = tile(8);
        t.bundle.observe(9);
        for i in 0..5u8 {
            assert!(!t.check_duplicate(9, &[i; 64]).unwrap());
        }
        assert!(matches!(
            t.check_duplicate(9, &[5; 64]),
            Err(DedupError::BundleOverflow(5))
        ));
    }
}
