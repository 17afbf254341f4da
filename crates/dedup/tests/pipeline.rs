use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tessera_dedup::DedupTile;
use tessera_stem::{InLink, OutLink, PollOutcome, Stem};
use tessera_test_helpers::{transfer, txn_m_fragment, TestKeys, TxnBuilder};
use tessera_topo::{
    DedupTileConfig, FinishOptions, Polling, Reliability, TileKind, TopoBuilder, TopoRuntime,
};
use tessera_types::{
    parse_txn, txn_m_descriptor, txn_m_payload, TxnMHeader, TPU_MTU, TPU_PARSED_MTU,
};

struct Pipeline {
    verify: OutLink,
    gossip: OutLink,
    voter: OutLink,
    pack: InLink,
    stem: Stem<DedupTile>,
}

/// verify, gossip and voter feeding one dedup tile that feeds pack.
fn pipeline() -> Pipeline {
    let mut b = TopoBuilder::new();
    for w in ["metric_in", "verify_dedup", "gossip_dedup", "voter_dedup", "dedup_pack", "tiles"] {
        b.wksp(w).unwrap();
    }
    let verify_dedup = b
        .link("verify_dedup", "verify_dedup", 32, TPU_PARSED_MTU, 1)
        .unwrap();
    let gossip_dedup = b.link("gossip_dedup", "gossip_dedup", 32, TPU_MTU, 1).unwrap();
    let voter_dedup = b.link("voter_dedup", "voter_dedup", 32, TPU_MTU, 1).unwrap();
    let dedup_pack = b
        .link("dedup_pack", "dedup_pack", 32, TPU_PARSED_MTU, 1)
        .unwrap();

    let verify = b.tile(TileKind::Verify, "tiles").unwrap();
    let gossip = b.tile(TileKind::Gossip, "tiles").unwrap();
    let voter = b.tile(TileKind::Voter, "tiles").unwrap();
    let dedup = b
        .tile(TileKind::Dedup(DedupTileConfig::new(64)), "tiles")
        .unwrap();
    let pack = b.tile(TileKind::Pack, "tiles").unwrap();

    b.tile_out(verify, verify_dedup).unwrap();
    b.tile_out(gossip, gossip_dedup).unwrap();
    b.tile_out(voter, voter_dedup).unwrap();
    b.tile_in(dedup, "metric_in", verify_dedup, Reliability::Reliable, Polling::Polled)
        .unwrap();
    b.tile_in(dedup, "metric_in", gossip_dedup, Reliability::Unreliable, Polling::Polled)
        .unwrap();
    b.tile_in(dedup, "metric_in", voter_dedup, Reliability::Reliable, Polling::Polled)
        .unwrap();
    b.tile_out(dedup, dedup_pack).unwrap();
    b.tile_in(pack, "metric_in", dedup_pack, Reliability::Reliable, Polling::Polled)
        .unwrap();

    let opts = FinishOptions {
        cpu_cnt: 8,
        ..FinishOptions::default()
    };
    let rt = TopoRuntime::new(b.finish(&opts).unwrap()).unwrap();
    let tile = DedupTile::from_topo(&rt, dedup).unwrap();
    let stem = Stem::new(tile, &rt, dedup, Arc::new(AtomicBool::new(false))).unwrap();

    Pipeline {
        verify: OutLink::join(&rt, verify_dedup).unwrap(),
        gossip: OutLink::join(&rt, gossip_dedup).unwrap(),
        voter: OutLink::join(&rt, voter_dedup).unwrap(),
        pack: InLink::join(&rt, &rt.topo().tile(pack).ins[0]).unwrap(),
        stem,
    }
}

impl Pipeline {
    /// Let the tile handle everything published so far.
    fn settle(&mut self) {
        loop {
            match self.stem.poll_once().unwrap() {
                PollOutcome::CaughtUp => break,
                PollOutcome::Processed { .. } => {}
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    fn drain(&mut self) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; TPU_PARSED_MTU];
        while let Some((meta, sz)) = self.pack.try_recv(&mut buf).unwrap() {
            assert_eq!(meta.sig, 0);
            out.push(buf[..sz].to_vec());
        }
        out
    }
}

fn payloads(n: usize) -> Vec<Vec<u8>> {
    let keys = TestKeys::new(2, 5);
    (0..n)
        .map(|i| {
            TxnBuilder::new(keys.pubkey(0))
                .instruction(transfer(keys.pubkey(0), keys.pubkey(1), i as u64 + 1))
                .sign(&[keys.signing_key(0)])
        })
        .collect()
}

fn payload_of(frag: &[u8]) -> Vec<u8> {
    let hdr = TxnMHeader::read(frag).unwrap();
    txn_m_payload(frag, &hdr).unwrap().to_vec()
}

#[test]
fn test_mixed_stream_is_deduplicated() {
    let mut p = pipeline();
    let txns = payloads(4);
    let (a, b, c, d) = (&txns[0], &txns[1], &txns[2], &txns[3]);
    let e = &payloads(5).remove(4);

    // One fragment at a time so the processing order is the publish order.
    p.gossip.publish(0, a, 0).unwrap();
    p.settle();
    p.verify.publish(0, &txn_m_fragment(a, 0, 0), 0).unwrap();
    p.settle();
    for (idx, txn) in [b, c, b, d].into_iter().enumerate() {
        p.verify
            .publish(0, &txn_m_fragment(txn, 7, idx as u32), 0)
            .unwrap();
        p.settle();
    }
    p.voter.publish(0, e, 0).unwrap();
    p.settle();

    let out = p.drain();
    let got: Vec<_> = out.iter().map(|f| payload_of(f)).collect();
    assert_eq!(got, vec![a.clone(), b.clone(), c.clone(), e.clone()]);

    let counters = p.stem.tile().counters();
    assert_eq!(counters.dedup_fail, 2);
    assert_eq!(counters.bundle_fail, 1);
    assert_eq!(counters.bundle_peer_failure, 1);
    assert_eq!(counters.gossiped_votes, 1);
}

#[test]
fn test_duplicate_bundle_member_fails_the_bundle() {
    let mut p = pipeline();
    let txns = payloads(3);
    let (a, b, c) = (&txns[0], &txns[1], &txns[2]);

    p.verify.publish(0, &txn_m_fragment(a, 0, 0), 0).unwrap();
    p.settle();
    p.verify.publish(0, &txn_m_fragment(a, 0, 0), 0).unwrap();
    p.settle();
    for (idx, txn) in [b, c, b].into_iter().enumerate() {
        p.verify
            .publish(0, &txn_m_fragment(txn, 7, idx as u32), 0)
            .unwrap();
        p.settle();
    }

    let got: Vec<_> = p.drain().iter().map(|f| payload_of(f)).collect();
    assert_eq!(got, vec![a.clone(), b.clone(), c.clone()]);

    let counters = p.stem.tile().counters();
    assert_eq!(counters.dedup_fail, 2);
    assert_eq!(counters.bundle_fail, 1);
    assert_eq!(counters.bundle_peer_failure, 0);
    assert_eq!(p.stem.tile().bundle().id(), 7);
    assert!(p.stem.tile().bundle().failed());

    // A bundle fails once, however many duplicates it carries.
    p.verify.publish(0, &txn_m_fragment(c, 7, 3), 0).unwrap();
    p.settle();
    assert!(p.drain().is_empty());
    let counters = p.stem.tile().counters();
    assert_eq!(counters.dedup_fail, 3);
    assert_eq!(counters.bundle_fail, 1);
}

#[test]
fn test_raw_votes_leave_parsed() {
    let mut p = pipeline();
    let vote = &payloads(1).remove(0);
    p.voter.publish(0, vote, 0).unwrap();
    p.settle();

    let out = p.drain();
    assert_eq!(out.len(), 1);
    let hdr = TxnMHeader::read(&out[0]).unwrap();
    assert_eq!(hdr.bundle_id, 0);
    assert_eq!(
        txn_m_descriptor(&out[0], &hdr).unwrap(),
        parse_txn(vote).unwrap()
    );
    assert_eq!(p.stem.tile().counters().gossiped_votes, 0);
}

#[test]
fn test_new_bundle_clears_a_failed_one() {
    let mut p = pipeline();
    let txns = payloads(3);
    for (bundle, idx, txn) in [(7, 0, &txns[0]), (7, 1, &txns[0]), (8, 0, &txns[1])] {
        p.verify
            .publish(0, &txn_m_fragment(txn, bundle, idx), 0)
            .unwrap();
        p.settle();
    }

    let got: Vec<_> = p.drain().iter().map(|f| payload_of(f)).collect();
    assert_eq!(got, vec![txns[0].clone(), txns[1].clone()]);
    assert_eq!(p.stem.tile().bundle().id(), 8);
    assert!(!p.stem.tile().bundle().failed());
}
