use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tessera_exec::ExecState;
use tessera_funk::FunkXid;
use tessera_node::{
    build_topology, default_blockhash, finish_options, spawn_tiles, Feed, NodeConfig,
};
use tessera_test_helpers::{transfer, TestKeys, TxnBuilder};
use tessera_topo::TopoRuntime;

fn small_config() -> NodeConfig {
    NodeConfig::parse(
        r#"
        [layout]
        affinity = "f9"
        exec_tile_count = 2
        verify_tile_count = 1

        [dedup]
        signature_cache_size = 1024
        verify_depth = 64
        pack_depth = 64

        [exec]
        spad_mb = 1
        max_live_slots = 8

        [funk]
        max_account_records = 1024
        max_txns = 16
        "#,
    )
    .unwrap()
}

#[test]
fn test_in_process_tiles_boot_and_halt() {
    let config = small_config();
    let opts = finish_options(&config, 4).unwrap();
    let rt = TopoRuntime::new(build_topology(&config, &opts).unwrap()).unwrap();
    let halt = Arc::new(AtomicBool::new(false));

    let threads = spawn_tiles(&rt, &halt, &Feed::default()).unwrap();
    let mut names: Vec<_> = threads.iter().map(|t| (t.name(), t.kind_id())).collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            ("dedup", 0),
            ("exec", 0),
            ("exec", 1),
            ("pack", 0),
            ("replay", 0),
            ("verify", 0)
        ]
    );

    // Each exec tile reports itself booted through its fseq. Replay may
    // already have moved it on to the epoch and slot.
    let topo = rt.topo();
    let deadline = Instant::now() + Duration::from_secs(10);
    for i in 0..2 {
        let fseq = rt.fseq(topo.named_obj("exec_fseq", i).unwrap()).unwrap();
        while matches!(
            ExecState::decode(fseq.query()),
            None | Some(ExecState::NotBooted)
        ) {
            assert!(Instant::now() < deadline, "exec {i} never booted");
            std::thread::yield_now();
        }
    }
    assert!(threads.iter().all(|t| !t.is_finished()));

    halt.store(true, Ordering::Release);
    for thread in threads {
        thread.join().unwrap();
    }
}

#[test]
fn test_feed_runs_through_dedup_into_exec() {
    let config = small_config();
    let opts = finish_options(&config, 4).unwrap();
    let rt = TopoRuntime::new(build_topology(&config, &opts).unwrap()).unwrap();
    let halt = Arc::new(AtomicBool::new(false));

    let keys = TestKeys::new(2, 11);
    let txns: Vec<Vec<u8>> = [1000, 2000, 3000]
        .into_iter()
        .map(|lamports| {
            TxnBuilder::new(keys.pubkey(0))
                .instruction(transfer(keys.pubkey(0), keys.pubkey(1), lamports))
                .blockhash(default_blockhash())
                .sign(&[keys.signing_key(0)])
        })
        .collect();
    let mut feed = Feed {
        accounts: vec![(keys.pubkey(0), 1_000_000)],
        txns: txns.clone(),
        ..Feed::default()
    };
    // Dropped by dedup.
    feed.txns.insert(1, txns[0].clone());

    let threads = spawn_tiles(&rt, &halt, &feed).unwrap();

    let funk = rt.funk(rt.topo().named_obj("funk", 0).unwrap()).unwrap();
    let deadline = Instant::now() + Duration::from_secs(30);
    let balance = || {
        let txn = funk.txn_query(FunkXid::from_slot(feed.slot))?;
        funk.rec_query(Some(&txn), &keys.pubkey(1)).map(|a| a.lamports)
    };
    while balance() != Some(6000) {
        assert!(Instant::now() < deadline, "transfers never landed: {:?}", balance());
        assert!(threads.iter().all(|t| !t.is_finished()), "a tile exited early");
        std::thread::sleep(Duration::from_millis(5));
    }

    halt.store(true, Ordering::Release);
    for thread in threads {
        thread.join().unwrap();
    }
    let payer = funk
        .rec_query(funk.txn_query(FunkXid::from_slot(1)).as_ref(), &keys.pubkey(0))
        .unwrap();
    assert_eq!(payer.lamports, 1_000_000 - 6000 - 3 * 5000);
}
