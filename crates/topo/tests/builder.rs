use std::sync::Arc;

use tessera_topo::{
    Affinity, DedupInKind, DedupTileConfig, ExecTileConfig, FinishOptions, JoinMode,
    LayoutCheckpoint, ObjKind, PageThresholds, Polling, Reliability, TileKind, Topo, TopoBuilder,
    TopoError, TopoRuntime,
};

const PARSED_MTU: usize = 1842;

fn opts() -> FinishOptions {
    FinishOptions {
        cpu_cnt: 16,
        affinity: Affinity::Auto,
        pages: PageThresholds::default(),
        checkpoint: None,
    }
}

/// verify -> dedup -> pack, plus replay -> exec sharing funk and a spad.
fn sample(spad_mem_max: usize) -> TopoBuilder {
    let mut b = TopoBuilder::new();
    for w in ["metric_in", "verify_dedup", "dedup_pack", "replay_exec", "tiles", "funk", "exec_spad"] {
        b.wksp(w).unwrap();
    }

    let verify_dedup = b.link("verify_dedup", "verify_dedup", 16, PARSED_MTU, 1).unwrap();
    let dedup_pack = b.link("dedup_pack", "dedup_pack", 16, PARSED_MTU, 1).unwrap();
    let replay_exec = b.link("replay_exec", "replay_exec", 8, 10240, 1).unwrap();

    let verify = b.tile(TileKind::Verify, "tiles").unwrap();
    let dedup = b.tile(TileKind::Dedup(DedupTileConfig::new(64)), "tiles").unwrap();
    let pack = b.tile(TileKind::Pack, "tiles").unwrap();
    let replay = b.tile(TileKind::Replay, "tiles").unwrap();
    let exec = b
        .tile(
            TileKind::Exec(ExecTileConfig {
                msg_mtu: 10240,
                spad_mem_max,
            }),
            "tiles",
        )
        .unwrap();

    b.tile_out(verify, verify_dedup).unwrap();
    b.tile_in(dedup, "metric_in", verify_dedup, Reliability::Reliable, Polling::Polled)
        .unwrap();
    b.tile_out(dedup, dedup_pack).unwrap();
    b.tile_in(pack, "metric_in", dedup_pack, Reliability::Reliable, Polling::Polled)
        .unwrap();
    b.tile_out(replay, replay_exec).unwrap();
    b.tile_in(exec, "metric_in", replay_exec, Reliability::Reliable, Polling::Polled)
        .unwrap();

    let funk = b
        .named_obj(ObjKind::Funk { rec_max: 1024, txn_max: 16 }, "funk", "funk", 0)
        .unwrap();
    let spad = b
        .named_obj(ObjKind::Spad { mem_max: spad_mem_max }, "exec_spad", "exec_spad", 0)
        .unwrap();
    for tile in [replay, exec] {
        b.tile_uses(tile, funk, JoinMode::ReadWrite).unwrap();
        b.tile_uses(tile, spad, JoinMode::ReadWrite).unwrap();
    }
    b
}

fn finished() -> Topo {
    sample(1 << 16).finish(&opts()).unwrap()
}

#[test]
fn test_objects_laid_out_without_overlap() {
    let topo = finished();
    for w in topo.wksps() {
        let mut objs: Vec<_> = topo.objs().iter().filter(|o| o.wksp == w.id).collect();
        objs.sort_by_key(|o| o.offset);
        for pair in objs.windows(2) {
            assert!(pair[0].offset + pair[0].footprint <= pair[1].offset);
        }
        for o in &objs {
            assert_eq!(o.offset % o.kind.align(), 0);
            assert!(o.offset + o.footprint <= w.footprint);
        }
        assert_eq!(w.footprint, w.page_cnt * w.page.bytes());
    }
}

#[test]
fn test_every_footprint_rederived_from_props() {
    let topo = finished();
    for o in topo.objs() {
        let kind = topo.obj_kind_from_props(o.id).unwrap();
        assert_eq!(kind, o.kind);
        assert_eq!(kind.footprint().unwrap(), o.footprint);
        assert!(topo.props().obj(o.id, "seed").is_ok());
    }
}

#[test]
fn test_unknown_tile_lookup() {
    let topo = finished();
    assert!(topo.find_tile("dedup", 0).is_ok());
    assert!(matches!(
        topo.find_tile("quic", 0),
        Err(TopoError::UnknownTile { name, kind_id: 0 }) if name == "quic"
    ));
    assert!(matches!(
        topo.find_tile("exec", 1),
        Err(TopoError::UnknownTile { .. })
    ));
}

#[test]
fn test_link_without_consumer_rejected() {
    let mut b = sample(1 << 16);
    let orphan = b.link("dedup_pack", "dedup_pack", 16, PARSED_MTU, 1).unwrap();
    let dedup = b.find_tile("dedup", 0).unwrap();
    b.tile_out(dedup, orphan).unwrap();
    assert!(matches!(
        b.finish(&opts()),
        Err(TopoError::NoConsumer(l)) if l == "dedup_pack:1"
    ));
}

#[test]
fn test_second_producer_rejected() {
    let mut b = sample(1 << 16);
    let pack = b.find_tile("pack", 0).unwrap();
    let link = b.find_link("verify_dedup", 0).unwrap();
    assert!(matches!(
        b.tile_out(pack, link),
        Err(TopoError::DuplicateProducer(_))
    ));
}

#[test]
fn test_shared_write_without_protocol_rejected() {
    let mut b = sample(1 << 16);
    b.wksp("runtime_pub").unwrap();
    let blob = b.obj(ObjKind::Blob { sz: 4096 }, "runtime_pub").unwrap();
    let replay = b.find_tile("replay", 0).unwrap();
    let exec = b.find_tile("exec", 0).unwrap();
    b.tile_uses(replay, blob, JoinMode::ReadWrite).unwrap();
    b.tile_uses(exec, blob, JoinMode::ReadWrite).unwrap();
    assert!(matches!(
        b.finish(&opts()),
        Err(TopoError::SharedWrite { kind: "blob", writers: 2, .. })
    ));
}

#[test]
fn test_read_only_sharing_allowed() {
    let mut b = sample(1 << 16);
    b.wksp("runtime_pub").unwrap();
    let blob = b.obj(ObjKind::Blob { sz: 4096 }, "runtime_pub").unwrap();
    let replay = b.find_tile("replay", 0).unwrap();
    let exec = b.find_tile("exec", 0).unwrap();
    b.tile_uses(replay, blob, JoinMode::ReadWrite).unwrap();
    b.tile_uses(exec, blob, JoinMode::ReadOnly).unwrap();
    assert!(b.finish(&opts()).is_ok());
}

#[test]
fn test_affinity_errors_surface_from_finish() {
    let mut o = opts();
    o.affinity = "1,2,3,4,99".parse().unwrap();
    assert!(matches!(
        sample(1 << 16).finish(&o),
        Err(TopoError::CpuOutOfRange { cpu: 99, cpu_cnt: 16 })
    ));

    o.affinity = "1,2".parse().unwrap();
    assert!(matches!(
        sample(1 << 16).finish(&o),
        Err(TopoError::InsufficientCores { tiles: 5, cpus: 2 })
    ));

    o.affinity = "1,2,f2,5".parse().unwrap();
    let topo = sample(1 << 16).finish(&o).unwrap();
    let cpus: Vec<_> = topo.tiles().iter().map(|t| t.cpu).collect();
    assert_eq!(cpus, vec![Some(1), Some(2), None, None, Some(5)]);
}

#[test]
fn test_producer_and_reliable_consumer_cannot_share_a_core() {
    let mut o = opts();
    // verify and dedup both on core 1, with dedup consuming verify reliably.
    o.affinity = "1,1,2,3,4".parse().unwrap();
    match sample(1 << 16).finish(&o) {
        Err(TopoError::ReliableSetSharesCore {
            link,
            members,
            cores,
        }) => {
            assert_eq!(link, "verify_dedup:0");
            assert_eq!((members, cores), (2, 1));
        }
        other => panic!("unexpected {other:?}"),
    }

    // pack and replay share no link, so they may share a core.
    o.affinity = "1,2,3,3,4".parse().unwrap();
    assert!(sample(1 << 16).finish(&o).is_ok());
}

#[test]
fn test_dedup_inputs_resolved_from_link_names() {
    let topo = finished();
    let dedup = topo.tile(topo.find_tile("dedup", 0).unwrap());
    match &dedup.kind {
        TileKind::Dedup(cfg) => assert_eq!(cfg.in_kinds, vec![DedupInKind::Verify]),
        other => panic!("unexpected kind {other:?}"),
    }
}

#[test]
fn test_dedup_rejects_unknown_input() {
    let mut b = sample(1 << 16);
    let dedup = b.find_tile("dedup", 0).unwrap();
    let replay = b.find_tile("replay", 0).unwrap();
    let link = b.link("replay_dedup", "replay_exec", 8, 64, 1).unwrap();
    b.tile_out(replay, link).unwrap();
    b.tile_in(dedup, "metric_in", link, Reliability::Unreliable, Polling::Polled)
        .unwrap();
    assert!(matches!(
        b.finish(&opts()),
        Err(TopoError::UnknownDedupInput(name)) if name == "replay_dedup"
    ));
}

#[test]
fn test_page_sizing_follows_thresholds() {
    let mut o = opts();
    o.pages = PageThresholds {
        huge_bytes: 64 << 10,
        gigantic_bytes: 1 << 40,
    };
    let topo = sample(1 << 20).finish(&o).unwrap();
    let spad = topo.wksps().iter().find(|w| w.name == "exec_spad").unwrap();
    assert_eq!(spad.page, tessera_topo::PageSize::Huge);
    assert_eq!(spad.page_cnt, 1);
    let metric = topo.wksps().iter().find(|w| w.name == "metric_in").unwrap();
    assert_eq!(metric.page, tessera_topo::PageSize::Normal);
}

#[test]
fn test_checkpoint_round_trip_and_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("layout.toml");

    let topo = finished();
    let checkpoint = LayoutCheckpoint::capture(&topo).unwrap();
    assert!(checkpoint.objects.contains_key("funk.0"));
    assert!(checkpoint.objects.contains_key("exec_spad.0"));
    checkpoint.save(&path).unwrap();

    let loaded = LayoutCheckpoint::load(&path).unwrap();
    assert_eq!(loaded, checkpoint);

    let mut o = opts();
    o.checkpoint = Some(loaded.clone());
    assert!(sample(1 << 16).finish(&o).is_ok());

    assert!(matches!(
        sample(1 << 17).finish(&o),
        Err(TopoError::CheckpointMismatch { name, .. }) if name == "exec_spad.0"
    ));
}

#[test]
fn test_runtime_joins_formatted_objects() {
    let rt = TopoRuntime::new(finished()).unwrap();
    let topo = rt.topo();

    let link = topo.find_link("verify_dedup", 0).unwrap();
    let mcache = rt.mcache(link).unwrap();
    assert_eq!(mcache.depth(), 16);
    assert_eq!(mcache.seq_query(), 0);

    let dcache = rt.dcache(link).unwrap().unwrap();
    assert_eq!(dcache.mtu(), PARSED_MTU);
    assert!(dcache.chunk0() <= dcache.wmark());

    let dedup = topo.tile(topo.find_tile("dedup", 0).unwrap());
    let fseq = rt.fseq(dedup.ins[0].fseq).unwrap();
    assert_eq!(fseq.query(), 0);

    let funk_id = topo.named_obj("funk", 0).unwrap();
    let a = rt.funk(funk_id).unwrap();
    let b = rt.funk(funk_id).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.rec_max(), 1024);

    let spad_id = topo.named_obj("exec_spad", 0).unwrap();
    let (_, mem_max) = rt.spad(spad_id).unwrap();
    assert_eq!(mem_max, 1 << 16);

    assert!(matches!(
        rt.fseq(spad_id),
        Err(TopoError::WrongObjKind { expected: "fseq", found: "spad", .. })
    ));
}
