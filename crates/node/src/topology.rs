//! The validator topology.
//!
//! Tiles are created in a fixed order, which is the order affinity entries
//! are assigned in: verify tiles, gossip, voter, dedup, pack, replay, exec
//! tiles, sign.

use std::fmt::Write as _;
use std::path::Path;

use tessera_exec::EXEC_MSG_MTU;
use tessera_topo::{
    DedupTileConfig, ExecTileConfig, FinishOptions, JoinMode, LayoutCheckpoint, ObjKind, Polling,
    Reliability, TileKind, Topo, TopoBuilder, TopoError,
};
use tessera_types::{TPU_MTU, TPU_PARSED_MTU};
use tracing::info;

use crate::config::NodeConfig;

/// Depth of the raw vote links into dedup.
pub const RAW_DEDUP_DEPTH: u64 = 128;

pub const REPLAY_EXEC_DEPTH: u64 = 128;

pub const SIGN_DEPTH: u64 = 128;

/// Largest message a tile asks the sign tile to sign.
pub const SIGN_REQ_MTU: usize = 2048;

/// A response is one signature.
pub const SIGN_RESP_MTU: usize = 64;

/// Size of the blob replay publishes epoch and slot state through.
pub const RUNTIME_PUB_SZ: usize = 16 << 20;

const WKSPS: &[&str] = &[
    "metric_in",
    "verify_dedup",
    "gossip_dedup",
    "voter_dedup",
    "dedup_pack",
    "replay_exec",
    "gossip_sign",
    "sign_gossip",
    "verify",
    "gossip",
    "voter",
    "dedup",
    "pack",
    "replay",
    "exec",
    "sign",
    "funk",
    "runtime_pub",
    "root_slot",
    "exec_spad",
    "exec_fseq",
];

/// Lays out every workspace, link, object and tile of the node.
pub fn build_topology(config: &NodeConfig, opts: &FinishOptions) -> Result<Topo, TopoError> {
    let mut b = TopoBuilder::new();
    for wksp in WKSPS {
        b.wksp(wksp)?;
    }

    let verify_cnt = config.layout.verify_tile_count;
    let exec_cnt = config.layout.exec_tile_count;
    let spad_mem_max = config.spad_mem_max();

    let verify_dedup = (0..verify_cnt)
        .map(|_| b.link("verify_dedup", "verify_dedup", config.dedup.verify_depth, TPU_PARSED_MTU, 1))
        .collect::<Result<Vec<_>, _>>()?;
    let gossip_dedup = b.link("gossip_dedup", "gossip_dedup", RAW_DEDUP_DEPTH, TPU_MTU, 1)?;
    let voter_dedup = b.link("voter_dedup", "voter_dedup", RAW_DEDUP_DEPTH, TPU_MTU, 1)?;
    let dedup_pack = b.link(
        "dedup_pack",
        "dedup_pack",
        config.dedup.pack_depth,
        TPU_PARSED_MTU,
        1,
    )?;
    let gossip_sign = b.link("gossip_sign", "gossip_sign", SIGN_DEPTH, SIGN_REQ_MTU, 1)?;
    let sign_gossip = b.link("sign_gossip", "sign_gossip", SIGN_DEPTH, SIGN_RESP_MTU, 1)?;

    for link in &verify_dedup {
        let verify = b.tile(TileKind::Verify, "verify")?;
        b.tile_out(verify, *link)?;
    }

    let gossip = b.tile(TileKind::Gossip, "gossip")?;
    b.tile_out(gossip, gossip_dedup)?;
    b.tile_out(gossip, gossip_sign)?;
    // Gossip blocks on the signature it asked for, so it reads the
    // response link itself.
    b.tile_in(gossip, "metric_in", sign_gossip, Reliability::Unreliable, Polling::Unpolled)?;

    let voter = b.tile(TileKind::Voter, "voter")?;
    b.tile_out(voter, voter_dedup)?;

    let dedup = b.tile(
        TileKind::Dedup(DedupTileConfig::new(config.dedup.signature_cache_size)),
        "dedup",
    )?;
    for link in &verify_dedup {
        b.tile_in(dedup, "metric_in", *link, Reliability::Reliable, Polling::Polled)?;
    }
    // Gossip may overrun dedup; losing gossiped votes is acceptable.
    b.tile_in(dedup, "metric_in", gossip_dedup, Reliability::Unreliable, Polling::Polled)?;
    b.tile_in(dedup, "metric_in", voter_dedup, Reliability::Reliable, Polling::Polled)?;
    b.tile_out(dedup, dedup_pack)?;

    let pack = b.tile(TileKind::Pack, "pack")?;
    b.tile_in(pack, "metric_in", dedup_pack, Reliability::Reliable, Polling::Polled)?;

    let replay = b.tile(TileKind::Replay, "replay")?;
    let funk = b.named_obj(
        ObjKind::Funk {
            rec_max: config.funk.max_account_records,
            txn_max: config.funk.max_txns,
        },
        "funk",
        "funk",
        0,
    )?;
    let runtime_pub = b.named_obj(
        ObjKind::Blob { sz: RUNTIME_PUB_SZ },
        "runtime_pub",
        "runtime_pub",
        0,
    )?;
    let root_slot = b.named_obj(ObjKind::FSeq, "root_slot", "root_slot", 0)?;
    b.tile_uses(replay, funk, JoinMode::ReadWrite)?;
    b.tile_uses(replay, runtime_pub, JoinMode::ReadWrite)?;
    b.tile_uses(replay, root_slot, JoinMode::ReadWrite)?;
    b.tile_uses(voter, root_slot, JoinMode::ReadOnly)?;

    for i in 0..exec_cnt {
        let link = b.link("replay_exec", "replay_exec", REPLAY_EXEC_DEPTH, EXEC_MSG_MTU, 1)?;
        let exec = b.tile(
            TileKind::Exec(ExecTileConfig {
                msg_mtu: EXEC_MSG_MTU,
                spad_mem_max,
            }),
            "exec",
        )?;
        b.tile_out(replay, link)?;
        b.tile_in(exec, "metric_in", link, Reliability::Reliable, Polling::Polled)?;

        let spad = b.named_obj(ObjKind::Spad { mem_max: spad_mem_max }, "exec_spad", "exec_spad", i)?;
        let fseq = b.named_obj(ObjKind::FSeq, "exec_fseq", "exec_fseq", i)?;
        b.tile_uses(exec, funk, JoinMode::ReadWrite)?;
        b.tile_uses(exec, runtime_pub, JoinMode::ReadOnly)?;
        b.tile_uses(exec, spad, JoinMode::ReadWrite)?;
        b.tile_uses(exec, fseq, JoinMode::ReadWrite)?;
        b.tile_uses(replay, spad, JoinMode::ReadOnly)?;
        b.tile_uses(replay, fseq, JoinMode::ReadOnly)?;
    }

    let sign = b.tile(TileKind::Sign, "sign")?;
    b.tile_in(sign, "metric_in", gossip_sign, Reliability::Reliable, Polling::Polled)?;
    b.tile_out(sign, sign_gossip)?;

    b.finish(opts)
}

/// Options for [`build_topology`] derived from the configuration and the
/// machine.
///
/// A checkpoint at the configured path is loaded and enforced; none is
/// written here.
pub fn finish_options(config: &NodeConfig, cpu_cnt: usize) -> Result<FinishOptions, TopoError> {
    let checkpoint = match &config.checkpoint.path {
        Some(path) if path.exists() => Some(LayoutCheckpoint::load(path)?),
        _ => None,
    };
    Ok(FinishOptions {
        cpu_cnt,
        affinity: config.layout.affinity.clone(),
        pages: config.hugetlbfs.thresholds(),
        checkpoint,
    })
}

/// Persist the layout of `topo` unless a checkpoint already exists.
pub fn save_checkpoint(topo: &Topo, path: &Path) -> Result<(), TopoError> {
    if path.exists() {
        return Ok(());
    }
    let checkpoint = LayoutCheckpoint::capture(topo)?;
    checkpoint.save(path)?;
    info!(
        path = %path.display(),
        objects = checkpoint.objects.len(),
        "layout checkpoint written"
    );
    Ok(())
}

/// Human-readable memory layout, as printed by `tessera mem`.
pub fn describe(topo: &Topo) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<16} {:>9} {:>8} {:>14}", "WKSP", "PAGE", "PAGES", "FOOTPRINT");
    for w in topo.wksps() {
        let _ = writeln!(
            out,
            "{:<16} {:>9} {:>8} {:>14}",
            w.name,
            w.page.as_str(),
            w.page_cnt,
            w.footprint
        );
    }
    let _ = writeln!(out, "total {} bytes", topo.total_footprint());

    let _ = writeln!(out);
    let _ = writeln!(out, "{:<12} {:>5} {:>4} {:>4}", "TILE", "CPU", "IN", "OUT");
    for t in topo.tiles() {
        let cpu = t.cpu.map_or_else(|| "float".to_string(), |c| c.to_string());
        let _ = writeln!(
            out,
            "{:<12} {:>5} {:>4} {:>4}",
            format!("{}:{}", t.name(), t.kind_id),
            cpu,
            t.ins.len(),
            t.outs.len()
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "{:<16} {:>8} {:>6}", "LINK", "DEPTH", "MTU");
    for l in topo.links() {
        let _ = writeln!(out, "{:<16} {:>8} {:>6}", l.label(), l.depth, l.mtu);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_topo::{Affinity, DedupInKind};

    fn small_config() -> NodeConfig {
        NodeConfig::parse(
            r#"
            [layout]
            exec_tile_count = 2
            verify_tile_count = 2

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

    fn opts(config: &NodeConfig) -> FinishOptions {
        finish_options(config, 16).unwrap()
    }

    #[test]
    fn test_catalogue_is_complete() {
        let config = small_config();
        let topo = build_topology(&config, &opts(&config)).unwrap();

        for (name, cnt) in [("verify", 2), ("exec", 2), ("dedup", 1), ("replay", 1), ("sign", 1)] {
            for i in 0..cnt {
                assert!(topo.find_tile(name, i).is_ok(), "{name}:{i}");
            }
            assert!(topo.find_tile(name, cnt).is_err());
        }
        for i in 0..2 {
            assert!(topo.find_link("verify_dedup", i).is_ok());
            assert!(topo.find_link("replay_exec", i).is_ok());
            assert!(topo.named_obj("exec_spad", i).is_ok());
            assert!(topo.named_obj("exec_fseq", i).is_ok());
        }
        for name in ["funk", "runtime_pub", "root_slot"] {
            assert!(topo.named_obj(name, 0).is_ok(), "{name}");
        }

        let link = topo.link(topo.find_link("replay_exec", 0).unwrap());
        assert_eq!((link.depth, link.mtu), (REPLAY_EXEC_DEPTH, EXEC_MSG_MTU));
        let link = topo.link(topo.find_link("gossip_dedup", 0).unwrap());
        assert_eq!((link.depth, link.mtu), (RAW_DEDUP_DEPTH, TPU_MTU));
    }

    #[test]
    fn test_dedup_inputs_resolve_from_link_names() {
        let config = small_config();
        let topo = build_topology(&config, &opts(&config)).unwrap();
        let dedup = topo.tile(topo.find_tile("dedup", 0).unwrap());
        let TileKind::Dedup(cfg) = &dedup.kind else {
            panic!("dedup tile has kind {:?}", dedup.kind);
        };
        assert_eq!(
            cfg.in_kinds,
            vec![
                DedupInKind::Verify,
                DedupInKind::Verify,
                DedupInKind::Gossip,
                DedupInKind::Voter
            ]
        );
        assert_eq!(dedup.ins.iter().filter(|i| !i.is_reliable()).count(), 1);
    }

    #[test]
    fn test_sign_response_is_unpolled() {
        let config = small_config();
        let topo = build_topology(&config, &opts(&config)).unwrap();
        let gossip = topo.tile(topo.find_tile("gossip", 0).unwrap());
        let sign_gossip = topo.find_link("sign_gossip", 0).unwrap();
        let tile_in = gossip.ins.iter().find(|i| i.link == sign_gossip).unwrap();
        assert!(!tile_in.is_polled());
    }

    #[test]
    fn test_auto_affinity_leaves_core_zero() {
        let config = small_config();
        let topo = build_topology(&config, &opts(&config)).unwrap();
        let cpus: Vec<_> = topo.tiles().iter().map(|t| t.cpu).collect();
        assert!(cpus.iter().all(|c| *c != Some(0)));
        assert_eq!(cpus[0], Some(1));
    }

    #[test]
    fn test_short_affinity_list_is_fatal() {
        let mut config = small_config();
        config.layout.affinity = Affinity::List(vec![Some(1), Some(2)]);
        let err = build_topology(&config, &opts(&config)).unwrap_err();
        assert!(matches!(err, TopoError::InsufficientCores { .. }));
    }

    #[test]
    fn test_checkpoint_pins_the_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.toml");
        let mut config = small_config();
        config.checkpoint.path = Some(path.clone());

        let topo = build_topology(&config, &opts(&config)).unwrap();
        save_checkpoint(&topo, &path).unwrap();
        assert!(path.exists());

        // Same layout is accepted.
        build_topology(&config, &opts(&config)).unwrap();

        config.exec.spad_mb = 2;
        let err = build_topology(&config, &opts(&config)).unwrap_err();
        assert!(matches!(err, TopoError::CheckpointMismatch { .. }));
    }

    #[test]
    fn test_describe_lists_every_workspace() {
        let config = small_config();
        let topo = build_topology(&config, &opts(&config)).unwrap();
        let text = describe(&topo);
        for wksp in WKSPS {
            assert!(text.contains(wksp), "{wksp}");
        }
        assert!(text.contains("exec:1"));
        assert!(text.contains("replay_exec:1"));
    }
}
