use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, info};

use crate::affinity::{check_reliable_sets, Affinity, ReliableSet};
use crate::checkpoint::LayoutCheckpoint;
use crate::error::TopoError;
use crate::layout::{align_up, PageThresholds};
use crate::obj::{JoinMode, ObjKind, TopoObj};
use crate::props::PropStore;
use crate::tile::{DedupInKind, Polling, Reliability, TileIn, TileKind, TopoTile};
use crate::topo::{Topo, TopoLink, TopoWksp};
use crate::{LinkId, ObjId, TileId, WkspId};

/// Options applied when freezing a topology.
#[derive(Debug, Clone)]
pub struct FinishOptions {
    pub cpu_cnt: usize,
    pub affinity: Affinity,
    pub pages: PageThresholds,
    /// Layout a previous run persisted; named objects must still match it.
    pub checkpoint: Option<LayoutCheckpoint>,
}

impl Default for FinishOptions {
    fn default() -> Self {
        Self {
            cpu_cnt: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            affinity: Affinity::Auto,
            pages: PageThresholds::default(),
            checkpoint: None,
        }
    }
}

/// Mutable topology under construction.
///
/// Workspaces, objects, links and tiles are added in any order that respects
/// their references; [`TopoBuilder::finish`] validates the whole graph, lays
/// out every workspace and returns an immutable [`Topo`].
#[derive(Debug, Default)]
pub struct TopoBuilder {
    wksps: Vec<TopoWksp>,
    objs: Vec<TopoObj>,
    links: Vec<TopoLink>,
    tiles: Vec<TopoTile>,
    props: PropStore,
}

impl TopoBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn props(&self) -> &PropStore {
        &self.props
    }

    pub fn props_mut(&mut self) -> &mut PropStore {
        &mut self.props
    }

    pub fn wksp(&mut self, name: &str) -> Result<WkspId, TopoError> {
        if self.wksps.iter().any(|w| w.name == name) {
            return Err(TopoError::DuplicateWksp(name.to_string()));
        }
        let id = WkspId(self.wksps.len());
        self.wksps.push(TopoWksp::new(id, name));
        Ok(id)
    }

    pub fn find_wksp(&self, name: &str) -> Result<WkspId, TopoError> {
        self.wksps
            .iter()
            .find(|w| w.name == name)
            .map(|w| w.id)
            .ok_or_else(|| TopoError::UnknownWksp(name.to_string()))
    }

    /// Creates an object in `wksp`, recording its parameters and a fresh seed.
    pub fn obj(&mut self, kind: ObjKind, wksp: &str) -> Result<ObjId, TopoError> {
        let wksp = self.find_wksp(wksp)?;
        let footprint = kind.footprint()?;
        let id = ObjId(self.objs.len());
        kind.write_props(id, &mut self.props);
        self.props.set_obj(id, "wksp", wksp.0 as u64);
        self.props.set_obj(id, "seed", OsRng.next_u64());
        self.objs.push(TopoObj {
            id,
            kind,
            wksp,
            footprint,
            offset: 0,
        });
        Ok(id)
    }

    /// Creates an object and registers it under `<name>.<idx>`.
    pub fn named_obj(
        &mut self,
        kind: ObjKind,
        wksp: &str,
        name: &str,
        idx: usize,
    ) -> Result<ObjId, TopoError> {
        let id = self.obj(kind, wksp)?;
        self.props.set_named(name, idx, id);
        Ok(id)
    }

    /// Creates a link and its mcache and dcache. An `mtu` of zero creates a
    /// metadata-only link with no dcache.
    pub fn link(
        &mut self,
        name: &str,
        wksp: &str,
        depth: u64,
        mtu: usize,
        burst: u64,
    ) -> Result<LinkId, TopoError> {
        let kind_id = self.links.iter().filter(|l| l.name == name).count();
        let mcache = self.obj(ObjKind::MCache { depth }, wksp)?;
        let dcache = if mtu > 0 {
            Some(self.obj(ObjKind::DCache { mtu, depth, burst }, wksp)?)
        } else {
            None
        };
        let id = LinkId(self.links.len());
        self.links.push(TopoLink {
            id,
            name: name.to_string(),
            kind_id,
            depth,
            mtu,
            burst,
            mcache,
            dcache,
            producer: None,
        });
        Ok(id)
    }

    pub fn find_link(&self, name: &str, kind_id: usize) -> Result<LinkId, TopoError> {
        self.links
            .iter()
            .find(|l| l.name == name && l.kind_id == kind_id)
            .map(|l| l.id)
            .ok_or_else(|| TopoError::UnknownLink {
                name: name.to_string(),
                kind_id,
            })
    }

    /// Creates a tile with a scratch object sized for its kind.
    pub fn tile(&mut self, kind: TileKind, wksp: &str) -> Result<TileId, TopoError> {
        let kind_id = self
            .tiles
            .iter()
            .filter(|t| t.kind.name() == kind.name())
            .count();
        let scratch = self.obj(
            ObjKind::Tile {
                scratch_sz: kind.scratch_footprint(),
            },
            wksp,
        )?;
        let id = TileId(self.tiles.len());
        self.tiles.push(TopoTile {
            id,
            kind,
            kind_id,
            wksp: self.objs[scratch.0].wksp,
            scratch,
            ins: Vec::new(),
            outs: Vec::new(),
            uses: vec![(scratch, JoinMode::ReadWrite)],
            cpu: None,
        });
        Ok(id)
    }

    pub fn find_tile(&self, name: &str, kind_id: usize) -> Result<TileId, TopoError> {
        self.tiles
            .iter()
            .find(|t| t.kind.name() == name && t.kind_id == kind_id)
            .map(|t| t.id)
            .ok_or_else(|| TopoError::UnknownTile {
                name: name.to_string(),
                kind_id,
            })
    }

    /// Subscribes `tile` to `link`, creating its consumer fseq in `fseq_wksp`.
    pub fn tile_in(
        &mut self,
        tile: TileId,
        fseq_wksp: &str,
        link: LinkId,
        reliability: Reliability,
        polling: Polling,
    ) -> Result<(), TopoError> {
        self.check_tile(tile)?;
        let (mcache, dcache) = {
            let l = self.link_ref(link)?;
            (l.mcache, l.dcache)
        };
        let fseq = self.obj(ObjKind::FSeq, fseq_wksp)?;
        self.tiles[tile.0].ins.push(TileIn {
            link,
            fseq,
            reliability,
            polling,
        });
        self.tile_uses(tile, fseq, JoinMode::ReadWrite)?;
        self.tile_uses(tile, mcache, JoinMode::ReadOnly)?;
        if let Some(dcache) = dcache {
            self.tile_uses(tile, dcache, JoinMode::ReadOnly)?;
        }
        Ok(())
    }

    /// Makes `tile` the producer of `link`.
    pub fn tile_out(&mut self, tile: TileId, link: LinkId) -> Result<(), TopoError> {
        self.check_tile(tile)?;
        let (mcache, dcache) = {
            let l = self.link_ref(link)?;
            if l.producer.is_some() {
                return Err(TopoError::DuplicateProducer(l.name.clone()));
            }
            (l.mcache, l.dcache)
        };
        self.links[link.0].producer = Some(tile);
        self.tiles[tile.0].outs.push(link);
        self.tile_uses(tile, mcache, JoinMode::ReadWrite)?;
        if let Some(dcache) = dcache {
            self.tile_uses(tile, dcache, JoinMode::ReadWrite)?;
        }
        Ok(())
    }

    /// Records that `tile` joins `obj`. Joining twice keeps the stronger mode.
    pub fn tile_uses(&mut self, tile: TileId, obj: ObjId, mode: JoinMode) -> Result<(), TopoError> {
        self.check_tile(tile)?;
        if obj.0 >= self.objs.len() {
            return Err(TopoError::UnknownObj(obj.0));
        }
        let uses = &mut self.tiles[tile.0].uses;
        match uses.iter_mut().find(|(o, _)| *o == obj) {
            Some((_, existing)) => {
                if mode == JoinMode::ReadWrite {
                    *existing = JoinMode::ReadWrite;
                }
            }
            None => uses.push((obj, mode)),
        }
        Ok(())
    }

    fn check_tile(&self, tile: TileId) -> Result<(), TopoError> {
        if tile.0 >= self.tiles.len() {
            return Err(TopoError::UnknownTile {
                name: format!("#{}", tile.0),
                kind_id: 0,
            });
        }
        Ok(())
    }

    fn link_ref(&self, link: LinkId) -> Result<&TopoLink, TopoError> {
        self.links.get(link.0).ok_or_else(|| TopoError::UnknownLink {
            name: format!("#{}", link.0),
            kind_id: 0,
        })
    }

    /// Validates the graph, assigns cores, lays out every workspace and
    /// freezes the topology.
    pub fn finish(mut self, opts: &FinishOptions) -> Result<Topo, TopoError> {
        self.validate_links()?;
        self.resolve_dedup_inputs()?;
        self.validate_writers()?;

        let cpus = opts.affinity.resolve(self.tiles.len(), opts.cpu_cnt)?;
        check_reliable_sets(&cpus, &self.reliable_sets())?;
        for (tile, cpu) in self.tiles.iter_mut().zip(cpus) {
            tile.cpu = cpu;
        }

        self.layout(&opts.pages);

        let topo = Topo::new(self.wksps, self.objs, self.links, self.tiles, self.props);
        if let Some(checkpoint) = &opts.checkpoint {
            checkpoint.verify(&topo)?;
        }

        for w in topo.wksps() {
            info!(
                wksp = %w.name,
                footprint = w.footprint,
                page = w.page.as_str(),
                page_cnt = w.page_cnt,
                "workspace laid out"
            );
            tessera_metrics::record_workspace(
                &w.name,
                w.footprint as u64,
                w.page.bytes() as u64,
                w.page_cnt as u64,
            );
        }
        for t in topo.tiles() {
            debug!(
                tile = t.name(),
                kind_id = t.kind_id,
                cpu = ?t.cpu,
                ins = t.ins.len(),
                outs = t.outs.len(),
                "tile placed"
            );
        }
        Ok(topo)
    }

    fn validate_links(&self) -> Result<(), TopoError> {
        for link in &self.links {
            if link.producer.is_none() {
                return Err(TopoError::NoProducer(link.label()));
            }
            let consumers = self
                .tiles
                .iter()
                .flat_map(|t| &t.ins)
                .filter(|i| i.link == link.id)
                .count();
            if consumers == 0 {
                return Err(TopoError::NoConsumer(link.label()));
            }
        }
        Ok(())
    }

    fn reliable_sets(&self) -> Vec<ReliableSet> {
        self.links
            .iter()
            .filter_map(|link| {
                let producer = link.producer?;
                let consumers = self
                    .tiles
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.ins.iter().any(|i| i.link == link.id && i.is_reliable()))
                    .map(|(idx, _)| idx)
                    .collect();
                Some(ReliableSet {
                    link: link.label(),
                    producer: producer.0,
                    consumers,
                })
            })
            .collect()
    }

    fn resolve_dedup_inputs(&mut self) -> Result<(), TopoError> {
        let links = &self.links;
        for tile in &mut self.tiles {
            if let TileKind::Dedup(cfg) = &mut tile.kind {
                cfg.in_kinds = tile
                    .ins
                    .iter()
                    .map(|i| DedupInKind::from_link_name(&links[i.link.0].name))
                    .collect::<Result<_, _>>()?;
            }
        }
        Ok(())
    }

    fn validate_writers(&self) -> Result<(), TopoError> {
        for obj in &self.objs {
            let writers = self
                .tiles
                .iter()
                .filter(|t| t.uses.contains(&(obj.id, JoinMode::ReadWrite)))
                .count();
            if writers > 1 && !obj.kind.has_exclusivity_protocol() {
                return Err(TopoError::SharedWrite {
                    obj: obj.id.0,
                    kind: obj.kind.tag(),
                    writers,
                });
            }
        }
        Ok(())
    }

    fn layout(&mut self, pages: &PageThresholds) {
        for wksp in &mut self.wksps {
            let mut off = 0;
            for obj in self.objs.iter_mut().filter(|o| o.wksp == wksp.id) {
                off = align_up(off, obj.kind.align());
                obj.offset = off;
                off += obj.footprint;
            }
            let (page, page_cnt) = pages.size(off);
            wksp.page = page;
            wksp.page_cnt = page_cnt;
            wksp.footprint = page_cnt * page.bytes();
        }
    }
}
