use crate::error::TopoError;
use crate::layout::PageSize;
use crate::obj::{ObjKind, TopoObj};
use crate::props::PropStore;
use crate::tile::TopoTile;
use crate::{LinkId, ObjId, TileId, WkspId};

#[derive(Debug, Clone)]
pub struct TopoWksp {
    pub id: WkspId,
    pub name: String,
    /// Page-rounded size of the workspace.
    pub footprint: usize,
    pub page: PageSize,
    pub page_cnt: usize,
}

impl TopoWksp {
    pub(crate) fn new(id: WkspId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            footprint: 0,
            page: PageSize::Normal,
            page_cnt: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TopoLink {
    pub id: LinkId,
    pub name: String,
    pub kind_id: usize,
    pub depth: u64,
    pub mtu: usize,
    pub burst: u64,
    pub mcache: ObjId,
    pub dcache: Option<ObjId>,
    pub producer: Option<TileId>,
}

impl TopoLink {
    pub fn label(&self) -> String {
        format!("{}:{}", self.name, self.kind_id)
    }
}

/// A finished, immutable topology.
#[derive(Debug, Clone)]
pub struct Topo {
    wksps: Vec<TopoWksp>,
    objs: Vec<TopoObj>,
    links: Vec<TopoLink>,
    tiles: Vec<TopoTile>,
    props: PropStore,
}

impl Topo {
    pub(crate) fn new(
        wksps: Vec<TopoWksp>,
        objs: Vec<TopoObj>,
        links: Vec<TopoLink>,
        tiles: Vec<TopoTile>,
        props: PropStore,
    ) -> Self {
        Self {
            wksps,
            objs,
            links,
            tiles,
            props,
        }
    }

    pub fn wksps(&self) -> &[TopoWksp] {
        &self.wksps
    }

    pub fn objs(&self) -> &[TopoObj] {
        &self.objs
    }

    pub fn links(&self) -> &[TopoLink] {
        &self.links
    }

    pub fn tiles(&self) -> &[TopoTile] {
        &self.tiles
    }

    pub fn props(&self) -> &PropStore {
        &self.props
    }

    pub fn wksp(&self, id: WkspId) -> &TopoWksp {
        &self.wksps[id.0]
    }

    pub fn obj(&self, id: ObjId) -> Result<&TopoObj, TopoError> {
        self.objs.get(id.0).ok_or(TopoError::UnknownObj(id.0))
    }

    pub fn link(&self, id: LinkId) -> &TopoLink {
        &self.links[id.0]
    }

    pub fn tile(&self, id: TileId) -> &TopoTile {
        &self.tiles[id.0]
    }

    pub fn find_tile(&self, name: &str, kind_id: usize) -> Result<TileId, TopoError> {
        self.tiles
            .iter()
            .find(|t| t.name() == name && t.kind_id == kind_id)
            .map(|t| t.id)
            .ok_or_else(|| TopoError::UnknownTile {
                name: name.to_string(),
                kind_id,
            })
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

    pub fn named_obj(&self, name: &str, idx: usize) -> Result<ObjId, TopoError> {
        self.props.named(name, idx)
    }

    /// Rebuilds an object's kind from the property store alone.
    pub fn obj_kind_from_props(&self, id: ObjId) -> Result<ObjKind, TopoError> {
        let obj = self.obj(id)?;
        ObjKind::from_props(obj.kind.tag(), id, &self.props)
    }

    /// Number of tiles consuming `link`, and how many of those are reliable.
    pub fn link_consumers(&self, link: LinkId) -> (usize, usize) {
        self.tiles
            .iter()
            .flat_map(|t| &t.ins)
            .filter(|i| i.link == link)
            .fold((0, 0), |(all, rel), i| {
                (all + 1, rel + usize::from(i.is_reliable()))
            })
    }

    /// Fseqs of every reliable consumer of `link`; the producer's credits.
    pub fn reliable_consumer_fseqs(&self, link: LinkId) -> Vec<ObjId> {
        self.tiles
            .iter()
            .flat_map(|t| &t.ins)
            .filter(|i| i.link == link && i.is_reliable())
            .map(|i| i.fseq)
            .collect()
    }

    /// Sum of all workspace footprints.
    pub fn total_footprint(&self) -> usize {
        self.wksps.iter().map(|w| w.footprint).sum()
    }
}
