use std::collections::HashMap;
use std::sync::Arc;

use tessera_funk::Funk;
use tessera_tango::{DCache, FSeq, MCache, Region, Wksp};
use tracing::debug;

use crate::error::TopoError;
use crate::obj::ObjKind;
use crate::topo::Topo;
use crate::{LinkId, ObjId, WkspId};

/// A topology with its workspaces allocated and objects formatted.
///
/// Tiles join objects through this value; every join re-derives the
/// object's parameters from the property store and checks them against what
/// was formatted.
#[derive(Debug)]
pub struct TopoRuntime {
    topo: Topo,
    wksps: Vec<Arc<Wksp>>,
    funks: HashMap<ObjId, Arc<Funk>>,
}

impl TopoRuntime {
    pub fn new(topo: Topo) -> Result<Arc<Self>, TopoError> {
        let wksps: Vec<_> = topo
            .wksps()
            .iter()
            .map(|w| Wksp::new(w.name.clone(), w.footprint, w.page.bytes()))
            .collect();

        let mut funks = HashMap::new();
        for obj in topo.objs() {
            let region = wksps[obj.wksp.0].region(obj.offset, obj.footprint)?;
            match topo.obj_kind_from_props(obj.id)? {
                ObjKind::MCache { depth } => {
                    MCache::new(region, depth, 0)?;
                }
                ObjKind::DCache { mtu, depth, burst } => {
                    DCache::new(region, mtu, depth, burst)?;
                }
                ObjKind::FSeq => {
                    FSeq::new(region, 0)?;
                }
                ObjKind::Funk { rec_max, txn_max } => {
                    let seed = topo.props().obj(obj.id, "seed")?;
                    funks.insert(obj.id, Arc::new(Funk::new(rec_max, txn_max, seed)));
                }
                // Owners format these on their own schedule.
                ObjKind::Spad { .. } | ObjKind::Tile { .. } | ObjKind::Blob { .. } => {}
            }
        }
        debug!(
            wksps = wksps.len(),
            objs = topo.objs().len(),
            "topology instantiated"
        );

        Ok(Arc::new(Self {
            topo,
            wksps,
            funks,
        }))
    }

    pub fn topo(&self) -> &Topo {
        &self.topo
    }

    pub fn wksp(&self, id: WkspId) -> &Arc<Wksp> {
        &self.wksps[id.0]
    }

    pub fn region(&self, obj: ObjId) -> Result<Region, TopoError> {
        let o = self.topo.obj(obj)?;
        Ok(self.wksps[o.wksp.0].region(o.offset, o.footprint)?)
    }

    fn kind(&self, obj: ObjId) -> Result<ObjKind, TopoError> {
        self.topo.obj_kind_from_props(obj)
    }

    fn wrong_kind(&self, obj: ObjId, expected: &'static str) -> TopoError {
        TopoError::WrongObjKind {
            obj: obj.0,
            expected,
            found: self.topo.obj(obj).map(|o| o.kind.tag()).unwrap_or("unknown"),
        }
    }

    pub fn mcache(&self, link: LinkId) -> Result<MCache, TopoError> {
        let obj = self.topo.link(link).mcache;
        match self.kind(obj)? {
            ObjKind::MCache { depth } => Ok(MCache::join(self.region(obj)?, depth)?),
            _ => Err(self.wrong_kind(obj, "mcache")),
        }
    }

    /// The link's dcache, or `None` for a metadata-only link.
    pub fn dcache(&self, link: LinkId) -> Result<Option<DCache>, TopoError> {
        let Some(obj) = self.topo.link(link).dcache else {
            return Ok(None);
        };
        match self.kind(obj)? {
            ObjKind::DCache { mtu, depth, burst } => {
                Ok(Some(DCache::join(self.region(obj)?, mtu, depth, burst)?))
            }
            _ => Err(self.wrong_kind(obj, "dcache")),
        }
    }

    pub fn fseq(&self, obj: ObjId) -> Result<FSeq, TopoError> {
        match self.kind(obj)? {
            ObjKind::FSeq => Ok(FSeq::join(self.region(obj)?)?),
            _ => Err(self.wrong_kind(obj, "fseq")),
        }
    }

    pub fn funk(&self, obj: ObjId) -> Result<Arc<Funk>, TopoError> {
        self.topo.obj(obj)?;
        self.funks
            .get(&obj)
            .map(Arc::clone)
            .ok_or_else(|| self.wrong_kind(obj, "funk"))
    }

    /// Region and capacity of a scratch pad, for its owner to format.
    pub fn spad(&self, obj: ObjId) -> Result<(Region, usize), TopoError> {
        match self.kind(obj)? {
            ObjKind::Spad { mem_max } => Ok((self.region(obj)?, mem_max)),
            _ => Err(self.wrong_kind(obj, "spad")),
        }
    }

    pub fn blob(&self, obj: ObjId) -> Result<Region, TopoError> {
        match self.kind(obj)? {
            ObjKind::Blob { .. } => self.region(obj),
            _ => Err(self.wrong_kind(obj, "blob")),
        }
    }
}
