use tessera_funk::Funk;
use tessera_tango::{
    DCache, MCache, Spad, DCACHE_ALIGN, FSEQ_ALIGN, FSEQ_FOOTPRINT, MCACHE_ALIGN, SPAD_ALIGN,
};

use crate::error::TopoError;
use crate::props::PropStore;
use crate::ObjId;

/// Alignment of host-backed and opaque objects.
const DEFAULT_ALIGN: usize = 64;

/// The kind of a shared-memory object together with its creation parameters.
///
/// The parameters are everything needed to compute the footprint; they are
/// written to the [`PropStore`] so a joiner can rebuild the exact same value
/// with [`ObjKind::from_props`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjKind {
    MCache { depth: u64 },
    DCache { mtu: usize, depth: u64, burst: u64 },
    FSeq,
    Spad { mem_max: usize },
    Funk { rec_max: usize, txn_max: usize },
    Tile { scratch_sz: usize },
    Blob { sz: usize },
}

impl ObjKind {
    pub fn tag(&self) -> &'static str {
        match self {
            ObjKind::MCache { .. } => "mcache",
            ObjKind::DCache { .. } => "dcache",
            ObjKind::FSeq => "fseq",
            ObjKind::Spad { .. } => "spad",
            ObjKind::Funk { .. } => "funk",
            ObjKind::Tile { .. } => "tile",
            ObjKind::Blob { .. } => "blob",
        }
    }

    pub fn align(&self) -> usize {
        match self {
            ObjKind::MCache { .. } => MCACHE_ALIGN,
            ObjKind::DCache { .. } => DCACHE_ALIGN,
            ObjKind::FSeq => FSEQ_ALIGN,
            ObjKind::Spad { .. } => SPAD_ALIGN,
            ObjKind::Funk { .. } | ObjKind::Tile { .. } | ObjKind::Blob { .. } => DEFAULT_ALIGN,
        }
    }

    pub fn footprint(&self) -> Result<usize, TopoError> {
        Ok(match *self {
            ObjKind::MCache { depth } => MCache::footprint(depth)?,
            ObjKind::DCache { mtu, depth, burst } => DCache::footprint(mtu, depth, burst)?,
            ObjKind::FSeq => FSEQ_FOOTPRINT,
            ObjKind::Spad { mem_max } => Spad::footprint(mem_max),
            ObjKind::Funk { rec_max, txn_max } => Funk::footprint(rec_max, txn_max),
            ObjKind::Tile { scratch_sz } => scratch_sz.max(DEFAULT_ALIGN),
            ObjKind::Blob { sz } => sz,
        })
    }

    /// Whether several tiles may hold this object read-write at once.
    ///
    /// Funk serializes writers internally, FSeq words are single atomic
    /// stores, and a Spad is only ever pushed by one side at a time under the
    /// replay/exec handshake. Rings, payload caches and opaque blobs have no
    /// such protocol.
    pub fn has_exclusivity_protocol(&self) -> bool {
        matches!(
            self,
            ObjKind::Funk { .. } | ObjKind::FSeq | ObjKind::Spad { .. }
        )
    }

    pub(crate) fn write_props(&self, id: ObjId, props: &mut PropStore) {
        match *self {
            ObjKind::MCache { depth } => props.set_obj(id, "depth", depth),
            ObjKind::DCache { mtu, depth, burst } => {
                props.set_obj(id, "mtu", mtu as u64);
                props.set_obj(id, "depth", depth);
                props.set_obj(id, "burst", burst);
            }
            ObjKind::FSeq => {}
            ObjKind::Spad { mem_max } => props.set_obj(id, "mem_max", mem_max as u64),
            ObjKind::Funk { rec_max, txn_max } => {
                props.set_obj(id, "rec_max", rec_max as u64);
                props.set_obj(id, "txn_max", txn_max as u64);
            }
            ObjKind::Tile { scratch_sz } => props.set_obj(id, "scratch_sz", scratch_sz as u64),
            ObjKind::Blob { sz } => props.set_obj(id, "sz", sz as u64),
        }
    }

    /// Rebuilds an object kind from its tag and recorded properties.
    pub fn from_props(tag: &str, id: ObjId, props: &PropStore) -> Result<Self, TopoError> {
        let u = |prop: &str| props.obj(id, prop).map(|v| v as usize);
        Ok(match tag {
            "mcache" => ObjKind::MCache {
                depth: props.obj(id, "depth")?,
            },
            "dcache" => ObjKind::DCache {
                mtu: u("mtu")?,
                depth: props.obj(id, "depth")?,
                burst: props.obj(id, "burst")?,
            },
            "fseq" => ObjKind::FSeq,
            "spad" => ObjKind::Spad {
                mem_max: u("mem_max")?,
            },
            "funk" => ObjKind::Funk {
                rec_max: u("rec_max")?,
                txn_max: u("txn_max")?,
            },
            "tile" => ObjKind::Tile {
                scratch_sz: u("scratch_sz")?,
            },
            "blob" => ObjKind::Blob { sz: u("sz")? },
            other => return Err(TopoError::BadObjKind(other.to_string())),
        })
    }
}

/// Which side of an object a tile joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinMode {
    ReadOnly,
    ReadWrite,
}

/// A placed object: its kind, owning workspace and offset within it.
#[derive(Debug, Clone)]
pub struct TopoObj {
    pub id: ObjId,
    pub kind: ObjKind,
    pub wksp: crate::WkspId,
    pub footprint: usize,
    /// Assigned by [`crate::TopoBuilder::finish`].
    pub offset: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_kinds() -> Vec<ObjKind> {
        vec![
            ObjKind::MCache { depth: 128 },
            ObjKind::DCache {
                mtu: 1842,
                depth: 128,
                burst: 1,
            },
            ObjKind::FSeq,
            ObjKind::Spad { mem_max: 1 << 20 },
            ObjKind::Funk {
                rec_max: 1000,
                txn_max: 32,
            },
            ObjKind::Tile { scratch_sz: 4096 },
            ObjKind::Blob { sz: 12345 },
        ]
    }

    #[test]
    fn test_footprint_rederived_from_props() {
        let mut props = PropStore::new();
        for (i, kind) in all_kinds().into_iter().enumerate() {
            let id = ObjId(i);
            kind.write_props(id, &mut props);

            let rebuilt = ObjKind::from_props(kind.tag(), id, &props).unwrap();
            assert_eq!(rebuilt, kind);
            assert_eq!(rebuilt.footprint().unwrap(), kind.footprint().unwrap());
        }
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let props = PropStore::new();
        assert!(matches!(
            ObjKind::from_props("ring", ObjId(0), &props),
            Err(TopoError::BadObjKind(_))
        ));
    }

    #[test]
    fn test_missing_prop_rejected() {
        let props = PropStore::new();
        assert!(matches!(
            ObjKind::from_props("mcache", ObjId(0), &props),
            Err(TopoError::MissingProp(_))
        ));
    }

    #[test]
    fn test_exclusivity_protocol() {
        assert!(ObjKind::FSeq.has_exclusivity_protocol());
        assert!(ObjKind::Spad { mem_max: 64 }.has_exclusivity_protocol());
        assert!(!ObjKind::MCache { depth: 2 }.has_exclusivity_protocol());
        assert!(!ObjKind::Blob { sz: 8 }.has_exclusivity_protocol());
    }

    #[test]
    fn test_invalid_params_fail_footprint() {
        assert!(ObjKind::MCache { depth: 3 }.footprint().is_err());
        assert!(ObjKind::DCache {
            mtu: 0,
            depth: 4,
            burst: 1
        }
        .footprint()
        .is_err());
    }
}
