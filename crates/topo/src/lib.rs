//! Static tile topology.
//!
//! A topology names every workspace, shared object, link and tile of a
//! validator before anything runs. It is assembled with a [`TopoBuilder`],
//! frozen by [`TopoBuilder::finish`] (which validates the graph and lays out
//! each workspace) and brought to life by [`TopoRuntime::new`], which
//! allocates the workspaces and formats their objects.
//!
//! Objects are identified by index. Every creation parameter lands in the
//! [`PropStore`], so any tile can re-derive an object's footprint and join it
//! without seeing the builder.

mod affinity;
mod builder;
mod checkpoint;
mod error;
mod layout;
mod obj;
mod props;
mod runtime;
mod tile;
mod topo;

pub use affinity::Affinity;
pub use builder::{FinishOptions, TopoBuilder};
pub use checkpoint::{CheckpointObj, LayoutCheckpoint};
pub use error::TopoError;
pub use layout::{
    align_up, PageSize, PageThresholds, ScratchLayout, ScratchRegion, GIGANTIC_PAGE_SZ,
    HUGE_PAGE_SZ, NORMAL_PAGE_SZ,
};
pub use obj::{JoinMode, ObjKind, TopoObj};
pub use props::PropStore;
pub use runtime::TopoRuntime;
pub use tile::{
    DedupInKind, DedupTileConfig, ExecTileConfig, Polling, Reliability, TileIn, TileKind,
    TopoTile,
};
pub use topo::{Topo, TopoLink, TopoWksp};

macro_rules! id_type {
    ($($name:ident),*) => {$(
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub usize);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    )*};
}

id_type!(WkspId, ObjId, LinkId, TileId);
