//! Inter-tile communication primitives.
//!
//! Everything here lives in (or, for [`TCache`], is accounted against) a
//! [`Wksp`], a block of shared words every tile in the topology can join:
//!
//! - [`MCache`]: the fragment descriptor ring of a link
//! - [`DCache`]: the chunked payload region behind it
//! - [`FSeq`]: a published sequence word for credits and status
//! - [`TCache`]: the bounded duplicate-tag cache
//! - [`Spad`]: a frame-scoped bump allocator
//!
//! Each handle is only obtainable from a constructor that validated its
//! region and parameters, so the accessors themselves do no checking.

mod dcache;
mod error;
mod fseq;
mod mcache;
mod spad;
mod tcache;
pub mod tempo;
mod wksp;

pub use dcache::{chunk_to_off, DCache, CHUNK_SZ, DCACHE_ALIGN};
pub use error::TangoError;
pub use fseq::{
    FSeq, DIAG_FILT_CNT, DIAG_FILT_SZ, DIAG_OVRNP_CNT, DIAG_OVRNR_CNT, DIAG_PUB_CNT, DIAG_PUB_SZ,
    DIAG_SLOW_CNT, FSEQ_ALIGN, FSEQ_FOOTPRINT,
};
pub use mcache::{seq_diff, FragMeta, MCache, Poll, CTL_EOM, CTL_ERR, CTL_SOM, MCACHE_ALIGN};
pub use spad::{Spad, SpadAlloc, SPAD_ALIGN, SPAD_FRAME_MAX};
pub use tcache::TCache;
pub use wksp::{Region, Wksp};
