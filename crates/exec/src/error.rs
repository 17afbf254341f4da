use thiserror::Error;

use tessera_funk::{FunkError, FunkXid};
use tessera_stem::StemError;
use tessera_tango::TangoError;
use tessera_topo::TopoError;
use tessera_types::Slot;

/// Fatal conditions for the execution tile.
///
/// A transaction that fails sanitization or execution is not an error
/// here; its outcome is recorded as a [`crate::TxnError`].
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("chunk {chunk} sz {sz} corrupt, not in range [{chunk0}, {wmark}]")]
    CorruptChunk {
        chunk: u32,
        sz: usize,
        chunk0: u32,
        wmark: u32,
    },

    #[error("message of {sz} bytes exceeds the {mtu} byte MTU")]
    MessageTooLarge { sz: usize, mtu: usize },

    #[error("unknown message signature {0}")]
    UnknownSig(u64),

    #[error("malformed {what}: {reason}")]
    Codec { what: &'static str, reason: String },

    #[error("could not find funk txn {xid} for slot {slot}")]
    MissingSlotTxn { slot: Slot, xid: FunkXid },

    #[error("{0} message received with no epoch frame")]
    NoEpoch(&'static str),

    #[error("{0} message received with no slot frame")]
    NoSlot(&'static str),

    #[error("base spad allocation requested inside an epoch scope")]
    BaseAllocInScope,

    #[error("hash range [{start}, {end}] outside {cnt} accounts")]
    HashRange { start: u64, end: u64, cnt: usize },

    #[error("runtime_pub blob at {off}+{sz} outside region of {region_sz} bytes")]
    PubRange { off: u64, sz: u64, region_sz: usize },

    #[error("tile {0} is not an exec tile")]
    WrongKind(String),

    #[error(transparent)]
    Funk(#[from] FunkError),

    #[error(transparent)]
    Stem(#[from] StemError),

    #[error(transparent)]
    Tango(#[from] TangoError),

    #[error(transparent)]
    Topo(#[from] TopoError),
}

impl ExecError {
    pub(crate) fn codec(what: &'static str, err: impl std::fmt::Display) -> Self {
        ExecError::Codec {
            what,
            reason: err.to_string(),
        }
    }
}
