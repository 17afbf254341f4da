use thiserror::Error;

use tessera_stem::StemError;
use tessera_tango::TangoError;
use tessera_topo::TopoError;
use tessera_types::{TxnMError, TxnParseError};

/// Fatal conditions for the deduplication tile.
///
/// Duplicates and failed bundles are not errors; they are counted.
#[derive(Debug, Error)]
pub enum DedupError {
    #[error("chunk {chunk} sz {sz} corrupt, not in range [{chunk0}, {wmark}]")]
    CorruptChunk {
        chunk: u32,
        sz: usize,
        chunk0: u32,
        wmark: u32,
    },

    #[error("gossip or voter transaction of {0} bytes is too large")]
    RawTooLarge(usize),

    #[error("transaction payload of {0} bytes exceeds the MTU")]
    PayloadTooLarge(usize),

    #[error("vote transaction failed to parse after verification: {0}")]
    VoteParse(#[source] TxnParseError),

    #[error("transaction carries no signature")]
    NoSignature,

    #[error("bundle index {0} > 4")]
    BundleOverflow(usize),

    #[error("tile {0} is not a dedup tile")]
    WrongKind(String),

    #[error("no input kind for link {0}")]
    UnknownInput(usize),

    #[error(transparent)]
    TxnM(#[from] TxnMError),

    #[error(transparent)]
    Stem(#[from] StemError),

    #[error(transparent)]
    Tango(#[from] TangoError),

    #[error(transparent)]
    Topo(#[from] TopoError),
}
