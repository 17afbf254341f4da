use thiserror::Error;

use tessera_dedup::DedupError;
use tessera_exec::ExecError;
use tessera_funk::FunkError;
use tessera_stem::StemError;
use tessera_tango::TangoError;
use tessera_topo::TopoError;
use tessera_types::{TxnMError, TxnParseError};

/// Errors raised while configuring or launching the node.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Core pinning failed: {0}")]
    CorePinning(String),

    #[error("Failed to spawn thread for tile {name}:{kind_id}: {source}")]
    Spawn {
        name: &'static str,
        kind_id: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("tile {name}:{kind_id} panicked")]
    TilePanicked { name: &'static str, kind_id: usize },

    #[error("Invalid feed: {0}")]
    InvalidFeed(String),

    #[error(transparent)]
    Topo(#[from] TopoError),

    #[error(transparent)]
    Stem(#[from] StemError),

    #[error(transparent)]
    Dedup(#[from] DedupError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Funk(#[from] FunkError),

    #[error(transparent)]
    Tango(#[from] TangoError),

    #[error(transparent)]
    TxnParse(#[from] TxnParseError),

    #[error(transparent)]
    TxnM(#[from] TxnMError),
}
