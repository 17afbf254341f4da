use thiserror::Error;

use tessera_tango::TangoError;
use tessera_topo::TopoError;

/// Errors that stop a tile's run loop.
///
/// Everything here is fatal for the tile: the loop logs it, records it and
/// returns. Business-level failures never surface as a `StemError`.
#[derive(Debug, Error)]
pub enum StemError {
    #[error(transparent)]
    Topo(#[from] TopoError),

    #[error(transparent)]
    Tango(#[from] TangoError),

    #[error("fragment on `{link}` points at chunk {chunk}, outside [{chunk0}, {wmark}]")]
    CorruptChunk {
        link: String,
        chunk: u32,
        chunk0: u32,
        wmark: u32,
    },

    #[error("fragment on `{link}` is {sz} bytes, over the link mtu of {mtu}")]
    OversizedFrag { link: String, sz: usize, mtu: usize },

    #[error("fragment on `{link}` is {sz} bytes, over the {cap} byte buffer")]
    ShortBuffer { link: String, sz: usize, cap: usize },

    #[error("link `{0}` carries no payloads")]
    NoPayload(String),

    #[error("tile has no output link {0}")]
    NoOutLink(usize),

    #[error("tile has no input link {0}")]
    NoInLink(usize),

    #[error("tile: {0}")]
    Tile(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StemError {
    pub fn tile(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        StemError::Tile(Box::new(err))
    }
}
