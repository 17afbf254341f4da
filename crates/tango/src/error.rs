use thiserror::Error;

/// Errors from creating, joining or using IPC objects.
///
/// Construction errors replace header validation at every access site: an
/// object handle only exists once its region and parameters checked out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TangoError {
    #[error("range [{off}, {off}+{sz}) outside workspace {wksp} of {footprint} bytes")]
    OutOfBounds {
        wksp: String,
        off: usize,
        sz: usize,
        footprint: usize,
    },

    #[error("offset {off} is not aligned to {align}")]
    Misaligned { off: usize, align: usize },

    #[error("region of {have} bytes is too small, need {need}")]
    RegionTooSmall { have: usize, need: usize },

    #[error("depth {0} must be a power of two of at least 2")]
    BadDepth(u64),

    #[error("mtu must be non-zero")]
    ZeroMtu,

    #[error("{what} mismatch on join: expected {expected}, found {found}")]
    JoinMismatch {
        what: &'static str,
        expected: u64,
        found: u64,
    },

    #[error("chunk {chunk} outside [{chunk0}, {wmark}]")]
    ChunkOutOfRange { chunk: u32, chunk0: u32, wmark: u32 },

    #[error("payload of {sz} bytes exceeds mtu {mtu}")]
    PayloadTooLarge { sz: usize, mtu: usize },

    #[error("spad out of memory: need {need} bytes, {free} free")]
    SpadFull { need: usize, free: usize },

    #[error("spad frame stack overflow (max {0})")]
    SpadFrameOverflow(usize),

    #[error("spad frame stack underflow")]
    SpadFrameUnderflow,

    #[error("spad allocation outside any frame")]
    SpadNoFrame,

    #[error("alignment {0} is not a power of two")]
    BadAlign(usize),
}
