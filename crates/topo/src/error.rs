use thiserror::Error;

use tessera_tango::TangoError;

/// Errors raised while building or instantiating a topology.
///
/// All of these are fatal at startup: no tile runs against a topology that
/// failed to build.
#[derive(Debug, Error)]
pub enum TopoError {
    #[error("workspace `{0}` declared twice")]
    DuplicateWksp(String),

    #[error("unknown workspace `{0}`")]
    UnknownWksp(String),

    #[error("unknown tile `{name}:{kind_id}`")]
    UnknownTile { name: String, kind_id: usize },

    #[error("unknown link `{name}:{kind_id}`")]
    UnknownLink { name: String, kind_id: usize },

    #[error("unknown object id {0}")]
    UnknownObj(usize),

    #[error("no object registered as `{0}`")]
    UnknownNamedObj(String),

    #[error("object {obj} is a {found}, expected {expected}")]
    WrongObjKind {
        obj: usize,
        expected: &'static str,
        found: &'static str,
    },

    #[error("link `{0}` already has a producer")]
    DuplicateProducer(String),

    #[error("link `{0}` has no producer")]
    NoProducer(String),

    #[error("link `{0}` has no consumer")]
    NoConsumer(String),

    #[error("object {obj} ({kind}) is writable by {writers} tiles but has no exclusivity protocol")]
    SharedWrite {
        obj: usize,
        kind: &'static str,
        writers: usize,
    },

    #[error("dedup tile cannot consume link `{0}`")]
    UnknownDedupInput(String),

    #[error("invalid affinity `{0}`")]
    BadAffinity(String),

    #[error("affinity names CPU {cpu} but the system only has {cpu_cnt} CPUs")]
    CpuOutOfRange { cpu: usize, cpu_cnt: usize },

    #[error("topology has {tiles} tiles but the affinity only provides {cpus} cores")]
    InsufficientCores { tiles: usize, cpus: usize },

    #[error(
        "link `{link}` has {members} pinned tiles across its producer and reliable consumers \
         but the affinity gives them only {cores} distinct cores"
    )]
    ReliableSetSharesCore {
        link: String,
        members: usize,
        cores: usize,
    },

    #[error("object `{name}` footprint {found} does not match checkpointed {expected}")]
    CheckpointMismatch {
        name: String,
        expected: u64,
        found: u64,
    },

    #[error("checkpointed object `{0}` is missing from the topology")]
    CheckpointMissing(String),

    #[error("checkpoint i/o: {0}")]
    CheckpointIo(#[from] std::io::Error),

    #[error("checkpoint format: {0}")]
    CheckpointFormat(String),

    #[error("missing property `{0}`")]
    MissingProp(String),

    #[error("unknown object kind `{0}`")]
    BadObjKind(String),

    #[error("scratch layout uses {found} bytes but {expected} were reserved")]
    ScratchMismatch { expected: usize, found: usize },

    #[error(transparent)]
    Tango(#[from] TangoError),
}
