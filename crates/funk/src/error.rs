use thiserror::Error;

use crate::FunkXid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FunkError {
    #[error("funk txn {0} does not exist")]
    UnknownTxn(FunkXid),

    #[error("funk txn {0} already exists or was published")]
    DuplicateXid(FunkXid),

    #[error("funk txn {0} is frozen by a child")]
    TxnFrozen(FunkXid),

    #[error("funk txn capacity {0} exhausted")]
    TxnCapacity(usize),

    #[error("funk record capacity {0} exhausted")]
    RecordCapacity(usize),
}
