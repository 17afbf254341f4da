//! The execution tile.
//!
//! Driven by the replay tile over the `replay_exec` link. Four messages
//! move it through nested scopes:
//!
//! - **new epoch**: drops any slot and transaction scope, decodes features,
//!   rent and stakes into a fresh epoch scope
//! - **new slot**: drops any transaction scope, binds the slot's funk
//!   transaction and decodes the block hash queue and sysvars
//! - **new transaction**: runs one transaction through the [`runtime`] and
//!   records its outcome
//! - **hash accounts**: computes the lattice hash delta of a range of keys
//!
//! Completion of each message is published through the tile's fseq as an
//! [`ExecState`]; outcomes are read from the [`ExecResult`] record in the
//! tile's spad.

mod error;
mod frame;
mod msg;
pub mod runtime;
mod status;
mod tile;

pub use error::ExecError;
pub use frame::{EpochFrame, FramePending, FrameStack, SlotFrame, TxnFrame};
pub use msg::{
    EpochMsg, ExecMsg, ExecSig, HashAccountsMsg, PubRef, SlotMsg, TxnMsg, EXEC_MSG_MTU,
};
pub use runtime::{InstrError, TxnError, TxnResult};
pub use status::{ExecResult, ExecState, EXEC_RESULT_SZ};
pub use tile::ExecTile;
