//! Native transaction runtime.
//!
//! Executes one transaction at a time against a slot's funk transaction:
//! account setup and signature checks, compute budget and fee, native
//! program dispatch, rent check and commit.

pub mod bank;
pub mod executor;
pub mod features;
pub mod hash;
pub mod programs;
pub mod sysvar;
pub mod txn_ctx;

pub use bank::{EpochState, SlotState};
pub use executor::{
    account_lock_limit, calculate_fee, execute_txn, DEFAULT_TX_ACCOUNT_LOCKS,
    MAX_TX_ACCOUNT_LOCKS,
};
pub use features::{Feature, FeatureSet};
pub use hash::hash_accounts;
pub use sysvar::{BlockHashEntry, BlockHashQueue, Clock, Stakes, SysvarCache, MAX_PROCESSING_AGE};
pub use txn_ctx::{
    InstrError, TxnAccount, TxnCtx, TxnError, TxnResult, DEFAULT_COMPUTE_UNIT_LIMIT,
    FLAG_EXECUTE_SUCCESS, FLAG_SANITIZE_SUCCESS, MAX_COMPUTE_UNIT_LIMIT,
};
