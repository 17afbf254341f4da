//! Core types shared by tessera tiles.
//!
//! This crate provides the foundational types that travel between tiles or
//! live in the versioned account store:
//!
//! - **Primitives**: [`Hash`], [`Pubkey`], [`Signature`]
//! - **Transactions**: the wire-format parser ([`parse_txn`]) and the
//!   [`TxnDescriptor`] it produces, plus the `TxnM` fragment layout
//! - **Ledger state**: [`Account`], [`Rent`], [`LtHash`]
//!
//! # Design Philosophy
//!
//! This crate does not depend on any other workspace crate, making it the
//! foundation layer.

mod account;
mod hash;
mod keys;
mod lthash;
mod txn;
mod txn_m;

pub use account::{
    Account, Rent, COMPUTE_BUDGET_PROGRAM_ID, MAX_PERMITTED_DATA_LENGTH, SYSTEM_PROGRAM_ID,
};
pub use hash::{Hash, HexError};
pub use keys::{Pubkey, Signature};
pub use lthash::{LtHash, LTHASH_BYTES, LTHASH_LANES};
pub use txn::{
    parse_txn, write_compact_u16, InstrDescriptor, TxnDescriptor, TxnParseError, TPU_MTU,
    TXN_ACCT_ADDR_MAX, TXN_DESCRIPTOR_MAX_SZ, TXN_INSTR_MAX, TXN_SIG_MAX,
};
pub use txn_m::{
    txn_m_attach_descriptor, txn_m_descriptor, txn_m_encode, txn_m_payload, TxnMError,
    TxnMHeader, TPU_PARSED_MTU, TXN_M_HEADER_SZ,
};

/// Ledger slot number.
pub type Slot = u64;

/// Ledger epoch number.
pub type Epoch = u64;
