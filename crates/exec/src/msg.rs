//! Messages on the `replay_exec` link.
//!
//! The fragment signature selects the message kind and the payload is the
//! borsh-encoded message. Epoch, slot and hash messages point at larger
//! blobs the replay tile placed in the shared `runtime_pub` region.

use borsh::{BorshDeserialize, BorshSerialize};
use tessera_types::{Epoch, Rent, Slot};

use crate::error::ExecError;
use crate::runtime::FeatureSet;

/// Largest message on the `replay_exec` link.
pub const EXEC_MSG_MTU: usize = 10240;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum ExecSig {
    NewEpoch = 0,
    NewSlot = 1,
    NewTxn = 2,
    HashAccounts = 3,
}

impl ExecSig {
    pub fn from_sig(sig: u64) -> Option<Self> {
        match sig {
            0 => Some(ExecSig::NewEpoch),
            1 => Some(ExecSig::NewSlot),
            2 => Some(ExecSig::NewTxn),
            3 => Some(ExecSig::HashAccounts),
            _ => None,
        }
    }

    pub fn as_sig(self) -> u64 {
        self as u64
    }

    pub fn name(self) -> &'static str {
        match self {
            ExecSig::NewEpoch => "new_epoch",
            ExecSig::NewSlot => "new_slot",
            ExecSig::NewTxn => "new_txn",
            ExecSig::HashAccounts => "hash_accounts",
        }
    }
}

/// A blob in the `runtime_pub` region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PubRef {
    pub off: u64,
    pub sz: u64,
}

#[derive(Debug, Clone, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct EpochMsg {
    pub epoch: Epoch,
    pub slots_per_epoch: u64,
    pub features: FeatureSet,
    pub rent: Rent,
    /// Borsh-encoded [`crate::runtime::Stakes`].
    pub stakes: PubRef,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SlotMsg {
    pub slot: Slot,
    pub prev_lamports_per_signature: u64,
    pub lamports_per_signature: u64,
    /// Borsh-encoded [`crate::runtime::BlockHashQueue`].
    pub block_hash_queue: PubRef,
    /// Borsh-encoded [`crate::runtime::SysvarCache`].
    pub sysvars: PubRef,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TxnMsg {
    pub payload: Vec<u8>,
}

/// Hash the accounts at indices `start_idx..=end_idx` of a key list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct HashAccountsMsg {
    pub start_idx: u64,
    pub end_idx: u64,
    /// Borsh-encoded `Vec<Pubkey>`.
    pub keys: PubRef,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecMsg {
    NewEpoch(EpochMsg),
    NewSlot(SlotMsg),
    NewTxn(TxnMsg),
    HashAccounts(HashAccountsMsg),
}

impl ExecMsg {
    pub fn sig(&self) -> ExecSig {
        match self {
            ExecMsg::NewEpoch(_) => ExecSig::NewEpoch,
            ExecMsg::NewSlot(_) => ExecSig::NewSlot,
            ExecMsg::NewTxn(_) => ExecSig::NewTxn,
            ExecMsg::HashAccounts(_) => ExecSig::HashAccounts,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ExecError> {
        let encoded = match self {
            ExecMsg::NewEpoch(m) => borsh::to_vec(m),
            ExecMsg::NewSlot(m) => borsh::to_vec(m),
            ExecMsg::NewTxn(m) => borsh::to_vec(m),
            ExecMsg::HashAccounts(m) => borsh::to_vec(m),
        };
        encoded.map_err(|e| ExecError::codec("exec message", e))
    }

    pub fn decode(sig: u64, payload: &[u8]) -> Result<Self, ExecError> {
        let kind = ExecSig::from_sig(sig).ok_or(ExecError::UnknownSig(sig))?;
        let codec = |e: std::io::Error| ExecError::codec(kind.name(), e);
        Ok(match kind {
            ExecSig::NewEpoch => ExecMsg::NewEpoch(borsh::from_slice(payload).map_err(codec)?),
            ExecSig::NewSlot => ExecMsg::NewSlot(borsh::from_slice(payload).map_err(codec)?),
            ExecSig::NewTxn => ExecMsg::NewTxn(borsh::from_slice(payload).map_err(codec)?),
            ExecSig::HashAccounts => {
                ExecMsg::HashAccounts(borsh::from_slice(payload).map_err(codec)?)
            }
        })
    }
}
