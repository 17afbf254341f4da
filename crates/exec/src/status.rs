//! Completion signalling from the exec tile to the replay tile.
//!
//! The tile reports through the single word of its `exec_fseq.<i>` object:
//! the low 32 bits carry a state tag, the high 32 bits a payload. For the
//! done states the payload is the low 32 bits of the message sequence
//! number, so two consecutive messages of one kind are distinguishable.
//! Results the replay tile reads back live in an [`ExecResult`] record in
//! the tile's spad, at the offset published with [`ExecState::Booted`].

use borsh::{BorshDeserialize, BorshSerialize};
use tessera_types::LtHash;

use crate::runtime::TxnResult;

const TAG_NOT_BOOTED: u64 = 0;
const TAG_BOOTED: u64 = 1;
const TAG_EPOCH_DONE: u64 = 2;
const TAG_SLOT_DONE: u64 = 3;
const TAG_TXN_DONE: u64 = 4;
const TAG_HASH_DONE: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    NotBooted,
    /// The result record sits at `result_off` bytes into the spad region.
    Booted { result_off: u32 },
    EpochDone { seq: u32 },
    SlotDone { seq: u32 },
    TxnDone { seq: u32 },
    HashDone { seq: u32 },
}

impl ExecState {
    pub fn encode(self) -> u64 {
        let (tag, payload) = match self {
            ExecState::NotBooted => (TAG_NOT_BOOTED, 0),
            ExecState::Booted { result_off } => (TAG_BOOTED, result_off),
            ExecState::EpochDone { seq } => (TAG_EPOCH_DONE, seq),
            ExecState::SlotDone { seq } => (TAG_SLOT_DONE, seq),
            ExecState::TxnDone { seq } => (TAG_TXN_DONE, seq),
            ExecState::HashDone { seq } => (TAG_HASH_DONE, seq),
        };
        tag | ((payload as u64) << 32)
    }

    /// `None` for a word no exec tile writes.
    pub fn decode(word: u64) -> Option<Self> {
        let payload = (word >> 32) as u32;
        Some(match word & 0xffff_ffff {
            TAG_NOT_BOOTED => ExecState::NotBooted,
            TAG_BOOTED => ExecState::Booted {
                result_off: payload,
            },
            TAG_EPOCH_DONE => ExecState::EpochDone { seq: payload },
            TAG_SLOT_DONE => ExecState::SlotDone { seq: payload },
            TAG_TXN_DONE => ExecState::TxnDone { seq: payload },
            TAG_HASH_DONE => ExecState::HashDone { seq: payload },
            _ => return None,
        })
    }
}

/// Encoded size of an [`ExecResult`].
pub const EXEC_RESULT_SZ: usize = 32 + tessera_types::LTHASH_BYTES;

/// Outcome of the last transaction and the last hash request.
#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ExecResult {
    pub txn: TxnResult,
    pub lthash: LtHash,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_word_layout() {
        let word = ExecState::Booted { result_off: 0x40 }.encode();
        assert_eq!(word, 1 | (0x40 << 32));
        assert_eq!(
            ExecState::decode(word),
            Some(ExecState::Booted { result_off: 0x40 })
        );
        assert_eq!(ExecState::NotBooted.encode(), 0);
        assert_eq!(
            ExecState::decode(ExecState::TxnDone { seq: 7 }.encode()),
            Some(ExecState::TxnDone { seq: 7 })
        );
        assert_eq!(ExecState::decode(6), None);
    }

    #[test]
    fn test_result_size_is_fixed() {
        let mut result = ExecResult::default();
        assert_eq!(borsh::to_vec(&result).unwrap().len(), EXEC_RESULT_SZ);
        result.txn.exec_err = -13;
        result.txn.fee = u64::MAX;
        assert_eq!(borsh::to_vec(&result).unwrap().len(), EXEC_RESULT_SZ);
    }
}
