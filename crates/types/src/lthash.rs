//! Lattice hash over account states.
//!
//! Each account maps to a vector of 1024 `u16` lanes expanded from a Blake3
//! XOF. Lanes add with wrapping arithmetic, so the hash of a set of accounts
//! can be maintained incrementally: add the new state, subtract the old one.

use borsh::{BorshDeserialize, BorshSerialize};
use std::fmt;

use crate::{Account, Hash, Pubkey};

/// Number of 16-bit lanes.
pub const LTHASH_LANES: usize = 1024;

/// Size of the hash in bytes.
pub const LTHASH_BYTES: usize = LTHASH_LANES * 2;

#[derive(Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct LtHash {
    lanes: [u16; LTHASH_LANES],
}

impl LtHash {
    /// The identity element.
    pub const fn zero() -> Self {
        Self {
            lanes: [0u16; LTHASH_LANES],
        }
    }

    /// Hash of a single account. Zero-lamport accounts hash to the identity.
    pub fn of_account(pubkey: &Pubkey, account: &Account) -> Self {
        if account.lamports == 0 {
            return Self::zero();
        }
        let mut hasher = blake3::Hasher::new();
        hasher.update(&account.lamports.to_le_bytes());
        hasher.update(&account.data);
        hasher.update(&[account.executable as u8]);
        hasher.update(account.owner.as_bytes());
        hasher.update(pubkey.as_bytes());

        let mut bytes = [0u8; LTHASH_BYTES];
        hasher.finalize_xof().fill(&mut bytes);

        let mut lanes = [0u16; LTHASH_LANES];
        for (lane, pair) in lanes.iter_mut().zip(bytes.chunks_exact(2)) {
            *lane = u16::from_le_bytes([pair[0], pair[1]]);
        }
        Self { lanes }
    }

    pub fn add(&mut self, other: &LtHash) {
        for (a, b) in self.lanes.iter_mut().zip(other.lanes.iter()) {
            *a = a.wrapping_add(*b);
        }
    }

    pub fn sub(&mut self, other: &LtHash) {
        for (a, b) in self.lanes.iter_mut().zip(other.lanes.iter()) {
            *a = a.wrapping_sub(*b);
        }
    }

    pub fn is_zero(&self) -> bool {
        self.lanes.iter().all(|&l| l == 0)
    }

    /// Compress to a 32-byte checksum for logging and comparison.
    pub fn checksum(&self) -> Hash {
        let mut hasher = blake3::Hasher::new();
        for lane in &self.lanes {
            hasher.update(&lane.to_le_bytes());
        }
        Hash::new(*hasher.finalize().as_bytes())
    }
}

impl Default for LtHash {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Debug for LtHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LtHash({:?})", self.checksum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SYSTEM_PROGRAM_ID;

    fn account(lamports: u64, data: &[u8]) -> Account {
        Account {
            lamports,
            data: data.to_vec(),
            owner: SYSTEM_PROGRAM_ID,
            executable: false,
            rent_epoch: 0,
        }
    }

    #[test]
    fn test_zero_lamports_is_identity() {
        let key = Pubkey::new([1; 32]);
        assert!(LtHash::of_account(&key, &account(0, b"data")).is_zero());
        assert!(!LtHash::of_account(&key, &account(1, b"data")).is_zero());
    }

    #[test]
    fn test_add_is_order_independent() {
        let a = LtHash::of_account(&Pubkey::new([1; 32]), &account(10, b"a"));
        let b = LtHash::of_account(&Pubkey::new([2; 32]), &account(20, b"b"));

        let mut ab = LtHash::zero();
        ab.add(&a);
        ab.add(&b);
        let mut ba = LtHash::zero();
        ba.add(&b);
        ba.add(&a);
        assert_eq!(ab, ba);

        ab.sub(&a);
        ab.sub(&b);
        assert!(ab.is_zero());
    }

    #[test]
    fn test_pubkey_is_bound() {
        let acct = account(5, b"x");
        assert_ne!(
            LtHash::of_account(&Pubkey::new([1; 32]), &acct),
            LtHash::of_account(&Pubkey::new([2; 32]), &acct)
        );
    }
}
