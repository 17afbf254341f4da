//! Test helpers for tessera: deterministic keys and properly-signed
//! transactions.
//!
//! Transactions built here carry real ed25519 signatures, so tests exercise
//! the actual parse and verification paths of the dedup and exec tiles
//! rather than bypassing them.
//!
//! # Example
//!
//! ```rust
//! use tessera_test_helpers::{transfer, TestKeys, TxnBuilder};
//! use tessera_types::{parse_txn, Hash};
//!
//! // Two accounts with deterministic keys
//! let keys = TestKeys::new(2, 42);
//!
//! // A signed transfer from account 0 to account 1
//! let payload = TxnBuilder::new(keys.pubkey(0))
//!     .instruction(transfer(keys.pubkey(0), keys.pubkey(1), 10))
//!     .blockhash(Hash::from_bytes(b"genesis"))
//!     .sign(&[keys.signing_key(0)]);
//!
//! let desc = parse_txn(&payload).unwrap();
//! let sig = desc.first_signature(&payload).unwrap();
//! assert!(sig.verify(&keys.pubkey(0), desc.message(&payload)));
//! ```

pub mod replay;
pub mod txn;

pub use replay::{exec_topology, ReplayDriver};
pub use txn::{
    create_account, set_compute_unit_limit, set_compute_unit_price, transfer, txn_m_fragment,
    AccountMeta, Instruction, TxnBuilder,
};

use ed25519_dalek::{Signer, SigningKey};
use tessera_types::{Pubkey, Signature};

/// A set of accounts with deterministic ed25519 keypairs.
pub struct TestKeys {
    signing_keys: Vec<SigningKey>,
    pubkeys: Vec<Pubkey>,
}

impl std::fmt::Debug for TestKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestKeys")
            .field("size", &self.signing_keys.len())
            .field("pubkeys", &self.pubkeys)
            .finish()
    }
}

impl TestKeys {
    /// Create `size` keypairs from `seed`.
    ///
    /// The same seed always yields the same keys; different seeds produce
    /// disjoint sets.
    ///
    /// # Example
    ///
    /// ```rust
    /// use tessera_test_helpers::TestKeys;
    ///
    /// let keys = TestKeys::new(4, 42);
    /// assert_eq!(keys.size(), 4);
    /// assert_eq!(keys.pubkey(1), TestKeys::new(4, 42).pubkey(1));
    /// ```
    pub fn new(size: usize, seed: u64) -> Self {
        let mut signing_keys = Vec::with_capacity(size);
        let mut pubkeys = Vec::with_capacity(size);

        for i in 0..size {
            let mut seed_bytes = [0u8; 32];
            let key_seed = seed.wrapping_add(i as u64).wrapping_mul(0x517cc1b727220a95);
            seed_bytes[..8].copy_from_slice(&key_seed.to_le_bytes());
            seed_bytes[8..16].copy_from_slice(&(i as u64).to_le_bytes());
            seed_bytes[16..24].copy_from_slice(&seed.to_le_bytes());

            let key = SigningKey::from_bytes(&seed_bytes);
            pubkeys.push(Pubkey::new(key.verifying_key().to_bytes()));
            signing_keys.push(key);
        }

        Self {
            signing_keys,
            pubkeys,
        }
    }

    pub fn size(&self) -> usize {
        self.signing_keys.len()
    }

    /// # Panics
    ///
    /// Panics if `idx >= size()`.
    pub fn pubkey(&self, idx: usize) -> Pubkey {
        self.pubkeys[idx]
    }

    /// # Panics
    ///
    /// Panics if `idx >= size()`.
    pub fn signing_key(&self, idx: usize) -> &SigningKey {
        &self.signing_keys[idx]
    }

    pub fn pubkeys(&self) -> &[Pubkey] {
        &self.pubkeys
    }

    /// Sign `message` with key `idx`.
    pub fn sign(&self, idx: usize, message: &[u8]) -> Signature {
        Signature::new(self.signing_keys[idx].sign(message).to_bytes())
    }
}
