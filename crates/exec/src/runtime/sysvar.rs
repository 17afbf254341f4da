//! Slot- and epoch-scoped ledger state decoded from `runtime_pub`.

use borsh::{BorshDeserialize, BorshSerialize};
use tessera_types::{Epoch, Hash, Pubkey, Slot};

/// Oldest block hash, in queue entries, a transaction may reference.
pub const MAX_PROCESSING_AGE: u64 = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockHashEntry {
    pub hash: Hash,
    pub hash_index: u64,
    pub lamports_per_signature: u64,
}

/// Recent block hashes, each tagged with its position in the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockHashQueue {
    last_hash_index: u64,
    max_age: u64,
    entries: Vec<BlockHashEntry>,
}

impl BlockHashQueue {
    pub fn new(max_age: u64) -> Self {
        Self {
            last_hash_index: 0,
            max_age,
            entries: Vec::new(),
        }
    }

    /// Append `hash` as the newest entry, dropping entries older than the
    /// queue's max age.
    pub fn register(&mut self, hash: Hash, lamports_per_signature: u64) {
        self.last_hash_index = self.last_hash_index.saturating_add(1);
        let last = self.last_hash_index;
        let max_age = self.max_age;
        self.entries
            .retain(|e| last.checked_sub(e.hash_index).is_some_and(|age| age <= max_age));
        self.entries.push(BlockHashEntry {
            hash,
            hash_index: last,
            lamports_per_signature,
        });
    }

    pub fn last_hash(&self) -> Option<Hash> {
        self.entries.last().map(|e| e.hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<&BlockHashEntry> {
        self.entries.iter().find(|e| &e.hash == hash)
    }

    pub fn is_valid_for_age(&self, hash: &Hash, max_age: u64) -> bool {
        self.get(hash).is_some_and(|e| {
            // An entry newer than the queue head only comes from a corrupt
            // blob and counts as expired.
            self.last_hash_index
                .checked_sub(e.hash_index)
                .is_some_and(|age| age <= max_age)
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Clock {
    pub slot: Slot,
    pub epoch: Epoch,
    pub unix_timestamp: i64,
}

/// Sysvars the runtime reads while executing a slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SysvarCache {
    pub clock: Clock,
}

/// Delegated stake per vote account for an epoch.
#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Stakes {
    pub vote_accounts: Vec<(Pubkey, u64)>,
}

impl Stakes {
    pub fn total(&self) -> u64 {
        self.vote_accounts
            .iter()
            .fold(0u64, |acc, &(_, stake)| acc.saturating_add(stake))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(b: u8) -> Hash {
        Hash::new([b; 32])
    }

    #[test]
    fn test_block_hash_age() {
        let mut queue = BlockHashQueue::new(3);
        for b in 1..=4 {
            queue.register(hash(b), 5000);
        }
        assert_eq!(queue.last_hash(), Some(hash(4)));
        assert!(queue.is_valid_for_age(&hash(1), 3));
        assert!(!queue.is_valid_for_age(&hash(1), 2));
        assert!(!queue.is_valid_for_age(&hash(9), 3));

        queue.register(hash(5), 5000);
        assert!(queue.get(&hash(1)).is_none());
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn test_entry_ahead_of_queue_head_is_expired() {
        let queue = BlockHashQueue {
            last_hash_index: 2,
            max_age: 150,
            entries: vec![BlockHashEntry {
                hash: hash(7),
                hash_index: 5,
                lamports_per_signature: 5000,
            }],
        };
        let decoded: BlockHashQueue = borsh::from_slice(&borsh::to_vec(&queue).unwrap()).unwrap();
        assert!(decoded.get(&hash(7)).is_some());
        assert!(!decoded.is_valid_for_age(&hash(7), 150));

        let mut decoded = decoded;
        decoded.register(hash(8), 5000);
        assert!(decoded.get(&hash(7)).is_none());
        assert_eq!(decoded.len(), 1);
    }

    #[test]
    fn test_total_stake_saturates() {
        let stakes = Stakes {
            vote_accounts: vec![(Pubkey::new([1; 32]), u64::MAX), (Pubkey::new([2; 32]), 7)],
        };
        assert_eq!(stakes.total(), u64::MAX);
    }
}
