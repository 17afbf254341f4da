use tessera_funk::FunkTxnHandle;
use tessera_types::{Epoch, Rent, Slot};

use crate::runtime::features::FeatureSet;
use crate::runtime::sysvar::{BlockHashQueue, Stakes, SysvarCache};

/// State that holds for a whole epoch.
#[derive(Debug, Clone)]
pub struct EpochState {
    pub epoch: Epoch,
    pub slots_per_epoch: u64,
    pub features: FeatureSet,
    pub rent: Rent,
    pub stakes: Stakes,
}

/// State that holds for one slot, including the funk transaction its
/// account changes land in.
#[derive(Debug, Clone)]
pub struct SlotState {
    pub slot: Slot,
    pub funk_txn: FunkTxnHandle,
    pub prev_lamports_per_signature: u64,
    pub lamports_per_signature: u64,
    pub block_hash_queue: BlockHashQueue,
    pub sysvars: SysvarCache,
}
