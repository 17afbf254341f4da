//! Account model and rent schedule.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::Pubkey;

/// The system program owns every account that has not been assigned away.
pub const SYSTEM_PROGRAM_ID: Pubkey = Pubkey::new([0u8; 32]);

/// Address of the compute budget program.
pub const COMPUTE_BUDGET_PROGRAM_ID: Pubkey = Pubkey::new([
    3, 6, 70, 111, 229, 33, 23, 50, 255, 236, 173, 186, 114, 195, 155, 231, 188, 140, 229, 187,
    197, 247, 18, 107, 44, 67, 155, 58, 64, 0, 0, 0,
]);

/// Largest data size an account may be allocated with.
pub const MAX_PERMITTED_DATA_LENGTH: u64 = 10 * 1024 * 1024;

/// Account state as stored in the versioned account store.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Account {
    /// Lamports held by this account
    pub lamports: u64,
    /// Data held by this account (arbitrary bytes)
    pub data: Vec<u8>,
    /// Program that owns this account
    pub owner: Pubkey,
    /// Whether this account's data is an executable program
    pub executable: bool,
    /// Epoch at which this account will next owe rent
    pub rent_epoch: u64,
}

impl Account {
    pub fn new(lamports: u64, space: usize, owner: &Pubkey) -> Self {
        Self {
            lamports,
            data: vec![0; space],
            owner: *owner,
            executable: false,
            rent_epoch: 0,
        }
    }

    /// An account with no lamports does not exist as far as the ledger is
    /// concerned and is dropped on commit.
    pub fn is_reclaimable(&self) -> bool {
        self.lamports == 0
    }
}

/// Rent schedule, delivered with each epoch.
#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct Rent {
    /// Rental rate in lamports/byte-year
    pub lamports_per_byte_year: u64,
    /// Amount of time (in years) a balance must cover to be exempt
    pub exemption_threshold: f64,
    /// Percentage of collected rent that is burned
    pub burn_percent: u8,
}

impl Default for Rent {
    fn default() -> Self {
        Self {
            lamports_per_byte_year: 3480,
            exemption_threshold: 2.0,
            burn_percent: 50,
        }
    }
}

impl Rent {
    /// Storage overhead charged for every account regardless of data size.
    pub const ACCOUNT_STORAGE_OVERHEAD: usize = 128;

    /// Calculate minimum balance for rent exemption
    pub fn minimum_balance(&self, data_len: usize) -> u64 {
        let bytes = data_len + Self::ACCOUNT_STORAGE_OVERHEAD;
        ((bytes as f64) * self.lamports_per_byte_year as f64 * self.exemption_threshold) as u64
    }

    /// Check if an account is rent exempt
    pub fn is_exempt(&self, lamports: u64, data_len: usize) -> bool {
        lamports >= self.minimum_balance(data_len)
    }
}
