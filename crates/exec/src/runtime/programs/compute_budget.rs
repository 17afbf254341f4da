//! Compute budget program.
//!
//! Its instructions are interpreted before execution starts, while the fee
//! is computed. At execution time they only cost compute units.

use borsh::{BorshDeserialize, BorshSerialize};
use tessera_types::{Pubkey, TxnDescriptor, COMPUTE_BUDGET_PROGRAM_ID};

use crate::runtime::txn_ctx::{
    InstrError, TxnError, DEFAULT_COMPUTE_UNIT_LIMIT, MAX_COMPUTE_UNIT_LIMIT,
};

/// Compute units charged for each compute budget instruction.
pub const COMPUTE_BUDGET_CUS: u64 = 150;

const MIN_HEAP_FRAME_BYTES: u32 = 32 * 1024;
const MAX_HEAP_FRAME_BYTES: u32 = 256 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ComputeBudgetInstruction {
    /// Retired; always invalid.
    Unused,
    RequestHeapFrame(u32),
    SetComputeUnitLimit(u32),
    /// Price in micro-lamports per compute unit.
    SetComputeUnitPrice(u64),
    SetLoadedAccountsDataSizeLimit(u32),
}

/// Limits requested by a transaction's compute budget instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeBudgetLimits {
    pub compute_unit_limit: u64,
    pub compute_unit_price: u64,
    pub heap_frame_bytes: Option<u32>,
    pub loaded_accounts_data_size_limit: Option<u32>,
}

impl Default for ComputeBudgetLimits {
    fn default() -> Self {
        Self {
            compute_unit_limit: DEFAULT_COMPUTE_UNIT_LIMIT,
            compute_unit_price: 0,
            heap_frame_bytes: None,
            loaded_accounts_data_size_limit: None,
        }
    }
}

/// Collect the limits requested by every compute budget instruction.
///
/// Each kind of instruction may appear once.
pub fn limits(
    desc: &TxnDescriptor,
    payload: &[u8],
    keys: &[Pubkey],
) -> Result<ComputeBudgetLimits, TxnError> {
    let mut limits = ComputeBudgetLimits::default();
    let mut seen = [false; 5];

    for (idx, instr) in desc.instrs.iter().enumerate() {
        if keys.get(instr.program_id as usize) != Some(&COMPUTE_BUDGET_PROGRAM_ID) {
            continue;
        }
        let idx = idx as u8;
        let invalid = TxnError::InstructionError {
            idx,
            err: InstrError::InvalidInstructionData,
        };
        let parsed: ComputeBudgetInstruction =
            borsh::from_slice(desc.instr_data(payload, instr)).map_err(|_| invalid)?;

        let slot = match parsed {
            ComputeBudgetInstruction::Unused => return Err(invalid),
            ComputeBudgetInstruction::RequestHeapFrame(bytes) => {
                if !(MIN_HEAP_FRAME_BYTES..=MAX_HEAP_FRAME_BYTES).contains(&bytes)
                    || bytes % 1024 != 0
                {
                    return Err(invalid);
                }
                limits.heap_frame_bytes = Some(bytes);
                1
            }
            ComputeBudgetInstruction::SetComputeUnitLimit(cus) => {
                limits.compute_unit_limit = (cus as u64).min(MAX_COMPUTE_UNIT_LIMIT);
                2
            }
            ComputeBudgetInstruction::SetComputeUnitPrice(price) => {
                limits.compute_unit_price = price;
                3
            }
            ComputeBudgetInstruction::SetLoadedAccountsDataSizeLimit(bytes) => {
                limits.loaded_accounts_data_size_limit = Some(bytes);
                4
            }
        };
        if std::mem::replace(&mut seen[slot], true) {
            return Err(TxnError::DuplicateInstruction(idx));
        }
    }
    Ok(limits)
}
