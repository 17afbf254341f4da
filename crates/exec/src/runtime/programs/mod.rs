//! Native programs the runtime dispatches to.

pub mod compute_budget;
pub mod system;

use tessera_types::{Pubkey, COMPUTE_BUDGET_PROGRAM_ID, SYSTEM_PROGRAM_ID};

use crate::runtime::txn_ctx::{InstrError, TxnCtx};

/// Run one instruction of `program_id`, charging its compute units first.
pub fn invoke(
    ctx: &mut TxnCtx,
    program_id: &Pubkey,
    instr_accts: &[u8],
    data: &[u8],
) -> Result<(), InstrError> {
    if *program_id == SYSTEM_PROGRAM_ID {
        ctx.consume_cus(system::SYSTEM_PROGRAM_CUS)?;
        system::process(ctx, instr_accts, data)
    } else if *program_id == COMPUTE_BUDGET_PROGRAM_ID {
        ctx.consume_cus(compute_budget::COMPUTE_BUDGET_CUS)
    } else {
        Err(InstrError::UnsupportedProgramId)
    }
}

/// Whether `key` names a native program, whose account is never writable.
pub fn is_native_program(key: &Pubkey) -> bool {
    *key == SYSTEM_PROGRAM_ID || *key == COMPUTE_BUDGET_PROGRAM_ID
}
