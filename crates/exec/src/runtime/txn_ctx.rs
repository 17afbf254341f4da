//! Per-transaction execution context and outcome codes.

use borsh::{BorshDeserialize, BorshSerialize};
use tessera_types::{Account, Pubkey, TxnDescriptor};
use thiserror::Error;

/// Compute units a transaction may use unless it asks otherwise.
pub const DEFAULT_COMPUTE_UNIT_LIMIT: u64 = 200_000;

/// Largest compute unit limit a transaction may request.
pub const MAX_COMPUTE_UNIT_LIMIT: u64 = 1_400_000;

/// The transaction passed parsing, account setup and signature checks.
pub const FLAG_SANITIZE_SUCCESS: u32 = 1 << 0;

/// The transaction was admitted to execution and its fee was charged.
pub const FLAG_EXECUTE_SUCCESS: u32 = 1 << 3;

/// Why an instruction failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InstrError {
    #[error("invalid instruction data")]
    InvalidInstructionData,
    #[error("insufficient account keys for instruction")]
    NotEnoughAccountKeys,
    #[error("missing required signature for instruction")]
    MissingRequiredSignature,
    #[error("insufficient funds for instruction")]
    InsufficientFunds,
    #[error("account already in use")]
    AccountAlreadyInUse,
    #[error("instruction changed the balance of a read-only account")]
    ReadonlyLamportChange,
    #[error("instruction modified data of a read-only account")]
    ReadonlyDataModified,
    #[error("instruction illegally modified the program id of an account")]
    ModifiedProgramId,
    #[error("account data too large")]
    InvalidRealloc,
    #[error("transfer from an account carrying data")]
    InvalidArgument,
    #[error("sum of account balances before and after instruction do not match")]
    UnbalancedInstruction,
    #[error("arithmetic overflowed")]
    ArithmeticOverflow,
    #[error("unsupported program id")]
    UnsupportedProgramId,
    #[error("computational budget exceeded")]
    ComputeBudgetExceeded,
}

impl InstrError {
    pub fn code(&self) -> i32 {
        match self {
            InstrError::InvalidInstructionData => 2,
            InstrError::NotEnoughAccountKeys => 11,
            InstrError::MissingRequiredSignature => 8,
            InstrError::InsufficientFunds => 6,
            InstrError::AccountAlreadyInUse => 10,
            InstrError::ReadonlyLamportChange => 12,
            InstrError::ReadonlyDataModified => 13,
            InstrError::ModifiedProgramId => 16,
            InstrError::InvalidRealloc => 40,
            InstrError::InvalidArgument => 1,
            InstrError::UnbalancedInstruction => 18,
            InstrError::ArithmeticOverflow => 47,
            InstrError::UnsupportedProgramId => 39,
            InstrError::ComputeBudgetExceeded => 36,
        }
    }
}

/// Outcome of a transaction that did not succeed.
///
/// These are ledger outcomes, carried downstream in the result record; none
/// of them stops the tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TxnError {
    #[error("account loaded twice")]
    AccountLoadedTwice,
    #[error("fee payer account not found")]
    AccountNotFound,
    #[error("insufficient funds for fee")]
    InsufficientFundsForFee,
    #[error("fee payer cannot pay fees")]
    InvalidAccountForFee,
    #[error("blockhash not found")]
    BlockhashNotFound,
    #[error("error processing instruction {idx}: {err}")]
    InstructionError { idx: u8, err: InstrError },
    #[error("transaction signature verification failure")]
    SignatureFailure,
    #[error("transaction failed to sanitize")]
    SanitizeFailure,
    #[error("transaction locked too many accounts")]
    TooManyAccountLocks,
    #[error("instruction {0} duplicates an earlier compute budget instruction")]
    DuplicateInstruction(u8),
    #[error("account {account_idx} would be left below rent exemption")]
    InsufficientFundsForRent { account_idx: u8 },
}

impl TxnError {
    pub fn code(&self) -> i32 {
        match self {
            TxnError::AccountLoadedTwice => -2,
            TxnError::AccountNotFound => -3,
            TxnError::InsufficientFundsForFee => -6,
            TxnError::InvalidAccountForFee => -7,
            TxnError::BlockhashNotFound => -9,
            TxnError::InstructionError { .. } => -10,
            TxnError::SignatureFailure => -13,
            TxnError::SanitizeFailure => -15,
            TxnError::TooManyAccountLocks => -29,
            TxnError::DuplicateInstruction(_) => -31,
            TxnError::InsufficientFundsForRent { .. } => -32,
        }
    }
}

/// One account referenced by the transaction, as loaded for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnAccount {
    pub key: Pubkey,
    pub account: Account,
    pub signer: bool,
    pub writable: bool,
}

/// Outcome of one transaction as the driving collaborator reads it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TxnResult {
    /// 0 on success, otherwise [`TxnError::code`].
    pub exec_err: i32,
    /// [`InstrError::code`] when `exec_err` is an instruction error.
    pub instr_err: i32,
    pub instr_err_idx: u32,
    pub flags: u32,
    pub fee: u64,
    pub cus_consumed: u64,
}

/// State of the transaction being executed.
#[derive(Debug, Clone)]
pub struct TxnCtx {
    pub desc: Option<TxnDescriptor>,
    pub payload: Vec<u8>,
    pub compute_unit_limit: u64,
    pub compute_unit_price: u64,
    pub compute_meter: u64,
    pub accounts: Vec<TxnAccount>,
    pub fee: u64,
    pub exec_err: Option<TxnError>,
    pub flags: u32,
}

impl TxnCtx {
    pub fn new(payload: &[u8]) -> Self {
        Self {
            desc: None,
            payload: payload.to_vec(),
            compute_unit_limit: DEFAULT_COMPUTE_UNIT_LIMIT,
            compute_unit_price: 0,
            compute_meter: DEFAULT_COMPUTE_UNIT_LIMIT,
            accounts: Vec::new(),
            fee: 0,
            exec_err: None,
            flags: 0,
        }
    }

    /// Record a failure that ends processing before execution.
    pub fn reject(&mut self, err: TxnError) {
        self.exec_err = Some(err);
        self.flags = 0;
    }

    /// Charge `cus` against the meter. Running out drains the meter.
    pub fn consume_cus(&mut self, cus: u64) -> Result<(), InstrError> {
        match self.compute_meter.checked_sub(cus) {
            Some(left) => {
                self.compute_meter = left;
                Ok(())
            }
            None => {
                self.compute_meter = 0;
                Err(InstrError::ComputeBudgetExceeded)
            }
        }
    }

    pub fn cus_consumed(&self) -> u64 {
        self.compute_unit_limit.saturating_sub(self.compute_meter)
    }

    pub fn account(&self, idx: usize) -> Option<&TxnAccount> {
        self.accounts.get(idx)
    }

    pub fn account_mut(&mut self, idx: usize) -> Option<&mut TxnAccount> {
        self.accounts.get_mut(idx)
    }

    pub fn result(&self) -> TxnResult {
        let (instr_err, instr_err_idx) = match self.exec_err {
            Some(TxnError::InstructionError { idx, err }) => (err.code(), idx as u32),
            _ => (0, 0),
        };
        TxnResult {
            exec_err: self.exec_err.map_or(0, |e| e.code()),
            instr_err,
            instr_err_idx,
            flags: self.flags,
            fee: self.fee,
            cus_consumed: self.cus_consumed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meter_underflow_drains() {
        let mut ctx = TxnCtx::new(&[]);
        ctx.consume_cus(150_000).unwrap();
        assert_eq!(ctx.compute_meter, 50_000);
        assert_eq!(
            ctx.consume_cus(50_001),
            Err(InstrError::ComputeBudgetExceeded)
        );
        assert_eq!(ctx.compute_meter, 0);
        assert_eq!(ctx.cus_consumed(), DEFAULT_COMPUTE_UNIT_LIMIT);
    }

    #[test]
    fn test_result_carries_instruction_error() {
        let mut ctx = TxnCtx::new(&[]);
        ctx.flags = FLAG_SANITIZE_SUCCESS | FLAG_EXECUTE_SUCCESS;
        ctx.exec_err = Some(TxnError::InstructionError {
            idx: 2,
            err: InstrError::InsufficientFunds,
        });
        let result = ctx.result();
        assert_eq!(result.exec_err, -10);
        assert_eq!(result.instr_err, 6);
        assert_eq!(result.instr_err_idx, 2);

        ctx.reject(TxnError::SignatureFailure);
        assert_eq!(ctx.result().flags, 0);
        assert_eq!(ctx.result().instr_err, 0);
    }
}
