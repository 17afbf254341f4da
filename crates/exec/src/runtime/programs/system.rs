//! System program: account creation, assignment, allocation and transfers.

use borsh::{BorshDeserialize, BorshSerialize};
use tessera_types::{Pubkey, MAX_PERMITTED_DATA_LENGTH, SYSTEM_PROGRAM_ID};

use crate::runtime::txn_ctx::{InstrError, TxnCtx};

/// Compute units charged for each system program instruction.
pub const SYSTEM_PROGRAM_CUS: u64 = 150;

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum SystemInstruction {
    /// Accounts: `[funder (signer, writable), new account (signer, writable)]`.
    CreateAccount {
        lamports: u64,
        space: u64,
        owner: Pubkey,
    },
    /// Accounts: `[account (signer, writable)]`.
    Assign { owner: Pubkey },
    /// Accounts: `[from (signer, writable), to (writable)]`.
    Transfer { lamports: u64 },
    /// Accounts: `[account (signer, writable)]`.
    Allocate { space: u64 },
}

pub fn process(ctx: &mut TxnCtx, instr_accts: &[u8], data: &[u8]) -> Result<(), InstrError> {
    let ix: SystemInstruction =
        borsh::from_slice(data).map_err(|_| InstrError::InvalidInstructionData)?;
    match ix {
        SystemInstruction::CreateAccount {
            lamports,
            space,
            owner,
        } => {
            let from = instr_acct(instr_accts, 0)?;
            let to = instr_acct(instr_accts, 1)?;
            create_account(ctx, from, to, lamports, space, &owner)
        }
        SystemInstruction::Assign { owner } => assign(ctx, instr_acct(instr_accts, 0)?, &owner),
        SystemInstruction::Transfer { lamports } => {
            let from = instr_acct(instr_accts, 0)?;
            let to = instr_acct(instr_accts, 1)?;
            transfer(ctx, from, to, lamports)
        }
        SystemInstruction::Allocate { space } => allocate(ctx, instr_acct(instr_accts, 0)?, space),
    }
}

fn instr_acct(instr_accts: &[u8], pos: usize) -> Result<usize, InstrError> {
    instr_accts
        .get(pos)
        .map(|&idx| idx as usize)
        .ok_or(InstrError::NotEnoughAccountKeys)
}

fn create_account(
    ctx: &mut TxnCtx,
    from: usize,
    to: usize,
    lamports: u64,
    space: u64,
    owner: &Pubkey,
) -> Result<(), InstrError> {
    let target = ctx.account(to).ok_or(InstrError::NotEnoughAccountKeys)?;
    if target.account.lamports > 0 {
        return Err(InstrError::AccountAlreadyInUse);
    }
    allocate(ctx, to, space)?;
    assign(ctx, to, owner)?;
    transfer(ctx, from, to, lamports)
}

fn assign(ctx: &mut TxnCtx, idx: usize, owner: &Pubkey) -> Result<(), InstrError> {
    let acct = ctx.account_mut(idx).ok_or(InstrError::NotEnoughAccountKeys)?;
    if acct.account.owner == *owner {
        return Ok(());
    }
    if !acct.signer {
        return Err(InstrError::MissingRequiredSignature);
    }
    if !acct.writable || acct.account.owner != SYSTEM_PROGRAM_ID {
        return Err(InstrError::ModifiedProgramId);
    }
    acct.account.owner = *owner;
    Ok(())
}

fn allocate(ctx: &mut TxnCtx, idx: usize, space: u64) -> Result<(), InstrError> {
    let acct = ctx.account_mut(idx).ok_or(InstrError::NotEnoughAccountKeys)?;
    if !acct.signer {
        return Err(InstrError::MissingRequiredSignature);
    }
    if !acct.account.data.is_empty() || acct.account.owner != SYSTEM_PROGRAM_ID {
        return Err(InstrError::AccountAlreadyInUse);
    }
    if space > MAX_PERMITTED_DATA_LENGTH {
        return Err(InstrError::InvalidRealloc);
    }
    if !acct.writable {
        return Err(InstrError::ReadonlyDataModified);
    }
    acct.account.data = vec![0; space as usize];
    Ok(())
}

fn transfer(ctx: &mut TxnCtx, from: usize, to: usize, lamports: u64) -> Result<(), InstrError> {
    let src = ctx.account(from).ok_or(InstrError::NotEnoughAccountKeys)?;
    let dst = ctx.account(to).ok_or(InstrError::NotEnoughAccountKeys)?;
    if !src.signer {
        return Err(InstrError::MissingRequiredSignature);
    }
    if !src.account.data.is_empty() {
        return Err(InstrError::InvalidArgument);
    }
    if lamports > src.account.lamports {
        return Err(InstrError::InsufficientFunds);
    }
    if lamports == 0 || from == to {
        return Ok(());
    }
    if !src.writable || !dst.writable {
        return Err(InstrError::ReadonlyLamportChange);
    }
    let credited = dst
        .account
        .lamports
        .checked_add(lamports)
        .ok_or(InstrError::ArithmeticOverflow)?;

    if let Some(src) = ctx.account_mut(from) {
        src.account.lamports -= lamports;
    }
    if let Some(dst) = ctx.account_mut(to) {
        dst.account.lamports = credited;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::txn_ctx::TxnAccount;
    use tessera_types::Account;

    fn ctx(accounts: &[(u64, bool, bool)]) -> TxnCtx {
        let mut ctx = TxnCtx::new(&[]);
        ctx.accounts = accounts
            .iter()
            .enumerate()
            .map(|(i, &(lamports, signer, writable))| TxnAccount {
                key: Pubkey::new([i as u8 + 1; 32]),
                account: Account::new(lamports, 0, &SYSTEM_PROGRAM_ID),
                signer,
                writable,
            })
            .collect();
        ctx
    }

    fn run(ctx: &mut TxnCtx, accts: &[u8], ix: SystemInstruction) -> Result<(), InstrError> {
        process(ctx, accts, &borsh::to_vec(&ix).unwrap())
    }

    #[test]
    fn test_transfer_moves_lamports() {
        let mut c = ctx(&[(100, true, true), (5, false, true)]);
        run(&mut c, &[0, 1], SystemInstruction::Transfer { lamports: 60 }).unwrap();
        assert_eq!(c.accounts[0].account.lamports, 40);
        assert_eq!(c.accounts[1].account.lamports, 65);

        assert_eq!(
            run(&mut c, &[0, 1], SystemInstruction::Transfer { lamports: 41 }),
            Err(InstrError::InsufficientFunds)
        );
        assert_eq!(
            run(&mut c, &[1, 0], SystemInstruction::Transfer { lamports: 1 }),
            Err(InstrError::MissingRequiredSignature)
        );
    }

    #[test]
    fn test_transfer_to_readonly_rejected() {
        let mut c = ctx(&[(100, true, true), (0, false, false)]);
        assert_eq!(
            run(&mut c, &[0, 1], SystemInstruction::Transfer { lamports: 1 }),
            Err(InstrError::ReadonlyLamportChange)
        );
        assert_eq!(c.accounts[0].account.lamports, 100);
    }

    #[test]
    fn test_create_account() {
        let owner = Pubkey::new([0xee; 32]);
        let mut c = ctx(&[(10_000, true, true), (0, true, true)]);
        let ix = SystemInstruction::CreateAccount {
            lamports: 4_000,
            space: 16,
            owner,
        };
        run(&mut c, &[0, 1], ix.clone()).unwrap();
        let created = &c.accounts[1].account;
        assert_eq!(created.lamports, 4_000);
        assert_eq!(created.data.len(), 16);
        assert_eq!(created.owner, owner);

        assert_eq!(
            run(&mut c, &[0, 1], ix),
            Err(InstrError::AccountAlreadyInUse)
        );
    }

    #[test]
    fn test_malformed_and_short_instructions() {
        let mut c = ctx(&[(100, true, true)]);
        assert_eq!(
            process(&mut c, &[0], &[9, 9]),
            Err(InstrError::InvalidInstructionData)
        );
        assert_eq!(
            run(&mut c, &[0], SystemInstruction::Transfer { lamports: 1 }),
            Err(InstrError::NotEnoughAccountKeys)
        );
    }
}
