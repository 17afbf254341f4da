//! The transaction pipeline: sanitize, check, execute, commit.

use tessera_funk::{Funk, FunkTxnHandle};
use tessera_types::{parse_txn, Account, Rent, TxnDescriptor, SYSTEM_PROGRAM_ID};
use tracing::{debug, warn};

use crate::error::ExecError;
use crate::runtime::bank::{EpochState, SlotState};
use crate::runtime::features::Feature;
use crate::runtime::programs::{self, compute_budget};
use crate::runtime::sysvar::MAX_PROCESSING_AGE;
use crate::runtime::txn_ctx::{
    InstrError, TxnAccount, TxnCtx, TxnError, FLAG_EXECUTE_SUCCESS, FLAG_SANITIZE_SUCCESS,
};

/// Accounts a transaction may lock.
pub const DEFAULT_TX_ACCOUNT_LOCKS: usize = 64;

/// Accounts a transaction may lock once
/// [`Feature::IncreaseTxAccountLockLimit`] is active.
pub const MAX_TX_ACCOUNT_LOCKS: usize = 128;

const MICRO_LAMPORTS_PER_LAMPORT: u128 = 1_000_000;

/// Fee charged to the payer before execution.
pub fn calculate_fee(
    signature_cnt: u64,
    lamports_per_signature: u64,
    compute_unit_limit: u64,
    compute_unit_price: u64,
) -> u64 {
    let priority = (compute_unit_limit as u128 * compute_unit_price as u128)
        .div_ceil(MICRO_LAMPORTS_PER_LAMPORT);
    let base = signature_cnt as u128 * lamports_per_signature as u128;
    u64::try_from(base + priority).unwrap_or(u64::MAX)
}

pub fn account_lock_limit(epoch: &EpochState, slot: &SlotState) -> usize {
    if epoch
        .features
        .is_active(Feature::IncreaseTxAccountLockLimit, slot.slot)
    {
        MAX_TX_ACCOUNT_LOCKS
    } else {
        DEFAULT_TX_ACCOUNT_LOCKS
    }
}

/// Run one transaction against the slot's funk transaction.
///
/// The returned context carries the outcome. Only a failure to write to
/// funk is an error.
pub fn execute_txn(
    epoch: &EpochState,
    slot: &SlotState,
    funk: &Funk,
    payload: &[u8],
) -> Result<TxnCtx, ExecError> {
    let mut ctx = TxnCtx::new(payload);
    let desc = match parse_txn(payload) {
        Ok(desc) => desc,
        Err(err) => {
            debug!(slot = slot.slot, %err, "transaction failed to parse");
            ctx.reject(TxnError::SanitizeFailure);
            return Ok(ctx);
        }
    };
    ctx.desc = Some(desc.clone());

    if let Err(err) = setup_accounts(&mut ctx, &desc, payload, account_lock_limit(epoch, slot)) {
        ctx.reject(err);
        return Ok(ctx);
    }

    if !verify_signatures(&desc, payload) {
        warn!(slot = slot.slot, "transaction failed signature verification");
        ctx.reject(TxnError::SignatureFailure);
        return Ok(ctx);
    }
    ctx.flags = FLAG_SANITIZE_SUCCESS;

    if let Err(err) = pre_execute_check(&mut ctx, &desc, payload, slot, funk) {
        ctx.reject(err);
        return Ok(ctx);
    }
    ctx.flags |= FLAG_EXECUTE_SUCCESS;

    let fee_charged: Vec<Account> = ctx.accounts.iter().map(|a| a.account.clone()).collect();
    let outcome = execute_instrs(&mut ctx, &desc, payload)
        .and_then(|()| check_rent(&ctx.accounts, &fee_charged, &epoch.rent));
    if let Err(err) = outcome {
        debug!(slot = slot.slot, %err, "transaction failed");
        ctx.exec_err = Some(err);
        for (acct, account) in ctx.accounts.iter_mut().zip(fee_charged) {
            acct.account = account;
        }
    }

    commit(&ctx, funk, &slot.funk_txn)?;
    Ok(ctx)
}

/// Resolve account keys and their writability.
///
/// Native program accounts and accounts invoked as programs are demoted to
/// read-only.
fn setup_accounts(
    ctx: &mut TxnCtx,
    desc: &TxnDescriptor,
    payload: &[u8],
    lock_limit: usize,
) -> Result<(), TxnError> {
    let keys = desc.account_keys(payload);
    if keys.len() != desc.acct_addr_cnt as usize {
        return Err(TxnError::SanitizeFailure);
    }
    if keys.len() > lock_limit {
        return Err(TxnError::TooManyAccountLocks);
    }
    let mut sorted = keys.clone();
    sorted.sort_unstable();
    if sorted.windows(2).any(|w| w[0] == w[1]) {
        return Err(TxnError::AccountLoadedTwice);
    }

    let mut invoked = vec![false; keys.len()];
    for instr in &desc.instrs {
        if let Some(slot) = invoked.get_mut(instr.program_id as usize) {
            *slot = true;
        }
    }

    ctx.accounts = keys
        .into_iter()
        .enumerate()
        .map(|(i, key)| TxnAccount {
            key,
            account: Account::default(),
            signer: desc.is_signer(i),
            writable: desc.is_writable(i) && !invoked[i] && !programs::is_native_program(&key),
        })
        .collect();
    Ok(())
}

fn verify_signatures(desc: &TxnDescriptor, payload: &[u8]) -> bool {
    let message = desc.message(payload);
    let sigs = desc.signatures(payload);
    sigs.len() == desc.signature_cnt as usize
        && sigs.iter().enumerate().all(|(i, sig)| {
            desc.account_key(payload, i)
                .is_some_and(|signer| sig.verify(&signer, message))
        })
}

/// Compute budget, block hash age, account loading and the fee debit.
fn pre_execute_check(
    ctx: &mut TxnCtx,
    desc: &TxnDescriptor,
    payload: &[u8],
    slot: &SlotState,
    funk: &Funk,
) -> Result<(), TxnError> {
    let keys: Vec<_> = ctx.accounts.iter().map(|a| a.key).collect();
    let limits = compute_budget::limits(desc, payload, &keys)?;
    ctx.compute_unit_limit = limits.compute_unit_limit;
    ctx.compute_meter = limits.compute_unit_limit;
    ctx.compute_unit_price = limits.compute_unit_price;

    let blockhash = desc
        .recent_blockhash(payload)
        .ok_or(TxnError::SanitizeFailure)?;
    if !slot
        .block_hash_queue
        .is_valid_for_age(&blockhash, MAX_PROCESSING_AGE)
    {
        return Err(TxnError::BlockhashNotFound);
    }

    for acct in &mut ctx.accounts {
        acct.account = funk
            .rec_query(Some(&slot.funk_txn), &acct.key)
            .unwrap_or_default();
    }

    let fee = calculate_fee(
        desc.signature_cnt as u64,
        slot.lamports_per_signature,
        ctx.compute_unit_limit,
        ctx.compute_unit_price,
    );
    let payer = ctx.accounts.first_mut().ok_or(TxnError::AccountNotFound)?;
    if !payer.signer || !payer.writable {
        return Err(TxnError::InvalidAccountForFee);
    }
    if payer.account.lamports == 0 {
        return Err(TxnError::AccountNotFound);
    }
    if payer.account.owner != SYSTEM_PROGRAM_ID {
        return Err(TxnError::InvalidAccountForFee);
    }
    if payer.account.lamports < fee {
        return Err(TxnError::InsufficientFundsForFee);
    }
    payer.account.lamports -= fee;
    ctx.fee = fee;
    Ok(())
}

fn execute_instrs(ctx: &mut TxnCtx, desc: &TxnDescriptor, payload: &[u8]) -> Result<(), TxnError> {
    for (idx, instr) in desc.instrs.iter().enumerate() {
        let fail = |err| TxnError::InstructionError {
            idx: idx as u8,
            err,
        };
        let program_id = ctx
            .account(instr.program_id as usize)
            .map(|a| a.key)
            .ok_or(fail(InstrError::NotEnoughAccountKeys))?;
        let before = lamports_sum(&ctx.accounts);
        programs::invoke(
            ctx,
            &program_id,
            desc.instr_accounts(payload, instr),
            desc.instr_data(payload, instr),
        )
        .map_err(fail)?;
        if lamports_sum(&ctx.accounts) != before {
            return Err(fail(InstrError::UnbalancedInstruction));
        }
    }
    Ok(())
}

fn lamports_sum(accounts: &[TxnAccount]) -> u128 {
    accounts.iter().map(|a| a.account.lamports as u128).sum()
}

/// Writable accounts that changed must end up rent exempt or empty.
fn check_rent(accounts: &[TxnAccount], before: &[Account], rent: &Rent) -> Result<(), TxnError> {
    for (idx, (acct, prev)) in accounts.iter().zip(before).enumerate() {
        let post = &acct.account;
        if !acct.writable || post == prev || post.lamports == 0 || post.data.is_empty() {
            continue;
        }
        if !rent.is_exempt(post.lamports, post.data.len()) {
            return Err(TxnError::InsufficientFundsForRent {
                account_idx: idx as u8,
            });
        }
    }
    Ok(())
}

/// Write the transaction's effects into the slot's funk transaction.
///
/// A failed transaction only commits its fee payer. Zero-lamport accounts
/// are reclaimed.
fn commit(ctx: &TxnCtx, funk: &Funk, txn: &FunkTxnHandle) -> Result<(), ExecError> {
    let failed = ctx.exec_err.is_some();
    for (idx, acct) in ctx.accounts.iter().enumerate() {
        if !acct.writable || (failed && idx != 0) {
            continue;
        }
        if acct.account.is_reclaimable() {
            if funk.rec_query(Some(txn), &acct.key).is_some() {
                funk.rec_remove(txn, acct.key)?;
            }
        } else {
            funk.rec_write(txn, acct.key, acct.account.clone())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_rounds_priority_up() {
        assert_eq!(calculate_fee(2, 5000, 200_000, 0), 10_000);
        assert_eq!(calculate_fee(1, 5000, 200_000, 1), 5_000 + 1);
        assert_eq!(calculate_fee(1, 5000, 1_000_000, 3), 5_000 + 3);
        assert_eq!(calculate_fee(1, 0, 1, 1), 1);
        assert_eq!(calculate_fee(1, 0, u64::MAX, u64::MAX), u64::MAX);
    }

    #[test]
    fn test_rent_check_ignores_unchanged_accounts() {
        let rent = Rent::default();
        let poor = Account::new(1, 10, &SYSTEM_PROGRAM_ID);
        let acct = |account: Account, writable| TxnAccount {
            key: Default::default(),
            account,
            signer: false,
            writable,
        };
        assert!(check_rent(&[acct(poor.clone(), true)], &[poor.clone()], &rent).is_ok());
        assert!(check_rent(&[acct(poor.clone(), false)], &[Account::default()], &rent).is_ok());
        assert_eq!(
            check_rent(&[acct(poor, true)], &[Account::default()], &rent),
            Err(TxnError::InsufficientFundsForRent { account_idx: 0 })
        );
    }
}
