//! Legacy wire-format transactions.

use ed25519_dalek::{Signer, SigningKey};
use tessera_exec::runtime::programs::compute_budget::ComputeBudgetInstruction;
use tessera_exec::runtime::programs::system::SystemInstruction;
use tessera_types::{
    parse_txn, txn_m_encode, write_compact_u16, Hash, Pubkey, COMPUTE_BUDGET_PROGRAM_ID,
    SYSTEM_PROGRAM_ID, TPU_PARSED_MTU,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountMeta {
    pub pubkey: Pubkey,
    pub signer: bool,
    pub writable: bool,
}

impl AccountMeta {
    pub fn new(pubkey: Pubkey, signer: bool, writable: bool) -> Self {
        Self {
            pubkey,
            signer,
            writable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub program_id: Pubkey,
    pub accounts: Vec<AccountMeta>,
    pub data: Vec<u8>,
}

fn system_instruction(accounts: Vec<AccountMeta>, ix: &SystemInstruction) -> Instruction {
    Instruction {
        program_id: SYSTEM_PROGRAM_ID,
        accounts,
        data: borsh::to_vec(ix).unwrap(),
    }
}

fn compute_budget_instruction(ix: &ComputeBudgetInstruction) -> Instruction {
    Instruction {
        program_id: COMPUTE_BUDGET_PROGRAM_ID,
        accounts: Vec::new(),
        data: borsh::to_vec(ix).unwrap(),
    }
}

pub fn transfer(from: Pubkey, to: Pubkey, lamports: u64) -> Instruction {
    system_instruction(
        vec![AccountMeta::new(from, true, true), AccountMeta::new(to, false, true)],
        &SystemInstruction::Transfer { lamports },
    )
}

pub fn create_account(
    funder: Pubkey,
    new_account: Pubkey,
    lamports: u64,
    space: u64,
    owner: Pubkey,
) -> Instruction {
    system_instruction(
        vec![
            AccountMeta::new(funder, true, true),
            AccountMeta::new(new_account, true, true),
        ],
        &SystemInstruction::CreateAccount {
            lamports,
            space,
            owner,
        },
    )
}

pub fn set_compute_unit_limit(units: u32) -> Instruction {
    compute_budget_instruction(&ComputeBudgetInstruction::SetComputeUnitLimit(units))
}

pub fn set_compute_unit_price(micro_lamports: u64) -> Instruction {
    compute_budget_instruction(&ComputeBudgetInstruction::SetComputeUnitPrice(micro_lamports))
}

/// Builds a signed legacy transaction.
///
/// Accounts are ordered the way the wire format requires: the fee payer,
/// then writable signers, read-only signers, writable non-signers and
/// read-only non-signers, each group in first-mention order.
#[derive(Debug, Clone)]
pub struct TxnBuilder {
    payer: Pubkey,
    blockhash: Hash,
    instructions: Vec<Instruction>,
}

impl TxnBuilder {
    pub fn new(payer: Pubkey) -> Self {
        Self {
            payer,
            blockhash: Hash::ZERO,
            instructions: Vec::new(),
        }
    }

    pub fn instruction(mut self, ix: Instruction) -> Self {
        self.instructions.push(ix);
        self
    }

    pub fn blockhash(mut self, hash: Hash) -> Self {
        self.blockhash = hash;
        self
    }

    fn accounts(&self) -> Vec<AccountMeta> {
        let mut metas = vec![AccountMeta::new(self.payer, true, true)];
        let mentioned = self.instructions.iter().flat_map(|ix| {
            ix.accounts
                .iter()
                .copied()
                .chain(std::iter::once(AccountMeta::new(ix.program_id, false, false)))
        });
        for meta in mentioned {
            match metas.iter_mut().find(|m| m.pubkey == meta.pubkey) {
                Some(existing) => {
                    existing.signer |= meta.signer;
                    existing.writable |= meta.writable;
                }
                None => metas.push(meta),
            }
        }
        metas.sort_by_key(|m| (!m.signer, !m.writable));
        metas
    }

    /// The message bytes every signer signs.
    pub fn message(&self) -> Vec<u8> {
        let metas = self.accounts();
        let count = |signer: bool, writable: bool| {
            metas
                .iter()
                .filter(|m| m.signer == signer && m.writable == writable)
                .count() as u8
        };
        let index = |key: &Pubkey| {
            metas
                .iter()
                .position(|m| m.pubkey == *key)
                .unwrap() as u8
        };

        let mut msg = vec![
            metas.iter().filter(|m| m.signer).count() as u8,
            count(true, false),
            count(false, false),
        ];
        write_compact_u16(&mut msg, metas.len() as u16);
        for meta in &metas {
            msg.extend_from_slice(meta.pubkey.as_bytes());
        }
        msg.extend_from_slice(self.blockhash.as_bytes());
        write_compact_u16(&mut msg, self.instructions.len() as u16);
        for ix in &self.instructions {
            msg.push(index(&ix.program_id));
            write_compact_u16(&mut msg, ix.accounts.len() as u16);
            msg.extend(ix.accounts.iter().map(|a| index(&a.pubkey)));
            write_compact_u16(&mut msg, ix.data.len() as u16);
            msg.extend_from_slice(&ix.data);
        }
        msg
    }

    /// The signer keys in signature order.
    pub fn signers(&self) -> Vec<Pubkey> {
        self.accounts()
            .into_iter()
            .filter(|m| m.signer)
            .map(|m| m.pubkey)
            .collect()
    }

    /// Serialize and sign with `keys`, which must cover every signer.
    ///
    /// # Panics
    ///
    /// Panics if a signer has no matching key in `keys`.
    pub fn sign(&self, keys: &[&SigningKey]) -> Vec<u8> {
        let message = self.message();
        let signers = self.signers();

        let mut payload = Vec::new();
        write_compact_u16(&mut payload, signers.len() as u16);
        for signer in &signers {
            let key = keys
                .iter()
                .find(|k| k.verifying_key().to_bytes() == *signer.as_bytes())
                .unwrap_or_else(|| panic!("no signing key for {signer}"));
            payload.extend_from_slice(&key.sign(&message).to_bytes());
        }
        payload.extend_from_slice(&message);
        payload
    }
}

/// Wrap a parsed payload into a `TxnM` fragment.
///
/// # Panics
///
/// Panics if `payload` does not parse.
pub fn txn_m_fragment(payload: &[u8], bundle_id: u64, bundle_txn_idx: u32) -> Vec<u8> {
    let desc = parse_txn(payload).unwrap();
    let mut buf = vec![0u8; TPU_PARSED_MTU];
    let sz = txn_m_encode(&mut buf, bundle_id, bundle_txn_idx, payload, Some(&desc)).unwrap();
    buf.truncate(sz);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestKeys;

    #[test]
    fn test_accounts_follow_wire_order() {
        let keys = TestKeys::new(3, 9);
        let builder = TxnBuilder::new(keys.pubkey(0))
            .instruction(set_compute_unit_limit(1000))
            .instruction(transfer(keys.pubkey(0), keys.pubkey(1), 5))
            .instruction(create_account(
                keys.pubkey(0),
                keys.pubkey(2),
                100,
                0,
                SYSTEM_PROGRAM_ID,
            ));
        let payload = builder.sign(&[keys.signing_key(0), keys.signing_key(2)]);
        let desc = parse_txn(&payload).unwrap();

        let accounts = desc.account_keys(&payload);
        assert_eq!(accounts[0], keys.pubkey(0));
        assert_eq!(accounts[1], keys.pubkey(2));
        assert_eq!(accounts[2], keys.pubkey(1));
        assert_eq!(desc.signature_cnt, 2);
        assert_eq!(desc.readonly_unsigned_cnt, 2);
        assert!(desc.is_writable(2));
        assert!(!desc.is_writable(3));
        assert_eq!(desc.instrs.len(), 3);

        let message = desc.message(&payload);
        for (i, sig) in desc.signatures(&payload).iter().enumerate() {
            assert!(sig.verify(&accounts[i], message));
        }
    }

    #[test]
    fn test_txn_m_fragment_carries_descriptor() {
        let keys = TestKeys::new(2, 3);
        let payload = TxnBuilder::new(keys.pubkey(0))
            .instruction(transfer(keys.pubkey(0), keys.pubkey(1), 1))
            .sign(&[keys.signing_key(0)]);
        let frag = txn_m_fragment(&payload, 7, 2);

        let hdr = tessera_types::TxnMHeader::read(&frag).unwrap();
        assert_eq!(hdr.bundle_id, 7);
        assert_eq!(hdr.bundle_txn_idx, 2);
        assert_eq!(tessera_types::txn_m_payload(&frag, &hdr).unwrap(), &payload[..]);
        assert_eq!(
            tessera_types::txn_m_descriptor(&frag, &hdr).unwrap(),
            parse_txn(&payload).unwrap()
        );
    }
}
