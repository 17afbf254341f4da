//! Transaction feed for the in-process producer tiles.
//!
//! A feed names the slot to execute in, the accounts funded at the root
//! before it, and the signed transactions the verify tiles publish. Example
//! TOML:
//!
//! ```toml
//! slot = 1
//! lamports_per_signature = 5000
//! blockhash = "5c4f...e1"          # 64 hex chars
//! txns = ["01a4...", "01b7..."]    # wire-format transactions, hex
//!
//! [[accounts]]
//! pubkey = "8d3e...90"
//! lamports = 1000000
//! ```

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tessera_types::{parse_txn, Hash, Pubkey, Slot};

use crate::error::NodeError;

/// Block hash registered for the slot when a feed does not name one.
pub fn default_blockhash() -> Hash {
    Hash::from_bytes(b"tessera genesis")
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FeedFile {
    slot: Slot,
    lamports_per_signature: u64,
    blockhash: Option<String>,
    accounts: Vec<AccountEntry>,
    txns: Vec<String>,
}

impl Default for FeedFile {
    fn default() -> Self {
        Self {
            slot: 1,
            lamports_per_signature: 5000,
            blockhash: None,
            accounts: Vec::new(),
            txns: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AccountEntry {
    pubkey: String,
    lamports: u64,
}

/// A parsed feed. Every transaction is known to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    pub slot: Slot,
    pub lamports_per_signature: u64,
    pub blockhash: Hash,
    pub accounts: Vec<(Pubkey, u64)>,
    pub txns: Vec<Vec<u8>>,
}

impl Default for Feed {
    fn default() -> Self {
        Self {
            slot: 1,
            lamports_per_signature: 5000,
            blockhash: default_blockhash(),
            accounts: Vec::new(),
            txns: Vec::new(),
        }
    }
}

impl Feed {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read feed file: {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Failed to parse feed file: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let file: FeedFile = toml::from_str(contents)?;
        if file.slot == 0 {
            let reason = "slot 0 is the root and cannot be executed";
            return Err(NodeError::InvalidFeed(reason.into()).into());
        }
        let blockhash = match &file.blockhash {
            Some(hex) => Hash::from_hex(hex)
                .map_err(|e| NodeError::InvalidFeed(format!("blockhash: {e}")))?,
            None => default_blockhash(),
        };
        let accounts = file
            .accounts
            .iter()
            .map(|a| Ok((parse_pubkey(&a.pubkey)?, a.lamports)))
            .collect::<Result<Vec<_>, NodeError>>()?;
        let txns = file
            .txns
            .iter()
            .enumerate()
            .map(|(i, hex)| {
                let payload = hex::decode(hex)
                    .map_err(|e| NodeError::InvalidFeed(format!("txn {i}: {e}")))?;
                parse_txn(&payload).map_err(|e| NodeError::InvalidFeed(format!("txn {i}: {e}")))?;
                Ok(payload)
            })
            .collect::<Result<Vec<_>, NodeError>>()?;

        Ok(Self {
            slot: file.slot,
            lamports_per_signature: file.lamports_per_signature,
            blockhash,
            accounts,
            txns,
        })
    }

    /// The transactions verify tile `kind_id` of `verify_cnt` publishes.
    pub fn txns_for_verify(&self, kind_id: usize, verify_cnt: usize) -> Vec<Vec<u8>> {
        self.txns
            .iter()
            .skip(kind_id)
            .step_by(verify_cnt.max(1))
            .cloned()
            .collect()
    }
}

fn parse_pubkey(hex: &str) -> Result<Pubkey, NodeError> {
    let bytes = hex::decode(hex).map_err(|e| NodeError::InvalidFeed(format!("pubkey: {e}")))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| NodeError::InvalidFeed(format!("pubkey is {} bytes, not 32", b.len())))?;
    Ok(Pubkey::new(bytes))
}
