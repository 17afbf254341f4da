//! # Funk
//!
//! Versioned account store shared between the replay collaborator and the
//! execution tiles.
//!
//! Published state lives in a root map. On top of it sits a tree of
//! in-preparation transactions, one per slot being replayed, each holding
//! only the records it changed. Reads walk from a transaction up through its
//! ancestors to the root, so every transaction sees a consistent snapshot of
//! its own fork.
//!
//! Uses `im::OrdMap` for cheap structural-sharing clones when a published
//! transaction is folded into the root.
//!
//! # Ownership
//!
//! The replay collaborator prepares, publishes and cancels transactions.
//! Execution tiles only look transactions up by id and write records into
//! the one their current slot resolved to. The two never write the same
//! transaction concurrently: replay hands a slot to the execution tiles and
//! waits for their completion signal before touching it again.

mod error;
mod xid;

pub use error::FunkError;
pub use xid::FunkXid;

use im::OrdMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use tessera_types::{Account, Pubkey};
use tracing::debug;

/// Bytes reserved per transaction in the object's footprint.
const TXN_FOOTPRINT: usize = 128;
/// Bytes reserved per record header in the object's footprint.
const REC_FOOTPRINT: usize = 192;
const HDR_FOOTPRINT: usize = 128;

/// A record in a transaction: `None` marks a removal.
type Delta = OrdMap<Pubkey, Option<Account>>;

struct FunkTxn {
    parent: Option<FunkXid>,
    children: Vec<FunkXid>,
    recs: Delta,
}

struct FunkInner {
    root: OrdMap<Pubkey, Account>,
    txns: HashMap<FunkXid, FunkTxn>,
    last_publish: FunkXid,
    rec_cnt: usize,
}

/// Handle to a transaction found by [`Funk::txn_query`].
///
/// Holding one does not pin the transaction; if replay cancels it, record
/// operations through the handle fail with [`FunkError::UnknownTxn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunkTxnHandle {
    xid: FunkXid,
}

impl FunkTxnHandle {
    pub fn xid(&self) -> FunkXid {
        self.xid
    }
}

pub struct Funk {
    inner: RwLock<FunkInner>,
    rec_max: usize,
    txn_max: usize,
    seed: u64,
}

impl std::fmt::Debug for Funk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Funk")
            .field("rec_max", &self.rec_max)
            .field("txn_max", &self.txn_max)
            .field("txn_cnt", &self.txn_cnt())
            .finish()
    }
}

impl Funk {
    /// Footprint of the object for the given capacities.
    pub fn footprint(rec_max: usize, txn_max: usize) -> usize {
        HDR_FOOTPRINT + txn_max * TXN_FOOTPRINT + rec_max * REC_FOOTPRINT
    }

    pub fn new(rec_max: usize, txn_max: usize, seed: u64) -> Self {
        Self {
            inner: RwLock::new(FunkInner {
                root: OrdMap::new(),
                txns: HashMap::new(),
                last_publish: FunkXid::ROOT,
                rec_cnt: 0,
            }),
            rec_max,
            txn_max,
            seed,
        }
    }

    pub fn rec_max(&self) -> usize {
        self.rec_max
    }

    pub fn txn_max(&self) -> usize {
        self.txn_max
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn txn_cnt(&self) -> usize {
        self.inner.read().txns.len()
    }

    pub fn rec_cnt(&self) -> usize {
        self.inner.read().rec_cnt
    }

    pub fn last_publish(&self) -> FunkXid {
        self.inner.read().last_publish
    }

    /// Insert a record directly into published state. Used for genesis.
    pub fn root_insert(&self, key: Pubkey, account: Account) -> Result<(), FunkError> {
        let mut inner = self.inner.write();
        if !inner.root.contains_key(&key) {
            if inner.rec_cnt == self.rec_max {
                return Err(FunkError::RecordCapacity(self.rec_max));
            }
            inner.rec_cnt += 1;
        }
        inner.root.insert(key, account);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Transactions
    // ═══════════════════════════════════════════════════════════════════

    /// Start a new transaction as a child of `parent`, or of published state.
    pub fn txn_prepare(&self, parent: Option<FunkXid>, xid: FunkXid) -> Result<(), FunkError> {
        let mut inner = self.inner.write();
        if xid == FunkXid::ROOT || xid == inner.last_publish || inner.txns.contains_key(&xid) {
            return Err(FunkError::DuplicateXid(xid));
        }
        if inner.txns.len() == self.txn_max {
            return Err(FunkError::TxnCapacity(self.txn_max));
        }
        if let Some(parent) = parent {
            let parent_txn = inner
                .txns
                .get_mut(&parent)
                .ok_or(FunkError::UnknownTxn(parent))?;
            parent_txn.children.push(xid);
        }
        inner.txns.insert(
            xid,
            FunkTxn {
                parent,
                children: Vec::new(),
                recs: OrdMap::new(),
            },
        );
        debug!(%xid, parent = ?parent, "funk txn prepared");
        Ok(())
    }

    /// Look up an in-preparation transaction. Never creates one.
    pub fn txn_query(&self, xid: FunkXid) -> Option<FunkTxnHandle> {
        self.inner
            .read()
            .txns
            .contains_key(&xid)
            .then_some(FunkTxnHandle { xid })
    }

    /// A transaction with children is frozen: its records may no longer change.
    pub fn txn_is_frozen(&self, txn: &FunkTxnHandle) -> Result<bool, FunkError> {
        let inner = self.inner.read();
        let t = inner.txns.get(&txn.xid).ok_or(FunkError::UnknownTxn(txn.xid))?;
        Ok(!t.children.is_empty())
    }

    /// Publish `xid` and all of its ancestors into the root, oldest first.
    ///
    /// Competing forks of every published transaction are cancelled.
    /// Returns the number of transactions published.
    pub fn txn_publish(&self, xid: FunkXid) -> Result<usize, FunkError> {
        let mut inner = self.inner.write();
        let mut chain = Vec::new();
        let mut cur = Some(xid);
        while let Some(x) = cur {
            let txn = inner.txns.get(&x).ok_or(FunkError::UnknownTxn(x))?;
            chain.push(x);
            cur = txn.parent;
        }

        for &x in chain.iter().rev() {
            // Siblings of x are competing forks.
            let siblings: Vec<FunkXid> = inner
                .txns
                .iter()
                .filter(|(&other, t)| other != x && t.parent.is_none())
                .map(|(&other, _)| other)
                .collect();
            for sibling in siblings {
                Self::cancel_tree(&mut inner, sibling);
            }

            let Some(txn) = inner.txns.remove(&x) else {
                return Err(FunkError::UnknownTxn(x));
            };
            for (key, rec) in txn.recs {
                let existed = inner.root.contains_key(&key);
                match rec {
                    Some(account) => {
                        inner.root.insert(key, account);
                        if existed {
                            inner.rec_cnt -= 1;
                        }
                    }
                    None => {
                        inner.root.remove(&key);
                        inner.rec_cnt -= 1;
                        if existed {
                            inner.rec_cnt -= 1;
                        }
                    }
                }
            }
            for child in &txn.children {
                if let Some(c) = inner.txns.get_mut(child) {
                    c.parent = None;
                }
            }
            inner.last_publish = x;
        }
        debug!(%xid, published = chain.len(), "funk txn published");
        Ok(chain.len())
    }

    /// Cancel `xid` and every transaction descending from it.
    ///
    /// Returns the number of transactions cancelled.
    pub fn txn_cancel(&self, xid: FunkXid) -> Result<usize, FunkError> {
        let mut inner = self.inner.write();
        let parent = inner
            .txns
            .get(&xid)
            .ok_or(FunkError::UnknownTxn(xid))?
            .parent;
        if let Some(parent) = parent {
            if let Some(p) = inner.txns.get_mut(&parent) {
                p.children.retain(|&c| c != xid);
            }
        }
        Ok(Self::cancel_tree(&mut inner, xid))
    }

    fn cancel_tree(inner: &mut FunkInner, xid: FunkXid) -> usize {
        let Some(txn) = inner.txns.remove(&xid) else {
            return 0;
        };
        inner.rec_cnt -= txn.recs.len();
        1 + txn
            .children
            .into_iter()
            .map(|child| Self::cancel_tree(inner, child))
            .sum::<usize>()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Records
    // ═══════════════════════════════════════════════════════════════════

    /// Read `key` as seen from `txn` (or from published state if `None`).
    pub fn rec_query(&self, txn: Option<&FunkTxnHandle>, key: &Pubkey) -> Option<Account> {
        let inner = self.inner.read();
        let mut cur = txn.map(|t| t.xid);
        while let Some(xid) = cur {
            let t = inner.txns.get(&xid)?;
            if let Some(rec) = t.recs.get(key) {
                return rec.clone();
            }
            cur = t.parent;
        }
        inner.root.get(key).cloned()
    }

    /// Write `account` under `key` in `txn`.
    pub fn rec_write(
        &self,
        txn: &FunkTxnHandle,
        key: Pubkey,
        account: Account,
    ) -> Result<(), FunkError> {
        self.rec_set(txn, key, Some(account))
    }

    /// Remove `key` as seen from `txn`.
    pub fn rec_remove(&self, txn: &FunkTxnHandle, key: Pubkey) -> Result<(), FunkError> {
        self.rec_set(txn, key, None)
    }

    fn rec_set(
        &self,
        txn: &FunkTxnHandle,
        key: Pubkey,
        rec: Option<Account>,
    ) -> Result<(), FunkError> {
        let mut inner = self.inner.write();
        let at_capacity = inner.rec_cnt >= self.rec_max;
        let t = inner
            .txns
            .get_mut(&txn.xid)
            .ok_or(FunkError::UnknownTxn(txn.xid))?;
        if !t.children.is_empty() {
            return Err(FunkError::TxnFrozen(txn.xid));
        }
        let is_new = !t.recs.contains_key(&key);
        if is_new && at_capacity {
            return Err(FunkError::RecordCapacity(self.rec_max));
        }
        t.recs.insert(key, rec);
        if is_new {
            inner.rec_cnt += 1;
        }
        Ok(())
    }

    /// Keys changed by `txn` itself, in key order.
    pub fn txn_keys(&self, txn: &FunkTxnHandle) -> Result<Vec<Pubkey>, FunkError> {
        let inner = self.inner.read();
        let t = inner.txns.get(&txn.xid).ok_or(FunkError::UnknownTxn(txn.xid))?;
        Ok(t.recs.keys().copied().collect())
    }
}
