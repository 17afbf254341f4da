use tessera_funk::{Funk, FunkTxnHandle};
use tessera_types::{LtHash, Pubkey};

/// Lattice hash delta the slot's changes to `keys` make to published state.
///
/// Each key contributes the hash of its state in `txn` minus the hash of its
/// published state; untouched keys contribute nothing.
pub fn hash_accounts(funk: &Funk, txn: &FunkTxnHandle, keys: &[Pubkey]) -> LtHash {
    let mut delta = LtHash::zero();
    for key in keys {
        if let Some(new) = funk.rec_query(Some(txn), key) {
            delta.add(&LtHash::of_account(key, &new));
        }
        if let Some(old) = funk.rec_query(None, key) {
            delta.sub(&LtHash::of_account(key, &old));
        }
    }
    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_funk::FunkXid;
    use tessera_types::{Account, SYSTEM_PROGRAM_ID};

    #[test]
    fn test_delta_tracks_changes_only() {
        let funk = Funk::new(16, 4, 0);
        let a = Pubkey::new([1; 32]);
        let b = Pubkey::new([2; 32]);
        let old_a = Account::new(10, 0, &SYSTEM_PROGRAM_ID);
        funk.root_insert(a, old_a.clone()).unwrap();
        funk.root_insert(b, Account::new(20, 0, &SYSTEM_PROGRAM_ID))
            .unwrap();

        let xid = FunkXid::from_slot(1);
        funk.txn_prepare(None, xid).unwrap();
        let txn = funk.txn_query(xid).unwrap();
        assert!(hash_accounts(&funk, &txn, &[a, b]).is_zero());

        let new_a = Account::new(7, 0, &SYSTEM_PROGRAM_ID);
        funk.rec_write(&txn, a, new_a.clone()).unwrap();
        let mut expected = LtHash::of_account(&a, &new_a);
        expected.sub(&LtHash::of_account(&a, &old_a));
        assert_eq!(hash_accounts(&funk, &txn, &[a, b]), expected);
    }
}
