/// Members whose signatures are kept for intra-bundle comparison.
pub const BUNDLE_SIG_MAX: usize = 4;

/// Bookkeeping for the bundle currently streaming through the tile.
///
/// Bundles arrive contiguously, so only one is tracked at a time: a
/// fragment with a different non-zero bundle id starts a new one.
#[derive(Debug, Clone)]
pub struct BundleState {
    id: u64,
    idx: usize,
    failed: bool,
    sigs: [[u8; 64]; BUNDLE_SIG_MAX],
}

impl Default for BundleState {
    fn default() -> Self {
        Self {
            id: 0,
            idx: 0,
            failed: false,
            sigs: [[0u8; 64]; BUNDLE_SIG_MAX],
        }
    }
}

impl BundleState {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn idx(&self) -> usize {
        self.idx
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Starts tracking `bundle_id` if it differs from the current bundle.
    pub fn observe(&mut self, bundle_id: u64) {
        if bundle_id != 0 && bundle_id != self.id {
            self.id = bundle_id;
            self.idx = 0;
            self.failed = false;
        }
    }

    pub fn fail(&mut self) {
        self.failed = true;
    }

    /// Whether `sig` matches an earlier member of this bundle.
    pub fn contains(&self, sig: &[u8; 64]) -> bool {
        self.sigs[..self.idx.min(BUNDLE_SIG_MAX)]
            .iter()
            .any(|s| s == sig)
    }

    /// Records a member. The fifth member advances the index without being
    /// stored; a sixth is refused.
    pub fn push(&mut self, sig: &[u8; 64]) -> Result<(), usize> {
        match self.idx {
            i if i > BUNDLE_SIG_MAX => return Err(i),
            BUNDLE_SIG_MAX => {}
            i => self.sigs[i] = *sig,
        }
        self.idx += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(b: u8) -> [u8; 64] {
        [b; 64]
    }

    #[test]
    fn test_new_id_resets_state() {
        let mut b = BundleState::default();
        b.observe(7);
        b.push(&sig(1)).unwrap();
        b.fail();

        b.observe(7);
        assert!(b.failed());
        assert_eq!(b.idx(), 1);

        b.observe(8);
        assert!(!b.failed());
        assert_eq!(b.idx(), 0);
        assert!(!b.contains(&sig(1)));
    }

    #[test]
    fn test_zero_id_keeps_current_bundle() {
        let mut b = BundleState::default();
        b.observe(3);
        b.push(&sig(1)).unwrap();
        b.observe(0);
        assert_eq!(b.id(), 3);
        assert!(b.contains(&sig(1)));
    }

    #[test]
    fn test_fifth_member_is_not_stored() {
        let mut b = BundleState::default();
        b.observe(1);
        for i in 0..4 {
            b.push(&sig(i)).unwrap();
        }
        b.push(&sig(4)).unwrap();
        assert_eq!(b.idx(), 5);
        assert!(b.contains(&sig(3)));
        assert!(!b.contains(&sig(4)));
        assert_eq!(b.push(&sig(5)), Err(5));
    }
}
