//! Runtime feature gates, delivered with each epoch.

use borsh::{BorshDeserialize, BorshSerialize};
use tessera_types::Slot;

/// Feature gates the runtime consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
#[borsh(use_discriminant = true)]
#[repr(u32)]
pub enum Feature {
    /// Raises the per-transaction account lock limit from 64 to 128.
    IncreaseTxAccountLockLimit = 0,
}

/// Activation slot of each enabled feature.
#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct FeatureSet {
    activations: Vec<(Feature, Slot)>,
}

impl FeatureSet {
    pub fn activate(&mut self, feature: Feature, slot: Slot) {
        match self.activations.iter_mut().find(|(f, _)| *f == feature) {
            Some(entry) => entry.1 = slot,
            None => self.activations.push((feature, slot)),
        }
    }

    pub fn activation_slot(&self, feature: Feature) -> Option<Slot> {
        self.activations
            .iter()
            .find(|(f, _)| *f == feature)
            .map(|&(_, slot)| slot)
    }

    /// A feature is active from its activation slot onwards.
    pub fn is_active(&self, feature: Feature, slot: Slot) -> bool {
        self.activation_slot(feature).is_some_and(|at| at <= slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activation_slot_gates_feature() {
        let mut features = FeatureSet::default();
        assert!(!features.is_active(Feature::IncreaseTxAccountLockLimit, 100));

        features.activate(Feature::IncreaseTxAccountLockLimit, 10);
        assert!(!features.is_active(Feature::IncreaseTxAccountLockLimit, 9));
        assert!(features.is_active(Feature::IncreaseTxAccountLockLimit, 10));

        features.activate(Feature::IncreaseTxAccountLockLimit, 20);
        assert!(!features.is_active(Feature::IncreaseTxAccountLockLimit, 10));
    }
}
