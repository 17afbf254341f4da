use std::fmt;

/// Transaction identifier.
///
/// Slot transactions use the slot number in both words, which lets any
/// tile derive the id of a slot's transaction without being told.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunkXid {
    pub ul: [u64; 2],
}

impl FunkXid {
    /// Identifier of published state.
    pub const ROOT: Self = Self { ul: [0, 0] };

    pub const fn from_slot(slot: u64) -> Self {
        Self { ul: [slot, slot] }
    }
}

impl fmt::Display for FunkXid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ul[0], self.ul[1])
    }
}
