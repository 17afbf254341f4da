//! Flow-control and status sequence words.
//!
//! An fseq is a single published `u64` plus a handful of diagnostic
//! counters. Reliable consumers publish their read position in one so the
//! producer can compute credits; other tiles use one as an out-of-band
//! status word.

use std::sync::atomic::Ordering;

use crate::{Region, TangoError};

pub const FSEQ_ALIGN: usize = 64;
pub const FSEQ_FOOTPRINT: usize = 64;

/// Fragments published past this consumer.
pub const DIAG_PUB_CNT: usize = 0;
/// Bytes published past this consumer.
pub const DIAG_PUB_SZ: usize = 1;
/// Fragments the consumer filtered.
pub const DIAG_FILT_CNT: usize = 2;
/// Bytes the consumer filtered.
pub const DIAG_FILT_SZ: usize = 3;
/// Fragments lost to overrun while polling.
pub const DIAG_OVRNP_CNT: usize = 4;
/// Fragments lost to overrun while reading.
pub const DIAG_OVRNR_CNT: usize = 5;
/// Times the consumer held back its producer.
pub const DIAG_SLOW_CNT: usize = 6;

const DIAG_CNT: usize = 7;

#[derive(Clone, Debug)]
pub struct FSeq {
    region: Region,
}

impl FSeq {
    pub fn new(region: Region, seq0: u64) -> Result<Self, TangoError> {
        let fseq = Self::join(region)?;
        for idx in 0..DIAG_CNT {
            fseq.region.word(1 + idx).store(0, Ordering::Relaxed);
        }
        fseq.update(seq0);
        Ok(fseq)
    }

    pub fn join(region: Region) -> Result<Self, TangoError> {
        region.require(FSEQ_FOOTPRINT)?;
        Ok(Self { region })
    }

    #[inline]
    pub fn query(&self) -> u64 {
        self.region.word(0).load(Ordering::Acquire)
    }

    #[inline]
    pub fn update(&self, seq: u64) {
        self.region.word(0).store(seq, Ordering::Release);
    }

    pub fn diag(&self, idx: usize) -> u64 {
        debug_assert!(idx < DIAG_CNT);
        self.region.word(1 + idx).load(Ordering::Relaxed)
    }

    /// Add to a diagnostic counter. Only the fseq's owner writes these.
    pub fn diag_add(&self, idx: usize, delta: u64) {
        debug_assert!(idx < DIAG_CNT);
        let word = self.region.word(1 + idx);
        word.store(
            word.load(Ordering::Relaxed).wrapping_add(delta),
            Ordering::Relaxed,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Wksp;

    #[test]
    fn test_update_query() {
        let wksp = Wksp::new("fs", FSEQ_FOOTPRINT, 4096);
        let fseq = FSeq::new(wksp.region(0, FSEQ_FOOTPRINT).unwrap(), 42).unwrap();
        assert_eq!(fseq.query(), 42);
        fseq.update(43);

        let joined = FSeq::join(wksp.region(0, FSEQ_FOOTPRINT).unwrap()).unwrap();
        assert_eq!(joined.query(), 43);

        fseq.diag_add(DIAG_OVRNP_CNT, 3);
        fseq.diag_add(DIAG_OVRNP_CNT, 2);
        assert_eq!(joined.diag(DIAG_OVRNP_CNT), 5);
    }
}
