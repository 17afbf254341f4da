//! Fragment descriptor ring.
//!
//! A single producer publishes [`FragMeta`] entries into a power-of-two ring
//! of `depth` lines. Line `seq & (depth - 1)` holds the entry for `seq`.
//! Each line is four words:
//!
//! ```text
//! word 0: seq
//! word 1: sig
//! word 2: chunk (32) | sz (16) | ctl (16)
//! word 3: tsorig (32) | tspub (32)
//! ```
//!
//! The producer first stores `seq - 1` into the line, then the payload
//! words, then `seq` with release ordering. A consumer that reads the same
//! `seq` before and after loading the payload words has a consistent copy.
//! A line holding a newer sequence number means the consumer was lapped.

use std::sync::atomic::{fence, Ordering};

use crate::{Region, TangoError};

/// Alignment of an mcache object.
pub const MCACHE_ALIGN: usize = 64;

const HDR_WORDS: usize = 8;
const LINE_WORDS: usize = 4;

/// Start-of-message control bit.
pub const CTL_SOM: u16 = 1;
/// End-of-message control bit.
pub const CTL_EOM: u16 = 2;
/// Error control bit, set by producers that detected a bad payload.
pub const CTL_ERR: u16 = 4;

/// Signed distance from `b` to `a` in sequence space.
#[inline]
pub fn seq_diff(a: u64, b: u64) -> i64 {
    a.wrapping_sub(b) as i64
}

/// Metadata for one fragment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FragMeta {
    pub seq: u64,
    pub sig: u64,
    pub chunk: u32,
    pub sz: u16,
    pub ctl: u16,
    pub tsorig: u32,
    pub tspub: u32,
}

/// Outcome of polling one sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// The producer has not published `seq` yet.
    NotReady,
    /// The line holds a newer entry; `seq_found` is what it holds.
    Overrun { seq_found: u64 },
    Ready(FragMeta),
}

#[derive(Clone, Debug)]
pub struct MCache {
    region: Region,
    depth: u64,
}

impl MCache {
    fn check_depth(depth: u64) -> Result<(), TangoError> {
        if depth < 2 || !depth.is_power_of_two() || depth > (1 << 31) {
            return Err(TangoError::BadDepth(depth));
        }
        Ok(())
    }

    pub fn footprint(depth: u64) -> Result<usize, TangoError> {
        Self::check_depth(depth)?;
        Ok((HDR_WORDS + depth as usize * LINE_WORDS) * 8)
    }

    /// Format a fresh ring whose first published sequence will be `seq0`.
    pub fn new(region: Region, depth: u64, seq0: u64) -> Result<Self, TangoError> {
        region.require(Self::footprint(depth)?)?;
        if region.off() % MCACHE_ALIGN != 0 {
            return Err(TangoError::Misaligned {
                off: region.off(),
                align: MCACHE_ALIGN,
            });
        }
        let mcache = Self { region, depth };
        mcache.region.word(0).store(depth, Ordering::Relaxed);
        // Every line starts out holding a sequence number just below seq0
        // that maps to it, so consumers see "not ready" rather than overrun.
        let base = seq0.wrapping_sub(depth);
        for k in 0..depth {
            let seq = base.wrapping_add(k);
            mcache.line_word(seq, 0).store(seq, Ordering::Relaxed);
        }
        mcache.region.word(1).store(seq0, Ordering::Release);
        Ok(mcache)
    }

    /// Join a ring formatted by [`MCache::new`].
    pub fn join(region: Region, depth: u64) -> Result<Self, TangoError> {
        region.require(Self::footprint(depth)?)?;
        let found = region.word(0).load(Ordering::Acquire);
        if found != depth {
            return Err(TangoError::JoinMismatch {
                what: "mcache depth",
                expected: depth,
                found,
            });
        }
        Ok(Self { region, depth })
    }

    pub fn depth(&self) -> u64 {
        self.depth
    }

    #[inline]
    fn line_word(&self, seq: u64, word: usize) -> &std::sync::atomic::AtomicU64 {
        let line = (seq & (self.depth - 1)) as usize;
        self.region.word(HDR_WORDS + line * LINE_WORDS + word)
    }

    /// The producer's next sequence number, as last advertised.
    pub fn seq_query(&self) -> u64 {
        self.region.word(1).load(Ordering::Acquire)
    }

    pub fn seq_update(&self, seq: u64) {
        self.region.word(1).store(seq, Ordering::Release);
    }

    /// Publish one entry. Only the link's producer may call this.
    pub fn publish(&self, meta: &FragMeta) {
        let seq_word = self.line_word(meta.seq, 0);
        seq_word.store(meta.seq.wrapping_sub(1), Ordering::Relaxed);
        fence(Ordering::Release);
        self.line_word(meta.seq, 1)
            .store(meta.sig, Ordering::Relaxed);
        self.line_word(meta.seq, 2).store(
            (meta.chunk as u64) | ((meta.sz as u64) << 32) | ((meta.ctl as u64) << 48),
            Ordering::Relaxed,
        );
        self.line_word(meta.seq, 3).store(
            (meta.tsorig as u64) | ((meta.tspub as u64) << 32),
            Ordering::Relaxed,
        );
        seq_word.store(meta.seq, Ordering::Release);
    }

    /// Try to read the entry for `seq`.
    pub fn poll(&self, seq: u64) -> Poll {
        let seq_word = self.line_word(seq, 0);
        let found = seq_word.load(Ordering::Acquire);
        let diff = seq_diff(found, seq);
        if diff < 0 {
            return Poll::NotReady;
        }
        if diff > 0 {
            return Poll::Overrun { seq_found: found };
        }

        let sig = self.line_word(seq, 1).load(Ordering::Relaxed);
        let packed = self.line_word(seq, 2).load(Ordering::Relaxed);
        let ts = self.line_word(seq, 3).load(Ordering::Relaxed);
        fence(Ordering::Acquire);
        let again = seq_word.load(Ordering::Relaxed);
        if again != seq {
            return Poll::Overrun { seq_found: again };
        }

        Poll::Ready(FragMeta {
            seq,
            sig,
            chunk: packed as u32,
            sz: (packed >> 32) as u16,
            ctl: (packed >> 48) as u16,
            tsorig: ts as u32,
            tspub: (ts >> 32) as u32,
        })
    }

    /// Whether the line for `seq` still holds `seq`.
    ///
    /// Called after a consumer finished reading a fragment's payload: if the
    /// producer lapped it meanwhile, the payload copy cannot be trusted.
    pub fn still_valid(&self, seq: u64) -> bool {
        fence(Ordering::Acquire);
        self.line_word(seq, 0).load(Ordering::Relaxed) == seq
    }
}
