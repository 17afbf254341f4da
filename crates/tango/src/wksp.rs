//! Workspace memory.
//!
//! A workspace is one contiguous block of 8-byte words shared by every tile
//! that joins it. All access goes through atomics, so concurrent tiles never
//! race at the language level; the ordering guarantees that matter are the
//! ones the mcache and fseq protocols build on top.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::TangoError;

const WORD: usize = 8;

pub struct Wksp {
    name: String,
    page_sz: usize,
    words: Box<[AtomicU64]>,
}

impl std::fmt::Debug for Wksp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wksp")
            .field("name", &self.name)
            .field("page_sz", &self.page_sz)
            .field("footprint", &self.footprint())
            .finish()
    }
}

impl Wksp {
    /// Allocate a zeroed workspace of at least `footprint` bytes.
    pub fn new(name: impl Into<String>, footprint: usize, page_sz: usize) -> Arc<Self> {
        let word_cnt = footprint.div_ceil(WORD);
        let words = (0..word_cnt).map(|_| AtomicU64::new(0)).collect();
        Arc::new(Self {
            name: name.into(),
            page_sz,
            words,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn page_sz(&self) -> usize {
        self.page_sz
    }

    pub fn footprint(&self) -> usize {
        self.words.len() * WORD
    }

    fn check(&self, off: usize, sz: usize) -> Result<(), TangoError> {
        if off % WORD != 0 {
            return Err(TangoError::Misaligned { off, align: WORD });
        }
        match off.checked_add(sz) {
            Some(end) if end <= self.footprint() => Ok(()),
            _ => Err(TangoError::OutOfBounds {
                wksp: self.name.clone(),
                off,
                sz,
                footprint: self.footprint(),
            }),
        }
    }

    /// Carve out a region. The region keeps the workspace alive.
    pub fn region(self: &Arc<Self>, off: usize, sz: usize) -> Result<Region, TangoError> {
        self.check(off, sz)?;
        Ok(Region {
            wksp: Arc::clone(self),
            off,
            sz,
        })
    }

    #[inline]
    fn word(&self, idx: usize) -> &AtomicU64 {
        &self.words[idx]
    }

    /// Copy `dst.len()` bytes starting at word-aligned `off`.
    pub fn read_bytes(&self, off: usize, dst: &mut [u8]) -> Result<(), TangoError> {
        self.check(off, dst.len())?;
        let base = off / WORD;
        for (i, chunk) in dst.chunks_mut(WORD).enumerate() {
            let word = self.word(base + i).load(Ordering::Relaxed).to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
        Ok(())
    }

    /// Copy `src` to word-aligned `off`. A partial final word is zero-padded.
    pub fn write_bytes(&self, off: usize, src: &[u8]) -> Result<(), TangoError> {
        self.check(off, src.len())?;
        let base = off / WORD;
        for (i, chunk) in src.chunks(WORD).enumerate() {
            let mut word = [0u8; WORD];
            word[..chunk.len()].copy_from_slice(chunk);
            self.word(base + i)
                .store(u64::from_le_bytes(word), Ordering::Relaxed);
        }
        Ok(())
    }
}

/// A bounds-checked window into a workspace.
#[derive(Clone, Debug)]
pub struct Region {
    wksp: Arc<Wksp>,
    off: usize,
    sz: usize,
}

impl Region {
    pub fn wksp(&self) -> &Arc<Wksp> {
        &self.wksp
    }

    /// Byte offset of the region inside its workspace.
    pub fn off(&self) -> usize {
        self.off
    }

    pub fn sz(&self) -> usize {
        self.sz
    }

    /// Word `idx` of the region.
    ///
    /// # Panics
    ///
    /// Panics if `idx` lies outside the region; callers index with offsets
    /// validated when the handle was constructed.
    #[inline]
    pub fn word(&self, idx: usize) -> &AtomicU64 {
        assert!(idx * WORD < self.sz, "word {idx} outside region");
        self.wksp.word(self.off / WORD + idx)
    }

    pub fn require(&self, need: usize) -> Result<(), TangoError> {
        if self.sz < need {
            return Err(TangoError::RegionTooSmall {
                have: self.sz,
                need,
            });
        }
        Ok(())
    }

    pub fn read_bytes(&self, rel_off: usize, dst: &mut [u8]) -> Result<(), TangoError> {
        self.check(rel_off, dst.len())?;
        self.wksp.read_bytes(self.off + rel_off, dst)
    }

    pub fn write_bytes(&self, rel_off: usize, src: &[u8]) -> Result<(), TangoError> {
        self.check(rel_off, src.len())?;
        self.wksp.write_bytes(self.off + rel_off, src)
    }

    fn check(&self, rel_off: usize, sz: usize) -> Result<(), TangoError> {
        match rel_off.checked_add(sz) {
            Some(end) if end <= self.sz => Ok(()),
            _ => Err(TangoError::OutOfBounds {
                wksp: self.wksp.name.clone(),
                off: self.off + rel_off,
                sz,
                footprint: self.off + self.sz,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_roundtrip_with_partial_word() {
        let wksp = Wksp::new("test", 128, 4096);
        wksp.write_bytes(16, b"hello world").unwrap();

        let mut out = [0u8; 11];
        wksp.read_bytes(16, &mut out).unwrap();
        assert_eq!(&out, b"hello world");

        let mut padded = [0xffu8; 16];
        wksp.read_bytes(16, &mut padded).unwrap();
        assert_eq!(&padded[11..], &[0u8; 5]);
    }

    #[test]
    fn test_bounds() {
        let wksp = Wksp::new("test", 64, 4096);
        assert!(matches!(
            wksp.region(32, 64),
            Err(TangoError::OutOfBounds { .. })
        ));
        assert!(matches!(
            wksp.read_bytes(3, &mut [0u8; 1]),
            Err(TangoError::Misaligned { off: 3, .. })
        ));

        let region = wksp.region(32, 32).unwrap();
        assert!(region.write_bytes(24, &[0u8; 9]).is_err());
        assert!(region.write_bytes(24, &[0u8; 8]).is_ok());
    }

    #[test]
    fn test_footprint_rounds_to_words() {
        assert_eq!(Wksp::new("w", 13, 4096).footprint(), 16);
    }
}
