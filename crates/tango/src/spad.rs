//! Scratch pad: a bump allocator with a stack of frames.
//!
//! Allocations are only legal inside a frame. Popping a frame releases
//! everything allocated since the matching push in one step. The backing
//! memory is a workspace region, so another tile that joined the same
//! object can read an allocation given its offset.

use crate::{Region, TangoError};

pub const SPAD_ALIGN: usize = 64;

/// Deepest frame nesting supported.
pub const SPAD_FRAME_MAX: usize = 128;

const HDR_SZ: usize = 64;

/// A live allocation. `off` is relative to the start of the spad region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpadAlloc {
    pub off: usize,
    pub sz: usize,
}

#[derive(Debug)]
pub struct Spad {
    region: Region,
    mem_max: usize,
    /// Next free offset, relative to the region.
    top: usize,
    frames: Vec<usize>,
}

impl Spad {
    pub fn footprint(mem_max: usize) -> usize {
        HDR_SZ + mem_max.next_multiple_of(SPAD_ALIGN)
    }

    pub fn new(region: Region, mem_max: usize) -> Result<Self, TangoError> {
        region.require(Self::footprint(mem_max))?;
        if region.off() % SPAD_ALIGN != 0 {
            return Err(TangoError::Misaligned {
                off: region.off(),
                align: SPAD_ALIGN,
            });
        }
        region.word(0).store(mem_max as u64, std::sync::atomic::Ordering::Release);
        Ok(Self {
            region,
            mem_max,
            top: HDR_SZ,
            frames: Vec::with_capacity(SPAD_FRAME_MAX),
        })
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn mem_max(&self) -> usize {
        self.mem_max
    }

    /// Bytes allocated across all frames.
    pub fn mem_used(&self) -> usize {
        self.top - HDR_SZ
    }

    pub fn mem_free(&self) -> usize {
        self.mem_max - self.mem_used()
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// Bytes allocated in the innermost frame.
    pub fn frame_used(&self) -> usize {
        self.frames.last().map_or(0, |&start| self.top - start)
    }

    pub fn push(&mut self) -> Result<(), TangoError> {
        if self.frames.len() == SPAD_FRAME_MAX {
            return Err(TangoError::SpadFrameOverflow(SPAD_FRAME_MAX));
        }
        self.frames.push(self.top);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<(), TangoError> {
        self.top = self.frames.pop().ok_or(TangoError::SpadFrameUnderflow)?;
        Ok(())
    }

    pub fn alloc(&mut self, align: usize, sz: usize) -> Result<SpadAlloc, TangoError> {
        if self.frames.is_empty() {
            return Err(TangoError::SpadNoFrame);
        }
        if !align.is_power_of_two() {
            return Err(TangoError::BadAlign(align));
        }
        // Allocations stay word-aligned so they can be written in place.
        let align = align.max(8);
        let off = self.top.next_multiple_of(align);
        let end = off
            .checked_add(sz)
            .filter(|&end| end <= HDR_SZ + self.mem_max)
            .ok_or(TangoError::SpadFull {
                need: sz,
                free: self.mem_free(),
            })?;
        self.top = end;
        Ok(SpadAlloc { off, sz })
    }

    pub fn write(&self, alloc: &SpadAlloc, src: &[u8]) -> Result<(), TangoError> {
        if src.len() > alloc.sz {
            return Err(TangoError::PayloadTooLarge {
                sz: src.len(),
                mtu: alloc.sz,
            });
        }
        self.region.write_bytes(alloc.off, src)
    }

    /// Read bytes at `off` from a spad region someone else owns.
    pub fn read_at(region: &Region, off: usize, dst: &mut [u8]) -> Result<(), TangoError> {
        region.read_bytes(off, dst)
    }
}
