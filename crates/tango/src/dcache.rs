//! Chunked payload region backing a link.
//!
//! Payloads are addressed in 64-byte chunks relative to the start of the
//! workspace, so a chunk index read out of an mcache line is meaningful to
//! every tile that joined the workspace. The producer writes with a compact
//! cursor: each payload starts right after the previous one, and the cursor
//! wraps to `chunk0` once it passes the watermark, the last chunk at which
//! an MTU-sized payload still fits.

use std::sync::atomic::Ordering;

use crate::{Region, TangoError, Wksp};

/// Size of one chunk.
pub const CHUNK_SZ: usize = 64;

/// Alignment of a dcache object.
pub const DCACHE_ALIGN: usize = CHUNK_SZ;

const HDR_SZ: usize = CHUNK_SZ;

/// Byte offset inside the workspace of `chunk`.
#[inline]
pub fn chunk_to_off(chunk: u32) -> usize {
    chunk as usize * CHUNK_SZ
}

#[inline]
fn chunk_cnt(sz: usize) -> usize {
    sz.div_ceil(CHUNK_SZ)
}

#[derive(Clone, Debug)]
pub struct DCache {
    region: Region,
    mtu: usize,
    chunk0: u32,
    wmark: u32,
}

impl DCache {
    /// Bytes of payload storage needed so that `depth` in-flight fragments
    /// plus a `burst` of new ones never overwrite each other.
    pub fn data_sz(mtu: usize, depth: u64, burst: u64) -> Result<usize, TangoError> {
        if mtu == 0 {
            return Err(TangoError::ZeroMtu);
        }
        let chunk_mtu = chunk_cnt(mtu) * CHUNK_SZ;
        Ok(chunk_mtu * (depth as usize + burst as usize + 1))
    }

    pub fn footprint(mtu: usize, depth: u64, burst: u64) -> Result<usize, TangoError> {
        Ok(HDR_SZ + Self::data_sz(mtu, depth, burst)?)
    }

    pub fn new(region: Region, mtu: usize, depth: u64, burst: u64) -> Result<Self, TangoError> {
        let data_sz = Self::data_sz(mtu, depth, burst)?;
        region.require(HDR_SZ + data_sz)?;
        region.word(0).store(mtu as u64, Ordering::Relaxed);
        region.word(1).store(data_sz as u64, Ordering::Release);
        Self::from_region(region, mtu, data_sz)
    }

    pub fn join(region: Region, mtu: usize, depth: u64, burst: u64) -> Result<Self, TangoError> {
        let data_sz = Self::data_sz(mtu, depth, burst)?;
        region.require(HDR_SZ + data_sz)?;
        let found_mtu = region.word(0).load(Ordering::Acquire);
        if found_mtu != mtu as u64 {
            return Err(TangoError::JoinMismatch {
                what: "dcache mtu",
                expected: mtu as u64,
                found: found_mtu,
            });
        }
        let found_sz = region.word(1).load(Ordering::Acquire);
        if found_sz != data_sz as u64 {
            return Err(TangoError::JoinMismatch {
                what: "dcache data size",
                expected: data_sz as u64,
                found: found_sz,
            });
        }
        Self::from_region(region, mtu, data_sz)
    }

    fn from_region(region: Region, mtu: usize, data_sz: usize) -> Result<Self, TangoError> {
        if region.off() % DCACHE_ALIGN != 0 {
            return Err(TangoError::Misaligned {
                off: region.off(),
                align: DCACHE_ALIGN,
            });
        }
        let chunk0 = ((region.off() + HDR_SZ) / CHUNK_SZ) as u32;
        let wmark = chunk0 + ((data_sz - chunk_cnt(mtu) * CHUNK_SZ) / CHUNK_SZ) as u32;
        Ok(Self {
            region,
            mtu,
            chunk0,
            wmark,
        })
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// First chunk of the payload window.
    pub fn chunk0(&self) -> u32 {
        self.chunk0
    }

    /// Last chunk a payload may start at.
    pub fn wmark(&self) -> u32 {
        self.wmark
    }

    pub fn wksp(&self) -> &std::sync::Arc<Wksp> {
        self.region.wksp()
    }

    /// Advance a compact write cursor past a payload of `sz` bytes.
    pub fn compact_next(&self, chunk: u32, sz: usize) -> u32 {
        let next = chunk + chunk_cnt(sz) as u32;
        if next > self.wmark {
            self.chunk0
        } else {
            next
        }
    }

    /// Whether a fragment descriptor points inside this producer's window.
    pub fn in_bounds(&self, chunk: u32, sz: usize) -> bool {
        chunk >= self.chunk0 && chunk <= self.wmark && sz <= self.mtu
    }

    /// Write a payload at `chunk`. Only the producer may call this.
    pub fn write(&self, chunk: u32, src: &[u8]) -> Result<(), TangoError> {
        if chunk < self.chunk0 || chunk > self.wmark {
            return Err(TangoError::ChunkOutOfRange {
                chunk,
                chunk0: self.chunk0,
                wmark: self.wmark,
            });
        }
        if src.len() > self.mtu {
            return Err(TangoError::PayloadTooLarge {
                sz: src.len(),
                mtu: self.mtu,
            });
        }
        self.region.wksp().write_bytes(chunk_to_off(chunk), src)
    }

    /// Read a payload at `chunk`.
    ///
    /// Performs no window check: consumers decide what an out-of-window
    /// descriptor means before calling this.
    pub fn read(&self, chunk: u32, dst: &mut [u8]) -> Result<(), TangoError> {
        self.region.wksp().read_bytes(chunk_to_off(chunk), dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dcache(mtu: usize, depth: u64, burst: u64) -> DCache {
        let footprint = DCache::footprint(mtu, depth, burst).unwrap();
        let wksp = Wksp::new("dc", 64 + footprint, 4096);
        DCache::new(wksp.region(64, footprint).unwrap(), mtu, depth, burst).unwrap()
    }

    #[test]
    fn test_window() {
        let dc = dcache(100, 4, 1);
        // 2 chunks per mtu, 6 mtus of storage
        assert_eq!(dc.chunk0(), 2);
        assert_eq!(dc.wmark(), 2 + 10);
        assert!(dc.in_bounds(2, 100));
        assert!(!dc.in_bounds(1, 10));
        assert!(!dc.in_bounds(13, 10));
        assert!(!dc.in_bounds(2, 101));
    }

    #[test]
    fn test_compact_next_wraps_past_wmark() {
        let dc = dcache(128, 2, 1);
        let mut chunk = dc.chunk0();
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(chunk);
            chunk = dc.compact_next(chunk, 65);
        }
        assert_eq!(seen, vec![2, 4, 6, 8, 2, 4]);
    }

    #[test]
    fn test_write_read() {
        let dc = dcache(32, 2, 1);
        dc.write(dc.chunk0(), b"payload").unwrap();
        let mut out = [0u8; 7];
        dc.read(dc.chunk0(), &mut out).unwrap();
        assert_eq!(&out, b"payload");

        assert!(matches!(
            dc.write(dc.wmark() + 1, b"x"),
            Err(TangoError::ChunkOutOfRange { .. })
        ));
        assert!(matches!(
            dc.write(dc.chunk0(), &[0u8; 33]),
            Err(TangoError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_join_checks_mtu() {
        let footprint = DCache::footprint(64, 4, 1).unwrap();
        let wksp = Wksp::new("dc", footprint, 4096);
        DCache::new(wksp.region(0, footprint).unwrap(), 64, 4, 1).unwrap();
        assert!(DCache::join(wksp.region(0, footprint).unwrap(), 64, 4, 1).is_ok());
        assert!(DCache::join(wksp.region(0, footprint).unwrap(), 32, 4, 1).is_err());
    }
}
