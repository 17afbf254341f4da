//! Workspace page sizing and tile scratch layout.

use serde::{Deserialize, Serialize};

use crate::error::TopoError;

pub const NORMAL_PAGE_SZ: usize = 4 << 10;
pub const HUGE_PAGE_SZ: usize = 2 << 20;
pub const GIGANTIC_PAGE_SZ: usize = 1 << 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageSize {
    Normal,
    Huge,
    Gigantic,
}

impl PageSize {
    pub fn bytes(&self) -> usize {
        match self {
            PageSize::Normal => NORMAL_PAGE_SZ,
            PageSize::Huge => HUGE_PAGE_SZ,
            PageSize::Gigantic => GIGANTIC_PAGE_SZ,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PageSize::Normal => "normal",
            PageSize::Huge => "huge",
            PageSize::Gigantic => "gigantic",
        }
    }
}

/// Footprint thresholds above which a workspace moves to larger pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageThresholds {
    pub huge_bytes: usize,
    pub gigantic_bytes: usize,
}

impl Default for PageThresholds {
    fn default() -> Self {
        Self {
            huge_bytes: 16 << 20,
            gigantic_bytes: 2 << 30,
        }
    }
}

impl PageThresholds {
    pub fn page_size(&self, footprint: usize) -> PageSize {
        if footprint >= self.gigantic_bytes {
            PageSize::Gigantic
        } else if footprint >= self.huge_bytes {
            PageSize::Huge
        } else {
            PageSize::Normal
        }
    }

    /// Page size and page count backing a workspace of `footprint` bytes.
    pub fn size(&self, footprint: usize) -> (PageSize, usize) {
        let page = self.page_size(footprint);
        (page, footprint.div_ceil(page.bytes()))
    }
}

#[inline]
pub fn align_up(off: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (off + align - 1) & !(align - 1)
}

/// Handle to one region appended to a [`ScratchLayout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchRegion(usize);

/// Declarative arena for a tile's private scratch.
///
/// The same sequence of appends computes the footprint reserved at build
/// time and the offsets used at init, so the two cannot drift apart.
#[derive(Debug, Clone, Default)]
pub struct ScratchLayout {
    regions: Vec<(usize, usize)>,
    end: usize,
}

impl ScratchLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, align: usize, sz: usize) -> ScratchRegion {
        let off = align_up(self.end, align.max(1).next_power_of_two());
        self.regions.push((off, sz));
        self.end = off + sz;
        ScratchRegion(self.regions.len() - 1)
    }

    pub fn offset(&self, region: ScratchRegion) -> usize {
        self.regions[region.0].0
    }

    pub fn size(&self, region: ScratchRegion) -> usize {
        self.regions[region.0].1
    }

    pub fn footprint(&self) -> usize {
        align_up(self.end, 64)
    }

    /// Checks the layout against the footprint reserved for it.
    pub fn finish(&self, expected: usize) -> Result<usize, TopoError> {
        let found = self.footprint();
        if found != expected {
            return Err(TopoError::ScratchMismatch { expected, found });
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_by_threshold() {
        let t = PageThresholds {
            huge_bytes: 1 << 20,
            gigantic_bytes: 1 << 30,
        };
        assert_eq!(t.size(10_000), (PageSize::Normal, 3));
        assert_eq!(t.size(1 << 20), (PageSize::Huge, 1));
        assert_eq!(t.size((1 << 20) + 1), (PageSize::Huge, 2));
        assert_eq!(t.size(3 << 30), (PageSize::Gigantic, 3));
        assert_eq!(t.size(0), (PageSize::Normal, 0));
    }

    #[test]
    fn test_scratch_layout_offsets() {
        let mut l = ScratchLayout::new();
        let a = l.append(8, 13);
        let b = l.append(64, 100);
        let c = l.append(1, 1);

        assert_eq!(l.offset(a), 0);
        assert_eq!(l.offset(b), 64);
        assert_eq!(l.offset(c), 164);
        assert_eq!(l.size(b), 100);
        assert_eq!(l.footprint(), 192);
        assert_eq!(l.finish(192).unwrap(), 192);
    }

    #[test]
    fn test_scratch_layout_mismatch() {
        let mut l = ScratchLayout::new();
        l.append(8, 8);
        assert!(matches!(
            l.finish(128),
            Err(TopoError::ScratchMismatch {
                expected: 128,
                found: 64
            })
        ));
    }
}
