//! Timestamps for fragment metadata.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds since the first call in this process.
pub fn tickcount() -> u64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

/// Compress a tickcount into the 32-bit field of a fragment descriptor.
#[inline]
pub fn ts_comp(ticks: u64) -> u32 {
    ticks as u32
}

/// Recover a full tickcount from a compressed one, given a nearby reference.
#[inline]
pub fn ts_decomp(comp: u32, reference: u64) -> u64 {
    let delta = comp.wrapping_sub(reference as u32) as i32;
    reference.wrapping_add(delta as i64 as u64)
}
