//! CPU affinity for tiles.
//!
//! An affinity is either `auto` or a comma separated list of entries, one
//! per tile in creation order. Each entry is a CPU index, an inclusive range
//! `a-b`, or `f<n>` for `n` floating tiles that the OS schedules freely.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use tracing::warn;

use crate::error::TopoError;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Affinity {
    #[default]
    Auto,
    List(Vec<Option<usize>>),
}

impl FromStr for Affinity {
    type Err = TopoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == "auto" {
            return Ok(Affinity::Auto);
        }
        let bad = || TopoError::BadAffinity(s.to_string());
        let mut cpus = Vec::new();
        for tok in s.split(',').map(str::trim) {
            if let Some(n) = tok.strip_prefix('f') {
                let n: usize = n.parse().map_err(|_| bad())?;
                cpus.extend(std::iter::repeat(None).take(n));
            } else if let Some((lo, hi)) = tok.split_once('-') {
                let lo: usize = lo.trim().parse().map_err(|_| bad())?;
                let hi: usize = hi.trim().parse().map_err(|_| bad())?;
                if hi < lo {
                    return Err(bad());
                }
                cpus.extend((lo..=hi).map(Some));
            } else {
                cpus.push(Some(tok.parse().map_err(|_| bad())?));
            }
        }
        Ok(Affinity::List(cpus))
    }
}

impl<'de> Deserialize<'de> for Affinity {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Affinity {
    /// Assigns a core (or none, for floating) to each of `tile_cnt` tiles.
    pub fn resolve(&self, tile_cnt: usize, cpu_cnt: usize) -> Result<Vec<Option<usize>>, TopoError> {
        match self {
            Affinity::Auto => {
                // Core 0 is left to the OS.
                let pinned = cpu_cnt.saturating_sub(1);
                if tile_cnt > pinned {
                    warn!(
                        tiles = tile_cnt,
                        cpus = cpu_cnt,
                        "not enough cores to pin every tile; extra tiles will float"
                    );
                }
                Ok((0..tile_cnt)
                    .map(|i| (i < pinned).then_some(i + 1))
                    .collect())
            }
            Affinity::List(cpus) => {
                if let Some(&cpu) = cpus.iter().flatten().find(|&&c| c >= cpu_cnt) {
                    return Err(TopoError::CpuOutOfRange { cpu, cpu_cnt });
                }
                if cpus.len() < tile_cnt {
                    return Err(TopoError::InsufficientCores {
                        tiles: tile_cnt,
                        cpus: cpus.len(),
                    });
                }
                if cpus.len() > tile_cnt {
                    warn!(
                        tiles = tile_cnt,
                        entries = cpus.len(),
                        "affinity lists more cores than tiles; extra cores unused"
                    );
                }
                Ok(cpus[..tile_cnt].to_vec())
            }
        }
    }
}

/// The tiles a link's producer waits on: the producer itself and every
/// reliable consumer, as indices into the tile list.
#[derive(Debug, Clone)]
pub struct ReliableSet {
    pub link: String,
    pub producer: usize,
    pub consumers: Vec<usize>,
}

/// Checks that no two pinned members of a reliable set share a core.
///
/// A pinned producer spinning on backpressure never yields its core, so a
/// reliable consumer pinned to the same core can never catch up. Floating
/// tiles are left to the OS scheduler.
pub fn check_reliable_sets(cpus: &[Option<usize>], sets: &[ReliableSet]) -> Result<(), TopoError> {
    for set in sets {
        let pinned: Vec<usize> = std::iter::once(set.producer)
            .chain(set.consumers.iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter_map(|tile| cpus.get(tile).copied().flatten())
            .collect();
        let cores = pinned.iter().collect::<BTreeSet<_>>().len();
        if cores < pinned.len() {
            return Err(TopoError::ReliableSetSharesCore {
                link: set.link.clone(),
                members: pinned.len(),
                cores,
            });
        }
    }
    Ok(())
}
