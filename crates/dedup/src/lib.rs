//! The deduplication tile.
//!
//! Consumes verified transactions (already parsed) and raw vote
//! transactions from gossip and the voter, and republishes one parsed,
//! duplicate-free stream. Standalone transactions are checked against a
//! bounded tag cache; members of a bundle are checked against the earlier
//! members of the same bundle, and one duplicate fails the whole bundle.

mod bundle;
mod error;
mod tile;

pub use bundle::{BundleState, BUNDLE_SIG_MAX};
pub use error::DedupError;
pub use tile::{now_ts, DedupTile};
