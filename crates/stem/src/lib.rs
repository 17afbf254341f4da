//! The tile run loop.
//!
//! A [`Stem`] drives one [`Tile`] on its own thread: it polls the tile's
//! input links round-robin, hands each fragment to the tile's callbacks,
//! and keeps enough credits toward reliable consumers downstream that
//! anything the tile publishes can never lap them.

mod error;
mod link;
mod stem;
mod tile;

pub use error::StemError;
pub use link::{InFrag, InLink, OutLink};
pub use stem::{PollOutcome, Stem};
pub use tile::{StemContext, Tile};
