//! The tessera node.
//!
//! Reads the node configuration, lays out the validator topology, and runs
//! the dedup and exec tiles on pinned threads, fed by in-process verify,
//! pack and replay stand-ins. The `tessera` binary is a
//! thin CLI over this crate.

pub mod config;
mod error;
pub mod feed;
pub mod launch;
pub mod metrics;
mod signals;
pub mod standin;
pub mod topology;

pub use config::NodeConfig;
pub use error::NodeError;
pub use feed::{default_blockhash, Feed};
pub use launch::{pin_thread_to_core, spawn_tiles, TileThread};
pub use metrics::LogRecorder;
pub use signals::spawn_signal_watcher;
pub use standin::{PackForwarder, ReplayScheduler, VerifyFeeder};
pub use topology::{build_topology, describe, finish_options, save_checkpoint};
