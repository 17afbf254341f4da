use tessera_tango::FragMeta;

use crate::error::StemError;
use crate::link::{InFrag, InLink, OutLink};

/// The callbacks a stage plugs into the run loop.
///
/// For each input fragment the loop calls [`Tile::filter`], then
/// [`Tile::validate`] while the producer still owns the fragment, then
/// [`Tile::process`] once the fragment is known not to have been
/// overwritten. Any error returned is fatal for the tile; business-level
/// failures belong in the tile's own counters.
#[allow(unused_variables)]
pub trait Tile {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Most fragments `process` may publish per input fragment.
    fn burst(&self) -> u64 {
        1
    }

    /// File descriptors the tile keeps once it enters the run loop.
    fn allowed_fds(&self) -> Vec<i32> {
        vec![2]
    }

    /// Name of the syscall allow-list the tile runs under.
    fn syscall_policy(&self) -> &'static str {
        "default"
    }

    /// Return `true` to skip a fragment without reading its payload.
    fn filter(&mut self, in_idx: usize, seq: u64, sig: u64) -> bool {
        false
    }

    /// Bounds-check and copy out a fragment's payload.
    fn validate(&mut self, in_idx: usize, frag: &InFrag<'_>) -> Result<(), Self::Error>;

    /// Act on a validated fragment, optionally publishing downstream.
    fn process(
        &mut self,
        in_idx: usize,
        meta: &FragMeta,
        ctx: &mut StemContext<'_>,
    ) -> Result<(), Self::Error>;

    /// Called once per loop iteration after credits were secured.
    fn after_credit(&mut self, ctx: &mut StemContext<'_>) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Publish the tile's own counters.
    fn report_metrics(&self, kind_id: usize) {}
}

/// The links of a tile, handed to its callbacks.
#[derive(Debug)]
pub struct StemContext<'a> {
    pub(crate) ins: &'a mut [InLink],
    pub(crate) outs: &'a mut [OutLink],
}

impl<'a> StemContext<'a> {
    pub fn new(ins: &'a mut [InLink], outs: &'a mut [OutLink]) -> Self {
        Self { ins, outs }
    }

    pub fn publish(
        &mut self,
        out_idx: usize,
        sig: u64,
        payload: &[u8],
        tsorig: u32,
    ) -> Result<u64, StemError> {
        self.out(out_idx)?.publish(sig, payload, tsorig)
    }

    pub fn out(&mut self, out_idx: usize) -> Result<&mut OutLink, StemError> {
        self.outs
            .get_mut(out_idx)
            .ok_or(StemError::NoOutLink(out_idx))
    }

    /// An input link, typically an unpolled one the tile reads itself.
    pub fn in_link(&mut self, in_idx: usize) -> Result<&mut InLink, StemError> {
        self.ins
            .get_mut(in_idx)
            .ok_or(StemError::NoInLink(in_idx))
    }

    /// Read the next fragment of an unpolled input into `dst`.
    ///
    /// Returns `None` when the producer has published nothing new.
    pub fn poll_unpolled(
        &mut self,
        in_idx: usize,
        dst: &mut [u8],
    ) -> Result<Option<(FragMeta, usize)>, StemError> {
        self.in_link(in_idx)?.try_recv(dst)
    }
}
