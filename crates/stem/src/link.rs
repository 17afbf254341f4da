//! Consumer and producer ends of a link, as joined by a tile.

use tessera_tango::{
    seq_diff, tempo, DCache, FSeq, FragMeta, MCache, Poll, CTL_EOM, CTL_SOM, DIAG_OVRNP_CNT,
};
use tessera_topo::{LinkId, TileIn, TopoRuntime};

use crate::error::StemError;

/// What a tile sees of an input fragment while validating it.
///
/// The fragment still belongs to the producer at this point; the run loop
/// checks afterwards whether it was overwritten.
#[derive(Debug)]
pub struct InFrag<'a> {
    pub meta: FragMeta,
    link: &'a InLink,
}

impl<'a> InFrag<'a> {
    pub fn chunk0(&self) -> u32 {
        self.link.dcache.as_ref().map_or(0, DCache::chunk0)
    }

    pub fn wmark(&self) -> u32 {
        self.link.dcache.as_ref().map_or(0, DCache::wmark)
    }

    pub fn mtu(&self) -> usize {
        self.link.dcache.as_ref().map_or(0, DCache::mtu)
    }

    pub fn link_name(&self) -> &str {
        &self.link.name
    }

    /// Checks the descriptor against the producer's window and copies the
    /// payload into `dst`, returning its size.
    pub fn read_payload(&self, dst: &mut [u8]) -> Result<usize, StemError> {
        self.link.read_checked(&self.meta, dst)
    }

    /// Copies `meta.sz` bytes at `meta.chunk` without checking the window.
    /// The caller must have validated the descriptor itself.
    pub fn read_payload_unchecked(&self, dst: &mut [u8]) -> Result<usize, StemError> {
        let sz = self.meta.sz as usize;
        let dcache = self.link.dcache()?;
        let cap = dst.len();
        let dst = dst.get_mut(..sz).ok_or_else(|| StemError::ShortBuffer {
            link: self.link.name.clone(),
            sz,
            cap,
        })?;
        dcache.read(self.meta.chunk, dst)?;
        Ok(sz)
    }
}

/// The consumer end of a link.
#[derive(Debug)]
pub struct InLink {
    pub(crate) name: String,
    pub(crate) mcache: MCache,
    dcache: Option<DCache>,
    fseq: FSeq,
    pub(crate) seq: u64,
    reliable: bool,
    polled: bool,
}

impl InLink {
    pub fn join(rt: &TopoRuntime, tile_in: &TileIn) -> Result<Self, StemError> {
        let link = rt.topo().link(tile_in.link);
        let fseq = rt.fseq(tile_in.fseq)?;
        Ok(Self {
            name: link.label(),
            mcache: rt.mcache(tile_in.link)?,
            dcache: rt.dcache(tile_in.link)?,
            seq: fseq.query(),
            fseq,
            reliable: tile_in.is_reliable(),
            polled: tile_in.is_polled(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_reliable(&self) -> bool {
        self.reliable
    }

    pub fn is_polled(&self) -> bool {
        self.polled
    }

    /// Next sequence number this consumer expects.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn fseq(&self) -> &FSeq {
        &self.fseq
    }

    pub(crate) fn frag(&self, meta: FragMeta) -> InFrag<'_> {
        InFrag { meta, link: self }
    }

    fn dcache(&self) -> Result<&DCache, StemError> {
        self.dcache
            .as_ref()
            .ok_or_else(|| StemError::NoPayload(self.name.clone()))
    }

    pub(crate) fn read_checked(&self, meta: &FragMeta, dst: &mut [u8]) -> Result<usize, StemError> {
        let dcache = self.dcache()?;
        let sz = meta.sz as usize;
        if meta.chunk < dcache.chunk0() || meta.chunk > dcache.wmark() {
            return Err(StemError::CorruptChunk {
                link: self.name.clone(),
                chunk: meta.chunk,
                chunk0: dcache.chunk0(),
                wmark: dcache.wmark(),
            });
        }
        if sz > dcache.mtu() || sz > dst.len() {
            return Err(StemError::OversizedFrag {
                link: self.name.clone(),
                sz,
                mtu: dcache.mtu().min(dst.len()),
            });
        }
        dcache.read(meta.chunk, &mut dst[..sz])?;
        Ok(sz)
    }

    /// Moves past `seq` and publishes the new position to the producer.
    pub(crate) fn advance(&mut self) {
        self.seq = self.seq.wrapping_add(1);
        self.fseq.update(self.seq);
    }

    /// Jumps to `seq_found` after being lapped, returning how many
    /// fragments were lost.
    pub(crate) fn resync(&mut self, seq_found: u64) -> u64 {
        let lost = seq_diff(seq_found, self.seq).max(0) as u64;
        self.seq = seq_found;
        self.fseq.update(self.seq);
        self.fseq.diag_add(DIAG_OVRNP_CNT, lost);
        lost
    }

    /// Reads the next fragment directly, outside the run loop.
    ///
    /// Used by tiles on unpolled request/response links. Overruns are
    /// absorbed by resynchronizing; the fragment found there is returned.
    pub fn try_recv(&mut self, dst: &mut [u8]) -> Result<Option<(FragMeta, usize)>, StemError> {
        loop {
            match self.mcache.poll(self.seq) {
                Poll::NotReady => return Ok(None),
                Poll::Overrun { seq_found } => {
                    self.resync(seq_found);
                }
                Poll::Ready(meta) => {
                    let sz = self.read_checked(&meta, dst)?;
                    if !self.mcache.still_valid(meta.seq) {
                        continue;
                    }
                    self.advance();
                    return Ok(Some((meta, sz)));
                }
            }
        }
    }
}

/// The producer end of a link.
///
/// Tracks the publish sequence, the compact write cursor in the dcache and
/// the credits left before a reliable consumer would be lapped.
#[derive(Debug)]
pub struct OutLink {
    name: String,
    mcache: MCache,
    dcache: Option<DCache>,
    chunk: u32,
    seq: u64,
    depth: u64,
    consumers: Vec<FSeq>,
    cr_avail: u64,
}

impl OutLink {
    pub fn join(rt: &TopoRuntime, link: LinkId) -> Result<Self, StemError> {
        let topo = rt.topo();
        let mcache = rt.mcache(link)?;
        let dcache = rt.dcache(link)?;
        let consumers = topo
            .reliable_consumer_fseqs(link)
            .into_iter()
            .map(|obj| rt.fseq(obj))
            .collect::<Result<Vec<_>, _>>()?;
        let mut out = Self {
            name: topo.link(link).label(),
            chunk: dcache.as_ref().map_or(0, DCache::chunk0),
            seq: mcache.seq_query(),
            depth: mcache.depth(),
            mcache,
            dcache,
            consumers,
            cr_avail: 0,
        };
        out.refresh_credits();
        Ok(out)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sequence number the next publish will use.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn cr_avail(&self) -> u64 {
        self.cr_avail
    }

    /// Recomputes credits from the slowest reliable consumer.
    pub fn refresh_credits(&mut self) -> u64 {
        self.cr_avail = self
            .consumers
            .iter()
            .map(|fseq| {
                let lag = seq_diff(self.seq, fseq.query()).clamp(0, self.depth as i64) as u64;
                self.depth - lag
            })
            .min()
            .unwrap_or(self.depth);
        self.cr_avail
    }

    /// Writes `payload` at the write cursor and publishes its descriptor.
    ///
    /// Callers are expected to hold a credit; the run loop guarantees one
    /// per unit of burst before handing control to a tile.
    pub fn publish(&mut self, sig: u64, payload: &[u8], tsorig: u32) -> Result<u64, StemError> {
        let chunk = match &self.dcache {
            Some(dcache) => {
                let chunk = self.chunk;
                dcache.write(chunk, payload)?;
                self.chunk = dcache.compact_next(chunk, payload.len());
                chunk
            }
            None if payload.is_empty() => 0,
            None => return Err(StemError::NoPayload(self.name.clone())),
        };
        let seq = self.seq;
        self.mcache.publish(&FragMeta {
            seq,
            sig,
            chunk,
            sz: payload.len() as u16,
            ctl: CTL_SOM | CTL_EOM,
            tsorig,
            tspub: tempo::ts_comp(tempo::tickcount()),
        });
        self.seq = seq.wrapping_add(1);
        self.mcache.seq_update(self.seq);
        self.cr_avail = self.cr_avail.saturating_sub(1);
        Ok(seq)
    }
}
