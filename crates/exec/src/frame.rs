//! Epoch, slot and transaction scopes over the tile's spad.
//!
//! Each scope owns one spad frame. A slot frame only exists inside an epoch
//! frame and a transaction frame only inside a slot frame, so entering a
//! scope first releases every scope nested at or below it, innermost first,
//! and a frame can never be popped twice.

use tessera_tango::{Spad, SpadAlloc};

use crate::error::ExecError;
use crate::runtime::{EpochState, SlotState, TxnCtx};

/// Which scopes currently hold a spad frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramePending {
    pub epoch: bool,
    pub slot: bool,
    pub txn: bool,
}

#[derive(Debug)]
pub struct TxnFrame {
    pub ctx: TxnCtx,
}

#[derive(Debug)]
pub struct SlotFrame {
    pub state: SlotState,
    txn: Option<TxnFrame>,
}

impl SlotFrame {
    pub fn txn(&self) -> Option<&TxnFrame> {
        self.txn.as_ref()
    }
}

#[derive(Debug)]
pub struct EpochFrame {
    pub state: EpochState,
    slot: Option<SlotFrame>,
}

impl EpochFrame {
    pub fn slot(&self) -> Option<&SlotFrame> {
        self.slot.as_ref()
    }
}

/// The spad and the scopes allocated from it.
///
/// The outermost spad frame is pushed at construction and holds allocations
/// that live as long as the tile.
#[derive(Debug)]
pub struct FrameStack {
    spad: Spad,
    epoch: Option<EpochFrame>,
}

impl FrameStack {
    pub fn new(mut spad: Spad) -> Result<Self, ExecError> {
        spad.push()?;
        Ok(Self { spad, epoch: None })
    }

    pub fn spad(&self) -> &Spad {
        &self.spad
    }

    /// Allocate in the outermost frame. Only legal before the first epoch.
    pub fn alloc_base(&mut self, align: usize, sz: usize) -> Result<SpadAlloc, ExecError> {
        if self.epoch.is_some() {
            return Err(ExecError::BaseAllocInScope);
        }
        Ok(self.spad.alloc(align, sz)?)
    }

    pub fn pending(&self) -> FramePending {
        let slot = self.epoch.as_ref().and_then(|e| e.slot.as_ref());
        FramePending {
            epoch: self.epoch.is_some(),
            slot: slot.is_some(),
            txn: slot.is_some_and(|s| s.txn.is_some()),
        }
    }

    pub fn epoch(&self) -> Option<&EpochFrame> {
        self.epoch.as_ref()
    }

    /// Enter a new epoch, keeping copies of the raw `blobs` it was decoded
    /// from in its frame.
    pub fn enter_epoch(&mut self, state: EpochState, blobs: &[&[u8]]) -> Result<(), ExecError> {
        self.release_epoch()?;
        self.push_with_blobs(blobs)?;
        self.epoch = Some(EpochFrame { state, slot: None });
        Ok(())
    }

    pub fn enter_slot(&mut self, state: SlotState, blobs: &[&[u8]]) -> Result<(), ExecError> {
        if self.epoch.is_none() {
            return Err(ExecError::NoEpoch("new_slot"));
        }
        self.release_slot()?;
        self.push_with_blobs(blobs)?;
        if let Some(epoch) = self.epoch.as_mut() {
            epoch.slot = Some(SlotFrame { state, txn: None });
        }
        Ok(())
    }

    /// Enter a transaction scope and build its context with `build`.
    ///
    /// `build` runs with the transaction frame already pushed, so whatever
    /// it allocates is released with the transaction.
    pub fn enter_txn<F>(&mut self, payload: &[u8], build: F) -> Result<&TxnFrame, ExecError>
    where
        F: FnOnce(&EpochState, &SlotState) -> Result<TxnCtx, ExecError>,
    {
        if self.epoch.as_ref().and_then(|e| e.slot.as_ref()).is_none() {
            return Err(ExecError::NoSlot("new_txn"));
        }
        self.release_txn()?;
        self.push_with_blobs(&[payload])?;

        let Some(EpochFrame {
            state: epoch,
            slot: Some(slot),
        }) = self.epoch.as_mut()
        else {
            return Err(ExecError::NoSlot("new_txn"));
        };
        let ctx = match build(epoch, &slot.state) {
            Ok(ctx) => ctx,
            Err(e) => {
                self.spad.pop()?;
                return Err(e);
            }
        };
        Ok(slot.txn.insert(TxnFrame { ctx }))
    }

    /// The epoch and slot of the current slot scope.
    pub fn slot_scope(&self) -> Option<(&EpochState, &SlotState)> {
        let epoch = self.epoch.as_ref()?;
        let slot = epoch.slot.as_ref()?;
        Some((&epoch.state, &slot.state))
    }

    /// Push a frame holding copies of `blobs`. On failure the frame is
    /// popped again, leaving the stack as it was.
    fn push_with_blobs(&mut self, blobs: &[&[u8]]) -> Result<(), ExecError> {
        self.spad.push()?;
        if let Err(e) = self.copy_blobs(blobs) {
            self.spad.pop()?;
            return Err(e);
        }
        Ok(())
    }

    fn copy_blobs(&mut self, blobs: &[&[u8]]) -> Result<(), ExecError> {
        for blob in blobs {
            let alloc = self.spad.alloc(8, blob.len())?;
            self.spad.write(&alloc, blob)?;
        }
        Ok(())
    }

    fn release_txn(&mut self) -> Result<(), ExecError> {
        let slot = self.epoch.as_mut().and_then(|e| e.slot.as_mut());
        if let Some(slot) = slot {
            if slot.txn.take().is_some() {
                self.spad.pop()?;
            }
        }
        Ok(())
    }

    fn release_slot(&mut self) -> Result<(), ExecError> {
        self.release_txn()?;
        if let Some(epoch) = self.epoch.as_mut() {
            if epoch.slot.take().is_some() {
                self.spad.pop()?;
            }
        }
        Ok(())
    }

    fn release_epoch(&mut self) -> Result<(), ExecError> {
        self.release_slot()?;
        if self.epoch.take().is_some() {
            self.spad.pop()?;
        }
        Ok(())
    }
}
