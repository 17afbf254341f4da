//! The `TxnM` fragment layout carried on transaction links.
//!
//! ```text
//! ┌────────────┬───────────┬──────────┬───────────┬──────────────┬────────────┐
//! │ payload_sz │ txn_t_sz  │ bundle   │ bundle_id │ payload      │ descriptor │
//! │ u16        │ u16       │ idx u32  │ u64       │ padded to 8  │ txn_t_sz   │
//! └────────────┴───────────┴──────────┴───────────┴──────────────┴────────────┘
//! ```
//!
//! Verified traffic arrives with the descriptor already attached. Raw vote
//! traffic arrives with `txn_t_sz == 0` and is parsed in place by the
//! deduplication tile before republishing.

use thiserror::Error;

use crate::txn::{TxnDescriptor, TPU_MTU, TXN_DESCRIPTOR_MAX_SZ};

/// Size of the fixed header.
pub const TXN_M_HEADER_SZ: usize = 16;

/// Largest realized size of a `TxnM` fragment.
pub const TPU_PARSED_MTU: usize = TXN_M_HEADER_SZ + TPU_MTU + TXN_DESCRIPTOR_MAX_SZ;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxnMError {
    #[error("buffer of {have} bytes cannot hold {need}")]
    Short { have: usize, need: usize },

    #[error("payload of {0} bytes exceeds the MTU")]
    PayloadTooLarge(usize),

    #[error("descriptor decode failed: {0}")]
    Descriptor(String),
}

#[inline]
const fn align8(sz: usize) -> usize {
    (sz + 7) & !7
}

/// Fixed header at the front of every `TxnM` fragment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxnMHeader {
    pub payload_sz: u16,
    /// Encoded size of the trailing descriptor, zero if not parsed yet.
    pub txn_t_sz: u16,
    /// Ordinal of this transaction inside its bundle.
    pub bundle_txn_idx: u32,
    /// Bundle identifier, zero for standalone transactions.
    pub bundle_id: u64,
}

impl TxnMHeader {
    pub fn read(buf: &[u8]) -> Result<Self, TxnMError> {
        let hdr = buf.get(..TXN_M_HEADER_SZ).ok_or(TxnMError::Short {
            have: buf.len(),
            need: TXN_M_HEADER_SZ,
        })?;
        Ok(Self {
            payload_sz: u16::from_le_bytes([hdr[0], hdr[1]]),
            txn_t_sz: u16::from_le_bytes([hdr[2], hdr[3]]),
            bundle_txn_idx: u32::from_le_bytes([hdr[4], hdr[5], hdr[6], hdr[7]]),
            bundle_id: u64::from_le_bytes([
                hdr[8], hdr[9], hdr[10], hdr[11], hdr[12], hdr[13], hdr[14], hdr[15],
            ]),
        })
    }

    pub fn write(&self, buf: &mut [u8]) -> Result<(), TxnMError> {
        let have = buf.len();
        let hdr = buf.get_mut(..TXN_M_HEADER_SZ).ok_or(TxnMError::Short {
            have,
            need: TXN_M_HEADER_SZ,
        })?;
        hdr[0..2].copy_from_slice(&self.payload_sz.to_le_bytes());
        hdr[2..4].copy_from_slice(&self.txn_t_sz.to_le_bytes());
        hdr[4..8].copy_from_slice(&self.bundle_txn_idx.to_le_bytes());
        hdr[8..16].copy_from_slice(&self.bundle_id.to_le_bytes());
        Ok(())
    }

    /// Offset of the descriptor, after the 8-aligned payload.
    pub fn descriptor_off(&self) -> usize {
        TXN_M_HEADER_SZ + align8(self.payload_sz as usize)
    }

    /// Bytes of the fragment actually in use.
    pub fn realized_sz(&self) -> usize {
        self.descriptor_off() + self.txn_t_sz as usize
    }
}

/// Borrow the raw transaction payload out of a `TxnM` buffer.
pub fn txn_m_payload<'a>(buf: &'a [u8], hdr: &TxnMHeader) -> Result<&'a [u8], TxnMError> {
    let end = TXN_M_HEADER_SZ + hdr.payload_sz as usize;
    buf.get(TXN_M_HEADER_SZ..end).ok_or(TxnMError::Short {
        have: buf.len(),
        need: end,
    })
}

/// Decode the descriptor trailing the payload.
pub fn txn_m_descriptor(buf: &[u8], hdr: &TxnMHeader) -> Result<TxnDescriptor, TxnMError> {
    let start = hdr.descriptor_off();
    let end = start + hdr.txn_t_sz as usize;
    let bytes = buf.get(start..end).ok_or(TxnMError::Short {
        have: buf.len(),
        need: end,
    })?;
    borsh::from_slice(bytes).map_err(|e| TxnMError::Descriptor(e.to_string()))
}

/// Attach `desc` to the buffer and update the header's `txn_t_sz`.
pub fn txn_m_attach_descriptor(
    buf: &mut [u8],
    hdr: &mut TxnMHeader,
    desc: &TxnDescriptor,
) -> Result<(), TxnMError> {
    let bytes = borsh::to_vec(desc).map_err(|e| TxnMError::Descriptor(e.to_string()))?;
    let start = hdr.descriptor_off();
    let end = start + bytes.len();
    let have = buf.len();
    buf.get_mut(start..end)
        .ok_or(TxnMError::Short { have, need: end })?
        .copy_from_slice(&bytes);
    hdr.txn_t_sz = bytes.len() as u16;
    hdr.write(buf)
}

/// Build a complete `TxnM` fragment into `buf`, returning its realized size.
pub fn txn_m_encode(
    buf: &mut [u8],
    bundle_id: u64,
    bundle_txn_idx: u32,
    payload: &[u8],
    desc: Option<&TxnDescriptor>,
) -> Result<usize, TxnMError> {
    if payload.len() > TPU_MTU {
        return Err(TxnMError::PayloadTooLarge(payload.len()));
    }
    let mut hdr = TxnMHeader {
        payload_sz: payload.len() as u16,
        txn_t_sz: 0,
        bundle_txn_idx,
        bundle_id,
    };
    let end = TXN_M_HEADER_SZ + payload.len();
    let have = buf.len();
    buf.get_mut(TXN_M_HEADER_SZ..end)
        .ok_or(TxnMError::Short { have, need: end })?
        .copy_from_slice(payload);
    hdr.write(buf)?;
    if let Some(desc) = desc {
        txn_m_attach_descriptor(buf, &mut hdr, desc)?;
    }
    Ok(hdr.realized_sz())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::TXN_INSTR_MAX;
    use crate::InstrDescriptor;

    #[test]
    fn test_realized_sz_pads_payload() {
        let hdr = TxnMHeader {
            payload_sz: 13,
            txn_t_sz: 27,
            ..Default::default()
        };
        assert_eq!(hdr.descriptor_off(), 32);
        assert_eq!(hdr.realized_sz(), 59);
    }

    #[test]
    fn test_encode_raw_then_attach() {
        let mut buf = vec![0u8; TPU_PARSED_MTU];
        let sz = txn_m_encode(&mut buf, 7, 2, &[5u8; 10], None).unwrap();
        assert_eq!(sz, 32);

        let mut hdr = TxnMHeader::read(&buf).unwrap();
        assert_eq!(hdr.bundle_id, 7);
        assert_eq!(hdr.bundle_txn_idx, 2);
        assert_eq!(txn_m_payload(&buf, &hdr).unwrap(), &[5u8; 10]);

        let desc = TxnDescriptor {
            signature_cnt: 1,
            signature_off: 1,
            message_off: 65,
            readonly_signed_cnt: 0,
            readonly_unsigned_cnt: 0,
            reserved: 0,
            acct_addr_cnt: 1,
            acct_addr_off: 69,
            recent_blockhash_off: 101,
            instrs: vec![],
        };
        txn_m_attach_descriptor(&mut buf, &mut hdr, &desc).unwrap();
        let reread = TxnMHeader::read(&buf).unwrap();
        assert_eq!(reread.txn_t_sz as usize, desc.encoded_sz());
        assert_eq!(txn_m_descriptor(&buf, &reread).unwrap(), desc);
    }

    #[test]
    fn test_parsed_mtu_holds_largest_descriptor() {
        let desc = TxnDescriptor {
            signature_cnt: 1,
            signature_off: 1,
            message_off: 65,
            readonly_signed_cnt: 0,
            readonly_unsigned_cnt: 0,
            reserved: 0,
            acct_addr_cnt: 2,
            acct_addr_off: 69,
            recent_blockhash_off: 133,
            instrs: vec![
                InstrDescriptor {
                    program_id: 1,
                    acct_cnt: 0,
                    data_sz: 0,
                    acct_off: 0,
                    data_off: 0,
                };
                TXN_INSTR_MAX
            ],
        };
        let mut buf = vec![0u8; TPU_PARSED_MTU];
        let sz = txn_m_encode(&mut buf, 0, 0, &[0u8; TPU_MTU], Some(&desc)).unwrap();
        assert_eq!(sz, TPU_PARSED_MTU);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let mut buf = vec![0u8; TPU_PARSED_MTU * 2];
        assert_eq!(
            txn_m_encode(&mut buf, 0, 0, &[0u8; TPU_MTU + 1], None),
            Err(TxnMError::PayloadTooLarge(TPU_MTU + 1))
        );
    }
}
