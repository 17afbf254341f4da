//! Transaction wire format parser.
//!
//! A transaction arrives as a raw payload of at most [`TPU_MTU`] bytes:
//!
//! ```text
//! ┌─────────┬──────────────┬──────────────────────────────────────────────┐
//! │ sig_cnt │ signatures   │ message                                      │
//! │ (cu16)  │ 64 × sig_cnt │ header(3) │ keys │ blockhash │ instructions  │
//! └─────────┴──────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! Parsing never copies the payload. It produces a [`TxnDescriptor`] of
//! offsets into it, which travels alongside the payload between tiles so
//! downstream stages do not have to parse again.

use borsh::{BorshDeserialize, BorshSerialize};
use thiserror::Error;

use crate::{Hash, Pubkey, Signature};

/// Largest transaction payload accepted from the network.
pub const TPU_MTU: usize = 1232;

/// Maximum number of signatures a transaction can carry.
pub const TXN_SIG_MAX: usize = 127;

/// Maximum number of account addresses a transaction can reference.
pub const TXN_ACCT_ADDR_MAX: usize = 128;

/// Maximum number of instructions in a transaction.
pub const TXN_INSTR_MAX: usize = 64;

/// Encoded size of a descriptor without instructions.
const TXN_DESCRIPTOR_BASE_SZ: usize = 18;

/// Encoded size of one instruction descriptor.
const INSTR_DESCRIPTOR_SZ: usize = 9;

/// Largest encoded size of a [`TxnDescriptor`].
pub const TXN_DESCRIPTOR_MAX_SZ: usize =
    TXN_DESCRIPTOR_BASE_SZ + TXN_INSTR_MAX * INSTR_DESCRIPTOR_SZ;

/// Errors produced while parsing a transaction payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxnParseError {
    #[error("payload of {0} bytes exceeds the {TPU_MTU} byte MTU")]
    TooLarge(usize),

    #[error("payload truncated at offset {0}")]
    Truncated(usize),

    #[error("malformed compact-u16 at offset {0}")]
    BadCompactU16(usize),

    #[error("versioned transactions are not supported (prefix {0:#04x})")]
    UnsupportedVersion(u8),

    #[error("invalid signature count {0}")]
    BadSignatureCount(usize),

    #[error("header requires {required} signatures but {present} are present")]
    SignatureCountMismatch { required: usize, present: usize },

    #[error("invalid account layout: {0}")]
    BadAccounts(&'static str),

    #[error("too many instructions: {0}")]
    TooManyInstructions(usize),

    #[error("instruction {instr} references account {idx} of {acct_cnt}")]
    BadAccountIndex { instr: usize, idx: u8, acct_cnt: usize },

    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

/// Offsets of one instruction inside a transaction payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct InstrDescriptor {
    /// Index of the program id in the account address list.
    pub program_id: u8,
    pub acct_cnt: u16,
    pub data_sz: u16,
    /// Payload offset of the account index bytes.
    pub acct_off: u16,
    /// Payload offset of the instruction data.
    pub data_off: u16,
}

/// Parsed layout of a transaction payload.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TxnDescriptor {
    pub signature_cnt: u8,
    pub signature_off: u16,
    pub message_off: u16,
    pub readonly_signed_cnt: u8,
    pub readonly_unsigned_cnt: u8,
    pub reserved: u8,
    pub acct_addr_cnt: u16,
    pub acct_addr_off: u16,
    pub recent_blockhash_off: u16,
    pub instrs: Vec<InstrDescriptor>,
}

impl TxnDescriptor {
    /// Size of this descriptor once borsh-encoded.
    pub fn encoded_sz(&self) -> usize {
        TXN_DESCRIPTOR_BASE_SZ + self.instrs.len() * INSTR_DESCRIPTOR_SZ
    }

    /// The first signature, which identifies the transaction.
    pub fn first_signature(&self, payload: &[u8]) -> Option<Signature> {
        Signature::read_from(payload, self.signature_off as usize)
    }

    pub fn signatures(&self, payload: &[u8]) -> Vec<Signature> {
        (0..self.signature_cnt as usize)
            .filter_map(|i| {
                Signature::read_from(payload, self.signature_off as usize + i * Signature::BYTES)
            })
            .collect()
    }

    /// The signed message bytes.
    pub fn message<'a>(&self, payload: &'a [u8]) -> &'a [u8] {
        payload.get(self.message_off as usize..).unwrap_or(&[])
    }

    pub fn account_key(&self, payload: &[u8], idx: usize) -> Option<Pubkey> {
        if idx >= self.acct_addr_cnt as usize {
            return None;
        }
        Pubkey::read_from(payload, self.acct_addr_off as usize + idx * Pubkey::BYTES)
    }

    pub fn account_keys(&self, payload: &[u8]) -> Vec<Pubkey> {
        (0..self.acct_addr_cnt as usize)
            .filter_map(|i| self.account_key(payload, i))
            .collect()
    }

    pub fn recent_blockhash(&self, payload: &[u8]) -> Option<Hash> {
        Hash::read_from(payload, self.recent_blockhash_off as usize)
    }

    pub fn is_signer(&self, idx: usize) -> bool {
        idx < self.signature_cnt as usize
    }

    /// Writability follows from the header counts: signed accounts come
    /// first, and each group places its read-only entries at the end.
    pub fn is_writable(&self, idx: usize) -> bool {
        let sig_cnt = self.signature_cnt as usize;
        let acct_cnt = self.acct_addr_cnt as usize;
        if idx < sig_cnt {
            idx < sig_cnt - self.readonly_signed_cnt as usize
        } else {
            idx < acct_cnt - self.readonly_unsigned_cnt as usize
        }
    }

    /// Number of accounts the transaction locks for writing.
    pub fn writable_cnt(&self) -> usize {
        (0..self.acct_addr_cnt as usize)
            .filter(|&i| self.is_writable(i))
            .count()
    }

    pub fn instr_accounts<'a>(&self, payload: &'a [u8], instr: &InstrDescriptor) -> &'a [u8] {
        let start = instr.acct_off as usize;
        payload
            .get(start..start + instr.acct_cnt as usize)
            .unwrap_or(&[])
    }

    pub fn instr_data<'a>(&self, payload: &'a [u8], instr: &InstrDescriptor) -> &'a [u8] {
        let start = instr.data_off as usize;
        payload
            .get(start..start + instr.data_sz as usize)
            .unwrap_or(&[])
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> Cursor<'a> {
    fn u8(&mut self) -> Result<u8, TxnParseError> {
        let b = *self
            .buf
            .get(self.off)
            .ok_or(TxnParseError::Truncated(self.off))?;
        self.off += 1;
        Ok(b)
    }

    /// Reads a compact-u16: up to three bytes of 7-bit groups, minimally
    /// encoded.
    fn compact_u16(&mut self) -> Result<u16, TxnParseError> {
        let start = self.off;
        let mut value: u32 = 0;
        for i in 0..3 {
            let b = self.u8()?;
            if i == 2 && b > 0x03 {
                return Err(TxnParseError::BadCompactU16(start));
            }
            value |= ((b & 0x7f) as u32) << (7 * i);
            if b & 0x80 == 0 {
                if i > 0 && b == 0 {
                    return Err(TxnParseError::BadCompactU16(start));
                }
                return Ok(value as u16);
            }
        }
        Err(TxnParseError::BadCompactU16(start))
    }

    fn skip(&mut self, n: usize) -> Result<u16, TxnParseError> {
        let start = self.off;
        let end = start
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or(TxnParseError::Truncated(start))?;
        self.off = end;
        Ok(start as u16)
    }
}

/// Parse a legacy transaction payload into a descriptor.
pub fn parse_txn(payload: &[u8]) -> Result<TxnDescriptor, TxnParseError> {
    if payload.len() > TPU_MTU {
        return Err(TxnParseError::TooLarge(payload.len()));
    }
    let mut cur = Cursor {
        buf: payload,
        off: 0,
    };

    let signature_cnt = cur.compact_u16()? as usize;
    if signature_cnt == 0 || signature_cnt > TXN_SIG_MAX {
        return Err(TxnParseError::BadSignatureCount(signature_cnt));
    }
    let signature_off = cur.skip(signature_cnt * Signature::BYTES)?;

    let message_off = cur.off as u16;
    let required = cur.u8()?;
    if required & 0x80 != 0 {
        return Err(TxnParseError::UnsupportedVersion(required));
    }
    if required as usize != signature_cnt {
        return Err(TxnParseError::SignatureCountMismatch {
            required: required as usize,
            present: signature_cnt,
        });
    }
    let readonly_signed_cnt = cur.u8()?;
    let readonly_unsigned_cnt = cur.u8()?;
    if readonly_signed_cnt as usize >= signature_cnt {
        return Err(TxnParseError::BadAccounts("fee payer must be writable"));
    }

    let acct_addr_cnt = cur.compact_u16()? as usize;
    if acct_addr_cnt > TXN_ACCT_ADDR_MAX {
        return Err(TxnParseError::BadAccounts("too many account addresses"));
    }
    if acct_addr_cnt < signature_cnt {
        return Err(TxnParseError::BadAccounts("fewer accounts than signers"));
    }
    if readonly_unsigned_cnt as usize > acct_addr_cnt - signature_cnt {
        return Err(TxnParseError::BadAccounts("read-only count exceeds unsigned accounts"));
    }
    let acct_addr_off = cur.skip(acct_addr_cnt * Pubkey::BYTES)?;
    let recent_blockhash_off = cur.skip(Hash::BYTES)?;

    let instr_cnt = cur.compact_u16()? as usize;
    if instr_cnt > TXN_INSTR_MAX {
        return Err(TxnParseError::TooManyInstructions(instr_cnt));
    }
    let mut instrs = Vec::with_capacity(instr_cnt);
    for instr in 0..instr_cnt {
        let program_id = cur.u8()?;
        if program_id as usize >= acct_addr_cnt || program_id == 0 {
            return Err(TxnParseError::BadAccountIndex {
                instr,
                idx: program_id,
                acct_cnt: acct_addr_cnt,
            });
        }
        let acct_cnt = cur.compact_u16()?;
        let acct_off = cur.skip(acct_cnt as usize)?;
        if let Some(&idx) = payload[acct_off as usize..cur.off]
            .iter()
            .find(|&&idx| idx as usize >= acct_addr_cnt)
        {
            return Err(TxnParseError::BadAccountIndex {
                instr,
                idx,
                acct_cnt: acct_addr_cnt,
            });
        }
        let data_sz = cur.compact_u16()?;
        let data_off = cur.skip(data_sz as usize)?;
        instrs.push(InstrDescriptor {
            program_id,
            acct_cnt,
            data_sz,
            acct_off,
            data_off,
        });
    }

    if cur.off != payload.len() {
        return Err(TxnParseError::TrailingBytes(payload.len() - cur.off));
    }

    Ok(TxnDescriptor {
        signature_cnt: signature_cnt as u8,
        signature_off,
        message_off,
        readonly_signed_cnt,
        readonly_unsigned_cnt,
        reserved: 0,
        acct_addr_cnt: acct_addr_cnt as u16,
        acct_addr_off,
        recent_blockhash_off,
        instrs,
    })
}

/// Append `value` as a compact-u16 to `out`.
pub fn write_compact_u16(out: &mut Vec<u8>, value: u16) {
    let mut rem = value;
    loop {
        let mut b = (rem & 0x7f) as u8;
        rem >>= 7;
        if rem != 0 {
            b |= 0x80;
        }
        out.push(b);
        if rem == 0 {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One signer, one read-only program, one instruction with two data bytes.
    fn sample_txn() -> Vec<u8> {
        let mut out = Vec::new();
        write_compact_u16(&mut out, 1);
        out.extend_from_slice(&[0xAA; 64]);
        out.extend_from_slice(&[1, 0, 1]);
        write_compact_u16(&mut out, 2);
        out.extend_from_slice(&[0x11; 32]);
        out.extend_from_slice(&[0x22; 32]);
        out.extend_from_slice(&[0x33; 32]);
        write_compact_u16(&mut out, 1);
        out.push(1);
        write_compact_u16(&mut out, 1);
        out.push(0);
        write_compact_u16(&mut out, 2);
        out.extend_from_slice(&[9, 8]);
        out
    }

    #[test]
    fn test_parse_layout() {
        let payload = sample_txn();
        let desc = parse_txn(&payload).unwrap();

        assert_eq!(desc.signature_cnt, 1);
        assert_eq!(desc.first_signature(&payload), Some(Signature::new([0xAA; 64])));
        assert_eq!(desc.account_keys(&payload).len(), 2);
        assert_eq!(desc.recent_blockhash(&payload), Some(Hash::new([0x33; 32])));
        assert!(desc.is_writable(0));
        assert!(!desc.is_writable(1));
        assert!(desc.is_signer(0));
        assert!(!desc.is_signer(1));
        assert_eq!(desc.instrs.len(), 1);
        assert_eq!(desc.instr_data(&payload, &desc.instrs[0]), &[9, 8]);
        assert_eq!(desc.instr_accounts(&payload, &desc.instrs[0]), &[0]);
        assert_eq!(borsh::to_vec(&desc).unwrap().len(), desc.encoded_sz());
    }

    #[test]
    fn test_parse_rejects_truncation() {
        let payload = sample_txn();
        for len in 0..payload.len() {
            assert!(parse_txn(&payload[..len]).is_err(), "prefix {len} parsed");
        }
    }

    #[test]
    fn test_parse_rejects_trailing_bytes() {
        let mut payload = sample_txn();
        payload.push(0);
        assert_eq!(parse_txn(&payload), Err(TxnParseError::TrailingBytes(1)));
    }

    #[test]
    fn test_parse_rejects_versioned() {
        let mut payload = sample_txn();
        payload[65] = 0x80;
        assert_eq!(
            parse_txn(&payload),
            Err(TxnParseError::UnsupportedVersion(0x80))
        );
    }

    #[test]
    fn test_parse_rejects_bad_program_index() {
        let mut payload = sample_txn();
        let program_off = payload.len() - 6;
        payload[program_off] = 5;
        assert!(matches!(
            parse_txn(&payload),
            Err(TxnParseError::BadAccountIndex { idx: 5, .. })
        ));
    }

    #[test]
    fn test_compact_u16_encoding() {
        let mut out = Vec::new();
        write_compact_u16(&mut out, 0x7f);
        assert_eq!(out, [0x7f]);
        out.clear();
        write_compact_u16(&mut out, 0x80);
        assert_eq!(out, [0x80, 0x01]);
        out.clear();
        write_compact_u16(&mut out, u16::MAX);
        assert_eq!(out, [0xff, 0xff, 0x03]);

        let mut cur = Cursor { buf: &out, off: 0 };
        assert_eq!(cur.compact_u16(), Ok(u16::MAX));

        let non_minimal = [0x80, 0x00];
        let mut cur = Cursor {
            buf: &non_minimal,
            off: 0,
        };
        assert_eq!(cur.compact_u16(), Err(TxnParseError::BadCompactU16(0)));
    }
}
