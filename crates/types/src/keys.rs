//! Account addresses and transaction signatures.

use borsh::{BorshDeserialize, BorshSerialize};
use std::fmt;

/// A 32-byte account address (an ed25519 public key for signer accounts).
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize,
)]
pub struct Pubkey([u8; 32]);

impl Pubkey {
    /// Size of an address in bytes.
    pub const BYTES: usize = 32;

    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Read an address out of a wire buffer at `off`.
    pub fn read_from(buf: &[u8], off: usize) -> Option<Self> {
        let bytes = buf.get(off..off.checked_add(Self::BYTES)?)?;
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "Pubkey({}..)", &hex[..8])
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A 64-byte ed25519 signature as it appears on the wire.
///
/// The first signature of a transaction doubles as its identifier, which is
/// what the deduplication tile keys its cache on.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct Signature([u8; 64]);

impl Signature {
    /// Size of a signature in bytes.
    pub const BYTES: usize = 64;

    pub const ZERO: Self = Self([0u8; 64]);

    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Read a signature out of a wire buffer at `off`.
    pub fn read_from(buf: &[u8], off: usize) -> Option<Self> {
        let bytes = buf.get(off..off.checked_add(Self::BYTES)?)?;
        let mut arr = [0u8; 64];
        arr.copy_from_slice(bytes);
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// Verify this signature over `message` against `signer`.
    ///
    /// Returns `false` for malformed public keys as well as bad signatures.
    pub fn verify(&self, signer: &Pubkey, message: &[u8]) -> bool {
        use ed25519_dalek::Verifier;

        let key = match ed25519_dalek::VerifyingKey::from_bytes(signer.as_bytes()) {
            Ok(key) => key,
            Err(_) => return false,
        };
        let sig = ed25519_dalek::Signature::from_bytes(&self.0);
        key.verify(message, &sig).is_ok()
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}..)", hex::encode(&self.0[..8]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    #[test]
    fn test_signature_verify() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let signer = Pubkey::new(key.verifying_key().to_bytes());
        let sig = Signature::new(key.sign(b"message").to_bytes());

        assert!(sig.verify(&signer, b"message"));
        assert!(!sig.verify(&signer, b"other message"));
        assert!(!Signature::ZERO.verify(&signer, b"message"));
    }

    #[test]
    fn test_read_from_short_buffer() {
        let buf = [1u8; 70];
        assert!(Signature::read_from(&buf, 6).is_some());
        assert!(Signature::read_from(&buf, 7).is_none());
        assert!(Pubkey::read_from(&buf, usize::MAX).is_none());
    }
}
