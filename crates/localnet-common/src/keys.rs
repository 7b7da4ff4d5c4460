//! Private key material returned by the emulator.
//!
//! The emulator hands back each generated signing key as the hex encoding of
//! a CBOR byte string: the two-byte header `0x58 0x20` followed by the 32 key
//! bytes. Anything else means the emulator and this crate disagree on the
//! protocol.

use std::fmt;
use thiserror::Error;

const KEY_LEN: usize = 32;
const CBOR_BYTES_HEADER: [u8; 2] = [0x58, KEY_LEN as u8];

/// Failure to turn emulator key material into wallet handles.
#[derive(Debug, Error)]
pub enum KeyDecodeError {
    #[error("key #{index} is not valid hex: {source}")]
    InvalidHex {
        index: usize,
        #[source]
        source: hex::FromHexError,
    },

    #[error("key #{index} is not a CBOR-wrapped 32-byte key ({len} bytes decoded)")]
    UnexpectedEncoding { index: usize, len: usize },

    #[error("expected {expected} keys for the requested distribution, emulator returned {actual}")]
    CountMismatch { expected: usize, actual: usize },
}

/// A 32-byte signing key. `Debug` never prints the key bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey([u8; KEY_LEN]);

impl PrivateKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Decode one entry of the emulator's `privateKeys` list. `index` is only
    /// used for error reporting.
    pub fn from_cbor_hex(index: usize, encoded: &str) -> Result<Self, KeyDecodeError> {
        let raw = hex::decode(encoded.trim())
            .map_err(|source| KeyDecodeError::InvalidHex { index, source })?;
        let body = raw
            .strip_prefix(&CBOR_BYTES_HEADER[..])
            .filter(|body| body.len() == KEY_LEN)
            .ok_or(KeyDecodeError::UnexpectedEncoding {
                index,
                len: raw.len(),
            })?;
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(body);
        Ok(Self(bytes))
    }

    pub fn to_cbor_hex(&self) -> String {
        let mut raw = Vec::with_capacity(KEY_LEN + CBOR_BYTES_HEADER.len());
        raw.extend_from_slice(&CBOR_BYTES_HEADER);
        raw.extend_from_slice(&self.0);
        hex::encode(raw)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}
