//! Version-tagged CBOR framing.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};

/// magic (4) + version (2)
const HEADER_SIZE: usize = 6;

/// Framing for one wire format.
///
/// ```text
/// | magic (4) | version u16 LE (2) | CBOR body (N) |
/// ```
///
/// Decoding fails with [`CodecError::WrongMagic`] or
/// [`CodecError::VersionMismatch`] before the body is touched, so a reader
/// never misinterprets bytes written by another format or version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    magic: [u8; 4],
    version: u16,
}

impl Envelope {
    /// Creates an envelope for the given format magic and version.
    #[must_use]
    pub const fn new(magic: [u8; 4], version: u16) -> Self {
        Self { magic, version }
    }

    /// Returns the format magic.
    #[must_use]
    pub const fn magic(&self) -> [u8; 4] {
        self.magic
    }

    /// Returns the format version.
    #[must_use]
    pub const fn version(&self) -> u16 {
        self.version
    }

    /// Encodes `value` into a new buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized.
    pub fn encode<T: Serialize>(&self, value: &T) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode_to(value, &mut buf)?;
        Ok(buf)
    }

    /// Encodes `value` into `writer`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized or the writer fails.
    pub fn encode_to<T: Serialize, W: Write>(&self, value: &T, mut writer: W) -> CodecResult<()> {
        let mut header = [0u8; HEADER_SIZE];
        header[..4].copy_from_slice(&self.magic);
        header[4..].copy_from_slice(&self.version.to_le_bytes());
        writer
            .write_all(&header)
            .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
        ciborium::into_writer(value, &mut writer)
            .map_err(|e| CodecError::encoding_failed(e.to_string()))
    }

    /// Decodes a value from a complete buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the header does not match this envelope or the
    /// body is not a valid encoding of `T`.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CodecResult<T> {
        self.decode_from(bytes)
    }

    /// Decodes a value from `reader`.
    ///
    /// # Errors
    ///
    /// Returns an error if the header does not match this envelope or the
    /// body is not a valid encoding of `T`.
    pub fn decode_from<T: DeserializeOwned, R: Read>(&self, mut reader: R) -> CodecResult<T> {
        let mut header = [0u8; HEADER_SIZE];
        reader
            .read_exact(&mut header)
            .map_err(|_| CodecError::UnexpectedEof)?;

        let found = [header[0], header[1], header[2], header[3]];
        if found != self.magic {
            return Err(CodecError::WrongMagic {
                expected: self.magic,
                found,
            });
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != self.version {
            return Err(CodecError::VersionMismatch {
                expected: self.version,
                found: version,
            });
        }

        ciborium::from_reader(reader).map_err(|e| CodecError::decoding_failed(e.to_string()))
    }
}
