//! Wire codec for broker messages
//!
//! Messages are JSON documents tagged with their variant. A whole message
//! always travels in a single datagram of at most [`BLOCK_SIZE`] bytes.

use bytes::{BufMut, BytesMut};
use burrow_core::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Size of the receive buffer, and thus the largest message accepted
pub const BLOCK_SIZE: usize = 8192;

/// Encodes messages into a reusable buffer
#[derive(Debug, Default)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    /// Create a new encoder
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(BLOCK_SIZE),
        }
    }

    /// Encode a message, returning the encoded bytes. They stay valid until
    /// the next call to `encode`.
    pub fn encode<T: Serialize>(&mut self, msg: &T) -> Result<&[u8]> {
        self.buf.clear();
        serde_json::to_writer((&mut self.buf).writer(), msg).map_err(Error::Encode)?;
        if self.buf.len() > BLOCK_SIZE {
            return Err(Error::Encode(serde::ser::Error::custom(format!(
                "message of {} bytes exceeds block size",
                self.buf.len()
            ))));
        }
        Ok(&self.buf)
    }
}

/// Decodes messages of unknown variant from a receive buffer
#[derive(Debug)]
pub struct Decoder {
    buf: Vec<u8>,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    /// Create a new decoder with a [`BLOCK_SIZE`] receive buffer
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: vec![0; BLOCK_SIZE],
        }
    }

    /// The receive buffer to read the next message into
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Decode the first `len` bytes of the receive buffer
    pub fn decode<T: DeserializeOwned>(&self, len: usize) -> Result<T> {
        let bytes = self.buf.get(..len).ok_or_else(|| Error::Decode {
            message: format!("{len} bytes exceed the receive buffer"),
        })?;
        decode(bytes)
    }
}

/// Decode a message from raw bytes
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| Error::Decode {
        message: e.to_string(),
    })
}
