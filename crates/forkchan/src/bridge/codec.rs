//! Framed codec for channel traffic.
//!
//! Uses LengthDelimitedCodec for framing + serde_json for serialization.
//! Works over any byte stream; the blocking channel drives it by hand and the
//! async channel hands it to `Framed`.

use std::io;

use serde::Serialize;
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Size of the big-endian length prefix in front of every frame.
pub const LENGTH_FIELD_BYTES: usize = 4;

/// Largest frame accepted unless overridden with [`JsonCodec::with_max_frame_length`].
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

const LARGE_FRAME_BYTES: usize = 100_000;

/// Codec that frames messages with length prefix and serializes with JSON.
///
/// Encoding accepts any serializable value. Decoding yields the raw JSON frame so
/// the receiver picks the target type per message; one channel can carry
/// heterogeneous records without a schema exchange.
#[derive(Debug)]
pub struct JsonCodec {
    inner: LengthDelimitedCodec,
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonCodec {
    pub fn new() -> Self {
        Self::with_max_frame_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    pub fn with_max_frame_length(max: usize) -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_length(LENGTH_FIELD_BYTES)
                .max_frame_length(max)
                .new_codec(),
        }
    }

    pub fn max_frame_length(&self) -> usize {
        self.inner.max_frame_length()
    }
}

impl Decoder for JsonCodec {
    type Item = BytesMut;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let frame = self.inner.decode(src)?;
        if let Some(ref bytes) = frame {
            tracing::trace!(json_size_bytes = bytes.len(), "Decoded frame");
        }
        Ok(frame)
    }
}

impl<'a, T: Serialize + ?Sized> Encoder<&'a T> for JsonCodec {
    type Error = io::Error;

    fn encode(&mut self, item: &'a T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json =
            serde_json::to_vec(item).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let json_len = json.len();
        tracing::trace!(json_size_bytes = json_len, "Encoding frame");
        if json_len > LARGE_FRAME_BYTES {
            tracing::info!(
                json_size_bytes = json_len,
                json_size_kb = json_len / 1024,
                "Large frame being encoded"
            );
        }
        self.inner.encode(Bytes::from(json), dst)
    }
}
