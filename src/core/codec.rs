//! # Frame Codec
//!
//! Newline-delimited framing for stream transports.
//!
//! The decoder yields each complete frame without its delimiter. Several
//! frames may sit in one read buffer and a frame may span many reads; the
//! decoder remembers how far it has already scanned so a slow stream is not
//! rescanned from the start on every byte.
//!
//! Bytes left over when the stream ends never form a frame and are discarded.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

use crate::error::{constants, ProtocolError, Result};

/// Frame delimiter on the wire
pub const FRAME_DELIMITER: u8 = b'\n';

/// Default upper bound for a single frame (1 MiB)
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 1024 * 1024;

/// Codec turning a byte stream into newline-terminated frames and back
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_length: usize,
    next_index: usize,
}

impl FrameCodec {
    /// Codec with the default maximum frame length
    pub fn new() -> Self {
        Self::with_max_frame_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    /// Codec that fails once a frame grows past `max_frame_length` bytes
    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        Self {
            max_frame_length,
            next_index: 0,
        }
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let scan_from = self.next_index.min(src.len());
        match src[scan_from..].iter().position(|b| *b == FRAME_DELIMITER) {
            Some(offset) => {
                let end = scan_from + offset;
                self.next_index = 0;

                let mut frame = src.split_to(end + 1);
                frame.truncate(end);
                trace!(bytes = frame.len(), "Frame ready");
                Ok(Some(frame))
            }
            None if src.len() > self.max_frame_length => {
                Err(ProtocolError::OversizedFrame(src.len()))
            }
            None => {
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() {
            debug!(bytes = src.len(), "Discarding incomplete frame at end of stream");
            src.clear();
        }
        self.next_index = 0;
        Ok(None)
    }
}

impl Encoder<String> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        <Self as Encoder<&str>>::encode(self, item.as_str(), dst)
    }
}

impl Encoder<&str> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &str, dst: &mut BytesMut) -> Result<()> {
        if item.as_bytes().contains(&FRAME_DELIMITER) {
            return Err(ProtocolError::Serialization(
                constants::ERR_FRAME_CONTAINS_DELIMITER.into(),
            ));
        }
        if item.len() > self.max_frame_length {
            return Err(ProtocolError::OversizedFrame(item.len()));
        }

        dst.reserve(item.len() + 1);
        dst.put_slice(item.as_bytes());
        dst.put_u8(FRAME_DELIMITER);
        Ok(())
    }
}
