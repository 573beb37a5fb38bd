//! Wire framing for the feed protocol
//!
//! A frame is one JSON payload followed by a single `0x00` delimiter. The
//! payload alphabet never contains the delimiter (JSON escapes control
//! characters), so a linear scan for `0x00` splits frames unambiguously.
//! There is no length prefix.
//!
//! [`FrameCodec`] is the one framer in the crate: the cooperative client
//! drives it through `tokio_util::codec::FramedRead`, the threaded client
//! and [`decode`] call [`FrameCodec::next_frame`] directly.

use std::io::{self, Read};

use bytes::BytesMut;
use feed_types::errors::DecodeError;
use feed_types::message::Message;
use tokio_util::codec::Decoder;
use tracing::{debug, warn};

/// Frame terminator.
pub const DELIMITER: u8 = 0x00;

/// Default read size when pulling bytes off a stream.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Encode a message as one delimiter-terminated frame.
pub fn encode(message: &Message) -> Result<Vec<u8>, serde_json::Error> {
    let mut frame = message.to_vec()?;
    frame.push(DELIMITER);
    Ok(frame)
}

/// Decode one frame payload (delimiter already stripped).
pub fn decode_frame(payload: &[u8]) -> Result<Message, DecodeError> {
    Message::from_slice(payload)
}

/// Splits a byte buffer into frames.
///
/// Remembers how far the previous scan got so a frame delivered across many
/// small reads is scanned once, not once per read.
#[derive(Debug, Default)]
pub struct FrameCodec {
    scanned: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split the next complete frame off the front of `buf`, without its
    /// delimiter. Returns `None` until a delimiter has arrived.
    pub fn next_frame(&mut self, buf: &mut BytesMut) -> Option<BytesMut> {
        let start = self.scanned.min(buf.len());
        match buf[start..].iter().position(|b| *b == DELIMITER) {
            Some(offset) => {
                let end = start + offset;
                self.scanned = 0;
                let mut frame = buf.split_to(end + 1);
                frame.truncate(end);
                Some(frame)
            }
            None => {
                self.scanned = buf.len();
                None
            }
        }
    }

    /// Drop an unterminated tail left behind when the stream ends.
    fn discard_partial(&mut self, buf: &mut BytesMut) {
        if !buf.is_empty() {
            debug!(bytes = buf.len(), "Discarding unterminated trailing frame");
            buf.clear();
        }
        self.scanned = 0;
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.next_frame(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.next_frame(src) {
            Some(frame) => Ok(Some(frame)),
            None => {
                self.discard_partial(src);
                Ok(None)
            }
        }
    }
}

/// Lazy sequence of raw frames read from a blocking stream.
///
/// Ends at end-of-input or on the first read error.
pub struct Frames<R> {
    reader: R,
    buf: BytesMut,
    scratch: Vec<u8>,
    codec: FrameCodec,
    done: bool,
}

impl<R: Read> Frames<R> {
    pub fn new(reader: R) -> Self {
        Self::with_chunk_size(reader, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(chunk_size),
            scratch: vec![0; chunk_size.max(1)],
            codec: FrameCodec::new(),
            done: false,
        }
    }
}

impl<R: Read> Iterator for Frames<R> {
    type Item = BytesMut;

    fn next(&mut self) -> Option<BytesMut> {
        loop {
            if let Some(frame) = self.codec.next_frame(&mut self.buf) {
                return Some(frame);
            }
            if self.done {
                return None;
            }
            match self.reader.read(&mut self.scratch) {
                Ok(0) => {
                    self.done = true;
                    self.codec.discard_partial(&mut self.buf);
                }
                Ok(n) => self.buf.extend_from_slice(&self.scratch[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "Frame stream read failed");
                    self.done = true;
                    self.codec.discard_partial(&mut self.buf);
                }
            }
        }
    }
}

/// Decode a blocking stream into messages, one result per frame.
///
/// A malformed payload yields `Err` for that frame and the sequence continues.
pub fn decode<R: Read>(reader: R) -> impl Iterator<Item = Result<Message, DecodeError>> {
    Frames::new(reader).map(|frame| decode_frame(&frame))
}
