//! Payload codec shared by both directions.
//!
//! [`BodyDecoder`] and [`BodyEncoder`] implement the three framing
//! strategies selected by [`BodyFraming`]: fixed length, chunked transfer
//! encoding and empty. The chunked stepper is a small state machine over
//! the size line, the data bytes, the trailing CRLF and the optional
//! trailer section.

use std::io::Write;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::{BodyFrame, BodyFraming, ProtocolError, SendError};
use crate::utils::ensure;

/// Upper bound for a chunk size line or a trailer line.
const MAX_LINE_BYTES: usize = 8 * 1024;

/// Streaming decoder for HTTP payloads.
///
/// Emits [`BodyFrame::Chunk`] frames as data becomes available and a
/// final [`BodyFrame::Eof`] when the payload is complete. The owner is
/// expected to drop the decoder once it has seen the EOF frame.
#[derive(Debug)]
pub struct BodyDecoder {
    kind: DecodeKind,
}

#[derive(Debug)]
enum DecodeKind {
    Length { remaining: u64 },
    Chunked(ChunkPhase),
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkPhase {
    /// Awaiting a chunk size line, possibly with extensions
    Size,
    /// Consuming chunk data
    Data { remaining: u64 },
    /// Consuming the CRLF that terminates a data chunk
    DataEnd,
    /// Consuming trailer lines after the zero-size chunk
    Trailers,
    /// Final CRLF seen, payload complete
    Done,
}

impl BodyDecoder {
    pub fn fix_length(length: u64) -> Self {
        Self { kind: DecodeKind::Length { remaining: length } }
    }

    pub fn chunked() -> Self {
        Self { kind: DecodeKind::Chunked(ChunkPhase::Size) }
    }

    pub fn empty() -> Self {
        Self { kind: DecodeKind::Empty }
    }
}

impl From<BodyFraming> for BodyDecoder {
    fn from(framing: BodyFraming) -> Self {
        match framing {
            BodyFraming::Length(length) => BodyDecoder::fix_length(length),
            BodyFraming::Chunked => BodyDecoder::chunked(),
            BodyFraming::Empty => BodyDecoder::empty(),
        }
    }
}

impl Decoder for BodyDecoder {
    type Item = BodyFrame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match &mut self.kind {
            DecodeKind::Empty => Ok(Some(BodyFrame::Eof)),

            DecodeKind::Length { remaining } => {
                if *remaining == 0 {
                    return Ok(Some(BodyFrame::Eof));
                }
                if src.is_empty() {
                    return Ok(None);
                }
                let take = (*remaining).min(src.len() as u64) as usize;
                *remaining -= take as u64;
                Ok(Some(BodyFrame::Chunk(src.split_to(take).freeze())))
            }

            DecodeKind::Chunked(phase) => decode_chunked(phase, src),
        }
    }
}

fn decode_chunked(phase: &mut ChunkPhase, src: &mut BytesMut) -> Result<Option<BodyFrame>, ProtocolError> {
    loop {
        match phase {
            ChunkPhase::Size => {
                let Some(line) = take_line(src)? else {
                    return Ok(None);
                };
                let size = parse_chunk_size(&line)?;
                if size == 0 {
                    *phase = ChunkPhase::Trailers;
                } else {
                    *phase = ChunkPhase::Data { remaining: size };
                }
            }

            ChunkPhase::Data { remaining } => {
                if src.is_empty() {
                    return Ok(None);
                }
                let take = (*remaining).min(src.len() as u64) as usize;
                *remaining -= take as u64;
                let chunk = src.split_to(take).freeze();
                if *remaining == 0 {
                    *phase = ChunkPhase::DataEnd;
                }
                return Ok(Some(BodyFrame::Chunk(chunk)));
            }

            ChunkPhase::DataEnd => {
                let Some(line) = take_line(src)? else {
                    return Ok(None);
                };
                ensure!(line.is_empty(), ProtocolError::invalid_chunk("missing crlf after chunk data"));
                *phase = ChunkPhase::Size;
            }

            ChunkPhase::Trailers => {
                let Some(line) = take_line(src)? else {
                    return Ok(None);
                };
                // trailer fields are consumed but not surfaced
                if line.is_empty() {
                    *phase = ChunkPhase::Done;
                    return Ok(Some(BodyFrame::Eof));
                }
            }

            ChunkPhase::Done => return Ok(Some(BodyFrame::Eof)),
        }
    }
}

/// Splits one line off the buffer, tolerating a bare LF terminator.
///
/// Returns the line content without its terminator, or `None` when the
/// buffer does not yet hold a full line.
fn take_line(src: &mut BytesMut) -> Result<Option<BytesMut>, ProtocolError> {
    match src.iter().position(|b| *b == b'\n') {
        Some(pos) => {
            let mut line = src.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            Ok(Some(line))
        }
        None => {
            ensure!(src.len() <= MAX_LINE_BYTES, ProtocolError::invalid_chunk("line exceeds size limit"));
            Ok(None)
        }
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, ProtocolError> {
    let hex_len = line.iter().position(|b| *b == b';').unwrap_or(line.len());
    let hex = std::str::from_utf8(&line[..hex_len]).map_err(|_| ProtocolError::invalid_chunk("chunk size is not ascii"))?;
    u64::from_str_radix(hex.trim(), 16).map_err(|_| ProtocolError::invalid_chunk(format!("invalid chunk size: {hex}")))
}

/// Streaming encoder for HTTP payloads.
///
/// The owner feeds [`BodyFrame`] frames; after the EOF frame has been
/// encoded [`BodyEncoder::is_finished`] turns true and the encoder can be
/// discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyEncoder {
    kind: EncodeKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum EncodeKind {
    Length { remaining: u64, finished: bool },
    Chunked { finished: bool },
    Empty,
}

impl BodyEncoder {
    pub fn fix_length(length: u64) -> Self {
        Self { kind: EncodeKind::Length { remaining: length, finished: false } }
    }

    pub fn chunked() -> Self {
        Self { kind: EncodeKind::Chunked { finished: false } }
    }

    pub fn empty() -> Self {
        Self { kind: EncodeKind::Empty }
    }

    pub fn is_finished(&self) -> bool {
        match &self.kind {
            EncodeKind::Length { finished, .. } => *finished,
            EncodeKind::Chunked { finished } => *finished,
            EncodeKind::Empty => true,
        }
    }
}

impl From<BodyFraming> for BodyEncoder {
    fn from(framing: BodyFraming) -> Self {
        match framing {
            BodyFraming::Length(length) => BodyEncoder::fix_length(length),
            BodyFraming::Chunked => BodyEncoder::chunked(),
            BodyFraming::Empty => BodyEncoder::empty(),
        }
    }
}

impl<D: Buf> Encoder<BodyFrame<D>> for BodyEncoder {
    type Error = SendError;

    fn encode(&mut self, item: BodyFrame<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match &mut self.kind {
            EncodeKind::Length { remaining, finished } => match item {
                BodyFrame::Chunk(data) => {
                    let len = data.remaining() as u64;
                    if len == 0 {
                        return Ok(());
                    }
                    ensure!(len <= *remaining, SendError::invalid_body("body exceeds declared content-length"));
                    *remaining -= len;
                    dst.put(data);
                    Ok(())
                }
                BodyFrame::Eof => {
                    ensure!(*remaining == 0, SendError::invalid_body("body shorter than declared content-length"));
                    *finished = true;
                    Ok(())
                }
            },

            EncodeKind::Chunked { finished } => match item {
                BodyFrame::Chunk(data) => {
                    if !data.has_remaining() {
                        return Ok(());
                    }
                    write!(dst.writer(), "{:X}\r\n", data.remaining()).map_err(SendError::io)?;
                    dst.reserve(data.remaining() + 2);
                    dst.put(data);
                    dst.put_slice(b"\r\n");
                    Ok(())
                }
                BodyFrame::Eof => {
                    *finished = true;
                    dst.put_slice(b"0\r\n\r\n");
                    Ok(())
                }
            },

            EncodeKind::Empty => match item {
                BodyFrame::Chunk(data) => {
                    ensure!(!data.has_remaining(), SendError::invalid_body("payload data for an empty body"));
                    Ok(())
                }
                BodyFrame::Eof => Ok(()),
            },
        }
    }
}
