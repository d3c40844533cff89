//! Frame encoding and decoding.
//!
//! Pure functions over byte slices: no I/O, no state. A single network
//! read may hold several frames back to back, and a compressed frame holds
//! a whole batch of frames in its body, so [`decode`] always returns a
//! list.

use std::io::{Read, Write};

use serde::Serialize;

use crate::{
    Frame, FrameHeader, HEADER_LENGTH, Operation, ProtocolError, ProtocolVersion,
};

/// Sequence id written into every outgoing frame. The server doesn't echo
/// it back, so there is nothing to correlate.
pub const DEFAULT_SEQUENCE: u32 = 1;

/// Ceiling on the inflated size of one compressed batch.
pub const MAX_DECOMPRESSED_SIZE: usize = 8 * 1024 * 1024;

const HEADER_LEN: usize = HEADER_LENGTH as usize;

/// Encodes a client frame with the plain [`ProtocolVersion::Heartbeat`]
/// body encoding, which is what clients send for every operation.
///
/// # Errors
/// [`ProtocolError::FrameTooLarge`] if the body overflows the 32-bit
/// length field.
pub fn encode(operation: Operation, body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    encode_with_version(operation, ProtocolVersion::Heartbeat, body)
}

/// Encodes a frame with an explicit version. The body is written as-is;
/// use [`encode_batch`] to produce a compressed frame.
pub fn encode_with_version(
    operation: Operation,
    version: ProtocolVersion,
    body: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    let total = body
        .len()
        .checked_add(HEADER_LEN)
        .and_then(|n| u32::try_from(n).ok())
        .ok_or(ProtocolError::FrameTooLarge(body.len()))?;

    let mut buf = Vec::with_capacity(total as usize);
    buf.extend_from_slice(&total.to_be_bytes());
    buf.extend_from_slice(&HEADER_LENGTH.to_be_bytes());
    buf.extend_from_slice(&version.code().to_be_bytes());
    buf.extend_from_slice(&operation.code().to_be_bytes());
    buf.extend_from_slice(&DEFAULT_SEQUENCE.to_be_bytes());
    buf.extend_from_slice(body);
    Ok(buf)
}

/// Serializes `value` as JSON and encodes it as a client frame.
pub fn encode_json<T: Serialize>(
    operation: Operation,
    value: &T,
) -> Result<Vec<u8>, ProtocolError> {
    let body = serde_json::to_vec(value).map_err(ProtocolError::Encode)?;
    encode(operation, &body)
}

/// Compresses already-encoded frames into one `SendMsgReply` batch frame,
/// the way the server delivers bursts of commands.
///
/// `frames` is the concatenation of complete encoded frames.
///
/// # Errors
/// [`ProtocolError::UnsupportedVersion`] if `version` isn't a compressed
/// version; [`ProtocolError::Compress`] if the encoder fails.
pub fn encode_batch(
    version: ProtocolVersion,
    frames: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    let compressed = match version {
        ProtocolVersion::Deflate => {
            let mut encoder = flate2::write::ZlibEncoder::new(
                Vec::new(),
                flate2::Compression::default(),
            );
            encoder.write_all(frames).map_err(ProtocolError::Compress)?;
            encoder.finish().map_err(ProtocolError::Compress)?
        }
        ProtocolVersion::Brotli => {
            let mut encoder = brotli::CompressorWriter::new(Vec::new(), 4096, 5, 22);
            encoder.write_all(frames).map_err(ProtocolError::Compress)?;
            encoder.into_inner()
        }
        other => return Err(ProtocolError::UnsupportedVersion(other.code())),
    };
    encode_with_version(Operation::SendMsgReply, version, &compressed)
}

/// Decodes every frame in `data`, expanding compressed batches in place.
///
/// Frames come back in wire order. An empty buffer yields an empty list.
///
/// # Errors
/// Any malformed header, a length running past the buffer, an unknown
/// version, a failed or oversized decompression, or a compressed frame
/// inside a batch.
pub fn decode(data: &[u8]) -> Result<Vec<Frame>, ProtocolError> {
    let mut frames = Vec::new();
    decode_into(data, None, &mut frames)?;
    Ok(frames)
}

/// `batch` is the version of the enclosing batch, if any. It doubles as
/// the recursion guard: inside a batch, compression is rejected.
fn decode_into(
    data: &[u8],
    batch: Option<ProtocolVersion>,
    out: &mut Vec<Frame>,
) -> Result<(), ProtocolError> {
    let mut offset = 0;
    while offset < data.len() {
        let rest = &data[offset..];
        let header = parse_header(rest)?;
        let total = header.total_length as usize;
        let body = &rest[HEADER_LEN..total];

        if header.version.is_compressed() {
            if let Some(outer) = batch {
                return Err(ProtocolError::NestedCompression(outer));
            }
            let inflated = decompress(header.version, body)?;
            tracing::trace!(
                version = ?header.version,
                compressed = body.len(),
                inflated = inflated.len(),
                "expanding batch"
            );
            decode_into(&inflated, Some(header.version), out)?;
        } else {
            out.push(Frame {
                header,
                body: body.to_vec(),
            });
        }
        offset += total;
    }
    Ok(())
}

/// Parses and validates the header at the start of `data`. On success the
/// whole frame (`total_length` bytes) is guaranteed to be in `data`.
fn parse_header(data: &[u8]) -> Result<FrameHeader, ProtocolError> {
    if data.len() < HEADER_LEN {
        return Err(ProtocolError::Truncated {
            needed: HEADER_LEN,
            available: data.len(),
        });
    }

    let total_length = read_u32(data, 0);
    let header_length = read_u16(data, 4);
    let raw_version = read_u16(data, 6);
    let operation = Operation::from(read_u32(data, 8));
    let sequence = read_u32(data, 12);

    if header_length != HEADER_LENGTH {
        return Err(ProtocolError::BadHeaderLength(header_length));
    }
    if (total_length as usize) < HEADER_LEN {
        return Err(ProtocolError::BadTotalLength(total_length));
    }
    if total_length as usize > data.len() {
        return Err(ProtocolError::Truncated {
            needed: total_length as usize,
            available: data.len(),
        });
    }
    let version = ProtocolVersion::try_from(raw_version)?;

    Ok(FrameHeader {
        total_length,
        header_length,
        version,
        operation,
        sequence,
    })
}

fn decompress(version: ProtocolVersion, body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    // Read one byte past the limit so an exactly-full buffer is accepted
    // and anything larger is detected.
    let limit = MAX_DECOMPRESSED_SIZE as u64 + 1;
    let mut out = Vec::new();
    let result = match version {
        ProtocolVersion::Deflate => flate2::read::ZlibDecoder::new(body)
            .take(limit)
            .read_to_end(&mut out),
        ProtocolVersion::Brotli => brotli::Decompressor::new(body, 4096)
            .take(limit)
            .read_to_end(&mut out),
        other => return Err(ProtocolError::UnsupportedVersion(other.code())),
    };
    result.map_err(|source| ProtocolError::Decompress { version, source })?;

    if out.len() > MAX_DECOMPRESSED_SIZE {
        return Err(ProtocolError::DecompressedTooLarge {
            limit: MAX_DECOMPRESSED_SIZE,
        });
    }
    Ok(out)
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}
