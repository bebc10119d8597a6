//! Snapshot wire codec
//!
//! Every broadcast cycle sends one self-delimiting frame holding the full
//! registry state. All integers are big-endian.
//!
//! ```text
//! +-------------+-----------+------------------+
//! | magic (u16) | ver (u8)  | payload len (u32)|   header, 7 bytes
//! +-------------+-----------+------------------+
//! | subject_count (u16)                        |
//! | subject * count:                           |
//! |   name str16 | source str16 | time_us u64  |
//! |   marker_count u16                         |
//! |     name str16 | x y z f64 | occluded u8   |
//! |   segment_count u16                        |
//! |     name str16 | tx ty tz f64 | qx qy qz qw f64 |
//! +--------------------------------------------+
//!
//! str16 = u16 byte length followed by UTF-8 bytes
//! ```
//!
//! Encoding is deterministic: the same snapshot always yields the same bytes.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{DecodeError, EncodeError};
use crate::registry::{Marker, Segment, Snapshot, Subject};

/// Frame magic, "MC"
pub const MAGIC: u16 = 0x4D43;

/// Wire format version
pub const VERSION: u8 = 1;

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = 7;

/// Default upper bound on a frame payload
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const MARKER_FIXED_SIZE: usize = 2 + 8 * 3 + 1;
const SEGMENT_FIXED_SIZE: usize = 2 + 8 * 7;

/// Serialize a snapshot into one complete frame (header included)
///
/// Fails rather than truncating when a count or name overflows its u16
/// field, so a consumer never sees a well-framed but incomplete state.
pub fn encode_snapshot(snapshot: &Snapshot) -> Result<Bytes, EncodeError> {
    let mut payload = BytesMut::with_capacity(estimate_payload(snapshot));

    put_count(&mut payload, "subjects", snapshot.len())?;
    for subject in snapshot.iter() {
        put_subject(&mut payload, subject)?;
    }

    if payload.len() > u32::MAX as usize {
        return Err(EncodeError::PayloadTooLarge(payload.len()));
    }

    let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    frame.put_u16(MAGIC);
    frame.put_u8(VERSION);
    frame.put_u32(payload.len() as u32);
    frame.extend_from_slice(&payload);
    Ok(frame.freeze())
}

fn estimate_payload(snapshot: &Snapshot) -> usize {
    snapshot
        .iter()
        .map(|s| {
            2 + s.name.len()
                + 2
                + s.source.len()
                + 8
                + 4
                + s.markers
                    .iter()
                    .map(|m| MARKER_FIXED_SIZE + m.name.len())
                    .sum::<usize>()
                + s.segments
                    .iter()
                    .map(|g| SEGMENT_FIXED_SIZE + g.name.len())
                    .sum::<usize>()
        })
        .sum::<usize>()
        + 2
}

fn put_subject(buf: &mut BytesMut, subject: &Subject) -> Result<(), EncodeError> {
    put_str16(buf, "subject", &subject.name)?;
    put_str16(buf, "source", &subject.source)?;
    buf.put_u64(timestamp_micros(subject.updated_at));

    put_count(buf, "markers", subject.markers.len())?;
    for marker in &subject.markers {
        put_str16(buf, "marker", &marker.name)?;
        for v in marker.position {
            buf.put_f64(v);
        }
        buf.put_u8(marker.occluded as u8);
    }

    put_count(buf, "segments", subject.segments.len())?;
    for segment in &subject.segments {
        put_str16(buf, "segment", &segment.name)?;
        for v in segment.translation {
            buf.put_f64(v);
        }
        for v in segment.rotation {
            buf.put_f64(v);
        }
    }
    Ok(())
}

fn put_count(buf: &mut BytesMut, field: &'static str, count: usize) -> Result<(), EncodeError> {
    let count = u16::try_from(count).map_err(|_| EncodeError::TooMany { field, count })?;
    buf.put_u16(count);
    Ok(())
}

/// Write a length-prefixed string
fn put_str16(buf: &mut BytesMut, field: &'static str, s: &str) -> Result<(), EncodeError> {
    let len = u16::try_from(s.len()).map_err(|_| EncodeError::NameTooLong { field, len: s.len() })?;
    buf.put_u16(len);
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

fn timestamp_micros(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Extracts complete frames from a growing byte buffer
#[derive(Debug, Clone)]
pub struct FrameReader {
    max_frame_size: usize,
}

impl FrameReader {
    /// Create a reader with the default size limit
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a reader with a custom payload size limit
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Take the next complete payload out of `buf`
    ///
    /// Returns `Ok(None)` until a whole frame is buffered. Errors from this
    /// method are framing errors: the stream cannot be resynchronized.
    pub fn next_frame(&self, buf: &mut BytesMut) -> Result<Option<Bytes>, DecodeError> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let magic = u16::from_be_bytes([buf[0], buf[1]]);
        if magic != MAGIC {
            return Err(DecodeError::BadMagic(magic));
        }

        let version = buf[2];
        if version != VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }

        let len = u32::from_be_bytes([buf[3], buf[4], buf[5], buf[6]]) as usize;
        if len > self.max_frame_size {
            return Err(DecodeError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }

        if buf.len() < HEADER_SIZE + len {
            buf.reserve(HEADER_SIZE + len - buf.len());
            return Ok(None);
        }

        buf.advance(HEADER_SIZE);
        Ok(Some(buf.split_to(len).freeze()))
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a frame payload (header already stripped) into subjects
pub fn decode_payload(mut buf: Bytes) -> Result<Vec<Subject>, DecodeError> {
    let count = get_u16(&mut buf)? as usize;
    let mut subjects = Vec::with_capacity(count);

    for _ in 0..count {
        subjects.push(get_subject(&mut buf)?);
    }

    if buf.has_remaining() {
        return Err(DecodeError::TrailingBytes(buf.remaining()));
    }

    Ok(subjects)
}

fn get_subject(buf: &mut Bytes) -> Result<Subject, DecodeError> {
    let name = get_str16(buf)?;
    let source = get_str16(buf)?;
    let micros = get_u64(buf)?;

    let marker_count = get_u16(buf)? as usize;
    let mut markers = Vec::with_capacity(marker_count);
    for _ in 0..marker_count {
        let name = get_str16(buf)?;
        ensure(buf, 8 * 3 + 1)?;
        let position = [buf.get_f64(), buf.get_f64(), buf.get_f64()];
        let occluded = buf.get_u8() != 0;
        markers.push(Marker {
            name,
            position,
            occluded,
        });
    }

    let segment_count = get_u16(buf)? as usize;
    let mut segments = Vec::with_capacity(segment_count);
    for _ in 0..segment_count {
        let name = get_str16(buf)?;
        ensure(buf, 8 * 7)?;
        let translation = [buf.get_f64(), buf.get_f64(), buf.get_f64()];
        let rotation = [buf.get_f64(), buf.get_f64(), buf.get_f64(), buf.get_f64()];
        segments.push(Segment {
            name,
            translation,
            rotation,
        });
    }

    Ok(Subject {
        name,
        markers,
        segments,
        updated_at: UNIX_EPOCH + Duration::from_micros(micros),
        source,
    })
}

fn ensure(buf: &Bytes, n: usize) -> Result<(), DecodeError> {
    if buf.remaining() < n {
        Err(DecodeError::UnexpectedEof)
    } else {
        Ok(())
    }
}

fn get_u16(buf: &mut Bytes) -> Result<u16, DecodeError> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

fn get_u64(buf: &mut Bytes) -> Result<u64, DecodeError> {
    ensure(buf, 8)?;
    Ok(buf.get_u64())
}

fn get_str16(buf: &mut Bytes) -> Result<String, DecodeError> {
    let len = get_u16(buf)? as usize;
    ensure(buf, len)?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
}
