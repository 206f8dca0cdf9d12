//! Stream framing for complete messages
//!
//! A framed message starts with a segment table: a 4-byte little-endian
//! `segment_count - 1`, then one 4-byte little-endian word-length per
//! segment, padded with 4 zero bytes when the total count of 4-byte fields
//! is odd, so segment data always starts on a word boundary. The segments
//! follow back-to-back.
//!
//! Parsing computes each segment's byte offset by prefix-summing the
//! word-lengths; the table itself is viewed through `zerocopy` so the
//! little-endian conversion is free on the common targets.

use crate::error::{Error, Result};
use zerocopy::byteorder::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Ref};

/// Upper bound on the segment count we accept. Real messages use a handful
/// of segments; a huge count is a corrupt or hostile table.
const MAX_SEGMENTS: usize = 512;

/// Leading word of the stream: the segment count, stored minus one
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct StreamHeader {
    segment_count_minus_one: U32,
}

/// Byte length of the segment table for `count` segments, padding included
#[inline]
fn table_len(count: usize) -> usize {
    let fields = 1 + count;
    (fields * 4 + 7) & !7
}

/// Parse the segment table of a framed message.
///
/// Returns the byte offset of each segment start within `bytes`, table
/// included. Fails when the table is truncated, names more segments than
/// [`MAX_SEGMENTS`], or describes more data than the stream holds.
pub fn parse_segment_table(bytes: &[u8]) -> Result<Vec<usize>> {
    if bytes.len() < 8 {
        return Err(Error::out_of_bounds(0, 8, bytes.len()));
    }
    let (header, rest) = Ref::<_, StreamHeader>::from_prefix(bytes)
        .map_err(|_| Error::MalformedPointer("unreadable segment count".to_string()))?;
    let count = header.segment_count_minus_one.get() as usize + 1;
    if count > MAX_SEGMENTS {
        return Err(Error::MalformedPointer(format!(
            "segment table names {} segments",
            count
        )));
    }

    let header_len = table_len(count);
    if bytes.len() < header_len {
        return Err(Error::out_of_bounds(0, header_len, bytes.len()));
    }
    let (lengths, _) = Ref::<_, [U32]>::from_prefix_with_elems(rest, count)
        .map_err(|_| Error::MalformedPointer("unreadable segment table".to_string()))?;

    let mut offsets = Vec::with_capacity(count);
    let mut start = header_len;
    for len in lengths.iter() {
        offsets.push(start);
        let words = len.get() as usize;
        start = start
            .checked_add(words.checked_mul(8).ok_or_else(|| {
                Error::MalformedPointer(format!("segment of {} words overflows", words))
            })?)
            .ok_or_else(|| {
                Error::MalformedPointer("segment table overflows the address space".to_string())
            })?;
    }
    if start > bytes.len() {
        return Err(Error::out_of_bounds(
            header_len,
            start - header_len,
            bytes.len() - header_len,
        ));
    }
    Ok(offsets)
}

/// Frame a set of segments into a complete stream.
///
/// Each segment must be word-aligned; that is a caller bug and panics.
pub fn frame(segments: &[&[u8]]) -> Vec<u8> {
    assert!(!segments.is_empty(), "a message needs at least one segment");
    for seg in segments {
        assert!(
            seg.len() % 8 == 0,
            "segment length {} is not a whole number of words",
            seg.len()
        );
    }

    let header = table_len(segments.len());
    let total: usize = header + segments.iter().map(|s| s.len()).sum::<usize>();
    let mut out = Vec::with_capacity(total);

    out.extend_from_slice(U32::new(segments.len() as u32 - 1).as_bytes());
    for seg in segments {
        out.extend_from_slice(U32::new((seg.len() / 8) as u32).as_bytes());
    }
    while out.len() < header {
        out.push(0);
    }
    for seg in segments {
        out.extend_from_slice(seg);
    }
    out
}

/// Frame a single-segment message body
pub fn frame_single(body: &[u8]) -> Vec<u8> {
    frame(&[body])
}
