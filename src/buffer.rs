//! Message buffers
//!
//! A [`Buffer`] owns the bytes of one Cap'n Proto message, either on the
//! heap or as a memory-mapped file, plus an optional segment offset table.
//! Views (`StructReader`, `ListReader`) borrow the buffer and never copy.
//!
//! Single-segment buffers have no table and refuse to follow far pointers.
//! Multi-segment buffers store all segments in one consecutive byte area;
//! `segment_offsets[i]` is the byte offset where segment `i` starts.

use crate::endian;
use crate::error::{Error, Result};
use crate::ptr::{self, Kind};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

/// Backing storage for a buffer
enum Bytes {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl Bytes {
    #[inline]
    fn as_slice(&self) -> &[u8] {
        match self {
            Bytes::Owned(v) => v,
            Bytes::Mapped(m) => &m[..],
        }
    }
}

/// An immutable Cap'n Proto message buffer
pub struct Buffer {
    bytes: Bytes,
    /// Byte offset of each segment start, ascending. `None` for a bare
    /// single-segment buffer.
    segment_offsets: Option<Vec<usize>>,
}

impl Buffer {
    /// Wrap a bare single-segment message. The root pointer is the first
    /// word. Far pointers cannot be followed in such a buffer.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Buffer {
            bytes: Bytes::Owned(bytes),
            segment_offsets: None,
        }
    }

    /// Wrap a multi-segment message stored in one consecutive byte area.
    ///
    /// `segment_offsets[i]` is the byte offset where segment `i` starts;
    /// offsets must be ascending, word-aligned, and non-empty.
    pub fn from_segments(bytes: Vec<u8>, segment_offsets: Vec<usize>) -> Result<Self> {
        validate_offsets(&segment_offsets, bytes.len())?;
        Ok(Buffer {
            bytes: Bytes::Owned(bytes),
            segment_offsets: Some(segment_offsets),
        })
    }

    /// Decode a complete framed stream (segment table + segment bytes).
    pub fn from_message(bytes: Vec<u8>) -> Result<Self> {
        let segment_offsets = crate::message::parse_segment_table(&bytes)?;
        Ok(Buffer {
            bytes: Bytes::Owned(bytes),
            segment_offsets: Some(segment_offsets),
        })
    }

    /// Memory-map a framed message file.
    ///
    /// The mapping is zero-copy: views read straight out of the page cache.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mmap = unsafe { Mmap::map(&file)? };
        let segment_offsets = crate::message::parse_segment_table(&mmap[..])?;
        Ok(Buffer {
            bytes: Bytes::Mapped(mmap),
            segment_offsets: Some(segment_offsets),
        })
    }

    /// The complete byte area (segment table included, when present)
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        self.bytes.as_slice()
    }

    /// Total length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.as_slice().len()
    }

    /// True when the buffer holds no bytes
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of segments (1 when there is no table)
    pub fn segment_count(&self) -> usize {
        self.segment_offsets.as_ref().map_or(1, Vec::len)
    }

    /// Byte offset of the root pointer word (start of segment 0)
    #[inline]
    pub fn root_ptr_offset(&self) -> usize {
        self.segment_offsets
            .as_ref()
            .map_or(0, |offs| offs[0])
    }

    /// End of the segment containing `offset`: the next segment's start, or
    /// the end of the buffer for the last segment. Views validate their
    /// extent against this so that an object cannot silently spill into the
    /// following segment.
    pub(crate) fn segment_end(&self, offset: usize) -> usize {
        match &self.segment_offsets {
            None => self.len(),
            Some(starts) => {
                let idx = starts.partition_point(|&s| s <= offset);
                if idx < starts.len() {
                    starts[idx]
                } else {
                    self.len()
                }
            }
        }
    }

    /// Bounds check a read of `len` bytes at `offset` against the segment
    /// holding `offset`.
    #[inline]
    pub(crate) fn check(&self, offset: usize, len: usize) -> Result<()> {
        let end = self.segment_end(offset);
        match offset.checked_add(len) {
            Some(upper) if upper <= end => Ok(()),
            _ => Err(Error::out_of_bounds(offset, len, end.saturating_sub(offset))),
        }
    }

    /// Read one byte
    #[inline]
    pub fn read_u8(&self, offset: usize) -> Result<u8> {
        self.check(offset, 1)?;
        Ok(unsafe { endian::read_u8(self.as_slice(), offset) })
    }

    /// Read a signed byte
    #[inline]
    pub fn read_i8(&self, offset: usize) -> Result<i8> {
        Ok(self.read_u8(offset)? as i8)
    }

    /// Read a little-endian u16
    #[inline]
    pub fn read_u16(&self, offset: usize) -> Result<u16> {
        self.check(offset, 2)?;
        Ok(unsafe { endian::read_u16_le(self.as_slice(), offset) })
    }

    /// Read a little-endian i16
    #[inline]
    pub fn read_i16(&self, offset: usize) -> Result<i16> {
        Ok(self.read_u16(offset)? as i16)
    }

    /// Read a little-endian u32
    #[inline]
    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        self.check(offset, 4)?;
        Ok(unsafe { endian::read_u32_le(self.as_slice(), offset) })
    }

    /// Read a little-endian i32
    #[inline]
    pub fn read_i32(&self, offset: usize) -> Result<i32> {
        Ok(self.read_u32(offset)? as i32)
    }

    /// Read a little-endian u64
    #[inline]
    pub fn read_u64(&self, offset: usize) -> Result<u64> {
        self.check(offset, 8)?;
        Ok(unsafe { endian::read_u64_le(self.as_slice(), offset) })
    }

    /// Read a little-endian i64
    #[inline]
    pub fn read_i64(&self, offset: usize) -> Result<i64> {
        Ok(self.read_u64(offset)? as i64)
    }

    /// Read a little-endian IEEE 754 single
    #[inline]
    pub fn read_f32(&self, offset: usize) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32(offset)?))
    }

    /// Read a little-endian IEEE 754 double
    #[inline]
    pub fn read_f64(&self, offset: usize) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64(offset)?))
    }

    /// Read one bit
    #[inline]
    pub fn read_bool(&self, offset: usize, bit: u8) -> Result<bool> {
        debug_assert!(bit < 8);
        Ok(self.read_u8(offset)? & (1 << bit) != 0)
    }

    /// Read a raw 64-bit pointer word with no far resolution
    #[inline]
    pub fn read_raw_ptr(&self, offset: usize) -> Result<u64> {
        self.read_u64(offset)
    }

    /// Read the pointer word at `offset`, following at most one far hop.
    ///
    /// Returns the byte offset of the resulting pointer word and the word
    /// itself; for a non-far pointer that is `(offset, word)` unchanged,
    /// for a far pointer it is the landing pad inside the target segment.
    pub fn read_ptr(&self, offset: usize) -> Result<(usize, u64)> {
        let p = self.read_raw_ptr(offset)?;
        if ptr::kind(p) != Kind::Far {
            return Ok((offset, p));
        }
        self.follow_far_ptr(p)
    }

    fn follow_far_ptr(&self, p: u64) -> Result<(usize, u64)> {
        let starts = self
            .segment_offsets
            .as_ref()
            .ok_or(Error::FarInSingleSegment)?;
        if ptr::far_landing_pad(p) != 0 {
            return Err(Error::UnsupportedPointer(
                "double-far landing pad".to_string(),
            ));
        }
        let segment = ptr::far_segment(p) as usize;
        let segment_start = *starts.get(segment).ok_or_else(|| {
            Error::MalformedPointer(format!(
                "far pointer targets segment {} of {}",
                segment,
                starts.len()
            ))
        })?;
        let offset = segment_start + ptr::far_offset(p) as usize * 8;
        let landed = self.read_raw_ptr(offset)?;
        if ptr::kind(landed) == Kind::Far {
            return Err(Error::UnsupportedPointer(
                "far pointer lands on another far pointer".to_string(),
            ));
        }
        Ok((offset, landed))
    }

    /// Read the byte payload of a Text or Data pointer `p` located at
    /// `ptr_offset`. Set `strip_nul` for Text, which excludes the
    /// terminating null byte from the view.
    ///
    /// A null pointer returns `None`; the caller supplies its default.
    pub fn read_str(&self, p: u64, ptr_offset: usize, strip_nul: bool) -> Result<Option<&[u8]>> {
        if p == 0 {
            return Ok(None);
        }
        if ptr::kind(p) != Kind::List {
            return Err(Error::MalformedPointer(format!(
                "expected a byte list pointer, found {:?}",
                ptr::kind(p)
            )));
        }
        if ptr::list_size_tag(p) != ptr::LIST_SIZE_8 {
            return Err(Error::MalformedPointer(format!(
                "byte list has element size tag {}",
                ptr::list_size_tag(p)
            )));
        }
        let start = ptr::deref(p, ptr_offset);
        let mut count = ptr::list_item_count(p) as usize;
        self.check(start, count)?;
        if strip_nul {
            if count == 0 {
                return Err(Error::MalformedPointer(
                    "text is missing its terminating null byte".to_string(),
                ));
            }
            count -= 1;
        }
        Ok(Some(&self.as_slice()[start..start + count]))
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len())
            .field("segments", &self.segment_count())
            .finish()
    }
}

fn validate_offsets(offsets: &[usize], len: usize) -> Result<()> {
    if offsets.is_empty() {
        return Err(Error::MalformedPointer(
            "segment table must name at least one segment".to_string(),
        ));
    }
    let mut prev = 0usize;
    for &start in offsets {
        if start % 8 != 0 || start < prev || start > len {
            return Err(Error::MalformedPointer(format!(
                "bad segment start {} (buffer length {})",
                start, len
            )));
        }
        prev = start;
    }
    Ok(())
}
