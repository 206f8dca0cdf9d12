//! List views
//!
//! A [`ListReader`] carries the geometry decoded from a list pointer: the
//! absolute byte offset of the first element, the element-size tag, and the
//! element count. For composite lists (tag 7) the leading tag word - laid
//! out like a struct pointer whose offset field holds the element count -
//! supplies the per-element data/pointer sizes, and elements are inline
//! struct bodies.
//!
//! Element accessors are strict about the wire tag: asking for a u32 out of
//! a 2-byte list is a malformed message, not a conversion.

use crate::blob::StructReader;
use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::ptr::{self, Kind};

/// Read-only view of one list inside a message
#[derive(Clone, Copy)]
pub struct ListReader<'a> {
    buf: &'a Buffer,
    /// Absolute byte offset of element 0 (past the tag word for composite)
    start: usize,
    size_tag: u8,
    count: u32,
    /// Composite element data-section size in words
    elem_data_size: u16,
    /// Composite element pointer-section size in words
    elem_ptrs_size: u16,
}

impl<'a> ListReader<'a> {
    /// Build a view from the list pointer `p` read at byte offset
    /// `ptr_pos`, validating the whole element extent.
    pub fn from_ptr(buf: &'a Buffer, ptr_pos: usize, p: u64) -> Result<Self> {
        if ptr::kind(p) != Kind::List {
            return Err(Error::MalformedPointer(format!(
                "expected a list pointer, found {:?}",
                ptr::kind(p)
            )));
        }
        let start = ptr::deref(p, ptr_pos);
        let size_tag = ptr::list_size_tag(p);
        let raw_count = ptr::list_item_count(p);

        match size_tag {
            ptr::LIST_SIZE_COMPOSITE => {
                let body_words = raw_count as usize;
                buf.check(start, (1 + body_words) * 8)?;
                let tag = buf.read_raw_ptr(start)?;
                if ptr::kind(tag) != Kind::Struct {
                    return Err(Error::MalformedPointer(
                        "composite list tag word is not struct-shaped".to_string(),
                    ));
                }
                let count = ptr::signed_offset(tag);
                if count < 0 {
                    return Err(Error::MalformedPointer(format!(
                        "composite list declares {} elements",
                        count
                    )));
                }
                let elem_data_size = ptr::struct_data_size(tag);
                let elem_ptrs_size = ptr::struct_ptrs_size(tag);
                let span = elem_data_size as usize + elem_ptrs_size as usize;
                if count as usize * span > body_words {
                    return Err(Error::MalformedPointer(format!(
                        "composite list of {} x {}-word elements exceeds its {} words",
                        count, span, body_words
                    )));
                }
                Ok(ListReader {
                    buf,
                    start: start + 8,
                    size_tag,
                    count: count as u32,
                    elem_data_size,
                    elem_ptrs_size,
                })
            }
            ptr::LIST_SIZE_VOID => Ok(ListReader {
                buf,
                start,
                size_tag,
                count: raw_count,
                elem_data_size: 0,
                elem_ptrs_size: 0,
            }),
            ptr::LIST_SIZE_BIT => {
                buf.check(start, (raw_count as usize + 7) / 8)?;
                Ok(ListReader {
                    buf,
                    start,
                    size_tag,
                    count: raw_count,
                    elem_data_size: 0,
                    elem_ptrs_size: 0,
                })
            }
            _ => {
                let width = ptr::element_width(size_tag)?;
                buf.check(start, raw_count as usize * width)?;
                Ok(ListReader {
                    buf,
                    start,
                    size_tag,
                    count: raw_count,
                    elem_data_size: 0,
                    elem_ptrs_size: 0,
                })
            }
        }
    }

    /// Element count
    #[inline]
    pub fn len(&self) -> usize {
        self.count as usize
    }

    /// True when the list holds no elements
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The wire element-size tag
    #[inline]
    pub fn size_tag(&self) -> u8 {
        self.size_tag
    }

    #[inline]
    fn index_check(&self, i: usize) -> Result<()> {
        if i >= self.count as usize {
            return Err(Error::out_of_bounds(i, 1, self.count as usize));
        }
        Ok(())
    }

    #[inline]
    fn tag_check(&self, expected: u8) -> Result<()> {
        if self.size_tag != expected {
            return Err(Error::MalformedPointer(format!(
                "list has element size tag {}, accessor expects {}",
                self.size_tag, expected
            )));
        }
        Ok(())
    }

    /// Read bit element `i`
    pub fn get_bool(&self, i: usize) -> Result<bool> {
        self.index_check(i)?;
        self.tag_check(ptr::LIST_SIZE_BIT)?;
        let byte = self.buf.read_u8(self.start + i / 8)?;
        Ok(byte & (1 << (i % 8)) != 0)
    }

    /// Read 1-byte element `i`
    pub fn get_u8(&self, i: usize) -> Result<u8> {
        self.index_check(i)?;
        self.tag_check(ptr::LIST_SIZE_8)?;
        self.buf.read_u8(self.start + i)
    }

    /// Read 1-byte element `i` as signed
    pub fn get_i8(&self, i: usize) -> Result<i8> {
        Ok(self.get_u8(i)? as i8)
    }

    /// Read 2-byte element `i`
    pub fn get_u16(&self, i: usize) -> Result<u16> {
        self.index_check(i)?;
        self.tag_check(ptr::LIST_SIZE_16)?;
        self.buf.read_u16(self.start + i * 2)
    }

    /// Read 2-byte element `i` as signed
    pub fn get_i16(&self, i: usize) -> Result<i16> {
        Ok(self.get_u16(i)? as i16)
    }

    /// Read 4-byte element `i`
    pub fn get_u32(&self, i: usize) -> Result<u32> {
        self.index_check(i)?;
        self.tag_check(ptr::LIST_SIZE_32)?;
        self.buf.read_u32(self.start + i * 4)
    }

    /// Read 4-byte element `i` as signed
    pub fn get_i32(&self, i: usize) -> Result<i32> {
        Ok(self.get_u32(i)? as i32)
    }

    /// Read 8-byte element `i`
    pub fn get_u64(&self, i: usize) -> Result<u64> {
        self.index_check(i)?;
        self.tag_check(ptr::LIST_SIZE_64)?;
        self.buf.read_u64(self.start + i * 8)
    }

    /// Read 8-byte element `i` as signed
    pub fn get_i64(&self, i: usize) -> Result<i64> {
        Ok(self.get_u64(i)? as i64)
    }

    /// Read 4-byte element `i` as an IEEE 754 single
    pub fn get_f32(&self, i: usize) -> Result<f32> {
        Ok(f32::from_bits(self.get_u32(i)?))
    }

    /// Read 8-byte element `i` as an IEEE 754 double
    pub fn get_f64(&self, i: usize) -> Result<f64> {
        Ok(f64::from_bits(self.get_u64(i)?))
    }

    /// Read pointer element `i` as text. Null yields `None`.
    pub fn get_text(&self, i: usize) -> Result<Option<&'a str>> {
        let (ptr_pos, p) = self.get_ptr(i)?;
        match self.buf.read_str(p, ptr_pos, true)? {
            None => Ok(None),
            Some(bytes) => std::str::from_utf8(bytes).map(Some).map_err(|_| {
                Error::MalformedPointer("text is not valid UTF-8".to_string())
            }),
        }
    }

    /// Read pointer element `i` as a raw byte blob. Null yields `None`.
    pub fn get_data(&self, i: usize) -> Result<Option<&'a [u8]>> {
        let (ptr_pos, p) = self.get_ptr(i)?;
        self.buf.read_str(p, ptr_pos, false)
    }

    /// Read element `i` as a struct view.
    ///
    /// Composite lists return the inline body; pointer lists follow the
    /// element pointer, with null reading as the all-default view.
    pub fn get_struct(&self, i: usize) -> Result<StructReader<'a>> {
        self.index_check(i)?;
        match self.size_tag {
            ptr::LIST_SIZE_COMPOSITE => {
                let span = (self.elem_data_size as usize + self.elem_ptrs_size as usize) * 8;
                StructReader::from_buffer(
                    self.buf,
                    self.start + i * span,
                    self.elem_data_size,
                    self.elem_ptrs_size,
                )
            }
            ptr::LIST_SIZE_PTR => {
                let (ptr_pos, p) = self.buf.read_ptr(self.start + i * 8)?;
                if p == 0 {
                    return Ok(StructReader::empty(self.buf));
                }
                if ptr::kind(p) != Kind::Struct {
                    return Err(Error::MalformedPointer(format!(
                        "list element {} is {:?}, expected a struct",
                        i,
                        ptr::kind(p)
                    )));
                }
                StructReader::from_buffer(
                    self.buf,
                    ptr::deref(p, ptr_pos),
                    ptr::struct_data_size(p),
                    ptr::struct_ptrs_size(p),
                )
            }
            tag => Err(Error::MalformedPointer(format!(
                "list with element size tag {} holds no structs",
                tag
            ))),
        }
    }

    /// Read pointer element `i` as a nested list. Null yields `None`.
    pub fn get_list(&self, i: usize) -> Result<Option<ListReader<'a>>> {
        let (ptr_pos, p) = self.get_ptr(i)?;
        if p == 0 {
            return Ok(None);
        }
        Ok(Some(ListReader::from_ptr(self.buf, ptr_pos, p)?))
    }

    fn get_ptr(&self, i: usize) -> Result<(usize, u64)> {
        self.index_check(i)?;
        self.tag_check(ptr::LIST_SIZE_PTR)?;
        self.buf.read_ptr(self.start + i * 8)
    }
}

impl std::fmt::Debug for ListReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListReader")
            .field("start", &self.start)
            .field("size_tag", &self.size_tag)
            .field("count", &self.count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ptr::{new_list, new_struct};

    fn list_buffer(p: u64, payload: &[u8]) -> Buffer {
        let mut bytes = p.to_le_bytes().to_vec();
        bytes.extend_from_slice(payload);
        Buffer::from_bytes(bytes)
    }

    #[test]
    fn test_u32_elements() {
        let p = new_list(0, ptr::LIST_SIZE_32, 3);
        let mut payload = Vec::new();
        for v in [10u32, 20, 30] {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        payload.extend_from_slice(&[0; 4]); // word padding
        let buf = list_buffer(p, &payload);

        let list = ListReader::from_ptr(&buf, 0, buf.read_raw_ptr(0).unwrap()).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list.get_u32(0).unwrap(), 10);
        assert_eq!(list.get_u32(2).unwrap(), 30);
        assert!(list.get_u32(3).is_err());
        // wrong-width accessor is rejected
        assert!(list.get_u64(0).is_err());
    }

    #[test]
    fn test_bit_elements() {
        let p = new_list(0, ptr::LIST_SIZE_BIT, 10);
        // bits 0,3,9 set
        let buf = list_buffer(p, &[0b0000_1001, 0b0000_0010, 0, 0, 0, 0, 0, 0]);
        let list = ListReader::from_ptr(&buf, 0, buf.read_raw_ptr(0).unwrap()).unwrap();
        assert!(list.get_bool(0).unwrap());
        assert!(!list.get_bool(1).unwrap());
        assert!(list.get_bool(3).unwrap());
        assert!(list.get_bool(9).unwrap());
        assert!(list.get_bool(10).is_err());
    }

    #[test]
    fn test_composite_elements() {
        // two elements of one data word each
        let p = new_list(0, ptr::LIST_SIZE_COMPOSITE, 2);
        let tag = new_struct(2, 1, 0);
        let mut payload = tag.to_le_bytes().to_vec();
        payload.extend_from_slice(&11u64.to_le_bytes());
        payload.extend_from_slice(&22u64.to_le_bytes());
        let buf = list_buffer(p, &payload);

        let list = ListReader::from_ptr(&buf, 0, buf.read_raw_ptr(0).unwrap()).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.get_struct(0).unwrap().read_u64(0), 11);
        assert_eq!(list.get_struct(1).unwrap().read_u64(0), 22);
        assert!(list.get_struct(2).is_err());
    }

    #[test]
    fn test_composite_undersized_body_rejected() {
        // tag claims 3 elements of 1 word but the pointer carries 2 words
        let p = new_list(0, ptr::LIST_SIZE_COMPOSITE, 2);
        let tag = new_struct(3, 1, 0);
        let mut payload = tag.to_le_bytes().to_vec();
        payload.extend_from_slice(&[0; 16]);
        let buf = list_buffer(p, &payload);
        assert!(matches!(
            ListReader::from_ptr(&buf, 0, buf.read_raw_ptr(0).unwrap()),
            Err(Error::MalformedPointer(_))
        ));
    }

    #[test]
    fn test_text_elements() {
        // list of two pointers, each to a text
        let p = new_list(0, ptr::LIST_SIZE_PTR, 2);
        let mut payload = Vec::new();
        // element 0 at word 1, points to word 3
        payload.extend_from_slice(&new_list(1, ptr::LIST_SIZE_8, 3).to_le_bytes());
        // element 1 at word 2, null
        payload.extend_from_slice(&0u64.to_le_bytes());
        payload.extend_from_slice(b"hi\0\0\0\0\0\0");
        let buf = list_buffer(p, &payload);

        let list = ListReader::from_ptr(&buf, 0, buf.read_raw_ptr(0).unwrap()).unwrap();
        assert_eq!(list.get_text(0).unwrap(), Some("hi"));
        assert_eq!(list.get_text(1).unwrap(), None);
    }

    #[test]
    fn test_extent_validated_at_construction() {
        // claims 100 u64 elements over an 8-byte payload
        let p = new_list(0, ptr::LIST_SIZE_64, 100);
        let buf = list_buffer(p, &[0; 8]);
        assert!(matches!(
            ListReader::from_ptr(&buf, 0, buf.read_raw_ptr(0).unwrap()),
            Err(Error::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_void_list() {
        let p = new_list(0, ptr::LIST_SIZE_VOID, 1000);
        let buf = list_buffer(p, &[]);
        let list = ListReader::from_ptr(&buf, 0, buf.read_raw_ptr(0).unwrap()).unwrap();
        assert_eq!(list.len(), 1000);
    }
}
