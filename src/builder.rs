//! Message building
//!
//! A [`StructBuilder`] lays out one struct in a growing byte buffer: a
//! fixed `(data_size + ptrs_size) * 8` byte region for the struct itself,
//! followed by an `extra` area where out-of-line objects (text, data,
//! nested structs, lists) are appended as they are allocated. Pointer
//! words are written into the fixed region as each allocation lands, so
//! no back-patching pass is needed at the end.
//!
//! `build()` returns `region + extra` as one byte vector. All pointers
//! inside are relative, which is what makes nesting work: a built struct
//! can be appended verbatim into another builder's extra area and its
//! internal pointers stay valid.
//!
//! Out-of-range offsets are caller bugs (the offsets come from generated
//! code) and panic eagerly.

use crate::endian;
use crate::ptr;

/// Element types that can be packed into a primitive list
pub trait PrimitiveElement: Copy {
    /// Wire element-size tag for lists of this type
    const SIZE_TAG: u8;
    /// Append the little-endian encoding of `self`
    fn write_le(self, out: &mut Vec<u8>);
}

macro_rules! primitive_element {
    ($ty:ty, $tag:expr) => {
        impl PrimitiveElement for $ty {
            const SIZE_TAG: u8 = $tag;
            #[inline]
            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }
        }
    };
}

primitive_element!(u8, ptr::LIST_SIZE_8);
primitive_element!(i8, ptr::LIST_SIZE_8);
primitive_element!(u16, ptr::LIST_SIZE_16);
primitive_element!(i16, ptr::LIST_SIZE_16);
primitive_element!(u32, ptr::LIST_SIZE_32);
primitive_element!(i32, ptr::LIST_SIZE_32);
primitive_element!(u64, ptr::LIST_SIZE_64);
primitive_element!(i64, ptr::LIST_SIZE_64);
primitive_element!(f32, ptr::LIST_SIZE_32);
primitive_element!(f64, ptr::LIST_SIZE_64);

/// Builder for one struct's bytes
pub struct StructBuilder {
    /// The struct's own data + pointer sections, fixed size
    region: Vec<u8>,
    /// Out-of-line objects, appended word-aligned
    extra: Vec<u8>,
    data_size: u16,
    ptrs_size: u16,
}

impl StructBuilder {
    /// Create a builder for a struct of the given section sizes (in words)
    pub fn new(data_size: u16, ptrs_size: u16) -> Self {
        StructBuilder {
            region: vec![0u8; (data_size as usize + ptrs_size as usize) * 8],
            extra: Vec::new(),
            data_size,
            ptrs_size,
        }
    }

    /// Data-section size in words
    pub fn data_size(&self) -> u16 {
        self.data_size
    }

    /// Pointer-section size in words
    pub fn ptrs_size(&self) -> u16 {
        self.ptrs_size
    }

    #[inline]
    fn data_len(&self) -> usize {
        self.data_size as usize * 8
    }

    #[inline]
    fn data_check(&self, offset: usize, len: usize) {
        assert!(
            offset + len <= self.data_len(),
            "write of {} bytes at offset {} leaves the {}-word data section",
            len,
            offset,
            self.data_size
        );
    }

    /// Absolute byte offset of pointer slot `offset` bytes into the
    /// pointer section
    #[inline]
    fn ptr_slot(&self, offset: usize) -> usize {
        assert!(
            offset + 8 <= self.ptrs_size as usize * 8,
            "pointer slot at offset {} leaves the {}-word pointer section",
            offset,
            self.ptrs_size
        );
        self.data_len() + offset
    }

    /// Byte offset where the next out-of-line allocation will land in the
    /// built output
    #[inline]
    fn alloc_pos(&self) -> usize {
        self.region.len() + self.extra.len()
    }

    /// Pad the extra area to a word boundary
    fn pad_extra(&mut self) {
        while self.extra.len() % 8 != 0 {
            self.extra.push(0);
        }
    }

    fn write_ptr_word(&mut self, slot: usize, word: u64) {
        unsafe { endian::write_u64_le(&mut self.region, slot, word) };
    }

    /// Compute the word offset stored in a pointer at `slot` naming an
    /// object at `target`
    #[inline]
    fn offset_words(slot: usize, target: usize) -> i32 {
        ((target as isize - slot as isize) / 8 - 1) as i32
    }

    // -- primitive writes --------------------------------------------------

    /// Write a u8 field
    pub fn set_u8(&mut self, offset: usize, value: u8) {
        self.data_check(offset, 1);
        self.region[offset] = value;
    }

    /// Write an i8 field
    pub fn set_i8(&mut self, offset: usize, value: i8) {
        self.set_u8(offset, value as u8);
    }

    /// Write a u16 field
    pub fn set_u16(&mut self, offset: usize, value: u16) {
        self.data_check(offset, 2);
        unsafe { endian::write_u16_le(&mut self.region, offset, value) };
    }

    /// Write an i16 field
    pub fn set_i16(&mut self, offset: usize, value: i16) {
        self.set_u16(offset, value as u16);
    }

    /// Write a u32 field
    pub fn set_u32(&mut self, offset: usize, value: u32) {
        self.data_check(offset, 4);
        unsafe { endian::write_u32_le(&mut self.region, offset, value) };
    }

    /// Write an i32 field
    pub fn set_i32(&mut self, offset: usize, value: i32) {
        self.set_u32(offset, value as u32);
    }

    /// Write a u64 field
    pub fn set_u64(&mut self, offset: usize, value: u64) {
        self.data_check(offset, 8);
        unsafe { endian::write_u64_le(&mut self.region, offset, value) };
    }

    /// Write an i64 field
    pub fn set_i64(&mut self, offset: usize, value: i64) {
        self.set_u64(offset, value as u64);
    }

    /// Write an f32 field
    pub fn set_f32(&mut self, offset: usize, value: f32) {
        self.set_u32(offset, value.to_bits());
    }

    /// Write an f64 field
    pub fn set_f64(&mut self, offset: usize, value: f64) {
        self.set_u64(offset, value.to_bits());
    }

    /// Write a bool field at absolute bit position `bit` inside the data
    /// section
    pub fn set_bool(&mut self, bit: usize, value: bool) {
        self.data_check(bit / 8, 1);
        if value {
            self.region[bit / 8] |= 1 << (bit % 8);
        } else {
            self.region[bit / 8] &= !(1 << (bit % 8));
        }
    }

    /// Write the union discriminant tag stored at `offset` bytes into the
    /// data section
    pub fn set_tag(&mut self, offset: usize, tag: u16) {
        self.set_u16(offset, tag);
    }

    // -- out-of-line allocations -------------------------------------------

    /// Allocate a Text value and write its pointer at `offset` bytes into
    /// the pointer section. `None` leaves the null pointer in place.
    ///
    /// The bytes are appended with a terminating NUL and padded to a word
    /// boundary; the stored element count includes the NUL.
    pub fn alloc_text(&mut self, offset: usize, value: Option<&str>) {
        let slot = self.ptr_slot(offset);
        let Some(text) = value else { return };
        self.pad_extra();
        let target = self.alloc_pos();
        self.extra.extend_from_slice(text.as_bytes());
        self.extra.push(0);
        self.pad_extra();
        let word = ptr::new_list(
            Self::offset_words(slot, target),
            ptr::LIST_SIZE_8,
            text.len() as u32 + 1,
        );
        self.write_ptr_word(slot, word);
    }

    /// Allocate a Data value and write its pointer at `offset` bytes into
    /// the pointer section. `None` leaves the null pointer in place.
    pub fn alloc_data(&mut self, offset: usize, value: Option<&[u8]>) {
        let slot = self.ptr_slot(offset);
        let Some(bytes) = value else { return };
        self.pad_extra();
        let target = self.alloc_pos();
        self.extra.extend_from_slice(bytes);
        self.pad_extra();
        let word = ptr::new_list(
            Self::offset_words(slot, target),
            ptr::LIST_SIZE_8,
            bytes.len() as u32,
        );
        self.write_ptr_word(slot, word);
    }

    /// Allocate a nested struct and write its pointer at `offset` bytes
    /// into the pointer section.
    ///
    /// `body` is the output of the nested struct's own `build()` with the
    /// given section sizes; it is appended verbatim, internal pointers
    /// staying valid because they are relative.
    pub fn alloc_struct(
        &mut self,
        offset: usize,
        data_size: u16,
        ptrs_size: u16,
        body: Option<&[u8]>,
    ) {
        let slot = self.ptr_slot(offset);
        let Some(body) = body else { return };
        let span = (data_size as usize + ptrs_size as usize) * 8;
        assert!(
            body.len() >= span && body.len() % 8 == 0,
            "struct body of {} bytes does not cover its declared {} words",
            body.len(),
            span / 8
        );
        self.pad_extra();
        let target = self.alloc_pos();
        self.extra.extend_from_slice(body);
        let word = ptr::new_struct(Self::offset_words(slot, target), data_size, ptrs_size);
        self.write_ptr_word(slot, word);
    }

    /// Allocate a tightly packed primitive list and write its pointer at
    /// `offset` bytes into the pointer section.
    pub fn alloc_primitive_list<T: PrimitiveElement>(&mut self, offset: usize, items: &[T]) {
        let slot = self.ptr_slot(offset);
        self.pad_extra();
        let target = self.alloc_pos();
        for item in items {
            item.write_le(&mut self.extra);
        }
        self.pad_extra();
        let word = ptr::new_list(
            Self::offset_words(slot, target),
            T::SIZE_TAG,
            items.len() as u32,
        );
        self.write_ptr_word(slot, word);
    }

    /// Allocate a bit-packed bool list and write its pointer at `offset`
    /// bytes into the pointer section.
    pub fn alloc_bool_list(&mut self, offset: usize, items: &[bool]) {
        let slot = self.ptr_slot(offset);
        self.pad_extra();
        let target = self.alloc_pos();
        let mut byte = 0u8;
        for (i, &bit) in items.iter().enumerate() {
            if bit {
                byte |= 1 << (i % 8);
            }
            if i % 8 == 7 {
                self.extra.push(byte);
                byte = 0;
            }
        }
        if items.len() % 8 != 0 {
            self.extra.push(byte);
        }
        self.pad_extra();
        let word = ptr::new_list(
            Self::offset_words(slot, target),
            ptr::LIST_SIZE_BIT,
            items.len() as u32,
        );
        self.write_ptr_word(slot, word);
    }

    /// Allocate a list of Text values (a pointer list with one text blob
    /// per element) and write its pointer at `offset` bytes into the
    /// pointer section.
    pub fn alloc_text_list(&mut self, offset: usize, items: &[&str]) {
        let slot = self.ptr_slot(offset);
        self.pad_extra();
        let list_start = self.alloc_pos();
        // Reserve the pointer words, then append each string and patch the
        // element pointer that names it.
        self.extra.extend(std::iter::repeat(0u8).take(items.len() * 8));
        for (i, text) in items.iter().enumerate() {
            let elem_slot = list_start + i * 8;
            let target = self.alloc_pos();
            self.extra.extend_from_slice(text.as_bytes());
            self.extra.push(0);
            self.pad_extra();
            let word = ptr::new_list(
                Self::offset_words(elem_slot, target),
                ptr::LIST_SIZE_8,
                text.len() as u32 + 1,
            );
            let at = elem_slot - self.region.len();
            unsafe { endian::write_u64_le(&mut self.extra, at, word) };
        }
        let word = ptr::new_list(
            Self::offset_words(slot, list_start),
            ptr::LIST_SIZE_PTR,
            items.len() as u32,
        );
        self.write_ptr_word(slot, word);
    }

    /// Allocate a composite struct list and write its pointer at `offset`
    /// bytes into the pointer section.
    ///
    /// Each element of `bodies` is the `build()` output of one element
    /// struct with the given per-element sizes. Bodies are packed inline
    /// after a tag word; each body's out-of-line tail is relocated behind
    /// the list and the pointers inside the body retargeted to follow it.
    pub fn alloc_struct_list(
        &mut self,
        offset: usize,
        elem_data_size: u16,
        elem_ptrs_size: u16,
        bodies: &[Vec<u8>],
    ) {
        let slot = self.ptr_slot(offset);
        let span = (elem_data_size as usize + elem_ptrs_size as usize) * 8;
        self.pad_extra();
        let list_start = self.alloc_pos();

        // Tag word: struct-shaped, offset field carries the element count.
        let tag = ptr::new_struct(bodies.len() as i32, elem_data_size, elem_ptrs_size);
        self.extra.extend_from_slice(&tag.to_le_bytes());

        // Inline bodies, pointer words copied as-is for now.
        for body in bodies {
            assert!(
                body.len() >= span && body.len() % 8 == 0,
                "list element body of {} bytes does not cover its declared {} words",
                body.len(),
                span / 8
            );
            self.extra.extend_from_slice(&body[..span]);
        }

        // Relocate each body's out-of-line tail and retarget the pointers
        // that reach into it.
        for (i, body) in bodies.iter().enumerate() {
            let body_start = list_start + 8 + i * span;
            self.pad_extra();
            let tail_start = self.alloc_pos();
            self.extra.extend_from_slice(&body[span..]);

            for ptr_word in 0..elem_ptrs_size as usize {
                let local = elem_data_size as usize * 8 + ptr_word * 8;
                let word = unsafe { endian::read_u64_le(body, local) };
                if word == 0 {
                    continue;
                }
                let src_target = ptr::deref(word, local);
                debug_assert!(src_target >= span, "element pointer targets its own body");
                let abs_slot = body_start + local;
                let abs_target = tail_start + (src_target - span);
                let moved = ptr::retarget(word, abs_slot, abs_target);
                let at = abs_slot - self.region.len();
                unsafe { endian::write_u64_le(&mut self.extra, at, moved) };
            }
        }
        self.pad_extra();

        let word_count = (bodies.len() * span / 8) as u32;
        let word = ptr::new_list(
            Self::offset_words(slot, list_start),
            ptr::LIST_SIZE_COMPOSITE,
            word_count,
        );
        self.write_ptr_word(slot, word);
    }

    /// Finish: the struct region followed by its out-of-line data
    pub fn build(mut self) -> Vec<u8> {
        self.pad_extra();
        let mut out = self.region;
        out.extend_from_slice(&self.extra);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::StructReader;
    use crate::buffer::Buffer;

    /// Wrap a built struct body so `StructReader::from_buffer` can read it
    /// at offset 0 with known sizes
    fn read_back(body: Vec<u8>) -> Buffer {
        Buffer::from_bytes(body)
    }

    #[test]
    fn test_int16_and_text_layout() {
        let mut b = StructBuilder::new(1, 1);
        b.set_i16(0, 7);
        b.alloc_text(0, Some("hi"));
        let bytes = b.build();

        assert_eq!(
            bytes,
            vec![
                0x07, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // data word
                0x01, 0x00, 0x00, 0x00, 0x1a, 0x00, 0x00, 0x00, // text pointer
                0x68, 0x69, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // "hi\0" padded
            ]
        );
    }

    #[test]
    fn test_round_trip_primitives() {
        let mut b = StructBuilder::new(2, 0);
        b.set_u32(0, 0xDEADBEEF);
        b.set_i8(4, -5);
        b.set_bool(40, true);
        b.set_f64(8, 2.5);
        let buf = read_back(b.build());

        let s = StructReader::from_buffer(&buf, 0, 2, 0).unwrap();
        assert_eq!(s.read_u32(0), 0xDEADBEEF);
        assert_eq!(s.read_i8(4), -5);
        assert!(s.read_bool(40));
        assert_eq!(s.read_f64(8), 2.5);
    }

    #[test]
    fn test_null_text_keeps_null_pointer() {
        let mut b = StructBuilder::new(0, 1);
        b.alloc_text(0, None);
        let bytes = b.build();
        assert_eq!(bytes, vec![0u8; 8]);

        let buf = read_back(bytes);
        let s = StructReader::from_buffer(&buf, 0, 0, 1).unwrap();
        assert_eq!(s.read_text(0).unwrap(), None);
    }

    #[test]
    fn test_nested_struct_round_trip() {
        let mut child = StructBuilder::new(1, 1);
        child.set_u64(0, 99);
        child.alloc_text(0, Some("inner"));
        let child_bytes = child.build();

        let mut parent = StructBuilder::new(1, 1);
        parent.set_u64(0, 1);
        parent.alloc_struct(0, 1, 1, Some(&child_bytes));
        let buf = read_back(parent.build());

        let s = StructReader::from_buffer(&buf, 0, 1, 1).unwrap();
        let inner = s.read_struct(0).unwrap().unwrap();
        assert_eq!(inner.read_u64(0), 99);
        assert_eq!(inner.read_text(0).unwrap(), Some("inner"));
    }

    #[test]
    fn test_primitive_list_round_trip() {
        let mut b = StructBuilder::new(0, 1);
        b.alloc_primitive_list(0, &[1u32, 2, 3, 4, 5]);
        let buf = read_back(b.build());

        let s = StructReader::from_buffer(&buf, 0, 0, 1).unwrap();
        let list = s.read_list(0).unwrap().unwrap();
        assert_eq!(list.len(), 5);
        for i in 0..5 {
            assert_eq!(list.get_u32(i).unwrap(), i as u32 + 1);
        }
    }

    #[test]
    fn test_bool_list_round_trip() {
        let bits = [true, false, true, true, false, false, true, false, true];
        let mut b = StructBuilder::new(0, 1);
        b.alloc_bool_list(0, &bits);
        let buf = read_back(b.build());

        let s = StructReader::from_buffer(&buf, 0, 0, 1).unwrap();
        let list = s.read_list(0).unwrap().unwrap();
        assert_eq!(list.len(), bits.len());
        for (i, &bit) in bits.iter().enumerate() {
            assert_eq!(list.get_bool(i).unwrap(), bit);
        }
    }

    #[test]
    fn test_text_list_round_trip() {
        let mut b = StructBuilder::new(0, 1);
        b.alloc_text_list(0, &["alpha", "b", "gamma"]);
        let buf = read_back(b.build());

        let s = StructReader::from_buffer(&buf, 0, 0, 1).unwrap();
        let list = s.read_list(0).unwrap().unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list.get_text(0).unwrap(), Some("alpha"));
        assert_eq!(list.get_text(1).unwrap(), Some("b"));
        assert_eq!(list.get_text(2).unwrap(), Some("gamma"));
    }

    #[test]
    fn test_struct_list_occupies_declared_words() {
        // 3 elements of (1 data, 0 ptr) words: 8-byte tag + 3 * 8 bytes
        let bodies: Vec<Vec<u8>> = (0..3u64)
            .map(|v| {
                let mut e = StructBuilder::new(1, 0);
                e.set_u64(0, v + 10);
                e.build()
            })
            .collect();

        let mut b = StructBuilder::new(0, 1);
        b.alloc_struct_list(0, 1, 0, &bodies);
        let bytes = b.build();
        assert_eq!(bytes.len(), 8 + 8 + 3 * 8);

        let buf = read_back(bytes);
        let s = StructReader::from_buffer(&buf, 0, 0, 1).unwrap();
        let list = s.read_list(0).unwrap().unwrap();
        assert_eq!(list.len(), 3);
        for i in 0..3 {
            assert_eq!(list.get_struct(i).unwrap().read_u64(0), i as u64 + 10);
        }
    }

    #[test]
    fn test_struct_list_relocates_text() {
        // Elements carry text, whose bytes must move behind the list while
        // the element pointers keep working.
        let bodies: Vec<Vec<u8>> = ["one", "two", "three"]
            .iter()
            .map(|t| {
                let mut e = StructBuilder::new(1, 1);
                e.set_u32(0, t.len() as u32);
                e.alloc_text(0, Some(t));
                e.build()
            })
            .collect();

        let mut b = StructBuilder::new(0, 1);
        b.alloc_struct_list(0, 1, 1, &bodies);
        let buf = read_back(b.build());

        let s = StructReader::from_buffer(&buf, 0, 0, 1).unwrap();
        let list = s.read_list(0).unwrap().unwrap();
        assert_eq!(list.len(), 3);
        for (i, t) in ["one", "two", "three"].iter().enumerate() {
            let elem = list.get_struct(i).unwrap();
            assert_eq!(elem.read_u32(0), t.len() as u32);
            assert_eq!(elem.read_text(0).unwrap(), Some(*t));
        }
    }

    #[test]
    #[should_panic(expected = "data section")]
    fn test_write_outside_data_section_panics() {
        let mut b = StructBuilder::new(1, 0);
        b.set_u64(8, 1);
    }

    #[test]
    #[should_panic(expected = "pointer section")]
    fn test_alloc_outside_ptr_section_panics() {
        let mut b = StructBuilder::new(1, 1);
        b.alloc_text(8, Some("x"));
    }
}
