//! Pointer-word codec
//!
//! Every Cap'n Proto pointer is a 64-bit little-endian word with a 2-bit
//! kind tag in bits 0..1:
//!
//! ```text
//! STRUCT (0): [offset:30 signed][data size:16][ptr size:16]
//! LIST   (1): [offset:30 signed][elem tag:3][count:29]
//! FAR    (2): [pad flag:1][offset:29][segment id:32]
//! OTHER  (3): capabilities - rejected
//! ```
//!
//! Offsets are in words, measured from the end of the pointer word. A word
//! equal to 0 is the null pointer and denotes the field's default value.
//!
//! Everything here is a pure function over `u64`; no buffer access happens
//! at this layer.

use crate::error::{Error, Result};

/// Element-size tag for void elements
pub const LIST_SIZE_VOID: u8 = 0;
/// Element-size tag for single-bit elements
pub const LIST_SIZE_BIT: u8 = 1;
/// Element-size tag for 1-byte elements (also Text and Data)
pub const LIST_SIZE_8: u8 = 2;
/// Element-size tag for 2-byte elements
pub const LIST_SIZE_16: u8 = 3;
/// Element-size tag for 4-byte elements
pub const LIST_SIZE_32: u8 = 4;
/// Element-size tag for 8-byte elements
pub const LIST_SIZE_64: u8 = 5;
/// Element-size tag for pointer elements
pub const LIST_SIZE_PTR: u8 = 6;
/// Element-size tag for composite (inline struct) elements
pub const LIST_SIZE_COMPOSITE: u8 = 7;

/// The 2-bit pointer kind tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Struct pointer
    Struct,
    /// List pointer
    List,
    /// Inter-segment (far) pointer
    Far,
    /// Reserved for capabilities
    Other,
}

/// Extract the kind tag from a pointer word
#[inline(always)]
pub fn kind(p: u64) -> Kind {
    match p & 0b11 {
        0 => Kind::Struct,
        1 => Kind::List,
        2 => Kind::Far,
        _ => Kind::Other,
    }
}

/// Signed word offset of a struct or list pointer (bits 2..31)
#[inline(always)]
pub fn signed_offset(p: u64) -> i32 {
    // Arithmetic shift of the low 32 bits sign-extends the 30-bit field.
    (p as u32 as i32) >> 2
}

/// Data-section size of a struct pointer, in words (bits 32..47)
#[inline(always)]
pub fn struct_data_size(p: u64) -> u16 {
    (p >> 32) as u16
}

/// Pointer-section size of a struct pointer, in words (bits 48..63)
#[inline(always)]
pub fn struct_ptrs_size(p: u64) -> u16 {
    (p >> 48) as u16
}

/// Element-size tag of a list pointer (bits 32..34)
#[inline(always)]
pub fn list_size_tag(p: u64) -> u8 {
    ((p >> 32) & 0b111) as u8
}

/// Element count of a list pointer (bits 35..63)
///
/// For composite lists this is the total word count of the body, not the
/// element count; the element count lives in the leading tag word.
#[inline(always)]
pub fn list_item_count(p: u64) -> u32 {
    (p >> 35) as u32
}

/// Landing-pad flag of a far pointer (bit 2)
#[inline(always)]
pub fn far_landing_pad(p: u64) -> u8 {
    ((p >> 2) & 1) as u8
}

/// Word offset of a far pointer's landing pad inside the target segment
/// (bits 3..31)
#[inline(always)]
pub fn far_offset(p: u64) -> u32 {
    (p as u32) >> 3
}

/// Target segment id of a far pointer (bits 32..63)
#[inline(always)]
pub fn far_segment(p: u64) -> u32 {
    (p >> 32) as u32
}

/// Byte offset of the object a struct or list pointer names
///
/// `ptr_offset` is the byte offset of the pointer word itself. The `+ 8`
/// accounts for offsets being measured from the end of the pointer word.
#[inline(always)]
pub fn deref(p: u64, ptr_offset: usize) -> usize {
    (ptr_offset as isize + 8 + signed_offset(p) as isize * 8) as usize
}

/// Byte width of a list element for tags 2..5; 0 for void/bit, 8 for
/// pointer elements
#[inline]
pub fn element_width(size_tag: u8) -> Result<usize> {
    match size_tag {
        LIST_SIZE_VOID | LIST_SIZE_BIT => Ok(0),
        LIST_SIZE_8 => Ok(1),
        LIST_SIZE_16 => Ok(2),
        LIST_SIZE_32 => Ok(4),
        LIST_SIZE_64 | LIST_SIZE_PTR => Ok(8),
        _ => Err(Error::MalformedPointer(format!(
            "no fixed element width for size tag {}",
            size_tag
        ))),
    }
}

/// Encode a struct pointer
#[inline]
pub fn new_struct(offset_words: i32, data_size: u16, ptrs_size: u16) -> u64 {
    let offset_bits = ((offset_words << 2) as u32) as u64;
    offset_bits | ((data_size as u64) << 32) | ((ptrs_size as u64) << 48)
}

/// Encode a list pointer
#[inline]
pub fn new_list(offset_words: i32, size_tag: u8, item_count: u32) -> u64 {
    let offset_bits = ((offset_words << 2) as u32) as u64;
    offset_bits | 1 | ((size_tag as u64 & 0b111) << 32) | ((item_count as u64) << 35)
}

/// Rewrite only the offset bits of a struct or list pointer so that the
/// word at byte offset `word_at` points at absolute byte offset `target`
///
/// Used when composite-list packing relocates a struct body's out-of-line
/// data: the body bytes are copied verbatim, then every live pointer inside
/// them is retargeted.
#[inline]
pub fn retarget(p: u64, word_at: usize, target: usize) -> u64 {
    debug_assert!(matches!(kind(p), Kind::Struct | Kind::List));
    debug_assert!(word_at % 8 == 0 && target % 8 == 0);
    let offset_words = (target as isize - word_at as isize - 8) / 8;
    let offset_bits = (((offset_words as i32) << 2) as u32) as u64;
    (p & !0xFFFF_FFFCu64) | (offset_bits & 0xFFFF_FFFC)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(bytes: [u8; 8]) -> u64 {
        u64::from_le_bytes(bytes)
    }

    #[test]
    fn test_struct_pointer_decode() {
        // offset = 100 words, data = 2 words, ptrs = 4 words
        let p = word([0x90, 0x01, 0x00, 0x00, 0x02, 0x00, 0x04, 0x00]);
        assert_eq!(kind(p), Kind::Struct);
        assert_eq!(signed_offset(p), 100);
        assert_eq!(struct_data_size(p), 2);
        assert_eq!(struct_ptrs_size(p), 4);
        assert_eq!(deref(p, 0), 808);
    }

    #[test]
    fn test_list_pointer_decode() {
        // composite list: tag 7, 200 words
        let p = word([0x01, 0x00, 0x00, 0x00, 0x47, 0x06, 0x00, 0x00]);
        assert_eq!(kind(p), Kind::List);
        assert_eq!(signed_offset(p), 0);
        assert_eq!(deref(p, 0), 8);
        assert_eq!(list_size_tag(p), LIST_SIZE_COMPOSITE);
        assert_eq!(list_item_count(p), 200);
    }

    #[test]
    fn test_negative_offset() {
        // A pointer may legally point backwards
        let p = new_struct(-3, 1, 0);
        assert_eq!(signed_offset(p), -3);
        assert_eq!(deref(p, 64), 64 + 8 - 24);
    }

    #[test]
    fn test_encode_matches_decode() {
        let p = new_struct(100, 2, 4);
        assert_eq!(
            p.to_le_bytes(),
            [0x90, 0x01, 0x00, 0x00, 0x02, 0x00, 0x04, 0x00]
        );

        let p = new_list(0, LIST_SIZE_COMPOSITE, 200);
        assert_eq!(
            p.to_le_bytes(),
            [0x01, 0x00, 0x00, 0x00, 0x47, 0x06, 0x00, 0x00]
        );
    }

    #[test]
    fn test_far_pointer_fields() {
        // segment 1, word offset 2, no landing-pad flag
        let p = (2u64 << 3) | 2 | (1u64 << 32);
        assert_eq!(kind(p), Kind::Far);
        assert_eq!(far_landing_pad(p), 0);
        assert_eq!(far_offset(p), 2);
        assert_eq!(far_segment(p), 1);
    }

    #[test]
    fn test_retarget_keeps_geometry() {
        let p = new_list(5, LIST_SIZE_8, 11);
        let moved = retarget(p, 16, 96);
        assert_eq!(kind(moved), Kind::List);
        assert_eq!(list_size_tag(moved), LIST_SIZE_8);
        assert_eq!(list_item_count(moved), 11);
        assert_eq!(deref(moved, 16), 96);

        // Backwards targets work too
        let back = retarget(p, 96, 16);
        assert_eq!(deref(back, 96), 16);
    }

    #[test]
    fn test_element_width() {
        assert_eq!(element_width(LIST_SIZE_8).unwrap(), 1);
        assert_eq!(element_width(LIST_SIZE_64).unwrap(), 8);
        assert!(element_width(LIST_SIZE_COMPOSITE).is_err());
    }

    #[test]
    fn test_null_word_is_struct_kind() {
        // Callers must test for 0 before dispatching on kind
        assert_eq!(kind(0), Kind::Struct);
    }
}
