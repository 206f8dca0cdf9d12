//! Struct views and pointer navigation
//!
//! A [`StructReader`] is a cheap-to-copy cursor over one struct inside a
//! [`Buffer`]: the byte offset of its data section plus the data/pointer
//! section sizes carried by the pointer that named it. Construction
//! validates the full extent once; field reads after that are straight
//! offset arithmetic.
//!
//! Reads beyond the data section return zero rather than failing. That is
//! what makes schema evolution and null-pointer defaults work: a struct
//! written by an older schema (or the empty view standing in for a null
//! pointer) simply reads all its missing fields as their zero default.

use crate::buffer::Buffer;
use crate::endian;
use crate::error::{Error, Result};
use crate::list::ListReader;
use crate::ptr::{self, Kind};

/// Read-only view of one struct inside a message
#[derive(Clone, Copy)]
pub struct StructReader<'a> {
    buf: &'a Buffer,
    /// Absolute byte offset of the data section
    data_offset: usize,
    /// Data-section size in words
    data_size: u16,
    /// Pointer-section size in words
    ptrs_size: u16,
}

/// Any object a pointer can name, discovered by dispatching on the
/// pointer's kind.
///
/// The wire does not distinguish Text from Data (both are byte lists); a
/// byte list whose final byte is NUL presents as `Text`, anything else as
/// `Data`.
pub enum AnyView<'a> {
    /// A struct view
    Struct(StructReader<'a>),
    /// A list view (any element size except NUL-terminated byte lists)
    List(ListReader<'a>),
    /// A NUL-terminated byte list, terminator stripped
    Text(&'a str),
    /// A raw byte list
    Data(&'a [u8]),
    /// The null pointer
    Null,
}

impl<'a> StructReader<'a> {
    /// Build a view over the struct whose data section starts at `offset`.
    ///
    /// Validates that the full `(data_size + ptrs_size)` word extent lies
    /// inside the owning segment.
    pub fn from_buffer(
        buf: &'a Buffer,
        offset: usize,
        data_size: u16,
        ptrs_size: u16,
    ) -> Result<Self> {
        let extent = (data_size as usize + ptrs_size as usize) * 8;
        buf.check(offset, extent)?;
        Ok(StructReader {
            buf,
            data_offset: offset,
            data_size,
            ptrs_size,
        })
    }

    /// The all-default view a null struct pointer produces: every field
    /// reads as zero, every pointer as null.
    pub fn empty(buf: &'a Buffer) -> Self {
        StructReader {
            buf,
            data_offset: 0,
            data_size: 0,
            ptrs_size: 0,
        }
    }

    /// View of the message's root struct
    pub fn root(buf: &'a Buffer) -> Result<Self> {
        let root = buf.root_ptr_offset();
        let (offset, p) = buf.read_ptr(root)?;
        if p == 0 {
            return Ok(Self::empty(buf));
        }
        if ptr::kind(p) != Kind::Struct {
            return Err(Error::MalformedPointer(format!(
                "root pointer is {:?}, expected a struct",
                ptr::kind(p)
            )));
        }
        Self::from_buffer(
            buf,
            ptr::deref(p, offset),
            ptr::struct_data_size(p),
            ptr::struct_ptrs_size(p),
        )
    }

    /// The buffer this view borrows
    #[inline]
    pub fn buffer(&self) -> &'a Buffer {
        self.buf
    }

    /// Data-section size in words
    #[inline]
    pub fn data_size(&self) -> u16 {
        self.data_size
    }

    /// Pointer-section size in words
    #[inline]
    pub fn ptrs_size(&self) -> u16 {
        self.ptrs_size
    }

    #[inline]
    fn data_len(&self) -> usize {
        self.data_size as usize * 8
    }

    /// Absolute byte offset of pointer slot `offset` bytes into the
    /// pointer section
    #[inline]
    fn ptr_slot(&self, offset: usize) -> usize {
        self.data_offset + self.data_len() + offset
    }

    // -- data-section reads ------------------------------------------------
    //
    // Extent was validated at construction, so the unchecked endian layer
    // is safe once the offset fits the data section.

    /// Read a u8 field at `offset` bytes into the data section
    #[inline]
    pub fn read_u8(&self, offset: usize) -> u8 {
        if offset + 1 <= self.data_len() {
            unsafe { endian::read_u8(self.buf.as_slice(), self.data_offset + offset) }
        } else {
            0
        }
    }

    /// Read an i8 field
    #[inline]
    pub fn read_i8(&self, offset: usize) -> i8 {
        self.read_u8(offset) as i8
    }

    /// Read a u16 field
    #[inline]
    pub fn read_u16(&self, offset: usize) -> u16 {
        if offset + 2 <= self.data_len() {
            unsafe { endian::read_u16_le(self.buf.as_slice(), self.data_offset + offset) }
        } else {
            0
        }
    }

    /// Read an i16 field
    #[inline]
    pub fn read_i16(&self, offset: usize) -> i16 {
        self.read_u16(offset) as i16
    }

    /// Read a u32 field
    #[inline]
    pub fn read_u32(&self, offset: usize) -> u32 {
        if offset + 4 <= self.data_len() {
            unsafe { endian::read_u32_le(self.buf.as_slice(), self.data_offset + offset) }
        } else {
            0
        }
    }

    /// Read an i32 field
    #[inline]
    pub fn read_i32(&self, offset: usize) -> i32 {
        self.read_u32(offset) as i32
    }

    /// Read a u64 field
    #[inline]
    pub fn read_u64(&self, offset: usize) -> u64 {
        if offset + 8 <= self.data_len() {
            unsafe { endian::read_u64_le(self.buf.as_slice(), self.data_offset + offset) }
        } else {
            0
        }
    }

    /// Read an i64 field
    #[inline]
    pub fn read_i64(&self, offset: usize) -> i64 {
        self.read_u64(offset) as i64
    }

    /// Read an f32 field
    #[inline]
    pub fn read_f32(&self, offset: usize) -> f32 {
        f32::from_bits(self.read_u32(offset))
    }

    /// Read an f64 field
    #[inline]
    pub fn read_f64(&self, offset: usize) -> f64 {
        f64::from_bits(self.read_u64(offset))
    }

    /// Read a bool field at absolute bit position `bit` inside the data
    /// section
    #[inline]
    pub fn read_bool(&self, bit: usize) -> bool {
        self.read_u8(bit / 8) & (1 << (bit % 8)) != 0
    }

    /// Read the 16-bit union discriminant stored at `offset` bytes into
    /// the data section
    #[inline]
    pub fn which(&self, offset: usize) -> u16 {
        self.read_u16(offset)
    }

    // -- pointer-section reads ---------------------------------------------

    /// Read the pointer word at `offset` bytes into the pointer section,
    /// following at most one far hop. A slot beyond the pointer section
    /// reads as null.
    pub fn read_ptr(&self, offset: usize) -> Result<(usize, u64)> {
        if offset + 8 > self.ptrs_size as usize * 8 {
            return Ok((0, 0));
        }
        self.buf.read_ptr(self.ptr_slot(offset))
    }

    /// Follow the struct pointer at `offset` bytes into the pointer
    /// section. Null yields `None`; the caller substitutes its default.
    pub fn read_struct(&self, offset: usize) -> Result<Option<StructReader<'a>>> {
        let (ptr_pos, p) = self.read_ptr(offset)?;
        if p == 0 {
            return Ok(None);
        }
        if ptr::kind(p) != Kind::Struct {
            return Err(Error::MalformedPointer(format!(
                "expected a struct pointer, found {:?}",
                ptr::kind(p)
            )));
        }
        Ok(Some(StructReader::from_buffer(
            self.buf,
            ptr::deref(p, ptr_pos),
            ptr::struct_data_size(p),
            ptr::struct_ptrs_size(p),
        )?))
    }

    /// Follow the list pointer at `offset` bytes into the pointer section.
    pub fn read_list(&self, offset: usize) -> Result<Option<ListReader<'a>>> {
        let (ptr_pos, p) = self.read_ptr(offset)?;
        if p == 0 {
            return Ok(None);
        }
        Ok(Some(ListReader::from_ptr(self.buf, ptr_pos, p)?))
    }

    /// Follow the text pointer at `offset` bytes into the pointer section.
    pub fn read_text(&self, offset: usize) -> Result<Option<&'a str>> {
        let (ptr_pos, p) = self.read_ptr(offset)?;
        match self.buf.read_str(p, ptr_pos, true)? {
            None => Ok(None),
            Some(bytes) => std::str::from_utf8(bytes).map(Some).map_err(|_| {
                Error::MalformedPointer("text is not valid UTF-8".to_string())
            }),
        }
    }

    /// Follow the data pointer at `offset` bytes into the pointer section.
    pub fn read_data(&self, offset: usize) -> Result<Option<&'a [u8]>> {
        let (ptr_pos, p) = self.read_ptr(offset)?;
        self.buf.read_str(p, ptr_pos, false)
    }

    /// Follow the pointer at `offset` and dispatch on its kind.
    pub fn read_any(&self, offset: usize) -> Result<AnyView<'a>> {
        let (ptr_pos, p) = self.read_ptr(offset)?;
        any_from_ptr(self.buf, ptr_pos, p)
    }
}

impl std::fmt::Debug for StructReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructReader")
            .field("data_offset", &self.data_offset)
            .field("data_size", &self.data_size)
            .field("ptrs_size", &self.ptrs_size)
            .finish()
    }
}

impl<'a> AnyView<'a> {
    /// Dispatch on the message's root pointer
    pub fn root(buf: &'a Buffer) -> Result<Self> {
        let root = buf.root_ptr_offset();
        let (ptr_pos, p) = buf.read_ptr(root)?;
        any_from_ptr(buf, ptr_pos, p)
    }
}

/// Shared dispatch for [`StructReader::read_any`] and [`AnyView::root`]
fn any_from_ptr<'a>(buf: &'a Buffer, ptr_pos: usize, p: u64) -> Result<AnyView<'a>> {
    if p == 0 {
        return Ok(AnyView::Null);
    }
    match ptr::kind(p) {
        Kind::Struct => Ok(AnyView::Struct(StructReader::from_buffer(
            buf,
            ptr::deref(p, ptr_pos),
            ptr::struct_data_size(p),
            ptr::struct_ptrs_size(p),
        )?)),
        Kind::List if ptr::list_size_tag(p) == ptr::LIST_SIZE_8 => {
            let Some(bytes) = buf.read_str(p, ptr_pos, false)? else {
                return Ok(AnyView::Null);
            };
            match bytes.split_last() {
                Some((0, head)) => match std::str::from_utf8(head) {
                    Ok(text) => Ok(AnyView::Text(text)),
                    Err(_) => Ok(AnyView::Data(bytes)),
                },
                _ => Ok(AnyView::Data(bytes)),
            }
        }
        Kind::List => Ok(AnyView::List(ListReader::from_ptr(buf, ptr_pos, p)?)),
        Kind::Far => Err(Error::UnsupportedPointer(
            "far pointer lands on another far pointer".to_string(),
        )),
        Kind::Other => Err(Error::UnsupportedPointer(
            "capability pointers are not supported".to_string(),
        )),
    }
}
