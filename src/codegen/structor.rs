//! Structor: struct constructor emission
//!
//! For each struct the emitter plans one constructor (or one per union
//! variant): every byte of the `(data + ptrs)` region is marked with the
//! field that owns it, overlapping claims are rejected, and the surviving
//! plan is emitted as a `build` function that drives `StructBuilder` with
//! by-offset writes sorted the way the bytes land.
//!
//! Field kinds the builder cannot express yet (bool slots, groups, bare
//! anyPointer) degrade the whole constructor to a stub that returns
//! `Unsupported` when called; the reader side of the struct still works.

use super::writer::CodeWriter;
use crate::schema::model::{Field, FieldKind, Type};

/// One constructor parameter backed by a slot field
struct CtorField {
    /// Mangled parameter name
    param: String,
    /// Schema type of the slot
    ty: Type,
    /// Slot offset in multiples of the element width
    offset: u32,
    /// Rust type name of the struct this slot (or its list element)
    /// references, when applicable
    type_name: Option<String>,
}

/// A planned constructor for one struct (or one union variant)
pub struct Structor {
    fn_name: String,
    data_size: u16,
    ptrs_size: u16,
    fields: Vec<CtorField>,
    /// `(byte offset, value)` of the union tag to append, when the
    /// constructor builds one variant
    tag: Option<(usize, u16)>,
    /// When set, the constructor degrades to a stub with this reason
    unsupported: Option<String>,
}

/// Field info the generator hands to the planner
pub struct PlannedField<'a> {
    /// The schema field
    pub field: &'a Field,
    /// Mangled parameter name
    pub param: String,
    /// Rust type name referenced by the field, for struct slots and
    /// struct-element lists
    pub type_name: Option<String>,
}

impl Structor {
    /// Plan a constructor over the given fields.
    ///
    /// Returns `Err` with a message only for schema corruption (two fields
    /// claiming the same bytes); unsupported field kinds produce a stub
    /// plan instead.
    pub fn plan(
        fn_name: String,
        data_size: u16,
        ptrs_size: u16,
        fields: &[PlannedField<'_>],
        tag: Option<(usize, u16)>,
    ) -> Result<Self, String> {
        let mut planned = Vec::new();
        let mut unsupported = None;

        for pf in fields {
            let slot = match &pf.field.kind {
                FieldKind::Group { .. } => {
                    unsupported = Some(format!("group field {:?}", pf.field.name));
                    break;
                }
                FieldKind::Slot(slot) => slot,
            };
            match &slot.ty {
                Type::Void => continue,
                Type::Bool => {
                    unsupported = Some(format!("bool field {:?}", pf.field.name));
                    break;
                }
                Type::AnyPointer | Type::Interface { .. } => {
                    unsupported = Some(format!("pointer field {:?}", pf.field.name));
                    break;
                }
                Type::List(elem) => {
                    if list_alloc(elem).is_none() {
                        unsupported =
                            Some(format!("list of {:?} field {:?}", elem, pf.field.name));
                        break;
                    }
                }
                _ => {}
            }
            planned.push(CtorField {
                param: pf.param.clone(),
                ty: slot.ty.clone(),
                offset: slot.offset,
                type_name: pf.type_name.clone(),
            });
        }

        let mut structor = Structor {
            fn_name,
            data_size,
            ptrs_size,
            fields: planned,
            tag,
            unsupported,
        };
        if structor.unsupported.is_none() {
            if let Err(message) = structor.check_layout() {
                return Err(message);
            }
        }
        Ok(structor)
    }

    /// Mark every byte each field claims; two claims on one byte mean the
    /// schema is corrupt.
    fn check_layout(&self) -> Result<(), String> {
        let data_len = self.data_size as usize * 8;
        let total = data_len + self.ptrs_size as usize * 8;
        let mut owner = vec![false; total];

        let mut claim = |start: usize, len: usize, who: &str| {
            for b in start..start + len {
                if b >= total {
                    return Err(format!("field {:?} lies outside the struct", who));
                }
                if owner[b] {
                    return Err(format!("field {:?} overlaps another field", who));
                }
                owner[b] = true;
            }
            Ok(())
        };

        for f in &self.fields {
            match &f.ty {
                Type::Text
                | Type::Data
                | Type::List(_)
                | Type::Struct { .. } => {
                    claim(data_len + f.offset as usize * 8, 8, &f.param)?;
                }
                ty => {
                    let width = ty
                        .data_width()
                        .ok_or_else(|| format!("field {:?} has no width", f.param))?;
                    claim(f.offset as usize * width, width, &f.param)?;
                }
            }
        }
        if let Some((tag_offset, _)) = self.tag {
            claim(tag_offset, 2, "discriminant")?;
        }
        Ok(())
    }

    /// Emit the constructor (or its stub) into `w`
    pub fn emit(&self, w: &mut CodeWriter) {
        if let Some(reason) = &self.unsupported {
            w.open(&format!(
                "pub fn {}() -> capnlite::Result<Vec<u8>> {{",
                self.fn_name
            ));
            w.line(&format!(
                "Err(capnlite::Error::Unsupported({:?}.to_string()))",
                reason
            ));
            w.close("}");
            return;
        }

        let params: Vec<String> = self
            .fields
            .iter()
            .map(|f| format!("{}: {}", f.param, param_type(&f.ty)))
            .collect();
        w.open(&format!(
            "pub fn {}({}) -> capnlite::Result<Vec<u8>> {{",
            self.fn_name,
            params.join(", ")
        ));
        w.line(&format!(
            "let mut builder = capnlite::StructBuilder::new({}, {});",
            self.data_size, self.ptrs_size
        ));

        // Primitive writes first, in data-section order, then allocations
        // in pointer-slot order.
        let mut data_fields: Vec<&CtorField> =
            self.fields.iter().filter(|f| f.ty.is_data()).collect();
        data_fields.sort_by_key(|f| f.offset * f.ty.data_width().unwrap_or(1) as u32);
        for f in &data_fields {
            let width = f.ty.data_width().unwrap_or(1);
            let byte = f.offset as usize * width;
            match &f.ty {
                Type::Enum { .. } => w.line(&format!("builder.set_u16({}, {});", byte, f.param)),
                ty => w.line(&format!(
                    "builder.set_{}({}, {});",
                    rust_primitive(ty),
                    byte,
                    f.param
                )),
            }
        }

        let mut ptr_fields: Vec<&CtorField> =
            self.fields.iter().filter(|f| f.ty.is_pointer()).collect();
        ptr_fields.sort_by_key(|f| f.offset);
        for f in &ptr_fields {
            let byte = f.offset as usize * 8;
            match &f.ty {
                Type::Text => w.line(&format!("builder.alloc_text({}, {});", byte, f.param)),
                Type::Data => w.line(&format!("builder.alloc_data({}, {});", byte, f.param)),
                Type::Struct { .. } => {
                    let name = f.type_name.as_deref().unwrap_or("Self");
                    w.line(&format!(
                        "builder.alloc_struct({}, {}::DATA_SIZE, {}::PTRS_SIZE, {});",
                        byte, name, name, f.param
                    ));
                }
                Type::List(elem) => match list_alloc(elem) {
                    Some(ListAlloc::Primitive) => w.line(&format!(
                        "builder.alloc_primitive_list({}, {});",
                        byte, f.param
                    )),
                    Some(ListAlloc::Bool) => {
                        w.line(&format!("builder.alloc_bool_list({}, {});", byte, f.param))
                    }
                    Some(ListAlloc::Text) => {
                        w.line(&format!("builder.alloc_text_list({}, {});", byte, f.param))
                    }
                    Some(ListAlloc::Struct) => {
                        let name = f.type_name.as_deref().unwrap_or("Self");
                        w.line(&format!(
                            "builder.alloc_struct_list({}, {}::DATA_SIZE, {}::PTRS_SIZE, {});",
                            byte, name, name, f.param
                        ));
                    }
                    None => unreachable!("unsupported lists were filtered in plan"),
                },
                _ => {}
            }
        }

        if let Some((tag_offset, tag_value)) = self.tag {
            w.line(&format!("builder.set_tag({}, {});", tag_offset, tag_value));
        }
        w.line("Ok(builder.build())");
        w.close("}");
    }
}

/// How a list field is allocated
enum ListAlloc {
    Primitive,
    Bool,
    Text,
    Struct,
}

fn list_alloc(elem: &Type) -> Option<ListAlloc> {
    match elem {
        Type::Bool => Some(ListAlloc::Bool),
        Type::Text => Some(ListAlloc::Text),
        Type::Struct { .. } => Some(ListAlloc::Struct),
        Type::Enum { .. } => Some(ListAlloc::Primitive),
        ty if ty.data_width().is_some() => Some(ListAlloc::Primitive),
        _ => None,
    }
}

/// The builder setter suffix for a data-section type
fn rust_primitive(ty: &Type) -> &'static str {
    match ty {
        Type::Int8 => "i8",
        Type::Int16 => "i16",
        Type::Int32 => "i32",
        Type::Int64 => "i64",
        Type::Uint8 => "u8",
        Type::Uint16 | Type::Enum { .. } => "u16",
        Type::Uint32 => "u32",
        Type::Uint64 => "u64",
        Type::Float32 => "f32",
        Type::Float64 => "f64",
        _ => unreachable!("not a data-section type"),
    }
}

/// The Rust parameter type for a constructor argument
fn param_type(ty: &Type) -> String {
    match ty {
        Type::Text => "Option<&str>".to_string(),
        Type::Data => "Option<&[u8]>".to_string(),
        Type::Struct { .. } => "Option<&[u8]>".to_string(),
        Type::Enum { .. } => "u16".to_string(),
        Type::List(elem) => match &**elem {
            Type::Bool => "&[bool]".to_string(),
            Type::Text => "&[&str]".to_string(),
            Type::Struct { .. } => "&[Vec<u8>]".to_string(),
            Type::Enum { .. } => "&[u16]".to_string(),
            e => format!("&[{}]", rust_primitive(e)),
        },
        ty => rust_primitive(ty).to_string(),
    }
}
