//! Rust source emission from a parsed schema
//!
//! The generator walks the node forest of a [`Schema`] and produces one
//! self-contained Rust module: a zero-copy view struct with one accessor
//! per field for every struct node, an enum with value/name tables for
//! every enum node, a `pub const` for every const node, and a `build`
//! constructor (the structor) per struct or union variant. Generated code
//! depends only on this crate's public reader/builder surface; accessors
//! compile down to offset arithmetic over the message buffer.
//!
//! Emission is deterministic: nodes are visited in the order the request
//! lists them, so identical requests produce identical source.

pub mod names;
pub mod structor;
pub mod writer;

use crate::schema::model::{
    EnumNode, Field, FieldKind, Node, NodeKind, Schema, SlotField, StructNode, Type, Value,
};
use names::{from_camel_case, mangle, to_pascal_case, RUST_RESERVED};
use rustc_hash::FxHashMap;
use std::fmt;
use structor::{PlannedField, Structor};
use writer::CodeWriter;

/// Emission failure, tagged with the node that caused it
#[derive(Debug, Clone)]
pub struct CodegenError {
    /// Id of the offending node
    pub node_id: u64,
    /// What went wrong
    pub message: String,
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "code generation failed at node {:#018x}: {}",
            self.node_id, self.message
        )
    }
}

impl std::error::Error for CodegenError {}

/// Walks a schema forest and emits a Rust module
pub struct ModuleGenerator<'s> {
    schema: &'s Schema,
    convert_case: bool,
    reserved: &'static [&'static str],
    type_names: FxHashMap<u64, String>,
}

impl<'s> ModuleGenerator<'s> {
    /// Create a generator targeting Rust's reserved-word set
    pub fn new(schema: &'s Schema, convert_case: bool) -> Self {
        Self::with_reserved(schema, convert_case, RUST_RESERVED)
    }

    /// Create a generator with a caller-supplied reserved-word set
    pub fn with_reserved(
        schema: &'s Schema,
        convert_case: bool,
        reserved: &'static [&'static str],
    ) -> Self {
        ModuleGenerator {
            schema,
            convert_case,
            reserved,
            type_names: FxHashMap::default(),
        }
    }

    /// Emit the complete module source
    pub fn generate(&mut self) -> Result<String, CodegenError> {
        let mut w = CodeWriter::new();

        w.line("// Generated by capnlite. Do not edit.");
        for file in &self.schema.requested_files {
            w.line(&format!("// Source: {}", file.filename));
            for (id, name) in &file.imports {
                w.line(&format!("// Import: {} ({:#018x})", name, id));
            }
        }
        w.line("#![allow(dead_code, unused_imports, clippy::all)]");
        w.blank();
        w.line("use capnlite::{AnyView, Buffer, ListReader, StructReader};");
        w.blank();

        let schema = self.schema;
        for file in &schema.requested_files {
            let node = self.node(file.id)?;
            if !matches!(node.kind, NodeKind::File) {
                return Err(CodegenError {
                    node_id: file.id,
                    message: "requested file id does not name a file node".to_string(),
                });
            }
            self.emit_scope(&mut w, file.id)?;
        }

        Ok(w.finish())
    }

    fn node(&self, id: u64) -> Result<&'s Node, CodegenError> {
        self.schema.node(id).ok_or_else(|| CodegenError {
            node_id: id,
            message: "node id is not present in the request".to_string(),
        })
    }

    /// Emit every node declared under `scope_id`, in request order
    fn emit_scope(&mut self, w: &mut CodeWriter, scope_id: u64) -> Result<(), CodegenError> {
        let schema = self.schema;
        for &child_id in schema.children_of(scope_id) {
            let child = self.node(child_id)?;
            match &child.kind {
                NodeKind::Struct(st) => {
                    self.emit_struct(w, child, st)?;
                    self.emit_scope(w, child_id)?;
                }
                NodeKind::Enum(en) => self.emit_enum(w, child, en)?,
                NodeKind::Const { ty, value } => self.emit_const(w, child, ty, value)?,
                // No code for interfaces or annotation declarations; their
                // nested types still get emitted.
                NodeKind::Interface | NodeKind::Annotation => self.emit_scope(w, child_id)?,
                NodeKind::File => {}
            }
        }
        Ok(())
    }

    /// Rust type name for a node: scope names concatenated, file prefix
    /// dropped
    fn type_name(&mut self, id: u64) -> Result<String, CodegenError> {
        if let Some(name) = self.type_names.get(&id) {
            return Ok(name.clone());
        }
        let node = self.node(id)?;
        let name = match node.kind {
            NodeKind::File => String::new(),
            _ => {
                let prefix = self.type_name(node.scope_id)?;
                let short = node
                    .display_name
                    .rsplit(['.', ':'])
                    .next()
                    .unwrap_or(&node.display_name);
                format!("{}{}", prefix, to_pascal_case(short))
            }
        };
        self.type_names.insert(id, name.clone());
        Ok(name)
    }

    fn field_name(&self, field: &Field) -> String {
        let name = if self.convert_case {
            from_camel_case(&field.name)
        } else {
            field.name.clone()
        };
        mangle(&name, self.reserved).into_owned()
    }

    fn emit_struct(
        &mut self,
        w: &mut CodeWriter,
        node: &Node,
        st: &StructNode,
    ) -> Result<(), CodegenError> {
        let name = self.type_name(node.id)?;

        w.line(&format!("/// Reader for `{}`", node.short_name()));
        w.line("#[derive(Clone, Copy, Debug)]");
        w.open(&format!("pub struct {}<'a> {{", name));
        w.line("reader: StructReader<'a>,");
        w.close("}");
        w.blank();

        w.open(&format!("impl<'a> {}<'a> {{", name));
        w.line(&format!(
            "pub const DATA_SIZE: u16 = {};",
            st.data_word_count
        ));
        w.line(&format!("pub const PTRS_SIZE: u16 = {};", st.pointer_count));
        w.blank();
        w.open("pub fn from_buffer(buf: &'a Buffer, offset: usize, data_size: u16, ptrs_size: u16) -> capnlite::Result<Self> {");
        w.line("Ok(Self { reader: StructReader::from_buffer(buf, offset, data_size, ptrs_size)? })");
        w.close("}");
        if !st.is_group {
            w.blank();
            w.open("pub fn from_root(buf: &'a Buffer) -> capnlite::Result<Self> {");
            w.line("Ok(Self { reader: StructReader::root(buf)? })");
            w.close("}");
        }
        w.blank();
        w.open("pub fn reader(&self) -> &StructReader<'a> {");
        w.line("&self.reader");
        w.close("}");

        if st.has_union() {
            w.blank();
            w.open("pub fn which(&self) -> u16 {");
            w.line(&format!(
                "self.reader.which({})",
                st.discriminant_byte_offset()
            ));
            w.close("}");
        }

        for field in &st.fields {
            self.emit_field_accessor(w, node, field)?;
        }

        self.emit_structors(w, node, st)?;

        w.close("}");
        w.blank();
        Ok(())
    }

    fn emit_field_accessor(
        &mut self,
        w: &mut CodeWriter,
        node: &Node,
        field: &Field,
    ) -> Result<(), CodegenError> {
        let fname = self.field_name(field);
        let guard = field.is_union_member().then_some(field.discriminant_value);

        let slot = match &field.kind {
            FieldKind::Group { type_id } => {
                let group_name = self.type_name(*type_id)?;
                w.blank();
                match guard {
                    None => {
                        w.open(&format!(
                            "pub fn {}(&self) -> {}<'a> {{",
                            fname, group_name
                        ));
                        w.line(&format!("{} {{ reader: self.reader }}", group_name));
                        w.close("}");
                    }
                    Some(tag) => {
                        w.open(&format!(
                            "pub fn {}(&self) -> capnlite::Result<{}<'a>> {{",
                            fname, group_name
                        ));
                        self.emit_guard(w, tag);
                        w.line(&format!("Ok({} {{ reader: self.reader }})", group_name));
                        w.close("}");
                    }
                }
                return Ok(());
            }
            FieldKind::Slot(slot) => slot,
        };

        // A void slot only matters as a union variant marker.
        if slot.ty == Type::Void {
            if let Some(tag) = guard {
                w.blank();
                w.open(&format!(
                    "pub fn {}(&self) -> capnlite::Result<()> {{",
                    fname
                ));
                self.emit_guard(w, tag);
                w.line("Ok(())");
                w.close("}");
            }
            return Ok(());
        }

        let (ret, body) = self.accessor_body(node, slot)?;
        w.blank();
        match guard {
            None if slot.ty.is_data() => {
                w.open(&format!("pub fn {}(&self) -> {} {{", fname, ret));
                w.line(&body);
                w.close("}");
            }
            None => {
                w.open(&format!(
                    "pub fn {}(&self) -> capnlite::Result<{}> {{",
                    fname, ret
                ));
                w.line(&body);
                w.close("}");
            }
            Some(tag) => {
                w.open(&format!(
                    "pub fn {}(&self) -> capnlite::Result<{}> {{",
                    fname, ret
                ));
                self.emit_guard(w, tag);
                if slot.ty.is_data() {
                    w.line(&format!("Ok({})", body));
                } else {
                    w.line(&body);
                }
                w.close("}");
            }
        }

        // Struct-element lists get an indexed convenience accessor.
        if let Type::List(elem) = &slot.ty {
            if let Type::Struct { type_id } = &**elem {
                let elem_name = self.type_name(*type_id)?;
                let offset = slot.offset as usize * 8;
                w.blank();
                w.open(&format!(
                    "pub fn {}_at(&self, i: usize) -> capnlite::Result<{}<'a>> {{",
                    fname, elem_name
                ));
                if let Some(tag) = guard {
                    self.emit_guard(w, tag);
                }
                w.open(&format!(
                    "match self.reader.read_list({})? {{",
                    offset
                ));
                w.line(&format!(
                    "Some(list) => Ok({} {{ reader: list.get_struct(i)? }}),",
                    elem_name
                ));
                w.line("None => Err(capnlite::Error::OutOfBounds { offset: i, len: 1, available: 0 }),");
                w.close("}");
                w.close("}");
            }
        }

        Ok(())
    }

    fn emit_guard(&self, w: &mut CodeWriter, tag: u16) {
        w.line("let tag = self.which();");
        w.open(&format!("if tag != {} {{", tag));
        w.line(&format!(
            "return Err(capnlite::Error::WrongUnionVariant {{ expected: {}, actual: tag }});",
            tag
        ));
        w.close("}");
    }

    /// Return type and body expression for a slot accessor (no union guard)
    fn accessor_body(
        &mut self,
        node: &Node,
        slot: &SlotField,
    ) -> Result<(String, String), CodegenError> {
        Ok(match &slot.ty {
            Type::Bool => (
                "bool".to_string(),
                format!("self.reader.read_bool({})", slot.offset),
            ),
            Type::Int8 => data_accessor(slot, "i8", 1),
            Type::Int16 => data_accessor(slot, "i16", 2),
            Type::Int32 => data_accessor(slot, "i32", 4),
            Type::Int64 => data_accessor(slot, "i64", 8),
            Type::Uint8 => data_accessor(slot, "u8", 1),
            Type::Uint16 => data_accessor(slot, "u16", 2),
            Type::Uint32 => data_accessor(slot, "u32", 4),
            Type::Uint64 => data_accessor(slot, "u64", 8),
            Type::Float32 => data_accessor(slot, "f32", 4),
            Type::Float64 => data_accessor(slot, "f64", 8),
            Type::Enum { type_id } => {
                let enum_name = self.type_name(*type_id)?;
                (
                    format!("Option<{}>", enum_name),
                    format!(
                        "{}::from_value(self.reader.read_u16({}))",
                        enum_name,
                        slot.offset as usize * 2
                    ),
                )
            }
            Type::Text => {
                let default = match &slot.default_value {
                    Some(Value::Text(s)) if slot.had_explicit_default => s.clone(),
                    _ => String::new(),
                };
                (
                    "&'a str".to_string(),
                    format!(
                        "Ok(self.reader.read_text({})?.unwrap_or({:?}))",
                        slot.offset as usize * 8,
                        default
                    ),
                )
            }
            Type::Data => {
                let default = match &slot.default_value {
                    Some(Value::Data(bytes)) if slot.had_explicit_default => {
                        byte_string_literal(bytes)
                    }
                    _ => "b\"\"".to_string(),
                };
                (
                    "&'a [u8]".to_string(),
                    format!(
                        "Ok(self.reader.read_data({})?.unwrap_or({}))",
                        slot.offset as usize * 8,
                        default
                    ),
                )
            }
            Type::Struct { type_id } => {
                let child = self.type_name(*type_id)?;
                (
                    format!("{}<'a>", child),
                    format!(
                        "Ok({} {{ reader: self.reader.read_struct({})?.unwrap_or_else(|| StructReader::empty(self.reader.buffer())) }})",
                        child,
                        slot.offset as usize * 8
                    ),
                )
            }
            Type::List(_) => (
                "Option<ListReader<'a>>".to_string(),
                format!("self.reader.read_list({})", slot.offset as usize * 8),
            ),
            Type::AnyPointer | Type::Interface { .. } => (
                "AnyView<'a>".to_string(),
                format!("self.reader.read_any({})", slot.offset as usize * 8),
            ),
            Type::Void => {
                return Err(CodegenError {
                    node_id: node.id,
                    message: "void slot reached the accessor emitter".to_string(),
                })
            }
        })
    }

    fn emit_structors(
        &mut self,
        w: &mut CodeWriter,
        node: &Node,
        st: &StructNode,
    ) -> Result<(), CodegenError> {
        if st.is_group {
            return Ok(());
        }

        let plan_fields = |gen: &mut Self,
                           fields: Vec<&Field>|
         -> Result<Vec<(String, Option<String>)>, CodegenError> {
            let mut seen = std::collections::HashSet::new();
            let mut out = Vec::new();
            for f in &fields {
                let param = gen.field_name(f);
                if !seen.insert(param.clone()) {
                    return Err(CodegenError {
                        node_id: node.id,
                        message: format!("duplicate field name {:?}", param),
                    });
                }
                let type_name = match &f.kind {
                    FieldKind::Slot(slot) => match &slot.ty {
                        Type::Struct { type_id } => Some(gen.type_name(*type_id)?),
                        Type::List(elem) => match &**elem {
                            Type::Struct { type_id } => Some(gen.type_name(*type_id)?),
                            _ => None,
                        },
                        _ => None,
                    },
                    FieldKind::Group { .. } => None,
                };
                out.push((param, type_name));
            }
            Ok(out)
        };

        let emit_one = |w: &mut CodeWriter,
                        fn_name: String,
                        fields: Vec<&Field>,
                        names: Vec<(String, Option<String>)>,
                        tag: Option<(usize, u16)>|
         -> Result<(), CodegenError> {
            let planned: Vec<PlannedField<'_>> = fields
                .iter()
                .zip(names.iter())
                .map(|(&f, (param, type_name))| PlannedField {
                    field: f,
                    param: param.clone(),
                    type_name: type_name.clone(),
                })
                .collect();
            let structor = Structor::plan(
                fn_name,
                st.data_word_count,
                st.pointer_count,
                &planned,
                tag,
            )
            .map_err(|message| CodegenError {
                node_id: node.id,
                message,
            })?;
            w.blank();
            structor.emit(w);
            Ok(())
        };

        if !st.has_union() {
            let fields: Vec<&Field> = st.fields.iter().collect();
            let names = plan_fields(self, fields.clone())?;
            emit_one(w, "build".to_string(), fields, names, None)?;
            return Ok(());
        }

        // One constructor per union variant: the shared fields plus that
        // variant's field, tag appended last.
        let shared: Vec<&Field> = st
            .fields
            .iter()
            .filter(|f| !f.is_union_member())
            .collect();
        for variant in st.fields.iter().filter(|f| f.is_union_member()) {
            let variant_snake = if self.convert_case {
                from_camel_case(&variant.name)
            } else {
                variant.name.clone()
            };
            let mut fields = shared.clone();
            // Void variants carry no payload; the tag alone selects them.
            let is_void_slot = matches!(
                &variant.kind,
                FieldKind::Slot(slot) if slot.ty == Type::Void
            );
            if !is_void_slot {
                fields.push(variant);
            }
            let names = plan_fields(self, fields.clone())?;
            emit_one(
                w,
                format!("build_{}", variant_snake),
                fields,
                names,
                Some((st.discriminant_byte_offset(), variant.discriminant_value)),
            )?;
        }
        Ok(())
    }

    fn emit_enum(
        &mut self,
        w: &mut CodeWriter,
        node: &Node,
        en: &EnumNode,
    ) -> Result<(), CodegenError> {
        let name = self.type_name(node.id)?;

        w.line(&format!("/// Values of `{}`", node.short_name()));
        w.line("#[derive(Debug, Clone, Copy, PartialEq, Eq)]");
        w.open(&format!("pub enum {} {{", name));
        for (value, e) in en.enumerants.iter().enumerate() {
            w.line(&format!("{} = {},", to_pascal_case(&e.name), value));
        }
        w.close("}");
        w.blank();

        w.open(&format!("impl {} {{", name));
        w.open("pub fn from_value(value: u16) -> Option<Self> {");
        w.open("match value {");
        for (value, e) in en.enumerants.iter().enumerate() {
            w.line(&format!(
                "{} => Some({}::{}),",
                value,
                name,
                to_pascal_case(&e.name)
            ));
        }
        w.line("_ => None,");
        w.close("}");
        w.close("}");
        w.blank();
        w.open("pub fn value(self) -> u16 {");
        w.line("self as u16");
        w.close("}");
        w.blank();
        w.open("pub fn name(self) -> &'static str {");
        w.open("match self {");
        for e in &en.enumerants {
            w.line(&format!(
                "{}::{} => {:?},",
                name,
                to_pascal_case(&e.name),
                e.name
            ));
        }
        w.close("}");
        w.close("}");
        w.blank();
        w.open("pub fn from_name(name: &str) -> Option<Self> {");
        w.open("match name {");
        for e in &en.enumerants {
            w.line(&format!(
                "{:?} => Some({}::{}),",
                e.name,
                name,
                to_pascal_case(&e.name)
            ));
        }
        w.line("_ => None,");
        w.close("}");
        w.close("}");
        w.close("}");
        w.blank();
        Ok(())
    }

    fn emit_const(
        &mut self,
        w: &mut CodeWriter,
        node: &Node,
        ty: &Type,
        value: &Value,
    ) -> Result<(), CodegenError> {
        let short = node
            .display_name
            .rsplit(['.', ':'])
            .next()
            .unwrap_or(&node.display_name);
        let const_name = from_camel_case(short).to_ascii_uppercase();

        let (rust_ty, literal) = match (ty, value) {
            (Type::Bool, Value::Bool(v)) => ("bool".to_string(), v.to_string()),
            (Type::Int8, Value::Int8(v)) => ("i8".to_string(), v.to_string()),
            (Type::Int16, Value::Int16(v)) => ("i16".to_string(), v.to_string()),
            (Type::Int32, Value::Int32(v)) => ("i32".to_string(), v.to_string()),
            (Type::Int64, Value::Int64(v)) => ("i64".to_string(), v.to_string()),
            (Type::Uint8, Value::Uint8(v)) => ("u8".to_string(), v.to_string()),
            (Type::Uint16, Value::Uint16(v)) => ("u16".to_string(), v.to_string()),
            (Type::Uint32, Value::Uint32(v)) => ("u32".to_string(), v.to_string()),
            (Type::Uint64, Value::Uint64(v)) => ("u64".to_string(), v.to_string()),
            (Type::Float32, Value::Float32(v)) => {
                ("f32".to_string(), float_literal(*v as f64, "f32"))
            }
            (Type::Float64, Value::Float64(v)) => ("f64".to_string(), float_literal(*v, "f64")),
            (Type::Text, Value::Text(v)) => ("&str".to_string(), format!("{:?}", v)),
            (Type::Data, Value::Data(v)) => ("&[u8]".to_string(), byte_string_literal(v)),
            (Type::Enum { .. }, Value::Enum(v)) => ("u16".to_string(), v.to_string()),
            _ => {
                w.line(&format!(
                    "// const {} has a pointer-typed value and is not emitted",
                    const_name
                ));
                w.blank();
                return Ok(());
            }
        };
        w.line(&format!(
            "pub const {}: {} = {};",
            const_name, rust_ty, literal
        ));
        w.blank();
        Ok(())
    }
}

/// Accessor pieces for a plain data-section field
fn data_accessor(slot: &SlotField, suffix: &str, width: usize) -> (String, String) {
    (
        suffix.to_string(),
        format!(
            "self.reader.read_{}({})",
            suffix,
            slot.offset as usize * width
        ),
    )
}

/// Render a float as a valid Rust literal, non-finite values included
fn float_literal(v: f64, ty: &str) -> String {
    if v.is_nan() {
        format!("{}::NAN", ty)
    } else if v == f64::INFINITY {
        format!("{}::INFINITY", ty)
    } else if v == f64::NEG_INFINITY {
        format!("{}::NEG_INFINITY", ty)
    } else {
        format!("{:?}", v)
    }
}

/// Render bytes as a `b"..."` literal with hex escapes
fn byte_string_literal(bytes: &[u8]) -> String {
    let mut out = String::from("b\"");
    for &b in bytes {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{:02x}", b)),
        }
    }
    out.push('"');
    out
}
