//! Bootstrap decoding of `CodeGeneratorRequest`
//!
//! These readers are written by hand against the well-known wire layout of
//! the schema language's own types, so a request can be decoded before any
//! generated code exists. Offsets below are bytes into each struct's data
//! section or pointer section.
//!
//! ```text
//! CodeGeneratorRequest   nodes -> ptr 0, requestedFiles -> ptr 1
//! Node                   id @0, displayName -> ptr 0, prefixLen @8,
//!                        which @12, scopeId @16, nestedNodes -> ptr 1
//!   struct               dataWordCount @14, pointerCount @24,
//!                        isGroup bit 224, discriminantCount @30,
//!                        discriminantOffset @32, fields -> ptr 3
//!   enum                 enumerants -> ptr 3
//!   const                type -> ptr 3, value -> ptr 4
//! Field                  name -> ptr 0, codeOrder @0,
//!                        discriminantValue @2 (stored XOR 0xffff),
//!                        which @8; slot: offset @4, type -> ptr 2,
//!                        defaultValue -> ptr 3, hadExplicitDefault bit 128;
//!                        group: typeId @16
//! Type                   which @0; typeId @8; list elementType -> ptr 0
//! Value                  which @0; payload @2/@4/@8 or ptr 0
//! ```

use super::model::*;
use crate::blob::StructReader;
use crate::buffer::Buffer;
use crate::error::{Error, Result};
use rustc_hash::FxHashMap;

/// Node union tags
mod node_tag {
    pub const FILE: u16 = 0;
    pub const STRUCT: u16 = 1;
    pub const ENUM: u16 = 2;
    pub const INTERFACE: u16 = 3;
    pub const CONST: u16 = 4;
    pub const ANNOTATION: u16 = 5;
}

/// Decode a complete `CodeGeneratorRequest` message into a [`Schema`].
pub fn parse_request(buf: &Buffer) -> Result<Schema> {
    let root = StructReader::root(buf)?;

    let mut nodes = FxHashMap::default();
    let mut children: FxHashMap<u64, Vec<u64>> = FxHashMap::default();

    if let Some(list) = root.read_list(0)? {
        for i in 0..list.len() {
            let node = parse_node(list.get_struct(i)?)?;
            children.entry(node.scope_id).or_default().push(node.id);
            nodes.insert(node.id, node);
        }
    }

    let mut requested_files = Vec::new();
    if let Some(list) = root.read_list(8)? {
        for i in 0..list.len() {
            requested_files.push(parse_requested_file(list.get_struct(i)?)?);
        }
    }

    Ok(Schema {
        nodes,
        children,
        requested_files,
    })
}

fn parse_node(s: StructReader<'_>) -> Result<Node> {
    let id = s.read_u64(0);
    let display_name = s.read_text(0)?.unwrap_or_default().to_string();
    let display_name_prefix_length = s.read_u32(8);
    let scope_id = s.read_u64(16);

    let mut nested_nodes = Vec::new();
    if let Some(list) = s.read_list(8)? {
        for i in 0..list.len() {
            let nn = list.get_struct(i)?;
            let name = nn.read_text(0)?.unwrap_or_default().to_string();
            nested_nodes.push((name, nn.read_u64(0)));
        }
    }

    let kind = match s.which(12) {
        node_tag::FILE => NodeKind::File,
        node_tag::STRUCT => NodeKind::Struct(parse_struct_node(&s)?),
        node_tag::ENUM => NodeKind::Enum(parse_enum_node(&s)?),
        node_tag::INTERFACE => NodeKind::Interface,
        node_tag::CONST => {
            let ty = match s.read_struct(24)? {
                Some(t) => parse_type(t)?,
                None => Type::Void,
            };
            let value = match s.read_struct(32)? {
                Some(v) => parse_value(v)?,
                None => Value::Void,
            };
            NodeKind::Const { ty, value }
        }
        node_tag::ANNOTATION => NodeKind::Annotation,
        tag => {
            return Err(Error::Unsupported(format!(
                "node {:#018x} has unknown kind tag {}",
                id, tag
            )))
        }
    };

    Ok(Node {
        id,
        display_name,
        display_name_prefix_length,
        scope_id,
        nested_nodes,
        kind,
    })
}

fn parse_struct_node(s: &StructReader<'_>) -> Result<StructNode> {
    let mut fields = Vec::new();
    if let Some(list) = s.read_list(24)? {
        for i in 0..list.len() {
            fields.push(parse_field(list.get_struct(i)?)?);
        }
    }
    Ok(StructNode {
        data_word_count: s.read_u16(14),
        pointer_count: s.read_u16(24),
        is_group: s.read_bool(224),
        discriminant_count: s.read_u16(30),
        discriminant_offset: s.read_u32(32),
        fields,
    })
}

fn parse_enum_node(s: &StructReader<'_>) -> Result<EnumNode> {
    let mut enumerants = Vec::new();
    if let Some(list) = s.read_list(24)? {
        for i in 0..list.len() {
            let e = list.get_struct(i)?;
            enumerants.push(Enumerant {
                name: e.read_text(0)?.unwrap_or_default().to_string(),
                code_order: e.read_u16(0),
            });
        }
    }
    Ok(EnumNode { enumerants })
}

fn parse_field(s: StructReader<'_>) -> Result<Field> {
    let name = s.read_text(0)?.unwrap_or_default().to_string();
    let code_order = s.read_u16(0);
    // discriminantValue has a nonzero schema default (0xffff = "not a union
    // member"), so the wire stores it XORed with that default.
    let discriminant_value = s.read_u16(2) ^ NO_DISCRIMINANT;

    let kind = match s.which(8) {
        0 => {
            let ty = match s.read_struct(16)? {
                Some(t) => parse_type(t)?,
                None => Type::Void,
            };
            let default_value = match s.read_struct(24)? {
                Some(v) => Some(parse_value(v)?),
                None => None,
            };
            FieldKind::Slot(SlotField {
                offset: s.read_u32(4),
                ty,
                default_value,
                had_explicit_default: s.read_bool(128),
            })
        }
        1 => FieldKind::Group {
            type_id: s.read_u64(16),
        },
        tag => {
            return Err(Error::Unsupported(format!(
                "field {:?} has unknown kind tag {}",
                name, tag
            )))
        }
    };

    Ok(Field {
        name,
        code_order,
        discriminant_value,
        kind,
    })
}

fn parse_type(s: StructReader<'_>) -> Result<Type> {
    Ok(match s.which(0) {
        0 => Type::Void,
        1 => Type::Bool,
        2 => Type::Int8,
        3 => Type::Int16,
        4 => Type::Int32,
        5 => Type::Int64,
        6 => Type::Uint8,
        7 => Type::Uint16,
        8 => Type::Uint32,
        9 => Type::Uint64,
        10 => Type::Float32,
        11 => Type::Float64,
        12 => Type::Text,
        13 => Type::Data,
        14 => {
            let elem = match s.read_struct(0)? {
                Some(e) => parse_type(e)?,
                None => Type::Void,
            };
            Type::List(Box::new(elem))
        }
        15 => Type::Enum {
            type_id: s.read_u64(8),
        },
        16 => Type::Struct {
            type_id: s.read_u64(8),
        },
        17 => Type::Interface {
            type_id: s.read_u64(8),
        },
        18 => Type::AnyPointer,
        tag => {
            return Err(Error::Unsupported(format!(
                "unknown type tag {}",
                tag
            )))
        }
    })
}

fn parse_value(s: StructReader<'_>) -> Result<Value> {
    Ok(match s.which(0) {
        0 => Value::Void,
        1 => Value::Bool(s.read_bool(16)),
        2 => Value::Int8(s.read_i8(2)),
        3 => Value::Int16(s.read_i16(2)),
        4 => Value::Int32(s.read_i32(4)),
        5 => Value::Int64(s.read_i64(8)),
        6 => Value::Uint8(s.read_u8(2)),
        7 => Value::Uint16(s.read_u16(2)),
        8 => Value::Uint32(s.read_u32(4)),
        9 => Value::Uint64(s.read_u64(8)),
        10 => Value::Float32(s.read_f32(4)),
        11 => Value::Float64(s.read_f64(8)),
        12 => Value::Text(s.read_text(0)?.unwrap_or_default().to_string()),
        13 => Value::Data(s.read_data(0)?.unwrap_or_default().to_vec()),
        15 => Value::Enum(s.read_u16(2)),
        // list, struct, interface, anyPointer: only the null default is
        // representable at this level
        _ => Value::Null,
    })
}
