//! In-memory schema model
//!
//! Mirrors the subset of the schema language this crate generates code
//! for: files, structs (with unions and groups), enums, interfaces and
//! consts. Interfaces are modeled so the forest stays complete, but no
//! code is generated for their methods.
//!
//! Everything derives `Serialize` so the CLI can render a schema as JSON.

use rustc_hash::FxHashMap;
use serde::Serialize;

/// Sentinel discriminant meaning "this field is not a union member"
pub const NO_DISCRIMINANT: u16 = 0xffff;

/// A complete parsed `CodeGeneratorRequest`
#[derive(Debug, Clone, Serialize)]
pub struct Schema {
    /// Every node in the request, keyed by id
    pub nodes: FxHashMap<u64, Node>,
    /// Node ids grouped under their scope (parent) id, in request order
    pub children: FxHashMap<u64, Vec<u64>>,
    /// The files this invocation was asked to generate code for
    pub requested_files: Vec<RequestedFile>,
}

impl Schema {
    /// Look up a node by id
    pub fn node(&self, id: u64) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Child node ids of `id`, empty when it has none
    pub fn children_of(&self, id: u64) -> &[u64] {
        self.children.get(&id).map_or(&[], Vec::as_slice)
    }
}

/// One file the front-end was asked to compile
#[derive(Debug, Clone, Serialize)]
pub struct RequestedFile {
    /// Node id of the file
    pub id: u64,
    /// Path as given to the front-end
    pub filename: String,
    /// Imported files: (node id, import name)
    pub imports: Vec<(u64, String)>,
}

/// One node of the schema forest
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    /// 64-bit node id
    pub id: u64,
    /// Fully qualified display name (file path + declaration path)
    pub display_name: String,
    /// Length of the file-path prefix inside `display_name`
    pub display_name_prefix_length: u32,
    /// Id of the enclosing scope (0 for files)
    pub scope_id: u64,
    /// Nested declarations: (unqualified name, node id)
    pub nested_nodes: Vec<(String, u64)>,
    /// Kind-specific payload
    pub kind: NodeKind,
}

impl Node {
    /// The node's unqualified name: the display name with its prefix cut
    pub fn short_name(&self) -> &str {
        &self.display_name[self.display_name_prefix_length as usize..]
    }
}

/// Kind-specific node payload
#[derive(Debug, Clone, Serialize)]
pub enum NodeKind {
    /// A schema file
    File,
    /// A struct (or group) declaration
    Struct(StructNode),
    /// An enum declaration
    Enum(EnumNode),
    /// An interface declaration (no code generated)
    Interface,
    /// A constant declaration
    Const {
        /// Declared type
        ty: Type,
        /// Declared value
        value: Value,
    },
    /// An annotation declaration (carried, not emitted)
    Annotation,
}

/// Payload of a struct node
#[derive(Debug, Clone, Serialize)]
pub struct StructNode {
    /// Data-section size in words
    pub data_word_count: u16,
    /// Pointer-section size in words
    pub pointer_count: u16,
    /// True when this node is a group inside another struct
    pub is_group: bool,
    /// Number of union members (0 when the struct has no union)
    pub discriminant_count: u16,
    /// Offset of the 16-bit discriminant, in multiples of two bytes
    pub discriminant_offset: u32,
    /// Fields in declaration order
    pub fields: Vec<Field>,
}

impl StructNode {
    /// Byte offset of the union discriminant tag
    pub fn discriminant_byte_offset(&self) -> usize {
        self.discriminant_offset as usize * 2
    }

    /// True when any field belongs to a union
    pub fn has_union(&self) -> bool {
        self.discriminant_count > 0
    }
}

/// Payload of an enum node
#[derive(Debug, Clone, Serialize)]
pub struct EnumNode {
    /// Enumerants in declared order; the declared order is authoritative
    /// for the numeric values
    pub enumerants: Vec<Enumerant>,
}

/// One enum member
#[derive(Debug, Clone, Serialize)]
pub struct Enumerant {
    /// Member name as declared (camelCase)
    pub name: String,
    /// Declaration-order index before reordering
    pub code_order: u16,
}

/// One struct field
#[derive(Debug, Clone, Serialize)]
pub struct Field {
    /// Field name as declared (camelCase)
    pub name: String,
    /// Declaration-order index before reordering
    pub code_order: u16,
    /// Union tag value, or [`NO_DISCRIMINANT`]
    pub discriminant_value: u16,
    /// Slot or group payload
    pub kind: FieldKind,
}

impl Field {
    /// True when the field is a union member
    pub fn is_union_member(&self) -> bool {
        self.discriminant_value != NO_DISCRIMINANT
    }
}

/// Slot or group payload of a field
#[derive(Debug, Clone, Serialize)]
pub enum FieldKind {
    /// An ordinary field stored at an offset
    Slot(SlotField),
    /// A group of fields sharing the parent's sections
    Group {
        /// Node id of the group's struct node
        type_id: u64,
    },
}

/// Payload of a slot field
#[derive(Debug, Clone, Serialize)]
pub struct SlotField {
    /// Offset in multiples of the field's element width
    pub offset: u32,
    /// Declared type
    pub ty: Type,
    /// Declared default, when the schema carried one
    pub default_value: Option<Value>,
    /// True when the schema author wrote the default explicitly
    pub had_explicit_default: bool,
}

/// The closed set of field types
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Type {
    /// No storage
    Void,
    /// Single bit
    Bool,
    /// 1-byte signed
    Int8,
    /// 2-byte signed
    Int16,
    /// 4-byte signed
    Int32,
    /// 8-byte signed
    Int64,
    /// 1-byte unsigned
    Uint8,
    /// 2-byte unsigned
    Uint16,
    /// 4-byte unsigned
    Uint32,
    /// 8-byte unsigned
    Uint64,
    /// IEEE 754 single
    Float32,
    /// IEEE 754 double
    Float64,
    /// NUL-terminated UTF-8 byte list
    Text,
    /// Raw byte list
    Data,
    /// List of an element type
    List(Box<Type>),
    /// Enum reference
    Enum {
        /// Node id of the enum
        type_id: u64,
    },
    /// Struct reference
    Struct {
        /// Node id of the struct
        type_id: u64,
    },
    /// Interface reference (no code generated)
    Interface {
        /// Node id of the interface
        type_id: u64,
    },
    /// Untyped pointer
    AnyPointer,
}

impl Type {
    /// Byte width of the type inside a struct's data section; `None` for
    /// pointer types, Void and Bool
    pub fn data_width(&self) -> Option<usize> {
        match self {
            Type::Int8 | Type::Uint8 => Some(1),
            Type::Int16 | Type::Uint16 | Type::Enum { .. } => Some(2),
            Type::Int32 | Type::Uint32 | Type::Float32 => Some(4),
            Type::Int64 | Type::Uint64 | Type::Float64 => Some(8),
            _ => None,
        }
    }

    /// True when values live in the data section (Bool included)
    pub fn is_data(&self) -> bool {
        matches!(
            self,
            Type::Bool
                | Type::Int8
                | Type::Int16
                | Type::Int32
                | Type::Int64
                | Type::Uint8
                | Type::Uint16
                | Type::Uint32
                | Type::Uint64
                | Type::Float32
                | Type::Float64
                | Type::Enum { .. }
        )
    }

    /// True when values live in the pointer section
    pub fn is_pointer(&self) -> bool {
        matches!(
            self,
            Type::Text
                | Type::Data
                | Type::List(_)
                | Type::Struct { .. }
                | Type::Interface { .. }
                | Type::AnyPointer
        )
    }
}

/// A schema-level constant or default value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    /// Void value
    Void,
    /// Bool value
    Bool(bool),
    /// Int8 value
    Int8(i8),
    /// Int16 value
    Int16(i16),
    /// Int32 value
    Int32(i32),
    /// Int64 value
    Int64(i64),
    /// Uint8 value
    Uint8(u8),
    /// Uint16 value
    Uint16(u16),
    /// Uint32 value
    Uint32(u32),
    /// Uint64 value
    Uint64(u64),
    /// Float32 value
    Float32(f32),
    /// Float64 value
    Float64(f64),
    /// Text value
    Text(String),
    /// Data value
    Data(Vec<u8>),
    /// Enum value by ordinal
    Enum(u16),
    /// Pointer-typed default (structs, lists, anyPointer): only the null
    /// default is representable here
    Null,
}
