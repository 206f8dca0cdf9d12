//! Schema model and bootstrap parser
//!
//! The compiler front-end hands us a serialized `CodeGeneratorRequest` -
//! itself a Cap'n Proto message, which this crate's own reader decodes.
//! That is the self-hosting bootstrap: the accessors for the schema types
//! are written by hand in `parse` against the well-known wire layout, so
//! the first schema can be loaded before any generated code exists.
//!
//! The parsed model lives in `model`: a forest of nodes keyed by 64-bit
//! id, with children recovered by scanning each node's nested-node table.
//! A model is built once per load and never mutated afterwards.

pub mod model;
pub mod parse;

pub use model::{
    EnumNode, Enumerant, Field, FieldKind, Node, NodeKind, RequestedFile, Schema, SlotField,
    StructNode, Type, Value,
};
pub use parse::parse_request;
