//! Capnlite - Zero-Copy Cap'n Proto Messages for Rust
//!
//! Capnlite reads and writes the Cap'n Proto unpacked wire format without
//! a deserialization pass, and generates Rust accessor code from compiled
//! schemas. Field reads compile down to offset arithmetic over the message
//! buffer; views never copy.
//!
//! # Quick Start - Reading and Building
//!
//! ```rust
//! use capnlite::{Buffer, StructBuilder, StructReader};
//!
//! // Build a struct: one u32 at offset 0, one text pointer
//! let mut builder = StructBuilder::new(1, 1);
//! builder.set_u32(0, 42);
//! builder.alloc_text(0, Some("hello"));
//! let bytes = builder.build();
//!
//! // Read it back, zero-copy
//! let buf = Buffer::from_bytes(bytes);
//! let view = StructReader::from_buffer(&buf, 0, 1, 1)?;
//! assert_eq!(view.read_u32(0), 42);
//! assert_eq!(view.read_text(0)?, Some("hello"));
//! # Ok::<(), capnlite::Error>(())
//! ```
//!
//! # Quick Start - Schema Loading
//!
//! ```rust,no_run
//! use capnlite::{Compiler, SchemaSource};
//! use std::path::Path;
//!
//! let compiler = Compiler::new(vec![".".into()]);
//! let module = compiler.load_schema(
//!     SchemaSource::File(Path::new("addressbook.capnp")),
//!     true,
//! )?;
//! std::fs::write("addressbook_capnp.rs", &module.source)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │  schema.capnp                       │
//! │    ↓ capnp compile -o <cat>         │
//! │  CodeGeneratorRequest bytes         │
//! │    ↓ Buffer + StructReader (self-   │
//! │      hosting: decoded by this crate)│
//! │  Schema model                       │
//! │    ↓ ModuleGenerator                │
//! │  Generated Rust accessors           │
//! └─────────────────────────────────────┘
//!          reads via
//! ┌─────────────────────────────────────┐
//! │  ptr     64-bit tagged pointers     │
//! │  buffer  segments, far resolution   │
//! │  blob    struct views               │
//! │  list    typed list views           │
//! │  builder message construction       │
//! └─────────────────────────────────────┘
//! ```
//!
//! # Key Properties
//!
//! - **Zero-Copy Reading**: views borrow the buffer, even memory-mapped
//! - **Self-Hosting**: the schema reader is the message reader
//! - **Strict Bounds**: every view validates its extent at construction
//! - **Null = Default**: null pointers read as the schema-declared default

#![warn(missing_docs)]
#![warn(clippy::all)]

// Module declarations
/// Struct views and pointer navigation
pub mod blob;
/// Message buffers with segment awareness
pub mod buffer;
/// Message construction
pub mod builder;
/// Rust source emission from a parsed schema
pub mod codegen;
/// Schema loading pipeline (front-end subprocess, cache)
pub mod compiler;
/// Little-endian primitive access
pub mod endian;
/// Error types
pub mod error;
/// Typed list views
pub mod list;
/// Stream framing (segment tables)
pub mod message;
/// Pointer-word codec
pub mod ptr;
/// Schema model and bootstrap parser
pub mod schema;

// Re-exports for consumers and generated code

pub use crate::blob::{AnyView, StructReader};
pub use crate::buffer::Buffer;
pub use crate::builder::{PrimitiveElement, StructBuilder};
pub use crate::compiler::{load_schema, Compiler, GeneratedModule, SchemaError, SchemaSource};
pub use crate::error::{Error, Result};
pub use crate::list::ListReader;

// Version information
/// Library version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_surface_round_trip() {
        let mut builder = StructBuilder::new(1, 0);
        builder.set_u64(0, 7);
        let buf = Buffer::from_bytes(builder.build());
        let view = StructReader::from_buffer(&buf, 0, 1, 0).unwrap();
        assert_eq!(view.read_u64(0), 7);
    }
}
