//! Self-hosting pipeline tests
//!
//! A `CodeGeneratorRequest` is itself a message, so these tests build one
//! with the crate's own `StructBuilder`, decode it with the crate's own
//! reader, and run the emitter over the result. The byte layouts written
//! here mirror the wire layout the bootstrap parser reads.

use capnlite::schema::{parse_request, NodeKind, Type};
use capnlite::{codegen, message, ptr, Buffer, Compiler, SchemaSource, StructBuilder};

const FILE_ID: u64 = 0xA000;
const POINT_ID: u64 = 0xA001;
const COLOR_ID: u64 = 0xA002;
const SHAPE_ID: u64 = 0xA003;

/// Serialize a Type struct (which @0, typeId @8)
fn build_type(which: u16, type_id: u64) -> Vec<u8> {
    let mut b = StructBuilder::new(3, 1);
    b.set_u16(0, which);
    if type_id != 0 {
        b.set_u64(8, type_id);
    }
    b.build()
}

/// Serialize a slot Field. `discriminant` is the in-model value; the wire
/// stores it XORed with its 0xffff schema default.
fn build_slot_field(
    name: &str,
    code_order: u16,
    discriminant: u16,
    offset: u32,
    ty: Vec<u8>,
) -> Vec<u8> {
    let mut b = StructBuilder::new(3, 4);
    b.set_u16(0, code_order);
    b.set_u16(2, discriminant ^ 0xffff);
    b.set_u32(4, offset);
    b.set_u16(8, 0); // slot
    b.alloc_text(0, Some(name));
    b.alloc_struct(16, 3, 1, Some(&ty));
    b.build()
}

/// Serialize a struct Node
#[allow(clippy::too_many_arguments)]
fn build_struct_node(
    id: u64,
    scope: u64,
    display_name: &str,
    prefix: u32,
    data_words: u16,
    ptr_words: u16,
    discriminant_count: u16,
    discriminant_offset: u32,
    fields: &[Vec<u8>],
) -> Vec<u8> {
    let mut b = StructBuilder::new(5, 6);
    b.set_u64(0, id);
    b.set_u32(8, prefix);
    b.set_u16(12, 1); // struct
    b.set_u64(16, scope);
    b.set_u16(14, data_words);
    b.set_u16(24, ptr_words);
    b.set_u16(30, discriminant_count);
    b.set_u32(32, discriminant_offset);
    b.alloc_text(0, Some(display_name));
    b.alloc_struct_list(24, 3, 4, fields);
    b.build()
}

/// Serialize an enum Node
fn build_enum_node(
    id: u64,
    scope: u64,
    display_name: &str,
    prefix: u32,
    members: &[&str],
) -> Vec<u8> {
    let enumerants: Vec<Vec<u8>> = members
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let mut e = StructBuilder::new(1, 2);
            e.set_u16(0, i as u16);
            e.alloc_text(0, Some(m));
            e.build()
        })
        .collect();

    let mut b = StructBuilder::new(5, 6);
    b.set_u64(0, id);
    b.set_u32(8, prefix);
    b.set_u16(12, 2); // enum
    b.set_u64(16, scope);
    b.alloc_text(0, Some(display_name));
    b.alloc_struct_list(24, 1, 2, &enumerants);
    b.build()
}

/// Serialize the file Node with its nested-node bindings
fn build_file_node(id: u64, display_name: &str, nested: &[(&str, u64)]) -> Vec<u8> {
    let nested_nodes: Vec<Vec<u8>> = nested
        .iter()
        .map(|(name, nid)| {
            let mut n = StructBuilder::new(1, 1);
            n.set_u64(0, *nid);
            n.alloc_text(0, Some(name));
            n.build()
        })
        .collect();

    let mut b = StructBuilder::new(5, 6);
    b.set_u64(0, id);
    b.set_u16(12, 0); // file
    b.alloc_text(0, Some(display_name));
    b.alloc_struct_list(8, 1, 1, &nested_nodes);
    b.build()
}

/// Frame a complete request stream from serialized nodes
fn build_request(nodes: &[Vec<u8>], file_id: u64, filename: &str) -> Vec<u8> {
    let mut rf = StructBuilder::new(1, 2);
    rf.set_u64(0, file_id);
    rf.alloc_text(0, Some(filename));

    let mut b = StructBuilder::new(0, 2);
    b.alloc_struct_list(0, 5, 6, nodes);
    b.alloc_struct_list(8, 1, 2, &[rf.build()]);
    let body = b.build();

    let mut segment = ptr::new_struct(0, 0, 2).to_le_bytes().to_vec();
    segment.extend_from_slice(&body);
    message::frame_single(&segment)
}

/// A schema with a plain struct, an enum, and a union-bearing struct:
///
/// ```capnp
/// struct Point { x @0 :Int64; y @1 :Int64; label @2 :Text; }
/// enum Color { red @0; green @1; }
/// struct Shape {
///   area @0 :Float64;
///   union { circle @1 :Float64; square @2 :Float64; }
/// }
/// ```
fn demo_request() -> Vec<u8> {
    let prefix = "demo.capnp:".len() as u32;

    let point = build_struct_node(
        POINT_ID,
        FILE_ID,
        "demo.capnp:Point",
        prefix,
        2,
        1,
        0,
        0,
        &[
            build_slot_field("x", 0, 0xffff, 0, build_type(5, 0)),
            build_slot_field("y", 1, 0xffff, 1, build_type(5, 0)),
            build_slot_field("label", 2, 0xffff, 0, build_type(12, 0)),
        ],
    );

    let color = build_enum_node(COLOR_ID, FILE_ID, "demo.capnp:Color", prefix, &["red", "green"]);

    // discriminant at byte 16 (stored in 2-byte units)
    let shape = build_struct_node(
        SHAPE_ID,
        FILE_ID,
        "demo.capnp:Shape",
        prefix,
        3,
        0,
        2,
        8,
        &[
            build_slot_field("area", 0, 0xffff, 0, build_type(11, 0)),
            build_slot_field("circle", 1, 0, 1, build_type(11, 0)),
            build_slot_field("square", 2, 1, 1, build_type(11, 0)),
        ],
    );

    let file = build_file_node(
        FILE_ID,
        "demo.capnp",
        &[("Point", POINT_ID), ("Color", COLOR_ID), ("Shape", SHAPE_ID)],
    );

    build_request(&[file, point, color, shape], FILE_ID, "demo.capnp")
}

#[test]
fn test_parse_demo_request() {
    let buf = Buffer::from_message(demo_request()).unwrap();
    let schema = parse_request(&buf).unwrap();

    assert_eq!(schema.nodes.len(), 4);
    assert_eq!(schema.requested_files.len(), 1);
    assert_eq!(schema.requested_files[0].filename, "demo.capnp");
    assert_eq!(schema.children_of(FILE_ID), &[POINT_ID, COLOR_ID, SHAPE_ID]);

    let point = schema.node(POINT_ID).unwrap();
    assert_eq!(point.short_name(), "Point");
    let NodeKind::Struct(st) = &point.kind else {
        panic!("Point should be a struct node");
    };
    assert_eq!(st.data_word_count, 2);
    assert_eq!(st.pointer_count, 1);
    assert_eq!(st.fields.len(), 3);
    assert_eq!(st.fields[0].name, "x");
    assert!(!st.fields[0].is_union_member());

    let shape = schema.node(SHAPE_ID).unwrap();
    let NodeKind::Struct(st) = &shape.kind else {
        panic!("Shape should be a struct node");
    };
    assert_eq!(st.discriminant_count, 2);
    assert_eq!(st.discriminant_byte_offset(), 16);
    assert_eq!(st.fields[1].discriminant_value, 0);
    assert_eq!(st.fields[2].discriminant_value, 1);

    let color = schema.node(COLOR_ID).unwrap();
    let NodeKind::Enum(en) = &color.kind else {
        panic!("Color should be an enum node");
    };
    assert_eq!(en.enumerants.len(), 2);
    assert_eq!(en.enumerants[0].name, "red");

    // slot types survive the trip
    match &st.fields[0].kind {
        capnlite::schema::FieldKind::Slot(slot) => assert_eq!(slot.ty, Type::Float64),
        other => panic!("expected a slot, got {:?}", other),
    }
}

#[test]
fn test_emitted_accessors_and_structors() {
    let buf = Buffer::from_message(demo_request()).unwrap();
    let schema = parse_request(&buf).unwrap();
    let src = codegen::ModuleGenerator::new(&schema, true)
        .generate()
        .unwrap();

    // struct views with geometry consts
    assert!(src.contains("pub struct Point<'a>"));
    assert!(src.contains("pub const DATA_SIZE: u16 = 2;"));
    assert!(src.contains("pub const PTRS_SIZE: u16 = 1;"));

    // field accessors compile to offset reads
    assert!(src.contains("self.reader.read_i64(0)"));
    assert!(src.contains("self.reader.read_i64(8)"));
    assert!(src.contains("self.reader.read_text(0)?"));

    // constructor in declaration order
    assert!(src.contains("pub fn build(x: i64, y: i64, label: Option<&str>)"));

    // enum table in declared order
    assert!(src.contains("pub enum Color {"));
    assert!(src.contains("Red = 0,"));
    assert!(src.contains("Green = 1,"));

    // union plumbing: which accessor, guards, per-variant constructors
    assert!(src.contains("self.reader.which(16)"));
    assert!(src.contains("WrongUnionVariant { expected: 0, actual: tag }"));
    assert!(src.contains("WrongUnionVariant { expected: 1, actual: tag }"));
    assert!(src.contains("pub fn build_circle(area: f64, circle: f64)"));
    assert!(src.contains("pub fn build_square(area: f64, square: f64)"));
    assert!(src.contains("builder.set_tag(16, 0);"));
    assert!(src.contains("builder.set_tag(16, 1);"));
}

#[test]
fn test_emission_is_deterministic() {
    let buf = Buffer::from_message(demo_request()).unwrap();
    let schema = parse_request(&buf).unwrap();
    let a = codegen::ModuleGenerator::new(&schema, true).generate().unwrap();
    let b = codegen::ModuleGenerator::new(&schema, true).generate().unwrap();
    assert_eq!(a, b);
}

/// End-to-end loader run with a stand-in front-end that emits a prepared
/// request, exercising subprocess capture, decode, emission, and caching.
#[cfg(unix)]
#[test]
fn test_loader_pipeline_with_stub_frontend() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let request_path = dir.path().join("request.bin");
    std::fs::write(&request_path, demo_request()).unwrap();

    let schema_path = dir.path().join("demo.capnp");
    std::fs::write(&schema_path, "@0xA000; struct Point {}\n").unwrap();

    let frontend = dir.path().join("stub-capnp");
    std::fs::write(
        &frontend,
        format!("#!/bin/sh\nexec cat {}\n", request_path.display()),
    )
    .unwrap();
    std::fs::set_permissions(&frontend, std::fs::Permissions::from_mode(0o755)).unwrap();

    let compiler = Compiler::new(vec![dir.path().to_path_buf()]).with_frontend(&frontend);
    let module = compiler
        .load_schema(SchemaSource::File(&schema_path), true)
        .unwrap();

    assert!(module.source.contains("pub struct Point<'a>"));
    assert_eq!(module.schema.nodes.len(), 4);

    // second load hits the cache
    let again = compiler
        .load_schema(SchemaSource::File(&schema_path), true)
        .unwrap();
    assert!(std::sync::Arc::ptr_eq(&module, &again));
}
