//! CLI smoke tests
//!
//! Drives the installed binary against real files on disk. Schema
//! compilation needs the external front-end, so these tests stick to the
//! surfaces that work without it: message dumping and error reporting.

use assert_cmd::Command;
use capnlite::{message, ptr, StructBuilder};
use predicates::prelude::*;

fn write_demo_message(dir: &std::path::Path) -> std::path::PathBuf {
    let mut b = StructBuilder::new(1, 2);
    b.set_u64(0, 42);
    b.alloc_text(0, Some("hello from dump"));
    b.alloc_primitive_list(8, &[1u32, 2, 3]);
    let body = b.build();

    let mut segment = ptr::new_struct(0, 1, 2).to_le_bytes().to_vec();
    segment.extend_from_slice(&body);
    let stream = message::frame_single(&segment);

    let path = dir.join("demo.bin");
    std::fs::write(&path, stream).unwrap();
    path
}

#[test]
fn test_dump_walks_pointer_tree() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_demo_message(dir.path());

    Command::cargo_bin("capnlite")
        .unwrap()
        .arg("dump")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("1 segment(s)"))
        .stdout(predicate::str::contains("struct (data 1 words, ptrs 2)"))
        .stdout(predicate::str::contains("hello from dump"))
        .stdout(predicate::str::contains("3 elements"));
}

#[test]
fn test_dump_missing_file_fails() {
    Command::cargo_bin("capnlite")
        .unwrap()
        .arg("dump")
        .arg("/nonexistent/message.bin")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to map"));
}

#[test]
fn test_dump_truncated_stream_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("short.bin");
    // table claims one 4-word segment but carries nothing
    std::fs::write(&path, [0u8, 0, 0, 0, 4, 0, 0, 0]).unwrap();

    Command::cargo_bin("capnlite")
        .unwrap()
        .arg("dump")
        .arg(&path)
        .assert()
        .failure();
}

#[test]
fn test_generate_with_missing_frontend_fails() {
    let dir = tempfile::tempdir().unwrap();
    let schema = dir.path().join("x.capnp");
    std::fs::write(&schema, "@0x934efea7f017fff0;\n").unwrap();

    Command::cargo_bin("capnlite")
        .unwrap()
        .arg("generate")
        .arg(&schema)
        .arg("--frontend")
        .arg("/nonexistent/capnp-frontend")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load"));
}
