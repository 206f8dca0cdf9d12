use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use capnlite::{AnyView, Buffer, Compiler, SchemaSource, StructReader};

#[derive(Parser)]
#[command(name = "capnlite")]
#[command(
    about = "Cap'n Proto schema compiler plugin and message inspector",
    long_about = "capnlite - Generate zero-copy Rust accessors from Cap'n Proto schemas\n\n\
    Drives the external `capnp` front-end, decodes its CodeGeneratorRequest\n\
    output with capnlite's own reader, and emits one Rust module per schema.\n\
    Also inspects schemas and walks the pointer structure of message files.\n\n\
    Examples:\n\
      capnlite generate addressbook.capnp -o addressbook_capnp.rs\n\
      capnlite generate -I schemas/ proto/person.capnp\n\
      capnlite inspect addressbook.capnp --json\n\
      capnlite dump message.bin"
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate Rust accessor source from a schema file
    Generate {
        /// Schema file to compile
        #[arg(value_name = "SCHEMA")]
        schema: PathBuf,

        /// Output file (default: <schema stem>_capnp.rs next to the schema)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Schema import search directories
        #[arg(short = 'I', long = "import-path", value_name = "DIR")]
        import_paths: Vec<PathBuf>,

        /// Keep camelCase field names instead of converting to snake_case
        #[arg(long)]
        no_convert_case: bool,

        /// Front-end binary to invoke (default: capnp on PATH)
        #[arg(long, default_value = "capnp")]
        frontend: PathBuf,
    },

    /// Show the node tree of a compiled schema
    Inspect {
        /// Schema file to compile
        #[arg(value_name = "SCHEMA")]
        schema: PathBuf,

        /// Schema import search directories
        #[arg(short = 'I', long = "import-path", value_name = "DIR")]
        import_paths: Vec<PathBuf>,

        /// Emit the full schema model as JSON
        #[arg(long)]
        json: bool,

        /// Front-end binary to invoke (default: capnp on PATH)
        #[arg(long, default_value = "capnp")]
        frontend: PathBuf,
    },

    /// Walk the pointer structure of a framed message file
    Dump {
        /// Message file (unpacked stream framing)
        #[arg(value_name = "MESSAGE")]
        message: PathBuf,

        /// Maximum tree depth to walk
        #[arg(long, default_value = "8")]
        max_depth: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Generate {
            schema,
            output,
            import_paths,
            no_convert_case,
            frontend,
        } => cmd_generate(schema, output, import_paths, !no_convert_case, frontend),
        Commands::Inspect {
            schema,
            import_paths,
            json,
            frontend,
        } => cmd_inspect(schema, import_paths, json, frontend),
        Commands::Dump { message, max_depth } => cmd_dump(message, max_depth),
    }
}

fn make_compiler(schema: &std::path::Path, import_paths: Vec<PathBuf>, frontend: PathBuf) -> Compiler {
    let mut search_path = import_paths;
    if let Some(parent) = schema.parent() {
        search_path.push(parent.to_path_buf());
    }
    Compiler::new(search_path).with_frontend(frontend)
}

fn cmd_generate(
    schema: PathBuf,
    output: Option<PathBuf>,
    import_paths: Vec<PathBuf>,
    convert_case: bool,
    frontend: PathBuf,
) -> Result<()> {
    let compiler = make_compiler(&schema, import_paths, frontend);
    let module = compiler
        .load_schema(SchemaSource::File(&schema), convert_case)
        .with_context(|| format!("failed to load {}", schema.display()))?;

    let output = output.unwrap_or_else(|| {
        let stem = schema
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "schema".to_string());
        schema.with_file_name(format!("{}_capnp.rs", stem))
    });
    module
        .write_to(&output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    eprintln!("Wrote {}", output.display());
    Ok(())
}

fn cmd_inspect(
    schema: PathBuf,
    import_paths: Vec<PathBuf>,
    json: bool,
    frontend: PathBuf,
) -> Result<()> {
    let compiler = make_compiler(&schema, import_paths, frontend);
    let module = compiler
        .load_schema(SchemaSource::File(&schema), true)
        .with_context(|| format!("failed to load {}", schema.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&module.schema)?);
        return Ok(());
    }

    for file in &module.schema.requested_files {
        println!("{} ({:#018x})", file.filename, file.id);
        print_node_tree(&module.schema, file.id, 1);
    }
    Ok(())
}

fn print_node_tree(schema: &capnlite::schema::Schema, id: u64, depth: usize) {
    use capnlite::schema::NodeKind;

    for &child_id in schema.children_of(id) {
        let Some(node) = schema.node(child_id) else {
            continue;
        };
        let kind = match &node.kind {
            NodeKind::File => "file",
            NodeKind::Struct(st) if st.is_group => "group",
            NodeKind::Struct(_) => "struct",
            NodeKind::Enum(_) => "enum",
            NodeKind::Interface => "interface",
            NodeKind::Const { .. } => "const",
            NodeKind::Annotation => "annotation",
        };
        println!(
            "{}{} {} ({:#018x})",
            "  ".repeat(depth),
            kind,
            node.short_name(),
            node.id
        );
        if let NodeKind::Struct(st) = &node.kind {
            for field in &st.fields {
                println!("{}- {}", "  ".repeat(depth + 1), field.name);
            }
        }
        print_node_tree(schema, child_id, depth + 1);
    }
}

fn cmd_dump(message: PathBuf, max_depth: usize) -> Result<()> {
    let buf = Buffer::from_file(&message)
        .with_context(|| format!("failed to map {}", message.display()))?;
    println!(
        "{}: {} bytes, {} segment(s)",
        message.display(),
        buf.len(),
        buf.segment_count()
    );
    let root = AnyView::root(&buf).context("failed to read root pointer")?;
    dump_view(&root, 0, max_depth);
    Ok(())
}

fn dump_view(view: &AnyView<'_>, depth: usize, max_depth: usize) {
    let pad = "  ".repeat(depth);
    if depth > max_depth {
        println!("{}...", pad);
        return;
    }
    match view {
        AnyView::Null => println!("{}null", pad),
        AnyView::Text(t) => println!("{}text {:?}", pad, preview(t)),
        AnyView::Data(d) => println!("{}data ({} bytes)", pad, d.len()),
        AnyView::Struct(s) => {
            println!(
                "{}struct (data {} words, ptrs {})",
                pad,
                s.data_size(),
                s.ptrs_size()
            );
            dump_struct_pointers(s, depth, max_depth);
        }
        AnyView::List(list) => {
            println!(
                "{}list (tag {}, {} elements)",
                pad,
                list.size_tag(),
                list.len()
            );
            if list.size_tag() == capnlite::ptr::LIST_SIZE_COMPOSITE {
                for i in 0..list.len().min(16) {
                    match list.get_struct(i) {
                        Ok(s) => dump_struct_element(&s, depth + 1, max_depth),
                        Err(e) => println!("{}  element {}: {}", pad, i, e),
                    }
                }
            }
        }
    }
}

fn dump_struct_element(s: &StructReader<'_>, depth: usize, max_depth: usize) {
    let pad = "  ".repeat(depth);
    if depth > max_depth {
        println!("{}...", pad);
        return;
    }
    println!(
        "{}struct (data {} words, ptrs {})",
        pad,
        s.data_size(),
        s.ptrs_size()
    );
    dump_struct_pointers(s, depth, max_depth);
}

fn dump_struct_pointers(s: &StructReader<'_>, depth: usize, max_depth: usize) {
    for i in 0..s.ptrs_size() as usize {
        match s.read_any(i * 8) {
            Ok(AnyView::Null) => {}
            Ok(child) => dump_view(&child, depth + 1, max_depth),
            Err(e) => println!("{}pointer {}: {}", "  ".repeat(depth + 1), i, e),
        }
    }
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(40).collect();
    if out.len() < text.len() {
        out.push('…');
    }
    out
}
