//! Schema loading pipeline
//!
//! `load_schema` drives the whole chain: run the external `capnp` front-end
//! as a subprocess (with a pass-through output plugin, so its standard
//! output is the raw `CodeGeneratorRequest`), decode those bytes with this
//! crate's reader, feed the model to the emitter, and hand back a
//! [`GeneratedModule`] carrying the generated Rust source plus the parsed
//! schema.
//!
//! Modules are cached per [`Compiler`] keyed by canonical filename; the
//! cache sits behind a mutex so concurrent loads stay consistent. The
//! default compiler instance is process-wide but explicit - construct your
//! own `Compiler` to use a different search path or front-end binary.

use crate::buffer::Buffer;
use crate::codegen::{CodegenError, ModuleGenerator};
use crate::error::Error;
use crate::schema::{parse_request, Schema};
use rustc_hash::FxHashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, OnceLock};

/// Errors from schema loading
#[derive(Debug)]
pub enum SchemaError {
    /// The named schema file was not found on the search path
    SchemaNotFound(PathBuf),
    /// The front-end exited non-zero; carries its standard error
    SchemaCompileError(String),
    /// The emitter rejected the schema
    Codegen(CodegenError),
    /// The request bytes did not decode
    Decode(Error),
    /// Subprocess or filesystem failure
    Io(std::io::Error),
    /// The locator was malformed (e.g. a relative import path)
    BadLocator(String),
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::SchemaNotFound(path) => {
                write!(f, "Schema not found: {}", path.display())
            }
            SchemaError::SchemaCompileError(stderr) => {
                write!(f, "Schema compiler failed: {}", stderr.trim_end())
            }
            SchemaError::Codegen(e) => write!(f, "{}", e),
            SchemaError::Decode(e) => write!(f, "Failed to decode request: {}", e),
            SchemaError::Io(e) => write!(f, "I/O error: {}", e),
            SchemaError::BadLocator(msg) => write!(f, "Bad schema locator: {}", msg),
        }
    }
}

impl std::error::Error for SchemaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SchemaError::Io(e) => Some(e),
            SchemaError::Codegen(e) => Some(e),
            SchemaError::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SchemaError {
    fn from(err: std::io::Error) -> Self {
        SchemaError::Io(err)
    }
}

impl From<Error> for SchemaError {
    fn from(err: Error) -> Self {
        SchemaError::Decode(err)
    }
}

impl From<CodegenError> for SchemaError {
    fn from(err: CodegenError) -> Self {
        SchemaError::Codegen(err)
    }
}

/// How to locate a schema file.
///
/// Exactly one form is possible by construction:
/// - `Module("a.b.c")` searches `a/b/c.capnp` on the search path
/// - `Import("/a/b/c.capnp")` uses schema-import syntax; the leading slash
///   marks an absolute import resolved against the search path
/// - `File(path)` names the file directly, no search performed
#[derive(Debug, Clone, Copy)]
pub enum SchemaSource<'a> {
    /// Dotted module name
    Module(&'a str),
    /// Absolute import path as written in schema `import` expressions
    Import(&'a str),
    /// Filesystem path
    File(&'a Path),
}

/// The materialized result of one schema load
pub struct GeneratedModule {
    /// Canonical path of the schema file
    pub filename: PathBuf,
    /// Generated Rust source, ready for `include!`-style builds
    pub source: String,
    /// The parsed schema model
    pub schema: Schema,
}

impl GeneratedModule {
    /// Write the generated source to `path`
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        std::fs::write(path, &self.source)
    }
}

/// Schema compiler: front-end invocation, decoding, emission, caching
pub struct Compiler {
    search_path: Vec<PathBuf>,
    frontend: PathBuf,
    modules: Mutex<FxHashMap<PathBuf, Arc<GeneratedModule>>>,
}

/// Pass-through plugin handed to `capnp compile -o`: it copies the
/// request bytes to standard output unchanged.
const PASSTHROUGH_SINK: &str = "/bin/cat";

impl Compiler {
    /// Create a compiler with the given schema search path
    pub fn new(search_path: Vec<PathBuf>) -> Self {
        Compiler {
            search_path,
            frontend: PathBuf::from("capnp"),
            modules: Mutex::new(FxHashMap::default()),
        }
    }

    /// Use a different front-end binary (default: `capnp` on `PATH`)
    pub fn with_frontend<P: Into<PathBuf>>(mut self, frontend: P) -> Self {
        self.frontend = frontend.into();
        self
    }

    /// The process-wide default compiler, searching the current directory
    pub fn default_instance() -> &'static Compiler {
        static INSTANCE: OnceLock<Compiler> = OnceLock::new();
        INSTANCE.get_or_init(|| Compiler::new(vec![PathBuf::from(".")]))
    }

    /// Compile and load a schema.
    ///
    /// Results are cached by canonical filename; a second load of the same
    /// file returns the cached module.
    pub fn load_schema(
        &self,
        source: SchemaSource<'_>,
        convert_case: bool,
    ) -> Result<Arc<GeneratedModule>, SchemaError> {
        let filename = self.resolve(source)?;

        if let Some(module) = self.lock_cache().get(&filename) {
            return Ok(Arc::clone(module));
        }

        let request = self.run_frontend(&filename)?;
        let buf = Buffer::from_message(request)?;
        let schema = parse_request(&buf)?;
        let source = ModuleGenerator::new(&schema, convert_case).generate()?;

        let module = Arc::new(GeneratedModule {
            filename: filename.clone(),
            source,
            schema,
        });
        let mut cache = self.lock_cache();
        // A racing load may have inserted first; keep whichever won.
        Ok(Arc::clone(cache.entry(filename).or_insert(module)))
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, FxHashMap<PathBuf, Arc<GeneratedModule>>> {
        self.modules.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Resolve a locator to a canonical filename
    fn resolve(&self, source: SchemaSource<'_>) -> Result<PathBuf, SchemaError> {
        match source {
            SchemaSource::Module(name) => {
                let rel = format!("{}.capnp", name.replace('.', "/"));
                self.find_file(Path::new(&rel))
            }
            SchemaSource::Import(import) => {
                let rel = import.strip_prefix('/').ok_or_else(|| {
                    SchemaError::BadLocator(format!(
                        "import paths must be absolute: {}",
                        import
                    ))
                })?;
                self.find_file(Path::new(rel))
            }
            SchemaSource::File(path) => {
                if !path.is_file() {
                    return Err(SchemaError::SchemaNotFound(path.to_path_buf()));
                }
                Ok(path.canonicalize()?)
            }
        }
    }

    fn find_file(&self, rel: &Path) -> Result<PathBuf, SchemaError> {
        for dir in &self.search_path {
            let candidate = dir.join(rel);
            if candidate.is_file() {
                return Ok(candidate.canonicalize()?);
            }
        }
        Err(SchemaError::SchemaNotFound(rel.to_path_buf()))
    }

    /// Run the front-end and collect the request bytes from its stdout
    fn run_frontend(&self, filename: &Path) -> Result<Vec<u8>, SchemaError> {
        let mut cmd = Command::new(&self.frontend);
        cmd.arg("compile").arg("-o").arg(PASSTHROUGH_SINK);
        for dir in &self.search_path {
            cmd.arg(format!("-I{}", dir.display()));
        }
        cmd.arg(filename);

        let output = cmd.output()?;
        if !output.status.success() {
            return Err(SchemaError::SchemaCompileError(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        Ok(output.stdout)
    }
}

/// Load a schema through the process-wide default compiler
pub fn load_schema(
    source: SchemaSource<'_>,
    convert_case: bool,
) -> Result<Arc<GeneratedModule>, SchemaError> {
    Compiler::default_instance().load_schema(source, convert_case)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_is_schema_not_found() {
        let compiler = Compiler::new(vec![]);
        let result = compiler.load_schema(SchemaSource::Module("no.such.schema"), true);
        assert!(matches!(result, Err(SchemaError::SchemaNotFound(_))));

        let result = compiler.load_schema(
            SchemaSource::File(Path::new("/nonexistent/x.capnp")),
            true,
        );
        assert!(matches!(result, Err(SchemaError::SchemaNotFound(_))));
    }

    #[test]
    fn test_relative_import_is_rejected() {
        let compiler = Compiler::new(vec![]);
        let result = compiler.load_schema(SchemaSource::Import("x.capnp"), true);
        assert!(matches!(result, Err(SchemaError::BadLocator(_))));
    }

    #[test]
    fn test_module_name_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        let mut f = std::fs::File::create(nested.join("c.capnp")).unwrap();
        writeln!(f, "@0x934efea7f017fff0;").unwrap();

        let compiler = Compiler::new(vec![dir.path().to_path_buf()]);
        let resolved = compiler.resolve(SchemaSource::Module("a.b.c")).unwrap();
        assert!(resolved.ends_with("a/b/c.capnp"));

        let resolved = compiler
            .resolve(SchemaSource::Import("/a/b/c.capnp"))
            .unwrap();
        assert!(resolved.ends_with("a/b/c.capnp"));
    }

    #[test]
    fn test_frontend_failure_surfaces_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let schema = dir.path().join("x.capnp");
        std::fs::write(&schema, "@0x934efea7f017fff0;\n").unwrap();

        // A front-end that always fails with a message on stderr
        let fake = dir.path().join("fake-capnp");
        std::fs::write(&fake, "#!/bin/sh\necho 'boom' >&2\nexit 3\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let compiler =
            Compiler::new(vec![dir.path().to_path_buf()]).with_frontend(&fake);
        match compiler.load_schema(SchemaSource::File(&schema), true) {
            Err(SchemaError::SchemaCompileError(stderr)) => {
                assert!(stderr.contains("boom"));
            }
            other => panic!("expected a compile error, got {:?}", other.map(|_| ())),
        }
    }
}
