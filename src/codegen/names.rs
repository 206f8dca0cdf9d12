//! Name conversion and reserved-word mangling
//!
//! Schema declarations use camelCase for fields and PascalCase for types.
//! The emitter converts field names to snake_case (unless the caller turns
//! conversion off) and appends an underscore whenever a converted name
//! collides with a reserved word. The reserved set is a parameter so the
//! emitter is not tied to one target language; [`RUST_RESERVED`] is the
//! default.

/// Rust's reserved words (strict and 2018-reserved)
pub const RUST_RESERVED: &[&str] = &[
    "abstract", "as", "async", "await", "become", "box", "break", "const", "continue", "crate",
    "do", "dyn", "else", "enum", "extern", "false", "final", "fn", "for", "if", "impl", "in",
    "let", "loop", "macro", "match", "mod", "move", "mut", "override", "priv", "pub", "ref",
    "return", "self", "static", "struct", "super", "trait", "true", "try", "type", "typeof",
    "unsafe", "unsized", "use", "virtual", "where", "while", "yield",
];

/// Convert camelCase to snake_case
///
/// Consecutive capitals stay together: `requestedFilesXML` becomes
/// `requested_files_xml`.
pub fn from_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for ch in name.chars() {
        if ch.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            prev_lower = false;
        } else {
            out.push(ch);
            prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}

/// Capitalize the first character (camelCase group names become type names)
pub fn to_pascal_case(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// Append an underscore when `name` is reserved in the target language
pub fn mangle<'a>(name: &'a str, reserved: &[&str]) -> std::borrow::Cow<'a, str> {
    if reserved.contains(&name) {
        std::borrow::Cow::Owned(format!("{}_", name))
    } else {
        std::borrow::Cow::Borrowed(name)
    }
}
