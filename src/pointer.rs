//! Reference string classification and the raw-text reference scanner.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// Where a reference points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefType {
    /// Same document.
    Local,
    /// Another file on disk.
    File,
    /// A remote document.
    Http,
}

impl std::fmt::Display for RefType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RefType::Local => "local",
            RefType::File => "file",
            RefType::Http => "http",
        };
        f.write_str(name)
    }
}

/// Separator between document location and pointer.
pub const POINTER_SEPARATOR: &str = "#/";

const DOCUMENT_EXTENSIONS: &[&str] = &[".yaml", ".json"];

/// Classify a reference string.
///
/// `http` prefixes are remote. `/`, `../` and `./` prefixes are files, as is
/// anything ending in a document extension or with a non-empty location
/// before `#/`. Everything else is local.
pub fn classify(reference: &str) -> RefType {
    if reference.starts_with("http") {
        return RefType::Http;
    }
    if reference.starts_with('/') || reference.starts_with("../") || reference.starts_with("./") {
        return RefType::File;
    }
    if DOCUMENT_EXTENSIONS.iter().any(|ext| reference.ends_with(ext)) {
        return RefType::File;
    }
    match reference.split_once(POINTER_SEPARATOR) {
        Some((location, _)) if !location.is_empty() => RefType::File,
        _ => RefType::Local,
    }
}

/// Split a reference into `(location, id)` on the first `#/`.
///
/// A reference without `#/` is wholly a location with an empty id.
pub fn split(reference: &str) -> (&str, &str) {
    reference
        .split_once(POINTER_SEPARATOR)
        .unwrap_or((reference, ""))
}

/// Location part of a reference, empty for local references.
pub fn file_of(reference: &str) -> &str {
    match classify(reference) {
        RefType::Local => "",
        _ => split(reference).0,
    }
}

/// Pointer part of a reference. Local references come back unchanged.
pub fn pointer_of(reference: &str) -> String {
    match classify(reference) {
        RefType::Local => reference.to_string(),
        _ => match split(reference).1 {
            "" => String::new(),
            id => format!("{POINTER_SEPARATOR}{id}"),
        },
    }
}

/// Escape a mapping key for use as a pointer segment.
pub fn escape_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Undo [`escape_segment`].
pub fn unescape_segment(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

/// Unescaped segments of a pointer id (the part after `#/`).
pub fn segments(id: &str) -> Vec<String> {
    if id.is_empty() {
        return Vec::new();
    }
    id.split('/').map(unescape_segment).collect()
}

/// Human name for a pointer id: its last segment.
pub fn name_of(id: &str) -> String {
    segments(id).pop().unwrap_or_default()
}

/// Canonical lookup key for a location and pointer id.
pub fn lookup_key(location: &str, id: &str) -> String {
    match (location.is_empty(), id.is_empty()) {
        (true, true) => "#".to_string(),
        (false, true) => location.to_string(),
        _ => format!("{location}{POINTER_SEPARATOR}{id}"),
    }
}

/// A reference found by the text scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedRef {
    pub location: String,
    pub ref_type: RefType,
}

impl ExtractedRef {
    pub fn new(location: impl Into<String>) -> Self {
        let location = location.into();
        let ref_type = classify(&location);
        Self { location, ref_type }
    }

    /// Document part of the reference.
    pub fn file(&self) -> &str {
        file_of(&self.location)
    }

    /// Pointer part of the reference.
    pub fn reference(&self) -> String {
        pointer_of(&self.location)
    }
}

fn ref_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r#"['"]?\$ref['"]?\s*:\s*(?:"([^"]*)"|'([^']*)'|([^\s,}\]"'#][^\s,}\]"']*))"#,
            )
            .ok()
        })
        .as_ref()
}

/// Scan raw YAML or JSON text for `$ref` values without parsing it.
pub fn extract_refs(content: &str) -> Vec<ExtractedRef> {
    let Some(pattern) = ref_pattern() else {
        return Vec::new();
    };
    pattern
        .captures_iter(content)
        .filter_map(|caps| {
            caps.get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
        })
        .filter(|value| !value.is_empty())
        .map(ExtractedRef::new)
        .collect()
}
