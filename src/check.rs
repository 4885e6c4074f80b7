//! Document checking - static analysis of API document references.
//!
//! Checks documents for:
//! - YAML / JSON syntax errors
//! - References that cannot be resolved (missing file, missing pointer segment)
//! - Malformed reference strings
//! - Circular references

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::config::IndexConfig;
use crate::context::BuildContext;
use crate::error::{LoadError, ResolveError};
use crate::rolodex::{self, Rolodex};

const DOCUMENT_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single diagnostic message from checking.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    pub file: PathBuf,
    /// Pointer to the reference site (e.g., "#/components/schemas/pet")
    pub path: String,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// Result of checking a single file.
#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub file: PathBuf,
    pub status: FileStatus,
    pub references: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Status of a checked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Ok,
    Error,
    Warning,
}

/// Result of checking a directory or set of files.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub path: PathBuf,
    pub files_checked: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub warnings: usize,
    pub results: Vec<FileResult>,
}

impl CheckResult {
    /// Returns true if all files passed (no errors).
    pub fn is_ok(&self) -> bool {
        self.errors == 0
    }
}

/// Check a file or directory.
///
/// If path is a directory, recursively finds all `.yaml`, `.yml` and `.json` files.
/// If `strict` is true, warnings fail a file too.
pub fn check(path: &Path, config: &IndexConfig, strict: bool) -> CheckResult {
    let files = collect_document_files(path);
    let mut results = Vec::new();
    let mut total_errors = 0;
    let mut total_warnings = 0;

    for file in &files {
        let file_result = check_file(file, path, config);
        total_errors += file_result
            .diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count();
        total_warnings += file_result
            .diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count();
        results.push(file_result);
    }

    let failed = results
        .iter()
        .filter(|r| {
            if strict {
                r.status != FileStatus::Ok
            } else {
                r.status == FileStatus::Error
            }
        })
        .count();

    CheckResult {
        path: path.to_path_buf(),
        files_checked: files.len(),
        passed: files.len() - failed,
        failed,
        errors: total_errors,
        warnings: total_warnings,
        results,
    }
}

/// Check a single document and the references it makes.
pub fn check_file(file: &Path, base_path: &Path, config: &IndexConfig) -> FileResult {
    let display = file.strip_prefix(base_path).unwrap_or(file).to_path_buf();
    let mut diagnostics = Vec::new();
    let diagnostic = |severity: Severity,
                      code: &str,
                      path: &str,
                      line: usize,
                      column: usize,
                      message: String| Diagnostic {
        severity,
        code: code.to_string(),
        file: file.to_path_buf(),
        path: path.to_string(),
        line,
        column,
        message,
    };

    let documents = Rolodex::new(config.clone());
    let index = match documents.load_root(&file.to_string_lossy()) {
        Ok(index) => index,
        Err(e) => {
            let code = match e {
                LoadError::InvalidDocument { .. } => "E001",
                _ => "E002",
            };
            diagnostics.push(diagnostic(Severity::Error, code, "#", 0, 0, e.to_string()));
            return FileResult {
                file: display,
                status: FileStatus::Error,
                references: 0,
                diagnostics,
            };
        }
    };

    for cycle in documents.check_for_circular_references() {
        let tolerated = config.allow_circular_references || !cycle.is_infinite_loop();
        let (severity, code) = if tolerated {
            (Severity::Warning, "W001")
        } else {
            (Severity::Error, "E005")
        };
        diagnostics.push(diagnostic(
            severity,
            code,
            &cycle.source,
            cycle.line,
            cycle.column,
            format!("circular reference: {}", cycle.journey_path()),
        ));
    }

    let ctx = BuildContext::new().with_location(index.location());
    for edge in index.references() {
        let position = edge.position();
        let Err(e) = rolodex::lookup(&ctx, &edge.reference, position, &index) else {
            continue;
        };
        let code = match e {
            ResolveError::MalformedReference { .. } => "E004",
            ResolveError::SegmentNotFound { .. } => "E003",
            _ => "E002",
        };
        diagnostics.push(diagnostic(
            Severity::Error,
            code,
            &edge.source,
            position.line,
            position.column,
            e.to_string(),
        ));
    }
    debug!(
        file = %file.display(),
        references = index.references().len(),
        diagnostics = diagnostics.len(),
        "checked document"
    );

    let has_errors = diagnostics.iter().any(|d| d.severity == Severity::Error);
    let has_warnings = diagnostics.iter().any(|d| d.severity == Severity::Warning);

    let status = if has_errors {
        FileStatus::Error
    } else if has_warnings {
        FileStatus::Warning
    } else {
        FileStatus::Ok
    };

    FileResult {
        file: display,
        status,
        references: index.references().len(),
        diagnostics,
    }
}

fn is_document(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| DOCUMENT_EXTENSIONS.contains(&e))
}

/// Collect all document files from a path (file or directory).
fn collect_document_files(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        if is_document(path) {
            return vec![path.to_path_buf()];
        }
        return vec![];
    }

    let mut files = Vec::new();
    collect_files_recursive(path, &mut files);
    files.sort();
    files
}

fn collect_files_recursive(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files_recursive(&path, files);
        } else if is_document(&path) {
            files.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn codes(result: &FileResult) -> Vec<&str> {
        result.diagnostics.iter().map(|d| d.code.as_str()).collect()
    }

    #[test]
    fn clean_document_passes() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("api.yaml");
        fs::write(
            &file,
            "components:\n  schemas:\n    a:\n      $ref: '#/components/schemas/b'\n    b:\n      type: string\n",
        )
        .unwrap();
        let result = check_file(&file, dir.path(), &IndexConfig::open());
        assert_eq!(result.status, FileStatus::Ok);
        assert_eq!(result.references, 1);
        assert_eq!(result.file, PathBuf::from("api.yaml"));
    }

    #[test]
    fn syntax_error_is_e001() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.yaml");
        fs::write(&file, "a: [unclosed\n").unwrap();
        let result = check_file(&file, dir.path(), &IndexConfig::open());
        assert_eq!(result.status, FileStatus::Error);
        assert_eq!(codes(&result), vec!["E001"]);
    }

    #[test]
    fn broken_references_are_classified() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("api.yaml");
        fs::write(
            &file,
            "a:\n  $ref: '#/nowhere'\nb:\n  $ref: missing.yaml#/thing\nc:\n  $ref: '#BORK'\n",
        )
        .unwrap();
        let result = check_file(&file, dir.path(), &IndexConfig::open());
        assert_eq!(codes(&result), vec!["E003", "E002", "E004"]);
        assert_eq!(result.diagnostics[0].path, "#/a");
        assert_eq!(result.diagnostics[0].line, 2);
    }

    #[test]
    fn infinite_cycle_is_error_and_array_cycle_is_warning() {
        let dir = tempdir().unwrap();
        let looped = dir.path().join("loop.yaml");
        fs::write(
            &looped,
            "a:\n  $ref: '#/b'\nb:\n  $ref: '#/a'\n",
        )
        .unwrap();
        let result = check_file(&looped, dir.path(), &IndexConfig::open());
        assert_eq!(codes(&result), vec!["E005"]);

        let tree = dir.path().join("tree.yaml");
        fs::write(
            &tree,
            "tree:\n  type: array\n  items:\n    $ref: '#/tree'\n",
        )
        .unwrap();
        let result = check_file(&tree, dir.path(), &IndexConfig::open());
        assert_eq!(codes(&result), vec!["W001"]);
        assert_eq!(result.status, FileStatus::Warning);
    }

    #[test]
    fn directory_check_counts_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("one.yaml"), "a: 1\n").unwrap();
        fs::write(dir.path().join("two.json"), "{\"b\": {\"$ref\": \"#/nope\"}}").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let result = check(dir.path(), &IndexConfig::open(), false);
        assert_eq!(result.files_checked, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(result.errors, 1);
        assert!(!result.is_ok());
    }

    #[test]
    fn strict_fails_on_warnings() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("tree.yaml"),
            "tree:\n  items:\n    $ref: '#/tree'\n",
        )
        .unwrap();
        assert_eq!(check(dir.path(), &IndexConfig::open(), false).failed, 0);
        assert_eq!(check(dir.path(), &IndexConfig::open(), true).failed, 1);
    }
}
