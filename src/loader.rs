//! Document loading for the rolodex.
//!
//! Handles loading documents from files and HTTP URLs, subject to the
//! index configuration.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::config::IndexConfig;
use crate::error::LoadError;
use crate::node::{parse_document, Node};

#[cfg(feature = "remote")]
use std::time::Duration;

/// Load document text from a file path.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` if the file doesn't exist,
/// or `LoadError::ReadError` if it cannot be read.
pub fn load_file(path: &Path) -> Result<String, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    std::fs::read_to_string(path).map_err(|source| LoadError::ReadError {
        path: path.to_path_buf(),
        source: Arc::new(source),
    })
}

/// Load document text from an HTTP/HTTPS URL.
///
/// Requires the `remote` feature (enabled by default).
///
/// # Errors
///
/// Returns `LoadError::NetworkError` if the request fails or the server
/// answers with an error status.
#[cfg(feature = "remote")]
pub fn load_url(url: &str, timeout: Duration) -> Result<String, LoadError> {
    let network = |source: reqwest::Error| LoadError::NetworkError {
        url: url.to_string(),
        source: Arc::new(source),
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(network)?;

    let response = client.get(url).send().map_err(network)?;

    // Check for HTTP errors before reading the body
    let response = response.error_for_status().map_err(network)?;

    response.text().map_err(network)
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Load raw text for a location, honouring the configured lookup permissions.
///
/// # Errors
///
/// Returns `LoadError::RemoteLookupDisabled` / `LoadError::FileLookupDisabled`
/// when the configuration forbids the lookup, otherwise whatever the file or
/// network load reports.
pub fn load_source(location: &str, config: &IndexConfig) -> Result<String, LoadError> {
    if is_url(location) {
        if !config.allow_remote_references {
            return Err(LoadError::RemoteLookupDisabled {
                location: location.to_string(),
            });
        }
        debug!(url = location, "fetching remote document");
        #[cfg(feature = "remote")]
        return load_url(location, config.remote_timeout);
        #[cfg(not(feature = "remote"))]
        return Err(LoadError::RemoteUnsupported {
            url: location.to_string(),
        });
    }

    if !config.allow_file_references {
        return Err(LoadError::FileLookupDisabled {
            location: location.to_string(),
        });
    }
    debug!(path = location, "reading document");
    load_file(Path::new(location))
}

/// Load and parse a document.
pub fn load_document(location: &str, config: &IndexConfig) -> Result<Node, LoadError> {
    let text = load_source(location, config)?;
    parse_text(location, &text)
}

/// Parse already loaded text, tagging failures with the location.
pub fn parse_text(location: &str, text: &str) -> Result<Node, LoadError> {
    parse_document(text).map_err(|source| LoadError::InvalidDocument {
        location: location.to_string(),
        source: Arc::new(source),
    })
}

/// Lexically normalise a path: drop `.` and fold `..` without touching the disk.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(
                    out.components().next_back(),
                    Some(Component::Normal(_))
                ) && out.pop();
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Absolute, normalised form of a local path.
pub fn absolute_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return normalize_path(path);
    }
    match std::env::current_dir() {
        Ok(cwd) => normalize_path(&cwd.join(path)),
        Err(_) => normalize_path(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn load_file_reads_text() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "openapi: 3.1.0").unwrap();
        assert_eq!(load_file(file.path()).unwrap(), "openapi: 3.1.0");
    }

    #[test]
    fn load_file_missing() {
        let err = load_file(Path::new("/nonexistent/pizza.yaml")).unwrap_err();
        assert!(matches!(err, LoadError::FileNotFound { .. }));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn closed_config_refuses_lookups() {
        let config = IndexConfig::closed();
        assert!(matches!(
            load_source("/tmp/pizza.yaml", &config),
            Err(LoadError::FileLookupDisabled { .. })
        ));
        assert!(matches!(
            load_source("https://pb33f.io/pizza.yaml", &config),
            Err(LoadError::RemoteLookupDisabled { .. })
        ));
    }

    #[test]
    fn parse_failure_carries_location() {
        let err = parse_text("bad.yaml", "a: [").unwrap_err();
        assert!(err.to_string().starts_with("cannot parse bad.yaml"));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn is_url_detection() {
        assert!(is_url("http://example.com/schema.json"));
        assert!(is_url("https://example.com/schema.json"));
        assert!(!is_url("/path/to/schema.json"));
        assert!(!is_url("schema.json"));
    }

    #[test]
    fn normalize_folds_parent_components() {
        assert_eq!(
            normalize_path(Path::new("/a/b/../c/./d.yaml")),
            PathBuf::from("/a/c/d.yaml")
        );
        assert_eq!(normalize_path(Path::new("../x.yaml")), PathBuf::from("../x.yaml"));
        assert_eq!(normalize_path(Path::new("/../x.yaml")), PathBuf::from("/x.yaml"));
    }
}
