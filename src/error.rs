//! Error types for parsing, loading, resolving and extracting.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::node::{NodeKind, Position};

/// Errors turning document text into a node tree.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("document is empty")]
    Empty,

    #[error("invalid YAML: {source}")]
    Yaml {
        #[from]
        source: serde_yaml::Error,
    },
}

/// Errors fetching a document for the rolodex.
///
/// Cloneable so a failed load can be shared by every waiter of a single-flight slot.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: Arc<reqwest::Error>,
    },

    #[error("remote documents are not supported in this build: {url}")]
    RemoteUnsupported { url: String },

    // Document errors (exit code 2)
    #[error("cannot parse {location}: {source}")]
    InvalidDocument {
        location: String,
        #[source]
        source: Arc<ParseError>,
    },

    #[error("file references are disabled, cannot open {location}")]
    FileLookupDisabled { location: String },

    #[error("remote references are disabled, cannot fetch {location}")]
    RemoteLookupDisabled { location: String },

    #[error("invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::FileNotFound { .. }
            | LoadError::ReadError { .. }
            | LoadError::RemoteUnsupported { .. } => 3,
            #[cfg(feature = "remote")]
            LoadError::NetworkError { .. } => 3,
            _ => 2,
        }
    }
}

/// Errors resolving a `$ref` to a node.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("malformed reference '{reference}' (line {line}, column {column})")]
    MalformedReference {
        reference: String,
        line: usize,
        column: usize,
    },

    #[error("cannot resolve reference '{reference}': segment '{segment}' not found (line {line}, column {column})")]
    SegmentNotFound {
        reference: String,
        segment: String,
        line: usize,
        column: usize,
    },

    #[error("cannot resolve reference '{reference}': {source}")]
    Load {
        reference: String,
        #[source]
        source: LoadError,
    },

    #[error("circular reference '{reference}' found during lookup at line {line}, column {column}: {journey}")]
    Circular {
        reference: String,
        journey: String,
        line: usize,
        column: usize,
    },

    #[error("reference resolution cancelled")]
    Cancelled,

    #[error("reference resolution timed out")]
    TimedOut,
}

impl ResolveError {
    /// Stamp the position of the referencing site.
    pub fn at(mut self, position: Position) -> Self {
        match &mut self {
            ResolveError::MalformedReference { line, column, .. }
            | ResolveError::SegmentNotFound { line, column, .. }
            | ResolveError::Circular { line, column, .. } => {
                *line = position.line;
                *column = position.column;
            }
            _ => {}
        }
        self
    }

    /// Report the error against the caller's spelling of the reference.
    pub fn for_reference(mut self, raw: &str) -> Self {
        match &mut self {
            ResolveError::MalformedReference { reference, .. }
            | ResolveError::SegmentNotFound { reference, .. }
            | ResolveError::Load { reference, .. }
            | ResolveError::Circular { reference, .. } => *reference = raw.to_string(),
            ResolveError::Cancelled | ResolveError::TimedOut => {}
        }
        self
    }

    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ResolveError::Load { source, .. } => source.exit_code(),
            _ => 2,
        }
    }
}

/// Errors while building typed values from nodes.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("build failed: {message}")]
    Build { message: String },

    #[error("{operation}: expected {expected}, found {found} (line {line}, column {column})")]
    WrongKind {
        operation: &'static str,
        expected: NodeKind,
        found: NodeKind,
        line: usize,
        column: usize,
    },
}

impl ExtractError {
    pub fn build(message: impl Into<String>) -> Self {
        ExtractError::Build {
            message: message.into(),
        }
    }

    /// True when the failure is a reference cycle.
    pub fn is_circular(&self) -> bool {
        matches!(self, ExtractError::Resolve(ResolveError::Circular { .. }))
    }

    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExtractError::Resolve(e) => e.exit_code(),
            _ => 2,
        }
    }
}

/// An extraction failure that still carries whatever was built.
#[derive(Debug)]
pub struct Partial<V> {
    pub value: V,
    pub error: ExtractError,
}

impl<V> Partial<V> {
    pub fn new(value: V, error: impl Into<ExtractError>) -> Self {
        Self {
            value,
            error: error.into(),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> Partial<U> {
        Partial {
            value: f(self.value),
            error: self.error,
        }
    }

    pub fn into_parts(self) -> (V, ExtractError) {
        (self.value, self.error)
    }
}

impl<V> fmt::Display for Partial<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl<V: fmt::Debug> std::error::Error for Partial<V> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl<V> From<Partial<V>> for ExtractError {
    fn from(partial: Partial<V>) -> Self {
        partial.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_error_exit_codes() {
        let err = LoadError::FileNotFound {
            path: PathBuf::from("pizza.yaml"),
        };
        assert_eq!(err.exit_code(), 3);

        let err = LoadError::FileLookupDisabled {
            location: "pizza.yaml".into(),
        };
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn resolve_error_inherits_load_exit_code() {
        let err = ResolveError::Load {
            reference: "pizza.yaml#/cake".into(),
            source: LoadError::FileNotFound {
                path: PathBuf::from("pizza.yaml"),
            },
        };
        assert_eq!(err.exit_code(), 3);
        assert_eq!(ResolveError::Cancelled.exit_code(), 2);
    }

    #[test]
    fn at_stamps_position() {
        let err = ResolveError::SegmentNotFound {
            reference: "#/nope".into(),
            segment: "nope".into(),
            line: 0,
            column: 0,
        }
        .at(Position::new(4, 9));
        assert_eq!(
            err.to_string(),
            "cannot resolve reference '#/nope': segment 'nope' not found (line 4, column 9)"
        );
    }

    #[test]
    fn partial_converts_to_its_error() {
        let partial = Partial::new(vec![1, 2], ExtractError::build("bad"));
        assert_eq!(partial.to_string(), "build failed: bad");
        let err: ExtractError = partial.into();
        assert!(matches!(err, ExtractError::Build { .. }));
    }

    #[test]
    fn circular_is_detected() {
        let err = ExtractError::from(ResolveError::Circular {
            reference: "#/a".into(),
            journey: "a -> a".into(),
            line: 1,
            column: 1,
        });
        assert!(err.is_circular());
        assert!(!ExtractError::build("x").is_circular());
    }
}
