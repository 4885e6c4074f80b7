//! Index and rolodex configuration.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

/// Default timeout for remote document fetches (10 seconds).
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

/// How references may be followed while indexing and extracting.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Directory relative file references resolve against when the
    /// referencing document has no location of its own.
    pub base_path: Option<PathBuf>,
    /// Base for relative references when documents are served remotely.
    pub base_url: Option<Url>,
    /// Allow references into other files.
    pub allow_file_references: bool,
    /// Allow references to remote documents.
    pub allow_remote_references: bool,
    /// Treat detected cycles as resolvable instead of errors.
    pub allow_circular_references: bool,
    pub remote_timeout: Duration,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self::closed()
    }
}

impl IndexConfig {
    /// Local references only.
    pub fn closed() -> Self {
        Self {
            base_path: None,
            base_url: None,
            allow_file_references: false,
            allow_remote_references: false,
            allow_circular_references: false,
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }

    /// File and remote references enabled.
    pub fn open() -> Self {
        Self {
            allow_file_references: true,
            allow_remote_references: true,
            ..Self::closed()
        }
    }

    pub fn base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    pub fn base_url(mut self, url: Url) -> Self {
        self.base_url = Some(url);
        self
    }

    pub fn allow_file_references(mut self, allow: bool) -> Self {
        self.allow_file_references = allow;
        self
    }

    pub fn allow_remote_references(mut self, allow: bool) -> Self {
        self.allow_remote_references = allow;
        self
    }

    pub fn allow_circular_references(mut self, allow: bool) -> Self {
        self.allow_circular_references = allow;
        self
    }

    pub fn remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_by_default() {
        let config = IndexConfig::default();
        assert!(!config.allow_file_references);
        assert!(!config.allow_remote_references);
        assert!(!config.allow_circular_references);
        assert_eq!(config.remote_timeout, DEFAULT_REMOTE_TIMEOUT);
    }

    #[test]
    fn builder_sets_fields() {
        let url = Url::parse("https://pb33f.io/pizza/").unwrap();
        let config = IndexConfig::open()
            .base_path("/tmp/specs")
            .base_url(url.clone())
            .allow_remote_references(false)
            .remote_timeout(Duration::from_secs(2));
        assert!(config.allow_file_references);
        assert!(!config.allow_remote_references);
        assert_eq!(config.base_path, Some(PathBuf::from("/tmp/specs")));
        assert_eq!(config.base_url, Some(url));
        assert_eq!(config.remote_timeout, Duration::from_secs(2));
    }
}
