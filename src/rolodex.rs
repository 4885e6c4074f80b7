//! Cross-document reference resolution.
//!
//! A [`Rolodex`] owns every document reachable from a root: it opens files
//! and remote documents on demand, indexes each one exactly once, and keeps
//! the errors of loads that failed. Lookups go through [`locate`], which
//! follows one reference hop to the owning index and applies the circular
//! policy.

use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use url::Url;

use crate::config::IndexConfig;
use crate::context::BuildContext;
use crate::error::{LoadError, ResolveError};
use crate::flight::SingleFlight;
use crate::index::SpecIndex;
use crate::loader;
use crate::model::Reference;
use crate::node::{Node, Position};
use crate::pointer::{self, RefType};
use crate::resolver::{CircularReferenceResult, Resolver};

/// Where a reference string points, before anything is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Target {
    /// Canonical document location; empty for local references.
    pub location: String,
    /// Pointer id without the leading `#/`.
    pub id: String,
    pub ref_type: RefType,
}

/// Resolve a reference string against the location of the document it appears in.
///
/// Relative files resolve against the directory of `current`, falling back to
/// the configured base path (or base URL) when `current` is unknown. A file
/// reference made from a remote document becomes a remote reference.
pub(crate) fn resolve_target(
    reference: &str,
    current: &str,
    config: &IndexConfig,
) -> Result<Target, ResolveError> {
    let malformed = || ResolveError::MalformedReference {
        reference: reference.to_string(),
        line: 0,
        column: 0,
    };
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return Err(malformed());
    }

    let same_document = trimmed.starts_with(pointer::POINTER_SEPARATOR);
    match pointer::classify(trimmed) {
        RefType::Local | RefType::File if same_document || trimmed == "#" => {
            Ok(local_target(trimmed))
        }
        RefType::Local => Err(malformed()),
        RefType::Http => {
            let (location, id) = pointer::split(trimmed);
            let url = Url::parse(location).map_err(|_| malformed())?;
            Ok(Target {
                location: url.to_string(),
                id: id.to_string(),
                ref_type: RefType::Http,
            })
        }
        RefType::File => {
            let (file, id) = pointer::split(trimmed);
            let remote_base = if loader::is_url(current) {
                Url::parse(current).ok()
            } else if current.is_empty() && config.base_path.is_none() {
                config.base_url.clone().map(directory_url)
            } else {
                None
            };
            if let Some(base) = remote_base {
                let joined = base.join(file).map_err(|_| malformed())?;
                return Ok(Target {
                    location: joined.to_string(),
                    id: id.to_string(),
                    ref_type: RefType::Http,
                });
            }

            let path = Path::new(file);
            let resolved = if path.is_absolute() {
                loader::normalize_path(path)
            } else {
                let base = match Path::new(current).parent() {
                    Some(dir) if !current.is_empty() => dir.to_path_buf(),
                    _ => config
                        .base_path
                        .clone()
                        .unwrap_or_else(|| Path::new(".").to_path_buf()),
                };
                loader::absolute_path(&base.join(path))
            };
            Ok(Target {
                location: resolved.to_string_lossy().into_owned(),
                id: id.to_string(),
                ref_type: RefType::File,
            })
        }
    }
}

/// A pointer into the current document, whatever its final segment looks like.
fn local_target(reference: &str) -> Target {
    let (_, id) = pointer::split(reference);
    Target {
        location: String::new(),
        id: id.to_string(),
        ref_type: RefType::Local,
    }
}

/// Base URLs name a directory; `join` needs the trailing slash to keep the last segment.
fn directory_url(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// A reference followed one hop.
#[derive(Debug, Clone)]
pub struct Located {
    pub reference: Reference,
    /// Context for building the target: its location replaces the caller's.
    pub context: BuildContext,
    /// The recorded cycle this target belongs to, if any.
    pub circular: Option<CircularReferenceResult>,
}

impl Located {
    pub fn node(&self) -> &Node {
        &self.reference.node
    }

    pub fn index(&self) -> &Arc<SpecIndex> {
        &self.reference.index
    }
}

/// Follow one reference hop without applying the circular policy.
pub(crate) fn lookup(
    ctx: &BuildContext,
    reference: &str,
    at: Position,
    index: &Arc<SpecIndex>,
) -> Result<Located, ResolveError> {
    ctx.check()?;
    let current = ctx
        .location()
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| index.location());
    let target = resolve_target(reference, current, index.config()).map_err(|e| e.at(at))?;
    let location = match target.ref_type {
        RefType::Local => index.location().to_string(),
        _ => target.location.clone(),
    };
    let key = pointer::lookup_key(&location, &target.id);

    let mut found = index
        .cache
        .get_or_run(&key, || fetch(reference, &target, &location, &key, index))
        .map_err(|e| e.for_reference(reference).at(at))?;
    found.raw = reference.to_string();
    trace!(reference, key = %key, "located reference");

    let circular = found
        .index
        .circular_for(&key)
        .or_else(|| index.circular_for(&key));
    let mut context = ctx.clone();
    if !found.location.is_empty() {
        context = context.with_location(found.location.as_str());
    }
    Ok(Located {
        reference: found,
        context,
        circular,
    })
}

fn fetch(
    raw: &str,
    target: &Target,
    location: &str,
    key: &str,
    index: &Arc<SpecIndex>,
) -> Result<Reference, ResolveError> {
    let owner = if target.ref_type == RefType::Local || location == index.location() {
        Arc::clone(index)
    } else {
        let disabled = match target.ref_type {
            RefType::Http => LoadError::RemoteLookupDisabled {
                location: location.to_string(),
            },
            _ => LoadError::FileLookupDisabled {
                location: location.to_string(),
            },
        };
        let rolodex = index.rolodex().ok_or_else(|| ResolveError::Load {
            reference: raw.to_string(),
            source: disabled,
        })?;
        rolodex.open(location).map_err(|source| ResolveError::Load {
            reference: raw.to_string(),
            source,
        })?
    };

    let node = owner
        .find_pointer(&target.id)
        .map_err(|segment| ResolveError::SegmentNotFound {
            reference: raw.to_string(),
            segment,
            line: 0,
            column: 0,
        })?;
    let name = match pointer::name_of(&target.id) {
        name if name.is_empty() => location.to_string(),
        name => name,
    };
    Ok(Reference {
        raw: raw.to_string(),
        key: key.to_string(),
        location: location.to_string(),
        id: target.id.clone(),
        ref_type: target.ref_type,
        name,
        node,
        index: owner,
    })
}

/// Follow one reference hop, failing on a recorded cycle unless the index allows them.
///
/// # Errors
///
/// Malformed references, missing pointer segments, failed loads,
/// cancellation, and disallowed cycles.
pub fn locate(
    ctx: &BuildContext,
    reference: &str,
    index: &Arc<SpecIndex>,
) -> Result<Located, ResolveError> {
    locate_at(ctx, reference, Position::default(), index)
}

fn locate_at(
    ctx: &BuildContext,
    reference: &str,
    at: Position,
    index: &Arc<SpecIndex>,
) -> Result<Located, ResolveError> {
    let located = lookup(ctx, reference, at, index)?;
    match &located.circular {
        Some(cycle) if !index.allow_circular_references() => Err(ResolveError::Circular {
            reference: reference.to_string(),
            journey: cycle.journey_path(),
            line: at.line,
            column: at.column,
        }),
        _ => Ok(located),
    }
}

/// Locate the target of a `$ref` mapping. `None` when the node is not a reference.
pub fn locate_node(
    ctx: &BuildContext,
    node: &Node,
    index: &Arc<SpecIndex>,
) -> Option<Result<Located, ResolveError>> {
    let (key, reference) = node.reference()?;
    Some(locate_at(ctx, &reference, key.position(), index))
}

/// Registry of every document reachable from a root.
pub struct Rolodex {
    me: Weak<Rolodex>,
    config: IndexConfig,
    documents: SingleFlight<Result<Arc<SpecIndex>, LoadError>>,
    root: OnceLock<Arc<SpecIndex>>,
    load_errors: Mutex<Vec<LoadError>>,
}

impl Rolodex {
    pub fn new(config: IndexConfig) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config,
            documents: SingleFlight::default(),
            root: OnceLock::new(),
            load_errors: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Index an already parsed root document and register it under `location`.
    pub fn index_root(&self, location: impl Into<String>, root: Node) -> Arc<SpecIndex> {
        let index = self.index_document(location, root);
        if self.root.set(Arc::clone(&index)).is_err() {
            debug!(location = %index.location(), "rolodex already has a root, keeping the first");
        }
        index
    }

    /// Register an already parsed document. The first registration of a location wins.
    pub fn index_document(&self, location: impl Into<String>, root: Node) -> Arc<SpecIndex> {
        let location = location.into();
        let built = SpecIndex::build(location.clone(), root, self.config.clone(), self.me.clone());
        self.documents.insert(&location, Ok(Arc::clone(&built)));
        match self.documents.get(&location) {
            Some(Ok(existing)) => existing,
            _ => built,
        }
    }

    /// Load, index and pre-scan the root document at a path or URL.
    ///
    /// # Errors
    ///
    /// Returns the load error of the root itself. Dependency failures are kept
    /// in [`Rolodex::load_errors`].
    pub fn load_root(&self, location: &str) -> Result<Arc<SpecIndex>, LoadError> {
        let location = if loader::is_url(location) {
            location.to_string()
        } else {
            loader::absolute_path(Path::new(location))
                .to_string_lossy()
                .into_owned()
        };
        let text = loader::load_source(&location, &self.config)?;
        let root = loader::parse_text(&location, &text)?;
        let index = self.index_root(location.clone(), root);
        self.load_dependencies(&location, &text);
        Ok(index)
    }

    /// Open the document at a canonical location, loading and indexing it once.
    ///
    /// Concurrent callers for the same location share one load.
    pub fn open(&self, location: &str) -> Result<Arc<SpecIndex>, LoadError> {
        self.documents.get_or_run(location, || {
            debug!(location, "opening document");
            let loaded = loader::load_document(location, &self.config).map(|root| {
                SpecIndex::build(
                    location.to_string(),
                    root,
                    self.config.clone(),
                    self.me.clone(),
                )
            });
            if let Err(e) = &loaded {
                warn!(location, error = %e, "failed to open document");
                self.load_errors.lock().push(e.clone());
            }
            loaded
        })
    }

    /// Discover and load every document referenced from `text`, transitively.
    ///
    /// Uses the raw-text scanner so dependencies are fetched before anything
    /// walks the parsed trees. Returns the locations loaded, in discovery order.
    pub fn load_dependencies(&self, location: &str, text: &str) -> Vec<String> {
        let mut loaded = Vec::new();
        let mut seen: HashSet<String> = HashSet::from([location.to_string()]);
        let mut queue = VecDeque::from([(location.to_string(), text.to_string())]);

        while let Some((current, content)) = queue.pop_front() {
            for found in pointer::extract_refs(&content) {
                if found.ref_type == RefType::Local {
                    continue;
                }
                let Ok(target) = resolve_target(&found.location, &current, &self.config) else {
                    continue;
                };
                if target.ref_type == RefType::Local {
                    continue;
                }
                if !seen.insert(target.location.clone()) {
                    continue;
                }
                let source = loader::load_source(&target.location, &self.config);
                let parsed = source.and_then(|text| {
                    loader::parse_text(&target.location, &text).map(|root| (root, text))
                });
                match parsed {
                    Ok((root, text)) => {
                        self.index_document(target.location.clone(), root);
                        loaded.push(target.location.clone());
                        queue.push_back((target.location, text));
                    }
                    Err(e) => {
                        warn!(location = %target.location, error = %e, "failed to load dependency");
                        self.load_errors.lock().push(e.clone());
                        self.documents.insert(&target.location, Err(e));
                    }
                }
            }
        }
        debug!(root = location, documents = loaded.len(), "loaded dependencies");
        loaded
    }

    pub fn root_index(&self) -> Option<Arc<SpecIndex>> {
        self.root.get().cloned()
    }

    /// Every successfully indexed document.
    pub fn indexes(&self) -> Vec<Arc<SpecIndex>> {
        let mut indexes: Vec<Arc<SpecIndex>> =
            self.documents.values().into_iter().flatten().collect();
        indexes.sort_by(|a, b| a.location().cmp(b.location()));
        indexes
    }

    /// Errors from every load that failed, in the order they happened.
    pub fn load_errors(&self) -> Vec<LoadError> {
        self.load_errors.lock().clone()
    }

    /// Run cycle detection from the root document.
    pub fn check_for_circular_references(&self) -> Vec<CircularReferenceResult> {
        match self.root_index() {
            Some(root) => Resolver::new(root).check_for_circular_references(),
            None => Vec::new(),
        }
    }
}

impl std::fmt::Debug for Rolodex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rolodex")
            .field("documents", &self.documents.len())
            .field("root", &self.root.get().map(|r| r.location().to_string()))
            .field("load_errors", &self.load_errors.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::parse_document;

    fn closed_index(yaml: &str) -> Arc<SpecIndex> {
        SpecIndex::new(parse_document(yaml).unwrap(), IndexConfig::closed())
    }

    #[test]
    fn resolve_local_target() {
        let target = resolve_target("#/components/schemas/cake", "", &IndexConfig::closed()).unwrap();
        assert_eq!(target.ref_type, RefType::Local);
        assert_eq!(target.id, "components/schemas/cake");
        assert_eq!(target.location, "");
    }

    #[test]
    fn resolve_relative_file_against_current_document() {
        let target =
            resolve_target("../shared/pet.yaml#/Pet", "/specs/api/root.yaml", &IndexConfig::open())
                .unwrap();
        assert_eq!(target.location, "/specs/shared/pet.yaml");
        assert_eq!(target.id, "Pet");
        assert_eq!(target.ref_type, RefType::File);
    }

    #[test]
    fn resolve_relative_file_against_base_path() {
        let config = IndexConfig::open().base_path("/jazzy/shoes");
        let target = resolve_target("./pet.yaml", "", &config).unwrap();
        assert_eq!(target.location, "/jazzy/shoes/pet.yaml");
        assert_eq!(target.id, "");
    }

    #[test]
    fn file_reference_from_remote_document_is_remote() {
        let target = resolve_target(
            "pet.yaml#/Pet",
            "https://pb33f.io/specs/root.yaml",
            &IndexConfig::open(),
        )
        .unwrap();
        assert_eq!(target.ref_type, RefType::Http);
        assert_eq!(target.location, "https://pb33f.io/specs/pet.yaml");
    }

    #[test]
    fn relative_file_joins_base_url_as_directory() {
        let config =
            IndexConfig::open().base_url(Url::parse("https://pb33f.io/pizza/burgers").unwrap());
        let target = resolve_target("fries/cheese.yaml#/x", "", &config).unwrap();
        assert_eq!(target.location, "https://pb33f.io/pizza/burgers/fries/cheese.yaml");
    }

    #[test]
    fn pointer_ending_in_extension_stays_in_document() {
        let target =
            resolve_target("#/components/schemas/pet.yaml", "/specs/api.yaml", &IndexConfig::open())
                .unwrap();
        assert_eq!(target.ref_type, RefType::Local);
        assert_eq!(target.location, "");
        assert_eq!(target.id, "components/schemas/pet.yaml");
    }

    #[test]
    fn malformed_references() {
        let config = IndexConfig::closed();
        assert!(matches!(
            resolve_target("", "", &config),
            Err(ResolveError::MalformedReference { .. })
        ));
        assert!(matches!(
            resolve_target("#BORK", "", &config),
            Err(ResolveError::MalformedReference { .. })
        ));
    }

    #[test]
    fn locate_finds_local_target() {
        let idx = closed_index("components:\n  schemas:\n    cake:\n      description: hello\n");
        let located = locate(&BuildContext::new(), "#/components/schemas/cake", &idx).unwrap();
        assert!(located.node().is_mapping());
        assert_eq!(located.reference.name, "cake");
        assert_eq!(located.reference.key, "#/components/schemas/cake");
        assert!(located.circular.is_none());
    }

    #[test]
    fn locate_root_pointer() {
        let idx = closed_index("a: b\n");
        let located = locate(&BuildContext::new(), "#", &idx).unwrap();
        assert!(located.node().same_node(idx.root()));
    }

    #[test]
    fn locate_node_ignores_plain_mappings() {
        let idx = closed_index("a: b\n");
        let node = parse_document("yes: mate").unwrap();
        assert!(locate_node(&BuildContext::new(), &node, &idx).is_none());
    }

    #[test]
    fn locate_node_reports_missing_segment_with_position() {
        let idx = closed_index("paths:\n  /burger/time:\n    description: hello\n");
        let node = parse_document("$ref: '#/paths/~1burger~1time-nope'").unwrap();
        let err = locate_node(&BuildContext::new(), &node, &idx).unwrap().unwrap_err();
        match err {
            ResolveError::SegmentNotFound { segment, line, .. } => {
                assert_eq!(segment, "/burger/time-nope");
                assert_eq!(line, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn standalone_index_refuses_file_lookups() {
        let idx = closed_index("a: b\n");
        let err = locate(&BuildContext::new(), "pizza.yaml#/cake", &idx).unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Load {
                source: LoadError::FileLookupDisabled { .. },
                ..
            }
        ));
        let err = locate(&BuildContext::new(), "https://pb33f.io/cake.yaml#/a", &idx).unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Load {
                source: LoadError::RemoteLookupDisabled { .. },
                ..
            }
        ));
    }

    #[test]
    fn rolodex_index_document_keeps_first_registration() {
        let rolodex = Rolodex::new(IndexConfig::open());
        let first = rolodex.index_document("/a.yaml", parse_document("a: 1").unwrap());
        let second = rolodex.index_document("/a.yaml", parse_document("a: 2").unwrap());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(rolodex.indexes().len(), 1);
    }

    #[test]
    fn rolodex_records_failed_open_once() {
        let rolodex = Rolodex::new(IndexConfig::open());
        assert!(rolodex.open("/nonexistent/pizza.yaml").is_err());
        assert!(rolodex.open("/nonexistent/pizza.yaml").is_err());
        assert_eq!(rolodex.load_errors().len(), 1);
    }

    #[test]
    fn rolodex_without_root_has_no_cycles() {
        let rolodex = Rolodex::new(IndexConfig::open());
        assert!(rolodex.root_index().is_none());
        assert!(rolodex.check_for_circular_references().is_empty());
    }
}
