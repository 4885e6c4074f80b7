//! Per-document index: every node by pointer and every `$ref` site.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::config::IndexConfig;
use crate::error::ResolveError;
use crate::flight::SingleFlight;
use crate::model::Reference;
use crate::node::{Node, NodeKind, Position};
use crate::pointer::{self, RefType};
use crate::resolver::CircularReferenceResult;
use crate::rolodex::Rolodex;

const POLYMORPHIC_KEYS: &[&str] = &["allOf", "anyOf", "oneOf"];
const ARRAY_KEY: &str = "items";

/// A `$ref` site found while indexing.
#[derive(Debug, Clone)]
pub struct ReferenceEdge {
    /// Pointer of the mapping holding the `$ref` (`#/a/b`, or `#` for the root).
    pub source: String,
    /// The reference string as written.
    pub reference: String,
    pub ref_type: RefType,
    /// The mapping holding the `$ref`.
    pub node: Node,
    /// The `$ref` key.
    pub key_node: Node,
    /// Path depths of the sequences and `items` keys crossed to reach this site.
    pub(crate) sequence_depths: Vec<usize>,
    /// Path depths of the `allOf` / `anyOf` / `oneOf` keys crossed.
    pub(crate) polymorphic_depths: Vec<usize>,
}

impl ReferenceEdge {
    pub fn position(&self) -> Position {
        self.key_node.position()
    }

    /// Whether a sequence sits at or below `depth` on the path to this site.
    pub(crate) fn in_array_below(&self, depth: usize) -> bool {
        self.sequence_depths.iter().any(|d| *d >= depth)
    }

    pub(crate) fn polymorphic_below(&self, depth: usize) -> bool {
        self.polymorphic_depths.iter().any(|d| *d >= depth)
    }

    /// True when the site lies at or under `pointer`.
    pub(crate) fn is_under(&self, pointer: &str) -> bool {
        pointer == "#"
            || self.source == pointer
            || self
                .source
                .strip_prefix(pointer)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// Index of one parsed document.
///
/// Built once; afterwards only the lookup cache, the circular flag and the
/// recorded cycles change, all behind interior synchronisation.
pub struct SpecIndex {
    location: String,
    root: Node,
    config: IndexConfig,
    nodes: IndexMap<String, Node>,
    edges: Vec<ReferenceEdge>,
    pub(crate) cache: SingleFlight<Result<Reference, ResolveError>>,
    allow_circular: AtomicBool,
    circular: RwLock<Vec<CircularReferenceResult>>,
    rolodex: Weak<Rolodex>,
}

impl SpecIndex {
    /// Index a standalone document. File and remote references fail to resolve.
    pub fn new(root: Node, config: IndexConfig) -> Arc<Self> {
        Self::build(String::new(), root, config, Weak::new())
    }

    pub(crate) fn build(
        location: String,
        root: Node,
        config: IndexConfig,
        rolodex: Weak<Rolodex>,
    ) -> Arc<Self> {
        let mut walker = Walker::default();
        walker.walk(&root, &mut Vec::new(), &mut Vec::new(), &mut Vec::new());
        debug!(
            location = %location,
            nodes = walker.nodes.len(),
            references = walker.edges.len(),
            "indexed document"
        );
        Arc::new(Self {
            allow_circular: AtomicBool::new(config.allow_circular_references),
            location,
            root,
            config,
            nodes: walker.nodes,
            edges: walker.edges,
            cache: SingleFlight::default(),
            circular: RwLock::new(Vec::new()),
            rolodex,
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Every `$ref` site in document order.
    pub fn references(&self) -> &[ReferenceEdge] {
        &self.edges
    }

    /// Every node keyed by canonical pointer (`#`, `#/a`, `#/a/0`...).
    pub fn nodes(&self) -> &IndexMap<String, Node> {
        &self.nodes
    }

    /// The rolodex this index belongs to, if any.
    pub fn rolodex(&self) -> Option<Arc<Rolodex>> {
        self.rolodex.upgrade()
    }

    /// Find the node at a pointer id (the part after `#/`).
    ///
    /// On failure returns the first segment that could not be found.
    pub fn find_pointer(&self, id: &str) -> Result<Node, String> {
        if id.is_empty() {
            return Ok(self.root.clone());
        }
        let canonical = format!(
            "#/{}",
            pointer::segments(id)
                .iter()
                .map(|s| pointer::escape_segment(s))
                .collect::<Vec<_>>()
                .join("/")
        );
        if let Some(node) = self.nodes.get(&canonical) {
            return Ok(node.clone());
        }
        let mut current = self.root.clone();
        for segment in pointer::segments(id) {
            let here = current.resolve_alias();
            let next = match here.kind() {
                NodeKind::Mapping => here.find_key(&segment).map(|(_, v)| v),
                NodeKind::Sequence => segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| here.children().nth(i)),
                _ => None,
            };
            current = next.ok_or(segment)?;
        }
        Ok(current.resolve_alias())
    }

    /// Whether extraction may resolve through detected cycles.
    pub fn allow_circular_references(&self) -> bool {
        self.allow_circular.load(Ordering::Relaxed)
    }

    pub fn set_allow_circular_references(&self, allow: bool) {
        self.allow_circular.store(allow, Ordering::Relaxed);
    }

    /// Cycles recorded against this document.
    pub fn circular_references(&self) -> Vec<CircularReferenceResult> {
        self.circular.read().clone()
    }

    pub(crate) fn record_circular(&self, result: &CircularReferenceResult) {
        let mut recorded = self.circular.write();
        if !recorded.iter().any(|r| r.same_loop(result)) {
            recorded.push(result.clone());
        }
    }

    /// The recorded cycle passing through a canonical lookup key.
    pub fn circular_for(&self, key: &str) -> Option<CircularReferenceResult> {
        self.circular
            .read()
            .iter()
            .find(|r| r.involves(key))
            .cloned()
    }
}

impl fmt::Debug for SpecIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecIndex")
            .field("location", &self.location)
            .field("nodes", &self.nodes.len())
            .field("references", &self.edges.len())
            .field("circular", &self.circular.read().len())
            .finish()
    }
}

#[derive(Default)]
struct Walker {
    nodes: IndexMap<String, Node>,
    edges: Vec<ReferenceEdge>,
}

fn pointer_from(path: &[String]) -> String {
    if path.is_empty() {
        "#".to_string()
    } else {
        format!("#/{}", path.join("/"))
    }
}

impl Walker {
    fn walk(
        &mut self,
        node: &Node,
        path: &mut Vec<String>,
        sequences: &mut Vec<usize>,
        polymorphic: &mut Vec<usize>,
    ) {
        let node = node.resolve_alias();
        let here = pointer_from(path);
        if self.nodes.contains_key(&here) {
            return;
        }
        self.nodes.insert(here.clone(), node.clone());

        match node.kind() {
            NodeKind::Mapping => {
                if let Some((key_node, reference)) = node.reference() {
                    self.edges.push(ReferenceEdge {
                        source: here,
                        ref_type: pointer::classify(&reference),
                        reference,
                        node: node.clone(),
                        key_node,
                        sequence_depths: sequences.clone(),
                        polymorphic_depths: polymorphic.clone(),
                    });
                }
                for (key, value) in node.entries() {
                    path.push(pointer::escape_segment(key.value()));
                    let array = key.value() == ARRAY_KEY;
                    let poly = POLYMORPHIC_KEYS.contains(&key.value());
                    if array {
                        sequences.push(path.len());
                    }
                    if poly {
                        polymorphic.push(path.len());
                    }
                    self.walk(&value, path, sequences, polymorphic);
                    if array {
                        sequences.pop();
                    }
                    if poly {
                        polymorphic.pop();
                    }
                    path.pop();
                }
            }
            NodeKind::Sequence => {
                // allOf / anyOf / oneOf lists are not arrays of values.
                let array = !path
                    .last()
                    .is_some_and(|k| POLYMORPHIC_KEYS.contains(&k.as_str()));
                if array {
                    sequences.push(path.len());
                }
                for (i, item) in node.children().enumerate() {
                    path.push(i.to_string());
                    self.walk(&item, path, sequences, polymorphic);
                    path.pop();
                }
                if array {
                    sequences.pop();
                }
            }
            NodeKind::Scalar | NodeKind::Alias => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::parse_document;

    const DOC: &str = r##"openapi: 3.1.0
paths:
  /burgers:
    get:
      responses:
        "200":
          $ref: '#/components/responses/ok'
components:
  responses:
    ok:
      description: fine
  schemas:
    cake:
      $ref: '#/components/schemas/pizza'
    pizza:
      allOf:
        - $ref: '#/components/schemas/cake'
    list:
      type: array
      items:
        $ref: 'other.yaml#/thing'
"##;

    fn index() -> Arc<SpecIndex> {
        SpecIndex::new(parse_document(DOC).unwrap(), IndexConfig::closed())
    }

    #[test]
    fn collects_reference_sites_in_order() {
        let idx = index();
        let sources: Vec<&str> = idx.references().iter().map(|e| e.source.as_str()).collect();
        assert_eq!(
            sources,
            vec![
                "#/paths/~1burgers/get/responses/200",
                "#/components/schemas/cake",
                "#/components/schemas/pizza/allOf/0",
                "#/components/schemas/list/items",
            ]
        );
        assert_eq!(idx.references()[3].ref_type, RefType::File);
        assert_eq!(idx.references()[0].position(), Position::new(7, 11));
    }

    #[test]
    fn records_array_and_polymorphic_context() {
        let idx = index();
        let poly = &idx.references()[2];
        assert!(poly.polymorphic_below(3));
        assert!(!poly.in_array_below(3));
        let items = &idx.references()[3];
        assert!(items.in_array_below(3));
        assert!(!items.polymorphic_below(0));
        let cake = &idx.references()[1];
        assert!(!cake.in_array_below(0));
    }

    #[test]
    fn find_pointer_uses_escaped_segments() {
        let idx = index();
        let node = idx.find_pointer("paths/~1burgers/get").unwrap();
        assert!(node.is_mapping());
        assert_eq!(
            idx.find_pointer("components/schemas/pizza/allOf/0").unwrap().reference().unwrap().1,
            "#/components/schemas/cake"
        );
        assert!(idx.find_pointer("").unwrap().same_node(idx.root()));
    }

    #[test]
    fn find_pointer_names_missing_segment() {
        let idx = index();
        assert_eq!(
            idx.find_pointer("components/schemas/nope/deeper").unwrap_err(),
            "nope"
        );
        assert_eq!(idx.find_pointer("components/schemas/pizza/allOf/7").unwrap_err(), "7");
    }

    #[test]
    fn is_under_matches_whole_segments() {
        let idx = index();
        let cake = &idx.references()[1];
        assert!(cake.is_under("#/components/schemas/cake"));
        assert!(cake.is_under("#/components"));
        assert!(cake.is_under("#"));
        assert!(!cake.is_under("#/components/schemas/ca"));
    }

    #[test]
    fn circular_flag_follows_config() {
        let root = parse_document("a: b").unwrap();
        let idx = SpecIndex::new(root, IndexConfig::closed().allow_circular_references(true));
        assert!(idx.allow_circular_references());
        idx.set_allow_circular_references(false);
        assert!(!idx.allow_circular_references());
    }
}
