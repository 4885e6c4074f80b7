//! Arena-backed document tree.
//!
//! The text parser is an external collaborator: it hands over a tree of
//! mapping / sequence / scalar / alias nodes with line and column metadata.
//! [`TreeBuilder`] is that boundary. [`parse_document`] and [`from_json_value`]
//! are the adapters shipped with the crate.
//!
//! A [`Node`] is a cheap handle (`Arc<Tree>` plus an id). Handles are cloned,
//! the nodes themselves never are.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;

use crate::error::ParseError;

/// Key marking a mapping as a pointer reference.
pub const REF_KEY: &str = "$ref";

/// YAML merge key.
pub const MERGE_KEY: &str = "<<";

/// Merges nested deeper than this are ignored.
const MAX_MERGE_DEPTH: usize = 64;

/// Structural kind of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Mapping,
    Sequence,
    Scalar,
    Alias,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::Mapping => "mapping",
            NodeKind::Sequence => "sequence",
            NodeKind::Scalar => "scalar",
            NodeKind::Alias => "alias",
        };
        f.write_str(name)
    }
}

/// Native type of a scalar as decided by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScalarTag {
    #[default]
    String,
    Integer,
    Float,
    Boolean,
    Null,
}

/// 1-based source position. Zero means unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// Index of a node inside its [`Tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug)]
struct NodeData {
    kind: NodeKind,
    tag: ScalarTag,
    value: String,
    position: Position,
    content: Vec<NodeId>,
    alias: Option<NodeId>,
}

/// Owner of every node parsed from one document.
#[derive(Debug, Default)]
pub struct Tree {
    nodes: Vec<NodeData>,
}

impl Tree {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Handle to a node in a shared [`Tree`].
#[derive(Clone)]
pub struct Node {
    tree: Arc<Tree>,
    id: NodeId,
}

impl Node {
    fn data(&self) -> &NodeData {
        &self.tree.nodes[self.id.0]
    }

    fn handle(&self, id: NodeId) -> Node {
        Node {
            tree: Arc::clone(&self.tree),
            id,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.data().kind
    }

    pub fn tag(&self) -> ScalarTag {
        self.data().tag
    }

    /// Scalar text. Empty for collections.
    pub fn value(&self) -> &str {
        &self.data().value
    }

    pub fn position(&self) -> Position {
        self.data().position
    }

    pub fn line(&self) -> usize {
        self.data().position.line
    }

    pub fn column(&self) -> usize {
        self.data().position.column
    }

    pub fn is_mapping(&self) -> bool {
        self.kind() == NodeKind::Mapping
    }

    pub fn is_sequence(&self) -> bool {
        self.kind() == NodeKind::Sequence
    }

    pub fn is_scalar(&self) -> bool {
        self.kind() == NodeKind::Scalar
    }

    pub fn is_null(&self) -> bool {
        self.kind() == NodeKind::Scalar && self.tag() == ScalarTag::Null
    }

    /// True when both handles point at the same node of the same tree.
    pub fn same_node(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.tree, &other.tree) && self.id == other.id
    }

    /// Raw content: items of a sequence, or `key, value, key, value...` of a mapping.
    pub fn children(&self) -> impl Iterator<Item = Node> + '_ {
        self.data().content.iter().map(move |id| self.handle(*id))
    }

    /// Mapping pairs exactly as written, merge keys included.
    pub fn pairs(&self) -> Vec<(Node, Node)> {
        if self.kind() != NodeKind::Mapping {
            return Vec::new();
        }
        self.data()
            .content
            .chunks(2)
            .filter(|pair| pair.len() == 2)
            .map(|pair| (self.handle(pair[0]), self.handle(pair[1])))
            .collect()
    }

    /// Follow alias nodes to the node they stand for.
    pub fn resolve_alias(&self) -> Node {
        let mut current = self.clone();
        let mut hops = 0;
        while let Some(target) = current.data().alias {
            if hops > self.tree.nodes.len() {
                break;
            }
            current = current.handle(target);
            hops += 1;
        }
        current
    }

    /// Mapping pairs with `<<` merges flattened.
    ///
    /// Merged keys appear where the merge key was written. Explicit keys win
    /// over merged ones, and each merged key is reported once.
    pub fn entries(&self) -> Vec<(Node, Node)> {
        let node = self.resolve_alias();
        let mut claimed = HashSet::new();
        let mut out = Vec::new();
        node.collect_entries(&mut claimed, &mut out, 0);
        out
    }

    fn collect_entries(
        &self,
        claimed: &mut HashSet<String>,
        out: &mut Vec<(Node, Node)>,
        depth: usize,
    ) {
        if depth > MAX_MERGE_DEPTH || self.kind() != NodeKind::Mapping {
            return;
        }
        let pairs = self.pairs();
        for (key, _) in &pairs {
            if !is_merge_key(key) {
                claimed.insert(key.value().to_string());
            }
        }
        for (key, value) in pairs {
            if !is_merge_key(&key) {
                out.push((key, value));
                continue;
            }
            let source = value.resolve_alias();
            let sources = match source.kind() {
                NodeKind::Sequence => source.children().map(|n| n.resolve_alias()).collect(),
                _ => vec![source],
            };
            for merged in sources {
                let mut nested = Vec::new();
                merged.collect_entries(&mut HashSet::new(), &mut nested, depth + 1);
                for (k, v) in nested {
                    if claimed.insert(k.value().to_string()) {
                        out.push((k, v));
                    }
                }
            }
        }
    }

    /// Find the pair keyed `label` (exact match, merges included).
    pub fn find_key(&self, label: &str) -> Option<(Node, Node)> {
        self.entries()
            .into_iter()
            .find(|(key, _)| key.value() == label)
    }

    /// The `$ref` key node and reference string, if this mapping is a reference.
    pub fn reference(&self) -> Option<(Node, String)> {
        let node = self.resolve_alias();
        if node.kind() != NodeKind::Mapping {
            return None;
        }
        node.pairs().into_iter().find_map(|(key, value)| {
            let value = value.resolve_alias();
            (key.value() == REF_KEY && value.kind() == NodeKind::Scalar)
                .then(|| (key, value.value().to_string()))
        })
    }

    pub fn is_ref(&self) -> bool {
        self.reference().is_some()
    }
}

fn is_merge_key(key: &Node) -> bool {
    key.kind() == NodeKind::Scalar && key.value() == MERGE_KEY
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.same_node(other)
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.tree) as usize).hash(state);
        self.id.hash(state);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Node");
        out.field("kind", &self.kind());
        if self.kind() == NodeKind::Scalar {
            out.field("value", &self.value());
        }
        out.field("line", &self.line())
            .field("column", &self.column())
            .finish()
    }
}

/// Fills a [`Tree`] node by node. Children must be added before their parent.
#[derive(Debug, Default)]
pub struct TreeBuilder {
    nodes: Vec<NodeData>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, data: NodeData) -> NodeId {
        self.nodes.push(data);
        NodeId(self.nodes.len() - 1)
    }

    pub fn scalar(&mut self, value: impl Into<String>, tag: ScalarTag, position: Position) -> NodeId {
        self.push(NodeData {
            kind: NodeKind::Scalar,
            tag,
            value: value.into(),
            position,
            content: Vec::new(),
            alias: None,
        })
    }

    pub fn mapping(&mut self, pairs: Vec<(NodeId, NodeId)>, position: Position) -> NodeId {
        let content = pairs.into_iter().flat_map(|(k, v)| [k, v]).collect();
        self.push(NodeData {
            kind: NodeKind::Mapping,
            tag: ScalarTag::default(),
            value: String::new(),
            position,
            content,
            alias: None,
        })
    }

    pub fn sequence(&mut self, items: Vec<NodeId>, position: Position) -> NodeId {
        self.push(NodeData {
            kind: NodeKind::Sequence,
            tag: ScalarTag::default(),
            value: String::new(),
            position,
            content: items,
            alias: None,
        })
    }

    pub fn alias(&mut self, target: NodeId, position: Position) -> NodeId {
        self.push(NodeData {
            kind: NodeKind::Alias,
            tag: ScalarTag::default(),
            value: String::new(),
            position,
            content: Vec::new(),
            alias: Some(target),
        })
    }

    /// Seal the tree and return a handle to `root`.
    pub fn finish(self, root: NodeId) -> Node {
        Node {
            tree: Arc::new(Tree { nodes: self.nodes }),
            id: root,
        }
    }
}

/// Parse YAML or JSON text into a node tree.
///
/// Aliases arrive expanded and merge keys survive as literal `<<` keys.
/// Positions are recovered by scanning the source in document order; values
/// the scan cannot place inherit the position of the preceding token.
///
/// # Errors
///
/// Returns `ParseError::Empty` for blank input and `ParseError::Yaml` when the
/// text is not a valid document.
pub fn parse_document(text: &str) -> Result<Node, ParseError> {
    if text.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    let value: YamlValue = serde_yaml::from_str(text)?;
    let mut adapter = YamlAdapter {
        builder: TreeBuilder::new(),
        locator: Locator::new(text),
    };
    let root = adapter.node(&value);
    Ok(adapter.builder.finish(root))
}

/// Build a node tree from an already decoded JSON value. Positions are unknown.
pub fn from_json_value(value: &JsonValue) -> Node {
    let mut builder = TreeBuilder::new();
    let root = json_node(&mut builder, value);
    builder.finish(root)
}

fn json_node(builder: &mut TreeBuilder, value: &JsonValue) -> NodeId {
    let at = Position::default();
    match value {
        JsonValue::Null => builder.scalar("", ScalarTag::Null, at),
        JsonValue::Bool(b) => builder.scalar(b.to_string(), ScalarTag::Boolean, at),
        JsonValue::Number(n) => {
            let tag = if n.is_f64() {
                ScalarTag::Float
            } else {
                ScalarTag::Integer
            };
            builder.scalar(n.to_string(), tag, at)
        }
        JsonValue::String(s) => builder.scalar(s.clone(), ScalarTag::String, at),
        JsonValue::Array(items) => {
            let ids = items.iter().map(|item| json_node(builder, item)).collect();
            builder.sequence(ids, at)
        }
        JsonValue::Object(map) => {
            let pairs = map
                .iter()
                .map(|(k, v)| {
                    let key = builder.scalar(k.clone(), ScalarTag::String, at);
                    (key, json_node(builder, v))
                })
                .collect();
            builder.mapping(pairs, at)
        }
    }
}

struct YamlAdapter<'a> {
    builder: TreeBuilder,
    locator: Locator<'a>,
}

impl YamlAdapter<'_> {
    fn node(&mut self, value: &YamlValue) -> NodeId {
        match value {
            YamlValue::Null => {
                let at = self.locator.here();
                self.builder.scalar("", ScalarTag::Null, at)
            }
            YamlValue::Bool(b) => self.scalar(b.to_string(), ScalarTag::Boolean),
            YamlValue::Number(n) => {
                let tag = if n.is_f64() {
                    ScalarTag::Float
                } else {
                    ScalarTag::Integer
                };
                self.scalar(n.to_string(), tag)
            }
            YamlValue::String(s) => self.scalar(s.clone(), ScalarTag::String),
            YamlValue::Sequence(items) => {
                let start = self.locator.here();
                let ids: Vec<NodeId> = items.iter().map(|item| self.node(item)).collect();
                let at = ids
                    .first()
                    .map(|id| self.builder.nodes[id.0].position)
                    .unwrap_or(start);
                self.builder.sequence(ids, at)
            }
            YamlValue::Mapping(map) => {
                let start = self.locator.here();
                let mut pairs = Vec::with_capacity(map.len());
                for (key, value) in map {
                    let key = self.key(key);
                    let value = self.node(value);
                    pairs.push((key, value));
                }
                let at = pairs
                    .first()
                    .map(|(k, _)| self.builder.nodes[k.0].position)
                    .unwrap_or(start);
                self.builder.mapping(pairs, at)
            }
            YamlValue::Tagged(tagged) => self.node(&tagged.value),
        }
    }

    fn key(&mut self, key: &YamlValue) -> NodeId {
        match key {
            YamlValue::String(s) => self.scalar(s.clone(), ScalarTag::String),
            YamlValue::Bool(b) => self.scalar(b.to_string(), ScalarTag::String),
            YamlValue::Number(n) => self.scalar(n.to_string(), ScalarTag::String),
            YamlValue::Null => self.scalar("null".to_string(), ScalarTag::String),
            other => {
                let rendered = serde_yaml::to_string(other).unwrap_or_default();
                let at = self.locator.here();
                self.builder
                    .scalar(rendered.trim_end().to_string(), ScalarTag::String, at)
            }
        }
    }

    fn scalar(&mut self, value: String, tag: ScalarTag) -> NodeId {
        let at = self
            .locator
            .find(&value)
            .unwrap_or_else(|| self.locator.here());
        self.builder.scalar(value, tag, at)
    }
}

/// Forward-only search for token positions in the source text.
struct Locator<'a> {
    text: &'a str,
    cursor: usize,
    line_starts: Vec<usize>,
}

impl<'a> Locator<'a> {
    fn new(text: &'a str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            text,
            cursor: 0,
            line_starts,
        }
    }

    fn position_of(&self, offset: usize) -> Position {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let start = self.line_starts[line];
        let column = self.text[start..offset].chars().count() + 1;
        Position::new(line + 1, column)
    }

    fn here(&self) -> Position {
        self.position_of(self.cursor.min(self.text.len()))
    }

    fn find(&mut self, needle: &str) -> Option<Position> {
        if needle.is_empty() || needle.contains('\n') {
            return None;
        }
        let mut from = self.cursor;
        while let Some(found) = self.text.get(from..).and_then(|rest| rest.find(needle)) {
            let start = from + found;
            let end = start + needle.len();
            if self.is_token(start, end) {
                self.cursor = end;
                return Some(self.position_of(start));
            }
            from = end;
        }
        None
    }

    fn is_token(&self, start: usize, end: usize) -> bool {
        let before = self.text[..start].chars().next_back();
        let after = self.text[end..].chars().next();
        let opens = before.map_or(true, |c| {
            c.is_whitespace() || matches!(c, '"' | '\'' | '[' | '{' | ',' | '-' | ':')
        });
        let closes = after.map_or(true, |c| {
            c.is_whitespace() || matches!(c, '"' | '\'' | ']' | '}' | ',' | ':' | '#')
        });
        opens && closes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_records_positions() {
        let root = parse_document("components:\n  schemas:\n    cake:\n      description: hello\n")
            .unwrap();
        let (key, components) = root.find_key("components").unwrap();
        assert_eq!(key.position(), Position::new(1, 1));
        let (_, schemas) = components.find_key("schemas").unwrap();
        let (cake_key, cake) = schemas.find_key("cake").unwrap();
        assert_eq!(cake_key.position(), Position::new(3, 5));
        let (_, description) = cake.find_key("description").unwrap();
        assert_eq!(description.value(), "hello");
        assert_eq!(description.position(), Position::new(4, 20));
    }

    #[test]
    fn parse_tags_scalars() {
        let root = parse_document("a: ding\nb: 1\nc: true\nd: 0.99\ne:\n").unwrap();
        let tags: Vec<ScalarTag> = root.entries().iter().map(|(_, v)| v.tag()).collect();
        assert_eq!(
            tags,
            vec![
                ScalarTag::String,
                ScalarTag::Integer,
                ScalarTag::Boolean,
                ScalarTag::Float,
                ScalarTag::Null
            ]
        );
    }

    #[test]
    fn parse_empty_document_errors() {
        assert!(matches!(parse_document("  \n"), Err(ParseError::Empty)));
    }

    #[test]
    fn parse_invalid_yaml_errors() {
        assert!(matches!(
            parse_document("a: [unclosed"),
            Err(ParseError::Yaml { .. })
        ));
    }

    #[test]
    fn parse_invalid_json_errors_through_yaml_parser() {
        assert!(matches!(
            parse_document(r#"{"a": [1, 2"#),
            Err(ParseError::Yaml { .. })
        ));
    }

    #[test]
    fn reference_detection() {
        let root = parse_document("$ref: '#/components/schemas/cake'").unwrap();
        let (key, value) = root.reference().unwrap();
        assert_eq!(key.value(), "$ref");
        assert_eq!(value, "#/components/schemas/cake");

        let root = parse_document("yes: mate").unwrap();
        assert!(!root.is_ref());
    }

    #[test]
    fn merge_keys_are_flattened_once() {
        let root = parse_document(
            "base: &base\n  night: fun\n  day: work\nthing:\n  day: rest\n  <<: *base\n",
        )
        .unwrap();
        let (_, thing) = root.find_key("thing").unwrap();
        let keys: Vec<String> = thing
            .entries()
            .iter()
            .map(|(k, _)| k.value().to_string())
            .collect();
        assert_eq!(keys, vec!["day", "night"]);
        assert_eq!(thing.find_key("day").unwrap().1.value(), "rest");
    }

    #[test]
    fn builder_alias_resolves_to_target() {
        let mut builder = TreeBuilder::new();
        let key = builder.scalar("description", ScalarTag::String, Position::new(1, 1));
        let value = builder.scalar("hi", ScalarTag::String, Position::new(1, 14));
        let target = builder.mapping(vec![(key, value)], Position::new(1, 1));
        let alias = builder.alias(target, Position::new(3, 7));
        let k = builder.scalar("copy", ScalarTag::String, Position::new(3, 1));
        let root = builder.mapping(vec![(k, alias)], Position::new(3, 1));
        let root = builder.finish(root);

        let (_, copy) = root.find_key("copy").unwrap();
        assert_eq!(copy.kind(), NodeKind::Alias);
        let resolved = copy.resolve_alias();
        assert_eq!(resolved.kind(), NodeKind::Mapping);
        assert_eq!(resolved.find_key("description").unwrap().1.value(), "hi");
    }

    #[test]
    fn json_adapter_keeps_order_and_types() {
        let value = serde_json::json!({"b": 1, "a": [true, null, 1.5]});
        let root = from_json_value(&value);
        let keys: Vec<String> = root.pairs().iter().map(|(k, _)| k.value().to_string()).collect();
        assert_eq!(keys, vec!["b", "a"]);
        let (_, list) = root.find_key("a").unwrap();
        let tags: Vec<ScalarTag> = list.children().map(|n| n.tag()).collect();
        assert_eq!(tags, vec![ScalarTag::Boolean, ScalarTag::Null, ScalarTag::Float]);
    }

    #[test]
    fn handles_compare_by_identity() {
        let one = parse_document("a: b").unwrap();
        let two = parse_document("a: b").unwrap();
        assert_eq!(one, one.clone());
        assert_ne!(one, two);
    }
}
