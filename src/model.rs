//! Value wrappers that keep the source nodes next to extracted values.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::index::SpecIndex;
use crate::node::{Node, Position};
use crate::pointer::RefType;

/// A labelled field: the value, its key and value nodes, and the reference
/// that was followed to reach it.
#[derive(Debug, Clone, Default)]
pub struct NodeReference<T> {
    pub value: T,
    pub key_node: Option<Node>,
    pub value_node: Option<Node>,
    pub reference: Option<String>,
}

impl<T> NodeReference<T> {
    pub fn new(value: T, key_node: Option<Node>, value_node: Option<Node>) -> Self {
        Self {
            value,
            key_node,
            value_node,
            reference: None,
        }
    }

    /// No value node was found.
    pub fn is_empty(&self) -> bool {
        self.value_node.is_none()
    }

    pub fn is_reference(&self) -> bool {
        self.reference.is_some()
    }

    /// Position of the key, falling back to the value.
    pub fn position(&self) -> Position {
        self.key_node
            .as_ref()
            .or(self.value_node.as_ref())
            .map(Node::position)
            .unwrap_or_default()
    }
}

/// A value without a key: array elements and map values.
#[derive(Debug, Clone, Default)]
pub struct ValueReference<T> {
    pub value: T,
    pub value_node: Option<Node>,
    pub reference: Option<String>,
}

impl<T> ValueReference<T> {
    pub fn new(value: T, value_node: Option<Node>) -> Self {
        Self {
            value,
            value_node,
            reference: None,
        }
    }

    pub fn is_reference(&self) -> bool {
        self.reference.is_some()
    }
}

/// A map key. Equality and hashing use the key text only.
#[derive(Debug, Clone)]
pub struct KeyReference {
    pub value: String,
    pub key_node: Option<Node>,
}

impl KeyReference {
    pub fn new(value: impl Into<String>, key_node: Option<Node>) -> Self {
        Self {
            value: value.into(),
            key_node,
        }
    }
}

impl From<&str> for KeyReference {
    fn from(value: &str) -> Self {
        Self::new(value, None)
    }
}

impl PartialEq for KeyReference {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for KeyReference {}

impl Hash for KeyReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

/// Look up `key` in an extracted map: exact match first, then case-insensitive.
pub fn find_item_in_map<'a, V>(key: &str, map: &'a IndexMap<KeyReference, V>) -> Option<&'a V> {
    if let Some(found) = map.get(&KeyReference::from(key)) {
        return Some(found);
    }
    map.iter()
        .find(|(k, _)| k.value.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

/// A resolved reference: where it pointed and what it found.
#[derive(Debug, Clone)]
pub struct Reference {
    /// The reference string as written.
    pub raw: String,
    /// Canonical lookup key (`location#/pointer`).
    pub key: String,
    /// Location of the owning document; empty for an unnamed root.
    pub location: String,
    /// Pointer without the leading `#/`.
    pub id: String,
    pub ref_type: RefType,
    pub name: String,
    pub node: Node,
    pub index: Arc<SpecIndex>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::parse_document;

    fn sample() -> IndexMap<KeyReference, ValueReference<String>> {
        let mut map = IndexMap::new();
        map.insert(KeyReference::from("pizza"), ValueReference::new("pie".to_string(), None));
        map.insert(KeyReference::from("Cake"), ValueReference::new("sponge".to_string(), None));
        map
    }

    #[test]
    fn find_exact_then_case_insensitive() {
        let map = sample();
        assert_eq!(find_item_in_map("pizza", &map).unwrap().value, "pie");
        assert_eq!(find_item_in_map("PIZZA", &map).unwrap().value, "pie");
        assert_eq!(find_item_in_map("cake", &map).unwrap().value, "sponge");
        assert!(find_item_in_map("burger", &map).is_none());
    }

    #[test]
    fn key_equality_ignores_nodes() {
        let root = parse_document("pizza: pie").unwrap();
        let (key, _) = root.find_key("pizza").unwrap();
        assert_eq!(KeyReference::new("pizza", Some(key)), KeyReference::from("pizza"));
    }

    #[test]
    fn empty_node_reference() {
        let empty: NodeReference<String> = NodeReference::default();
        assert!(empty.is_empty());
        assert!(!empty.is_reference());
        assert_eq!(empty.position(), Position::default());

        let root = parse_document("pizza: pie").unwrap();
        let (key, value) = root.find_key("pizza").unwrap();
        let full = NodeReference::new("pie".to_string(), Some(key), Some(value));
        assert!(!full.is_empty());
        assert_eq!(full.position(), Position::new(1, 1));
    }
}
