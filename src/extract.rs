//! Generic extraction of typed values from nodes.
//!
//! Every function takes the node to read, the index that owns it and a
//! [`BuildContext`]. References are followed (across documents through the
//! rolodex) before anything is built, and the index's cycle set decides
//! whether a looping chain is an error.
//!
//! Failures come back as [`Partial`] values so callers can keep what was
//! built before the first error.

use std::sync::Arc;

use indexmap::IndexMap;
use rayon::prelude::*;
use serde_json::{Map, Number, Value as JsonValue};
use tracing::trace;

use crate::context::BuildContext;
use crate::error::{ExtractError, Partial, ResolveError};
use crate::index::SpecIndex;
use crate::model::{KeyReference, NodeReference, ValueReference};
use crate::node::{Node, NodeKind, ScalarTag};
use crate::rolodex;

/// Prefix of vendor extension keys.
pub const EXTENSION_PREFIX: &str = "x-";

/// A type that populates itself from a node.
///
/// `build` is called on a fresh `Default` value with the already resolved
/// node, the index that owns it and a context located at that document.
pub trait Buildable: Default + Send {
    fn build(
        &mut self,
        ctx: &BuildContext,
        key: Option<&Node>,
        value: &Node,
        index: &Arc<SpecIndex>,
    ) -> Result<(), ExtractError>;
}

/// A node with its reference chain followed.
#[derive(Debug, Clone)]
struct Resolved {
    node: Node,
    index: Arc<SpecIndex>,
    context: BuildContext,
    /// The first reference of the chain, if any was followed.
    reference: Option<String>,
}

/// Follow `$ref` hops from `node`. `max_hops` of `None` follows the whole chain.
///
/// A chain that reaches a recorded cycle, or revisits a target, stops there.
/// If cycles are disallowed on `index` the stop is an error carrying the
/// partially resolved node.
fn follow(
    ctx: &BuildContext,
    node: &Node,
    index: &Arc<SpecIndex>,
    max_hops: Option<usize>,
) -> Result<Resolved, Partial<Option<Resolved>>> {
    ctx.check().map_err(|e| Partial::new(None, e))?;
    let mut current = Resolved {
        node: node.resolve_alias(),
        index: Arc::clone(index),
        context: ctx.clone(),
        reference: None,
    };
    let mut visited: Vec<(String, String)> = Vec::new();
    let mut hops = 0;

    while let Some((key_node, raw)) = current.node.reference() {
        if max_hops.is_some_and(|max| hops >= max) {
            break;
        }
        let at = key_node.position();
        let located = rolodex::lookup(&current.context, &raw, at, &current.index)
            .map_err(|e| Partial::new(None, e))?;
        let key = located.reference.key.clone();
        let name = located.reference.name.clone();
        let next = Resolved {
            node: located.reference.node.resolve_alias(),
            index: Arc::clone(&located.reference.index),
            context: located.context,
            reference: current.reference.clone().or_else(|| Some(raw.clone())),
        };

        let journey = match located.circular {
            Some(cycle) => Some(cycle.journey_path()),
            None => visited.iter().position(|(k, _)| *k == key).map(|start| {
                visited[start..]
                    .iter()
                    .map(|(_, n)| n.as_str())
                    .chain(std::iter::once(name.as_str()))
                    .collect::<Vec<_>>()
                    .join(" -> ")
            }),
        };
        if let Some(journey) = journey {
            if index.allow_circular_references() {
                trace!(reference = %raw, "resolving through circular reference");
                return Ok(next);
            }
            let error = ResolveError::Circular {
                reference: raw,
                journey,
                line: at.line,
                column: at.column,
            };
            return Err(Partial::new(Some(next), error));
        }

        visited.push((key, name));
        current = next;
        hops += 1;
    }
    Ok(current)
}

/// Split a follow result into the node to work on and a pending error.
fn settle(
    followed: Result<Resolved, Partial<Option<Resolved>>>,
) -> Result<(Resolved, Option<ExtractError>), ExtractError> {
    match followed {
        Ok(resolved) => Ok((resolved, None)),
        Err(Partial {
            value: Some(resolved),
            error,
        }) => Ok((resolved, Some(error))),
        Err(Partial { value: None, error }) => Err(error),
    }
}

fn finish<V>(value: V, pending: Option<ExtractError>) -> Result<V, Partial<V>> {
    match pending {
        Some(error) => Err(Partial::new(value, error)),
        None => Ok(value),
    }
}

/// Result of [`extract_object_raw`].
#[derive(Debug, Clone)]
pub struct RawObject<T> {
    pub value: T,
    /// The node `value` was built from.
    pub node: Node,
    /// The index owning `node`.
    pub index: Arc<SpecIndex>,
    /// The reference followed to reach `node`, as written.
    pub reference: Option<String>,
}

impl<T> RawObject<T> {
    pub fn is_reference(&self) -> bool {
        self.reference.is_some()
    }
}

/// Build `T` from `node`, following its reference chain first.
///
/// # Errors
///
/// A disallowed cycle still builds `T` from the node where the chain
/// stopped and returns it with the error. Unresolvable references and
/// build failures return no value.
pub fn extract_object_raw<T: Buildable>(
    ctx: &BuildContext,
    key: Option<&Node>,
    node: &Node,
    index: &Arc<SpecIndex>,
) -> Result<RawObject<T>, Partial<Option<RawObject<T>>>> {
    let (resolved, pending) =
        settle(follow(ctx, node, index, None)).map_err(|e| Partial::new(None, e))?;
    let mut value = T::default();
    value
        .build(&resolved.context, key, &resolved.node, &resolved.index)
        .map_err(|e| Partial::new(None, e))?;
    let raw = RawObject {
        value,
        node: resolved.node,
        index: resolved.index,
        reference: resolved.reference,
    };
    match pending {
        Some(error) => Err(Partial::new(Some(raw), error)),
        None => Ok(raw),
    }
}

/// Build `T` from the value under `label` in `root`.
///
/// `root` itself may be a reference; it is followed before the label is
/// looked up. A missing label is not an error and yields an empty reference.
pub fn extract_object<T: Buildable>(
    ctx: &BuildContext,
    label: &str,
    root: &Node,
    index: &Arc<SpecIndex>,
) -> Result<NodeReference<T>, Partial<NodeReference<T>>> {
    let (container, pending) = settle(follow(ctx, root, index, None))
        .map_err(|e| Partial::new(NodeReference::default(), e))?;
    let Some((key, value)) = container.node.find_key(label) else {
        return finish(NodeReference::default(), pending);
    };

    let to_reference = |raw: RawObject<T>, key: Node| NodeReference {
        value: raw.value,
        key_node: Some(key),
        value_node: Some(raw.node),
        reference: raw.reference,
    };
    match extract_object_raw::<T>(&container.context, Some(&key), &value, &container.index) {
        Ok(raw) => finish(to_reference(raw, key), pending),
        Err(Partial {
            value: Some(raw),
            error,
        }) => Err(Partial::new(to_reference(raw, key), error)),
        Err(Partial { value: None, error }) => Err(Partial::new(NodeReference::default(), error)),
    }
}

type Element<T> = Result<ValueReference<T>, Partial<Option<ValueReference<T>>>>;

fn build_element<T: Buildable>(ctx: &BuildContext, node: &Node, index: &Arc<SpecIndex>) -> Element<T> {
    let into_value = |raw: RawObject<T>| ValueReference {
        value: raw.value,
        value_node: Some(raw.node),
        reference: raw.reference,
    };
    extract_object_raw::<T>(ctx, None, node, index)
        .map(into_value)
        .map_err(|partial| partial.map(|raw| raw.map(into_value)))
}

/// Build one `T` per element of a sequence, in source order.
///
/// When `root` (after following references) is a sequence the label is not
/// consulted; otherwise the sequence is looked up under `label` and its
/// reference chain followed. Each element's chain is followed independently.
///
/// # Errors
///
/// Returns every element that could be built (elements stopped by a cycle
/// included) along with the first error in source order. A non-sequence
/// container is a wrong-kind error.
pub fn extract_array<T: Buildable>(
    ctx: &BuildContext,
    label: &str,
    root: &Node,
    index: &Arc<SpecIndex>,
) -> Result<NodeReference<Vec<ValueReference<T>>>, Partial<Vec<ValueReference<T>>>> {
    let (container, mut first_error) =
        settle(follow(ctx, root, index, None)).map_err(|e| Partial::new(Vec::new(), e))?;

    let (key_node, list) = if container.node.kind() == NodeKind::Sequence {
        (None, container)
    } else {
        let Some((key, value)) = container.node.find_key(label) else {
            return finish(NodeReference::default(), first_error).map_err(|p| p.map(|r| r.value));
        };
        let (list, pending) = settle(follow(&container.context, &value, &container.index, None))
            .map_err(|e| Partial::new(Vec::new(), e))?;
        if let Some(error) = pending {
            return Err(Partial::new(Vec::new(), first_error.unwrap_or(error)));
        }
        (Some(key), list)
    };

    if list.node.kind() != NodeKind::Sequence {
        let error = first_error.unwrap_or_else(|| ExtractError::WrongKind {
            operation: "extract_array",
            expected: NodeKind::Sequence,
            found: list.node.kind(),
            line: list.node.line(),
            column: list.node.column(),
        });
        return Err(Partial::new(Vec::new(), error));
    }

    let items: Vec<Node> = list.node.children().collect();
    let built: Vec<Element<T>> = items
        .par_iter()
        .map(|item| build_element::<T>(&list.context, item, &list.index))
        .collect();

    let mut values = Vec::with_capacity(built.len());
    for element in built {
        match element {
            Ok(value) => values.push(value),
            Err(Partial { value, error }) => {
                values.extend(value);
                first_error.get_or_insert(error);
            }
        }
    }
    trace!(label, elements = values.len(), "extracted array");

    let extracted = NodeReference {
        value: values,
        key_node,
        value_node: Some(list.node),
        reference: list.reference,
    };
    finish(extracted, first_error).map_err(|p| p.map(|r| r.value))
}

/// Map produced by the map extraction family, in source order.
pub type ExtractedMap<T> = IndexMap<KeyReference, ValueReference<T>>;

fn build_map<T: Buildable>(
    container: &Resolved,
    include_extensions: bool,
) -> Result<ExtractedMap<T>, Partial<ExtractedMap<T>>> {
    let node = &container.node;
    if node.is_null() {
        return Ok(IndexMap::new());
    }
    if node.kind() != NodeKind::Mapping {
        let error = ExtractError::WrongKind {
            operation: "extract_map",
            expected: NodeKind::Mapping,
            found: node.kind(),
            line: node.line(),
            column: node.column(),
        };
        return Err(Partial::new(IndexMap::new(), error));
    }

    let entries: Vec<(Node, Node)> = node
        .entries()
        .into_iter()
        .filter(|(key, _)| include_extensions || !key.value().starts_with(EXTENSION_PREFIX))
        .collect();

    let built: Vec<(Node, Element<T>)> = entries
        .par_iter()
        .map(|(key, value)| {
            let element = match settle(follow(&container.context, value, &container.index, Some(1))) {
                Ok((resolved, pending)) => {
                    let mut target = T::default();
                    match target.build(&resolved.context, Some(key), &resolved.node, &resolved.index) {
                        Ok(()) => {
                            let value = ValueReference {
                                value: target,
                                value_node: Some(resolved.node),
                                reference: resolved.reference,
                            };
                            match pending {
                                Some(error) => Err(Partial::new(Some(value), error)),
                                None => Ok(value),
                            }
                        }
                        Err(error) => Err(Partial::new(None, error)),
                    }
                }
                Err(error) => Err(Partial::new(None, error)),
            };
            (key.clone(), element)
        })
        .collect();

    let mut map = IndexMap::with_capacity(built.len());
    let mut first_error = None;
    for (key, element) in built {
        let key = KeyReference::new(key.value(), Some(key.clone()));
        match element {
            Ok(value) => {
                map.insert(key, value);
            }
            Err(Partial { value, error }) => {
                if let Some(value) = value {
                    map.insert(key, value);
                }
                first_error.get_or_insert(error);
            }
        }
    }
    finish(map, first_error)
}

/// Build a map of `T` from the mapping under `label` in `root`.
///
/// Extension keys are built too when `include_extensions` is set. Each
/// value follows one reference hop.
pub fn extract_map_with_extensions<T: Buildable>(
    ctx: &BuildContext,
    label: &str,
    root: &Node,
    index: &Arc<SpecIndex>,
    include_extensions: bool,
) -> Result<NodeReference<ExtractedMap<T>>, Partial<ExtractedMap<T>>> {
    let (container, pending) =
        settle(follow(ctx, root, index, None)).map_err(|e| Partial::new(IndexMap::new(), e))?;
    let Some((key, value)) = container.node.find_key(label) else {
        return finish(NodeReference::default(), pending).map_err(|p| p.map(|r| r.value));
    };
    let (mapping, inner) = settle(follow(&container.context, &value, &container.index, None))
        .map_err(|e| Partial::new(IndexMap::new(), e))?;
    if let Some(error) = pending.or(inner) {
        return Err(Partial::new(IndexMap::new(), error));
    }

    let map = build_map::<T>(&mapping, include_extensions)?;
    Ok(NodeReference {
        value: map,
        key_node: Some(key),
        value_node: Some(mapping.node),
        reference: mapping.reference,
    })
}

/// [`extract_map_with_extensions`] without extension keys.
pub fn extract_map<T: Buildable>(
    ctx: &BuildContext,
    label: &str,
    root: &Node,
    index: &Arc<SpecIndex>,
) -> Result<NodeReference<ExtractedMap<T>>, Partial<ExtractedMap<T>>> {
    extract_map_with_extensions(ctx, label, root, index, false)
}

/// Build a map of `T` from the entries of `root` itself, no label lookup.
pub fn extract_map_extensions<T: Buildable>(
    ctx: &BuildContext,
    root: &Node,
    index: &Arc<SpecIndex>,
    include_extensions: bool,
) -> Result<ExtractedMap<T>, Partial<ExtractedMap<T>>> {
    let (container, pending) =
        settle(follow(ctx, root, index, None)).map_err(|e| Partial::new(IndexMap::new(), e))?;
    let map = build_map::<T>(&container, include_extensions)?;
    finish(map, pending)
}

/// [`extract_map_extensions`] without extension keys.
pub fn extract_map_no_lookup<T: Buildable>(
    ctx: &BuildContext,
    root: &Node,
    index: &Arc<SpecIndex>,
) -> Result<ExtractedMap<T>, Partial<ExtractedMap<T>>> {
    extract_map_extensions(ctx, root, index, false)
}

/// Collect the `x-` keys of a mapping as untyped values. No references are followed.
pub fn extract_extensions(node: &Node) -> IndexMap<KeyReference, ValueReference<JsonValue>> {
    node.resolve_alias()
        .entries()
        .into_iter()
        .filter(|(key, _)| key.value().starts_with(EXTENSION_PREFIX))
        .map(|(key, value)| {
            (
                KeyReference::new(key.value(), Some(key.clone())),
                ValueReference::new(to_json(&value), Some(value)),
            )
        })
        .collect()
}

/// Decode a node into a free-form value. No references are followed.
pub fn extract_example(value: &Node, key: Option<&Node>) -> NodeReference<JsonValue> {
    NodeReference::new(to_json(value), key.cloned(), Some(value.clone()))
}

/// Decode a node into its native JSON shape.
pub fn to_json(node: &Node) -> JsonValue {
    let node = node.resolve_alias();
    match node.kind() {
        NodeKind::Mapping => {
            let map: Map<String, JsonValue> = node
                .entries()
                .into_iter()
                .map(|(k, v)| (k.value().to_string(), to_json(&v)))
                .collect();
            JsonValue::Object(map)
        }
        NodeKind::Sequence => JsonValue::Array(node.children().map(|n| to_json(&n)).collect()),
        NodeKind::Scalar | NodeKind::Alias => scalar_json(&node),
    }
}

fn scalar_json(node: &Node) -> JsonValue {
    let text = node.value();
    match node.tag() {
        ScalarTag::Null => JsonValue::Null,
        ScalarTag::Boolean => text
            .parse::<bool>()
            .map(JsonValue::Bool)
            .unwrap_or_else(|_| JsonValue::String(text.to_string())),
        ScalarTag::Integer => text
            .parse::<i64>()
            .map(JsonValue::from)
            .or_else(|_| text.parse::<u64>().map(JsonValue::from))
            .unwrap_or_else(|_| JsonValue::String(text.to_string())),
        ScalarTag::Float => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(text.to_string())),
        ScalarTag::String => JsonValue::String(text.to_string()),
    }
}

/// Scalars readable by [`extract_scalar`].
pub trait FromScalar: Sized {
    const EXPECTED: &'static str;
    fn from_scalar(node: &Node) -> Option<Self>;
}

impl FromScalar for String {
    const EXPECTED: &'static str = "string";
    fn from_scalar(node: &Node) -> Option<Self> {
        Some(node.value().to_string())
    }
}

impl FromScalar for i64 {
    const EXPECTED: &'static str = "integer";
    fn from_scalar(node: &Node) -> Option<Self> {
        node.value().parse().ok()
    }
}

impl FromScalar for f64 {
    const EXPECTED: &'static str = "number";
    fn from_scalar(node: &Node) -> Option<Self> {
        node.value().parse().ok()
    }
}

impl FromScalar for bool {
    const EXPECTED: &'static str = "boolean";
    fn from_scalar(node: &Node) -> Option<Self> {
        node.value().parse().ok()
    }
}

/// Read the scalar under `label`. A missing label yields an empty reference.
pub fn extract_scalar<V: FromScalar + Default>(
    label: &str,
    node: &Node,
) -> Result<NodeReference<V>, ExtractError> {
    let Some((key, value)) = node.resolve_alias().find_key(label) else {
        return Ok(NodeReference::default());
    };
    let value = value.resolve_alias();
    if value.is_null() {
        return Ok(NodeReference::new(V::default(), Some(key), Some(value)));
    }
    if value.kind() != NodeKind::Scalar {
        return Err(ExtractError::WrongKind {
            operation: "extract_scalar",
            expected: NodeKind::Scalar,
            found: value.kind(),
            line: value.line(),
            column: value.column(),
        });
    }
    let parsed = V::from_scalar(&value).ok_or_else(|| {
        ExtractError::build(format!(
            "cannot read '{}' as {} at line {}, column {}",
            value.value(),
            V::EXPECTED,
            value.line(),
            value.column()
        ))
    })?;
    Ok(NodeReference::new(parsed, Some(key), Some(value)))
}
