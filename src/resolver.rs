//! Reference cycle detection across one or more indexed documents.
//!
//! The resolver walks the reference graph depth-first from every distinct
//! target in discovery order. A target reached again while still on the
//! stack closes a loop; the loop is reported once no matter where it was
//! entered.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::index::{ReferenceEdge, SpecIndex};
use crate::pointer::{self, RefType};
use crate::rolodex;

/// One hop of a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JourneyStep {
    /// Last pointer segment of the target.
    pub name: String,
    /// Canonical lookup key of the target.
    pub key: String,
    /// The reference string that led here.
    pub definition: String,
}

/// A detected reference cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CircularReferenceResult {
    /// Targets in traversal order; the last step repeats the first.
    pub journey: Vec<JourneyStep>,
    /// Pointer of the `$ref` site that closes the loop.
    pub source: String,
    /// Location of the document holding that site.
    pub location: String,
    pub line: usize,
    pub column: usize,
    /// Some hop of the loop passes through an array.
    pub is_array_result: bool,
    /// Some hop of the loop passes through `allOf` / `anyOf` / `oneOf`.
    pub is_polymorphic_result: bool,
}

impl CircularReferenceResult {
    /// Names joined with ` -> `, e.g. `cake -> loopy -> cake`.
    pub fn journey_path(&self) -> String {
        self.journey
            .iter()
            .map(|step| step.name.as_str())
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    /// Where the loop was entered.
    pub fn loop_point(&self) -> Option<&JourneyStep> {
        self.journey.first()
    }

    /// A target referencing itself directly.
    pub fn is_self_reference(&self) -> bool {
        self.journey.len() == 2
    }

    /// An array or polymorphic hop can terminate the recursion in real data.
    pub fn is_infinite_loop(&self) -> bool {
        !(self.is_array_result || self.is_polymorphic_result)
    }

    /// True when `key` is one of the loop's targets.
    pub fn involves(&self, key: &str) -> bool {
        self.journey.iter().any(|step| step.key == key)
    }

    fn members(&self) -> BTreeSet<&str> {
        self.journey.iter().map(|s| s.key.as_str()).collect()
    }

    /// Same set of targets, regardless of entry point.
    pub fn same_loop(&self, other: &CircularReferenceResult) -> bool {
        self.members() == other.members()
    }
}

#[derive(Debug, Clone)]
struct Vertex {
    key: String,
    location: String,
    id: String,
    name: String,
    definition: String,
}

impl Vertex {
    fn depth(&self) -> usize {
        pointer::segments(&self.id).len()
    }

    fn pointer(&self) -> String {
        if self.id.is_empty() {
            "#".to_string()
        } else {
            format!("{}{}", pointer::POINTER_SEPARATOR, self.id)
        }
    }
}

/// Edge flags relative to the vertex it leaves.
#[derive(Debug, Clone)]
struct Link {
    array: bool,
    polymorphic: bool,
    source: String,
    location: String,
    line: usize,
    column: usize,
}

#[derive(Default)]
struct Search {
    results: Vec<CircularReferenceResult>,
    done: HashSet<String>,
    indexes: HashMap<String, Arc<SpecIndex>>,
}

/// Finds reference cycles reachable from a root index.
pub struct Resolver {
    index: Arc<SpecIndex>,
}

impl Resolver {
    pub fn new(index: Arc<SpecIndex>) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &Arc<SpecIndex> {
        &self.index
    }

    /// Let extraction resolve through cycles instead of failing on them.
    pub fn allow_circular_resolving(&self, allow: bool) {
        self.index.set_allow_circular_references(allow);
    }

    /// Detect every cycle reachable from the root document.
    ///
    /// Results are also recorded on the root index and on each document the
    /// cycle passes through, where extraction consults them.
    pub fn check_for_circular_references(&self) -> Vec<CircularReferenceResult> {
        let mut search = Search::default();
        search
            .indexes
            .insert(self.index.location().to_string(), Arc::clone(&self.index));

        let mut seen = HashSet::new();
        let entries: Vec<Vertex> = self
            .index
            .references()
            .iter()
            .filter_map(|edge| self.vertex_for(edge, &self.index))
            .filter(|v| seen.insert(v.key.clone()))
            .collect();

        for entry in entries {
            let mut stack = Vec::new();
            let mut links = Vec::new();
            self.visit(entry, &mut stack, &mut links, &mut search);
        }

        for result in &search.results {
            self.index.record_circular(result);
            let locations: HashSet<&str> =
                result.journey.iter().map(|s| location_of(&s.key)).collect();
            for location in locations {
                if let Some(index) = search.indexes.get(location) {
                    index.record_circular(result);
                }
            }
        }
        debug!(
            location = %self.index.location(),
            cycles = search.results.len(),
            "checked for circular references"
        );
        search.results
    }

    fn vertex_for(&self, edge: &ReferenceEdge, from: &Arc<SpecIndex>) -> Option<Vertex> {
        match rolodex::resolve_target(&edge.reference, from.location(), from.config()) {
            Ok(target) => {
                let location = match target.ref_type {
                    RefType::Local => from.location().to_string(),
                    _ => target.location,
                };
                let name = match pointer::name_of(&target.id) {
                    name if name.is_empty() => location_name(&location),
                    name => name,
                };
                Some(Vertex {
                    key: pointer::lookup_key(&location, &target.id),
                    location,
                    id: target.id,
                    name,
                    definition: edge.reference.clone(),
                })
            }
            Err(_) => None,
        }
    }

    fn index_for(&self, location: &str, search: &mut Search) -> Option<Arc<SpecIndex>> {
        if let Some(index) = search.indexes.get(location) {
            return Some(Arc::clone(index));
        }
        let rolodex = self.index.rolodex()?;
        match rolodex.open(location) {
            Ok(index) => {
                search
                    .indexes
                    .insert(location.to_string(), Arc::clone(&index));
                Some(index)
            }
            Err(e) => {
                warn!(location, error = %e, "skipping unreadable document during cycle check");
                None
            }
        }
    }

    fn visit(
        &self,
        vertex: Vertex,
        stack: &mut Vec<Vertex>,
        links: &mut Vec<Link>,
        search: &mut Search,
    ) {
        if let Some(start) = stack.iter().position(|v| v.key == vertex.key) {
            self.report(start, &vertex, stack, links, search);
            return;
        }
        if search.done.contains(&vertex.key) {
            return;
        }
        let Some(index) = self.index_for(&vertex.location, search) else {
            search.done.insert(vertex.key);
            return;
        };
        // Target must exist; dangling references are reported elsewhere.
        if index.find_pointer(&vertex.id).is_err() {
            search.done.insert(vertex.key);
            return;
        }

        let pointer = vertex.pointer();
        let depth = vertex.depth();
        let key = vertex.key.clone();
        stack.push(vertex);
        for edge in index.references().iter().filter(|e| e.is_under(&pointer)) {
            let Some(next) = self.vertex_for(edge, &index) else {
                continue;
            };
            let position = edge.position();
            links.push(Link {
                array: edge.in_array_below(depth),
                polymorphic: edge.polymorphic_below(depth),
                source: edge.source.clone(),
                location: index.location().to_string(),
                line: position.line,
                column: position.column,
            });
            self.visit(next, stack, links, search);
            links.pop();
        }
        stack.pop();
        search.done.insert(key);
    }

    fn report(
        &self,
        start: usize,
        closing: &Vertex,
        stack: &[Vertex],
        links: &[Link],
        search: &mut Search,
    ) {
        let mut journey: Vec<JourneyStep> = stack[start..]
            .iter()
            .map(|v| JourneyStep {
                name: v.name.clone(),
                key: v.key.clone(),
                definition: v.definition.clone(),
            })
            .collect();
        journey.push(JourneyStep {
            name: closing.name.clone(),
            key: closing.key.clone(),
            definition: closing.definition.clone(),
        });
        let hops = &links[start..];
        let Some(last) = hops.last() else {
            return;
        };
        let result = CircularReferenceResult {
            journey,
            source: last.source.clone(),
            location: last.location.clone(),
            line: last.line,
            column: last.column,
            is_array_result: hops.iter().any(|l| l.array),
            is_polymorphic_result: hops.iter().any(|l| l.polymorphic),
        };
        if search.results.iter().any(|r| r.same_loop(&result)) {
            return;
        }
        warn!(journey = %result.journey_path(), "found circular reference");
        search.results.push(result);
    }
}

fn location_of(key: &str) -> &str {
    match key.split_once(pointer::POINTER_SEPARATOR) {
        Some((location, _)) => location,
        None if key == "#" => "",
        None => key,
    }
}

fn location_name(location: &str) -> String {
    location
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("root")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::node::parse_document;

    fn resolve(yaml: &str) -> (Arc<SpecIndex>, Vec<CircularReferenceResult>) {
        let index = SpecIndex::new(parse_document(yaml).unwrap(), IndexConfig::closed());
        let results = Resolver::new(Arc::clone(&index)).check_for_circular_references();
        (index, results)
    }

    #[test]
    fn finds_two_hop_loop_once() {
        let (index, results) = resolve(
            "components:\n  schemas:\n    loopy:\n      $ref: '#/components/schemas/cake'\n    cake:\n      $ref: '#/components/schemas/loopy'\n    pizza:\n      $ref: '#/components/schemas/cake'\n",
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].journey_path(), "cake -> loopy -> cake");
        assert!(!results[0].is_self_reference());
        assert!(results[0].is_infinite_loop());
        assert_eq!(index.circular_references().len(), 1);
        assert!(index.circular_for("#/components/schemas/loopy").is_some());
        assert!(index.circular_for("#/components/schemas/pizza").is_none());
    }

    #[test]
    fn finds_self_reference() {
        let (_, results) = resolve("components:\n  schemas:\n    node:\n      $ref: '#/components/schemas/node'\n");
        assert_eq!(results.len(), 1);
        assert!(results[0].is_self_reference());
        assert_eq!(results[0].journey_path(), "node -> node");
        assert_eq!(results[0].source, "#/components/schemas/node");
    }

    #[test]
    fn loop_through_properties_is_detected() {
        let (_, results) = resolve(
            r##"components:
  schemas:
    parent:
      properties:
        child:
          $ref: '#/components/schemas/child'
    child:
      properties:
        parent:
          $ref: '#/components/schemas/parent'
"##,
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].journey_path(), "child -> parent -> child");
    }

    #[test]
    fn array_loop_is_tolerated() {
        let (_, results) = resolve(
            r##"components:
  schemas:
    tree:
      properties:
        children:
          type: array
          items:
            $ref: '#/components/schemas/tree'
"##,
        );
        assert_eq!(results.len(), 1);
        assert!(results[0].is_array_result);
        assert!(!results[0].is_infinite_loop());
    }

    #[test]
    fn polymorphic_loop_is_flagged() {
        let (_, results) = resolve(
            r##"components:
  schemas:
    pet:
      oneOf:
        - $ref: '#/components/schemas/dog'
    dog:
      allOf:
        - $ref: '#/components/schemas/pet'
"##,
        );
        assert_eq!(results.len(), 1);
        assert!(results[0].is_polymorphic_result);
        assert!(!results[0].is_array_result);
    }

    #[test]
    fn acyclic_graph_has_no_results() {
        let (index, results) = resolve(
            "components:\n  schemas:\n    a:\n      $ref: '#/components/schemas/b'\n    b:\n      type: string\n",
        );
        assert!(results.is_empty());
        assert!(index.circular_references().is_empty());
    }

    #[test]
    fn dangling_reference_is_not_a_cycle() {
        let (_, results) = resolve("a:\n  $ref: '#/nowhere'\n");
        assert!(results.is_empty());
    }

    #[test]
    fn allow_circular_resolving_sets_index_flag() {
        let index = SpecIndex::new(parse_document("a: b").unwrap(), IndexConfig::closed());
        let resolver = Resolver::new(Arc::clone(&index));
        resolver.allow_circular_resolving(true);
        assert!(index.allow_circular_references());
    }
}
