//! API document reference model
//!
//! A position-preserving, reference-aware low-level model for OpenAPI-style
//! documents. Every extracted value keeps the nodes it came from, `$ref`
//! pointers are followed within and across documents, and reference cycles
//! are detected before extraction walks into them.
//!
//! # Example
//!
//! ```
//! use apiref::{
//!     extract_object, parse_document, BuildContext, Buildable, ExtractError, IndexConfig,
//!     Node, NodeReference, Resolver, SpecIndex, extract_scalar,
//! };
//! use std::sync::Arc;
//!
//! #[derive(Debug, Default)]
//! struct Schema {
//!     description: NodeReference<String>,
//! }
//!
//! impl Buildable for Schema {
//!     fn build(
//!         &mut self,
//!         _ctx: &BuildContext,
//!         _key: Option<&Node>,
//!         value: &Node,
//!         _index: &Arc<SpecIndex>,
//!     ) -> Result<(), ExtractError> {
//!         self.description = extract_scalar("description", value)?;
//!         Ok(())
//!     }
//! }
//!
//! let doc = parse_document(
//!     "components:\n  schemas:\n    pet:\n      description: a pet\nthing:\n  $ref: '#/components/schemas/pet'\n",
//! )
//! .unwrap();
//! let index = SpecIndex::new(doc.clone(), IndexConfig::closed());
//! assert!(Resolver::new(index.clone()).check_for_circular_references().is_empty());
//!
//! let thing = extract_object::<Schema>(&BuildContext::new(), "thing", &doc, &index).unwrap();
//! assert_eq!(thing.value.description.value, "a pet");
//! assert_eq!(thing.reference.as_deref(), Some("#/components/schemas/pet"));
//! ```
//!
//! # Reference kinds
//!
//! | Reference | Kind |
//! |-----------|------|
//! | `#/components/schemas/pet` | local |
//! | `pet.yaml#/Pet`, `./pet.yaml`, `../shared/pet.yaml` | file |
//! | `https://example.com/pet.yaml#/Pet` | remote |
//!
//! File and remote references need a [`Rolodex`] and an [`IndexConfig`] that
//! allows them.

mod check;
mod config;
mod context;
mod error;
mod extract;
mod flight;
mod hash;
mod index;
mod loader;
mod model;
mod node;
mod pointer;
mod resolver;
mod rolodex;
mod server;

pub use check::{check, check_file, CheckResult, Diagnostic, FileResult, FileStatus, Severity};
pub use config::{IndexConfig, DEFAULT_REMOTE_TIMEOUT};
pub use context::BuildContext;
pub use error::{ExtractError, LoadError, ParseError, Partial, ResolveError};
pub use extract::{
    extract_array, extract_example, extract_extensions, extract_map, extract_map_extensions,
    extract_map_no_lookup, extract_map_with_extensions, extract_object, extract_object_raw,
    extract_scalar, to_json, Buildable, ExtractedMap, FromScalar, RawObject, EXTENSION_PREFIX,
};
pub use hash::{are_equal, hash_string, sha256, ContentHash, FieldHasher};
pub use index::{ReferenceEdge, SpecIndex};
pub use loader::{is_url, load_file, load_source};
pub use model::{find_item_in_map, KeyReference, NodeReference, Reference, ValueReference};
pub use node::{
    from_json_value, parse_document, Node, NodeId, NodeKind, Position, ScalarTag, Tree,
    TreeBuilder, MERGE_KEY, REF_KEY,
};
pub use pointer::{
    classify, escape_segment, extract_refs, file_of, pointer_of, split, unescape_segment,
    ExtractedRef, RefType,
};
pub use resolver::{CircularReferenceResult, JourneyStep, Resolver};
pub use rolodex::{locate, locate_node, Located, Rolodex};
pub use server::{Server, ServerVariable, SERVERS_LABEL, VARIABLES_LABEL};

#[cfg(feature = "remote")]
pub use loader::load_url;
