//! Server objects: a URL template plus its substitution variables.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::context::BuildContext;
use crate::error::ExtractError;
use crate::extract::{extract_extensions, extract_map, extract_scalar, Buildable, ExtractedMap};
use crate::hash::{ContentHash, FieldHasher};
use crate::index::SpecIndex;
use crate::model::{find_item_in_map, KeyReference, NodeReference, ValueReference};
use crate::node::{Node, NodeKind};

pub const SERVERS_LABEL: &str = "servers";
pub const VARIABLES_LABEL: &str = "variables";

#[derive(Debug, Clone, Default)]
pub struct Server {
    pub url: NodeReference<String>,
    pub description: NodeReference<String>,
    pub variables: NodeReference<ExtractedMap<ServerVariable>>,
    pub extensions: IndexMap<KeyReference, ValueReference<JsonValue>>,
}

impl Server {
    /// Variable by name, falling back to a case-insensitive match.
    pub fn find_variable(&self, name: &str) -> Option<&ValueReference<ServerVariable>> {
        find_item_in_map(name, &self.variables.value)
    }
}

impl Buildable for Server {
    fn build(
        &mut self,
        ctx: &BuildContext,
        _key: Option<&Node>,
        value: &Node,
        index: &Arc<SpecIndex>,
    ) -> Result<(), ExtractError> {
        self.url = extract_scalar("url", value)?;
        self.description = extract_scalar("description", value)?;
        self.variables = extract_map(ctx, VARIABLES_LABEL, value, index)?;
        self.extensions = extract_extensions(value);
        Ok(())
    }
}

impl ContentHash for Server {
    fn content_hash(&self) -> [u8; 32] {
        FieldHasher::new()
            .field(&self.url.value)
            .field(&self.description.value)
            .hashed(&self.variables.value)
            .hashed(&self.extensions)
            .finish()
    }
}

/// One substitutable part of a server URL.
#[derive(Debug, Clone, Default)]
pub struct ServerVariable {
    pub enum_values: Vec<NodeReference<String>>,
    pub default: NodeReference<String>,
    pub description: NodeReference<String>,
    pub extensions: IndexMap<KeyReference, ValueReference<JsonValue>>,
}

impl Buildable for ServerVariable {
    fn build(
        &mut self,
        _ctx: &BuildContext,
        _key: Option<&Node>,
        value: &Node,
        _index: &Arc<SpecIndex>,
    ) -> Result<(), ExtractError> {
        self.default = extract_scalar("default", value)?;
        self.description = extract_scalar("description", value)?;
        self.extensions = extract_extensions(value);
        if let Some((_, values)) = value.find_key("enum") {
            let values = values.resolve_alias();
            if values.kind() != NodeKind::Sequence {
                return Err(ExtractError::WrongKind {
                    operation: "server variable enum",
                    expected: NodeKind::Sequence,
                    found: values.kind(),
                    line: values.line(),
                    column: values.column(),
                });
            }
            self.enum_values = values
                .children()
                .map(|item| NodeReference::new(item.value().to_string(), None, Some(item)))
                .collect();
        }
        Ok(())
    }
}

impl ContentHash for ServerVariable {
    fn content_hash(&self) -> [u8; 32] {
        let mut hasher = FieldHasher::new();
        for value in &self.enum_values {
            hasher = hasher.field(&value.value);
        }
        hasher
            .field(&self.default.value)
            .field(&self.description.value)
            .hashed(&self.extensions)
            .finish()
    }
}
