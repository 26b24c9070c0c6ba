//! Declarative node model.
//!
//! A [`Node`] describes one remote object: its kind, its natural key, its
//! properties (literal or deferred) and the ambient defaults it hands down.
//! Nodes are owned by a [`NodeTree`] arena and linked by [`NodeHandle`], so a
//! declaration can be reused under several parents without aliasing. The
//! engine borrows the tree immutably for a whole run.

use super::id::ContentTypeId;
use super::resolve::Resolver;
use super::types::{AmbientDefaults, ObjectKind};
use indexmap::IndexMap;
use uuid::Uuid;

/// Property name a field link's target field is bound to.
pub const FIELD_PROPERTY: &str = "field";

/// Declared value of a property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Literal(serde_yaml_ng::Value),
    /// Evaluated against the connection before the node is queried.
    Deferred { resolver: Resolver, optional: bool },
}

impl PropertyValue {
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred { .. })
    }
}

impl From<Resolver> for PropertyValue {
    fn from(resolver: Resolver) -> Self {
        Self::Deferred {
            resolver,
            optional: false,
        }
    }
}

impl From<serde_yaml_ng::Value> for PropertyValue {
    fn from(v: serde_yaml_ng::Value) -> Self {
        Self::Literal(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        Self::Literal(serde_yaml_ng::Value::String(s.to_string()))
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        Self::Literal(serde_yaml_ng::Value::String(s))
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        Self::Literal(serde_yaml_ng::Value::Bool(b))
    }
}

/// How a node's lookup key is obtained.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKey {
    /// Absolute, or relative to the nearest ancestor content type.
    ContentType(ContentTypeId),
    Field(Uuid),
    /// Key of the object the named deferred property resolves to.
    FromProperty(String),
}

/// One declared object.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    kind: ObjectKind,
    key: NodeKey,
    properties: IndexMap<String, PropertyValue>,
    defaults: AmbientDefaults,
    children: Vec<NodeHandle>,
}

impl Node {
    pub fn content_type(id: ContentTypeId) -> Self {
        Self::new(ObjectKind::ContentType, NodeKey::ContentType(id))
    }

    pub fn field(id: Uuid) -> Self {
        Self::new(ObjectKind::Field, NodeKey::Field(id))
    }

    /// Link from the enclosing content type to the field `field` resolves to.
    pub fn field_link(field: Resolver) -> Self {
        Self::new(
            ObjectKind::FieldLink,
            NodeKey::FromProperty(FIELD_PROPERTY.to_string()),
        )
        .property(FIELD_PROPERTY, field)
    }

    fn new(kind: ObjectKind, key: NodeKey) -> Self {
        Self {
            kind,
            key,
            properties: IndexMap::new(),
            defaults: AmbientDefaults::default(),
            children: Vec::new(),
        }
    }

    /// Set a literal or deferred property, replacing any earlier value.
    pub fn property(mut self, name: &str, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(name.to_string(), value.into());
        self
    }

    /// Deferred property that is left unset when nothing matches.
    pub fn property_optional(mut self, name: &str, resolver: Resolver) -> Self {
        self.properties.insert(
            name.to_string(),
            PropertyValue::Deferred {
                resolver,
                optional: true,
            },
        );
        self
    }

    pub fn default_content_type_group(mut self, group: &str) -> Self {
        self.defaults.content_type_group = Some(group.to_string());
        self
    }

    pub fn default_field_group(mut self, group: &str) -> Self {
        self.defaults.field_group = Some(group.to_string());
        self
    }

    pub fn with_defaults(mut self, defaults: AmbientDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn identifier(&self) -> &NodeKey {
        &self.key
    }

    pub fn properties(&self) -> &IndexMap<String, PropertyValue> {
        &self.properties
    }

    pub fn defaults(&self) -> &AmbientDefaults {
        &self.defaults
    }

    /// Declared identity, usable before anything is resolved.
    pub fn label(&self) -> String {
        match &self.key {
            NodeKey::ContentType(id) => id.to_string(),
            NodeKey::Field(id) => id.hyphenated().to_string(),
            NodeKey::FromProperty(name) => match self.properties.get(name) {
                Some(PropertyValue::Deferred { resolver, .. }) => format!("<{}>", resolver),
                _ => format!("<{}>", name),
            },
        }
    }
}

/// Index of a node inside its [`NodeTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(usize);

impl NodeHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Arena owning every node of a run.
#[derive(Debug, Clone, Default)]
pub struct NodeTree {
    nodes: Vec<Node>,
}

impl NodeTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: Node) -> NodeHandle {
        self.nodes.push(node);
        NodeHandle(self.nodes.len() - 1)
    }

    /// Append `child` to `parent`'s children. Rejects unknown handles and
    /// links that would make `parent` its own descendant.
    pub fn add_child(&mut self, parent: NodeHandle, child: NodeHandle) -> Result<(), String> {
        if parent.0 >= self.nodes.len() || child.0 >= self.nodes.len() {
            return Err(format!("unknown node handle {:?}", parent.max(child)));
        }
        if self.reaches(child, parent) {
            return Err(format!(
                "adding {} under {} would create a cycle",
                self.nodes[child.0].label(),
                self.nodes[parent.0].label()
            ));
        }
        self.nodes[parent.0].children.push(child);
        Ok(())
    }

    /// Add `node` and attach it under `parent` in one step.
    pub fn add_under(&mut self, parent: NodeHandle, node: Node) -> Result<NodeHandle, String> {
        let child = self.add(node);
        self.add_child(parent, child)?;
        Ok(child)
    }

    fn reaches(&self, from: NodeHandle, to: NodeHandle) -> bool {
        let mut stack = vec![from];
        let mut seen = vec![false; self.nodes.len()];
        while let Some(h) = stack.pop() {
            if h == to {
                return true;
            }
            if std::mem::replace(&mut seen[h.0], true) {
                continue;
            }
            stack.extend(self.nodes[h.0].children.iter().copied());
        }
        false
    }

    pub fn get(&self, handle: NodeHandle) -> Option<&Node> {
        self.nodes.get(handle.0)
    }

    pub fn children(&self, handle: NodeHandle) -> &[NodeHandle] {
        self.nodes
            .get(handle.0)
            .map(|n| n.children.as_slice())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
