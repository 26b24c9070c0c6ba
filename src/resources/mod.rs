//! Object kind handlers: lookup key, create request and required properties
//! for each kind of remote object.
//!
//! Each handler produces:
//! 1. A [`Target`]: the natural key the store is queried with
//! 2. A [`CreateRequest`] built from resolved properties and ambient defaults

pub mod content_type;
pub mod field;
pub mod field_link;

use crate::core::context::ContextStack;
use crate::core::error::ProvisionError;
use crate::core::id::ContentTypeId;
use crate::core::node::{Node, NodeKey};
use crate::core::resolve::Predicate;
use crate::core::types::{ObjectKind, Properties, RemoteRef};
use crate::transport::CreateRequest;
use indexmap::IndexMap;

/// A property after deferred references were evaluated.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedValue {
    Literal(serde_yaml_ng::Value),
    Object(RemoteRef),
    /// Optional reference that matched nothing.
    Unset,
}

pub type ResolvedProperties = IndexMap<String, ResolvedValue>;

/// Where a node lives in the remote store.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub kind: ObjectKind,
    pub key: String,
    pub parent: Option<String>,
    /// Full id, for content types.
    pub content_type_id: Option<ContentTypeId>,
}

impl Target {
    /// Predicate that matches exactly this object.
    pub fn existence_predicate(&self) -> Predicate {
        let by_key = Predicate::KeyEq(self.key.clone());
        match &self.parent {
            Some(parent) => by_key.and(Predicate::ParentEq(parent.clone())),
            None => by_key,
        }
    }
}

/// Compute the lookup target of a node.
pub fn target(
    node: &Node,
    resolved: &ResolvedProperties,
    stack: &ContextStack,
) -> Result<Target, ProvisionError> {
    match (node.kind(), node.identifier()) {
        (ObjectKind::ContentType, NodeKey::ContentType(id)) => content_type::target(id, stack),
        (ObjectKind::Field, NodeKey::Field(id)) => Ok(field::target(id)),
        (ObjectKind::FieldLink, NodeKey::FromProperty(name)) => {
            field_link::target(name, resolved, stack)
        }
        (kind, key) => Err(ProvisionError::Invalid(format!(
            "{} cannot be keyed by {:?}",
            kind, key
        ))),
    }
}

/// Build the create request for a node that does not exist yet.
pub fn create_request(
    node: &Node,
    target: &Target,
    resolved: &ResolvedProperties,
    stack: &ContextStack,
) -> Result<CreateRequest, ProvisionError> {
    let properties = literal_properties(resolved);
    let properties = match node.kind() {
        ObjectKind::ContentType => content_type::complete(properties, stack)?,
        ObjectKind::Field => field::complete(properties, stack)?,
        ObjectKind::FieldLink => match node.identifier() {
            NodeKey::FromProperty(name) => field_link::complete(name, properties, resolved)?,
            key => {
                return Err(ProvisionError::Invalid(format!(
                    "field link cannot be keyed by {:?}",
                    key
                )))
            }
        },
    };
    Ok(CreateRequest {
        key: target.key.clone(),
        parent: target.parent.clone(),
        properties,
    })
}

/// Flatten resolved properties into plain values. Objects contribute their
/// key; unset optional references are left out.
fn literal_properties(resolved: &ResolvedProperties) -> Properties {
    resolved
        .iter()
        .filter_map(|(name, value)| match value {
            ResolvedValue::Literal(v) => Some((name.clone(), v.clone())),
            ResolvedValue::Object(obj) => Some((
                name.clone(),
                serde_yaml_ng::Value::String(obj.key.clone()),
            )),
            ResolvedValue::Unset => None,
        })
        .collect()
}

/// Non-empty string property, or an `Invalid` error naming it.
fn require_str<'a>(
    properties: &'a Properties,
    kind: ObjectKind,
    name: &str,
) -> Result<&'a str, ProvisionError> {
    match properties.get(name) {
        Some(serde_yaml_ng::Value::String(s)) if !s.trim().is_empty() => Ok(s),
        Some(_) => Err(ProvisionError::Invalid(format!(
            "{} property '{}' must be a non-empty string",
            kind, name
        ))),
        None => Err(ProvisionError::Invalid(format!(
            "{} requires property '{}'",
            kind, name
        ))),
    }
}

/// Set `name` to `value` when the declaration left it out.
fn fill_default(properties: &mut Properties, name: &str, value: Option<&str>) {
    if properties.contains_key(name) {
        return;
    }
    if let Some(v) = value {
        properties.insert(name.to_string(), serde_yaml_ng::Value::String(v.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resources_existence_predicate() {
        let t = Target {
            kind: ObjectKind::FieldLink,
            key: "f1".into(),
            parent: Some("0x0101".into()),
            content_type_id: None,
        };
        let obj = RemoteRef::new(ObjectKind::FieldLink, "F1").with_parent("0x0101");
        assert!(t.existence_predicate().matches(&obj));
        let other = RemoteRef::new(ObjectKind::FieldLink, "f1").with_parent("0x0102");
        assert!(!t.existence_predicate().matches(&other));
    }

    #[test]
    fn test_resources_literal_properties() {
        let mut resolved = ResolvedProperties::new();
        resolved.insert(
            "name".into(),
            ResolvedValue::Literal(serde_yaml_ng::Value::String("N".into())),
        );
        resolved.insert(
            "field".into(),
            ResolvedValue::Object(RemoteRef::new(ObjectKind::Field, "f1")),
        );
        resolved.insert("lookup".into(), ResolvedValue::Unset);
        let props = literal_properties(&resolved);
        assert_eq!(props.len(), 2);
        assert_eq!(props["field"], serde_yaml_ng::Value::String("f1".into()));
        assert!(!props.contains_key("lookup"));
    }

    #[test]
    fn test_resources_require_str() {
        let mut props = Properties::new();
        assert!(require_str(&props, ObjectKind::Field, "internal_name").is_err());
        props.insert("internal_name".into(), serde_yaml_ng::Value::String("  ".into()));
        assert!(require_str(&props, ObjectKind::Field, "internal_name").is_err());
        props.insert("internal_name".into(), serde_yaml_ng::Value::String("X".into()));
        assert_eq!(require_str(&props, ObjectKind::Field, "internal_name").unwrap(), "X");
    }

    #[test]
    fn test_resources_fill_default_keeps_explicit() {
        let mut props = Properties::new();
        props.insert("group".into(), serde_yaml_ng::Value::String("Mine".into()));
        fill_default(&mut props, "group", Some("Default"));
        fill_default(&mut props, "description", None);
        assert_eq!(props["group"], serde_yaml_ng::Value::String("Mine".into()));
        assert!(!props.contains_key("description"));
    }

    #[test]
    fn test_resources_field_link_needs_resolved_field() {
        let node = Node::field_link(crate::core::resolve::Resolver::by_id(ObjectKind::Field, "x"));
        let stack = ContextStack::new();
        let err = target(&node, &ResolvedProperties::new(), &stack).unwrap_err();
        assert!(matches!(err, ProvisionError::Invalid(_)));
    }
}
