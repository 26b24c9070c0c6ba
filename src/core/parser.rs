//! Manifest parsing, validation and lowering.
//!
//! A manifest is parsed with `serde_yaml_ng`, validated as a whole (every
//! problem is collected, nothing fails fast), then lowered into a
//! [`NodeTree`] whose roots are the top-level declarations.

use super::id::ContentTypeId;
use super::node::{Node, NodeHandle, NodeTree, FIELD_PROPERTY};
use super::resolve::{Predicate, Resolver};
use super::types::{Manifest, NodeDecl, ObjectKind, ReferenceDecl};
use crate::resources::field::FIELD_TYPES;
use std::path::Path;
use uuid::Uuid;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a manifest file from disk.
pub fn parse_manifest_file(path: &Path) -> Result<Manifest, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_manifest(&content)
}

pub fn parse_manifest(yaml: &str) -> Result<Manifest, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Validate a parsed manifest. Returns every error found (empty = valid).
pub fn validate_manifest(manifest: &Manifest) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if manifest.version != "1.0" {
        errors.push(ValidationError {
            message: format!("version must be \"1.0\", got \"{}\"", manifest.version),
        });
    }
    if manifest.name.trim().is_empty() {
        errors.push(ValidationError {
            message: "name must not be empty".to_string(),
        });
    }
    if manifest.nodes.is_empty() {
        errors.push(ValidationError {
            message: "manifest declares no nodes".to_string(),
        });
    }

    for (i, decl) in manifest.nodes.iter().enumerate() {
        validate_node(decl, &format!("nodes[{}]", i), None, &mut errors);
    }
    errors
}

fn validate_node(
    decl: &NodeDecl,
    path: &str,
    parent: Option<ObjectKind>,
    errors: &mut Vec<ValidationError>,
) {
    let mut err = |message: String| {
        errors.push(ValidationError {
            message: format!("{} ({}): {}", path, decl.kind, message),
        })
    };

    match decl.kind {
        ObjectKind::ContentType => {
            match decl.id.as_deref().map(ContentTypeId::parse) {
                None => err("missing id".to_string()),
                Some(Err(e)) => err(e.to_string()),
                Some(Ok(id)) if !id.is_absolute() && parent != Some(ObjectKind::ContentType) => {
                    err(format!(
                        "relative id {} must be declared inside a content type",
                        id
                    ))
                }
                Some(Ok(_)) => {}
            }
            if !has_text(decl, "name") {
                err("requires property 'name'".to_string());
            }
        }
        ObjectKind::Field => {
            match decl.id.as_deref().map(Uuid::parse_str) {
                None => err("missing id".to_string()),
                Some(Err(e)) => err(format!("id is not a GUID: {}", e)),
                Some(Ok(_)) => {}
            }
            if !has_text(decl, "internal_name") {
                err("requires property 'internal_name'".to_string());
            }
            match decl.properties.get("field_type") {
                Some(serde_yaml_ng::Value::String(t))
                    if FIELD_TYPES.contains(&t.to_ascii_lowercase().as_str()) => {}
                Some(serde_yaml_ng::Value::String(t)) => {
                    err(format!("unknown field type '{}'", t))
                }
                _ => err("requires property 'field_type'".to_string()),
            }
        }
        ObjectKind::FieldLink => {
            if parent != Some(ObjectKind::ContentType) {
                err("field links must be declared inside a content type".to_string());
            }
            if decl.id.is_some() {
                err("field links take their key from the 'field' reference, not an id".to_string());
            }
            match decl.refs.get(FIELD_PROPERTY) {
                None => err("requires reference 'field'".to_string()),
                Some(r) if r.optional => err("reference 'field' cannot be optional".to_string()),
                Some(r) => {
                    // malformed references are reported by the loop below
                    if let Ok(resolver) = lower_reference(r) {
                        if resolver.target_kind() != ObjectKind::Field {
                            err(format!(
                                "reference 'field' must yield a field, not a {}",
                                resolver.target_kind()
                            ));
                        }
                    }
                }
            }
        }
    }

    for (name, reference) in &decl.refs {
        if decl.properties.contains_key(name) {
            err(format!("'{}' is declared both as a literal and a reference", name));
        }
        match (&reference.id, &reference.name) {
            (Some(_), Some(_)) => err(format!("reference '{}' sets both id and name", name)),
            (None, None) => err(format!("reference '{}' needs an id or a name", name)),
            _ => {}
        }
        if let Some(ref id) = reference.id {
            if let Err(e) = normalize_key(reference.kind, id) {
                err(format!("reference '{}': {}", name, e));
            }
        }
    }

    for (i, child) in decl.children.iter().enumerate() {
        validate_node(
            child,
            &format!("{}.children[{}]", path, i),
            Some(decl.kind),
            errors,
        );
    }
}

fn has_text(decl: &NodeDecl, name: &str) -> bool {
    matches!(
        decl.properties.get(name),
        Some(serde_yaml_ng::Value::String(s)) if !s.trim().is_empty()
    )
}

/// Canonical key for a reference id of the given kind.
fn normalize_key(kind: ObjectKind, id: &str) -> Result<String, String> {
    match kind {
        ObjectKind::ContentType => ContentTypeId::parse(id)
            .map(|id| id.to_string())
            .map_err(|e| e.to_string()),
        ObjectKind::Field | ObjectKind::FieldLink => Uuid::parse_str(id)
            .map(|g| g.hyphenated().to_string())
            .map_err(|e| format!("'{}' is not a GUID: {}", id, e)),
    }
}

/// Build the resolver a manifest reference describes.
pub fn lower_reference(reference: &ReferenceDecl) -> Result<Resolver, String> {
    let base = match (&reference.id, &reference.name) {
        (Some(id), None) => Resolver::by_id(reference.kind, normalize_key(reference.kind, id)?),
        (None, Some(name)) => Resolver::by_predicate(
            reference.kind,
            Predicate::PropertyEq {
                name: reference.kind.name_property().to_string(),
                value: serde_yaml_ng::Value::String(name.clone()),
            },
        ),
        _ => return Err("a reference needs exactly one of id or name".to_string()),
    };
    Ok(reference
        .then
        .iter()
        .fold(base, |resolver, step| resolver.chain(step.clone())))
}

/// Lower a validated manifest into a node tree. Returns the tree and its
/// roots in declaration order.
pub fn lower_manifest(manifest: &Manifest) -> Result<(NodeTree, Vec<NodeHandle>), String> {
    let mut tree = NodeTree::new();
    let mut roots = Vec::with_capacity(manifest.nodes.len());
    for decl in &manifest.nodes {
        roots.push(lower_node(&mut tree, decl)?);
    }
    Ok((tree, roots))
}

fn lower_node(tree: &mut NodeTree, decl: &NodeDecl) -> Result<NodeHandle, String> {
    let missing_id = || format!("{} declaration is missing its id", decl.kind);
    let mut node = match decl.kind {
        ObjectKind::ContentType => {
            let id = decl.id.as_deref().ok_or_else(missing_id)?;
            Node::content_type(ContentTypeId::parse(id).map_err(|e| e.to_string())?)
        }
        ObjectKind::Field => {
            let id = decl.id.as_deref().ok_or_else(missing_id)?;
            Node::field(Uuid::parse_str(id).map_err(|e| format!("'{}' is not a GUID: {}", id, e))?)
        }
        ObjectKind::FieldLink => {
            let field = decl
                .refs
                .get(FIELD_PROPERTY)
                .ok_or_else(|| "field link declaration is missing its 'field' reference".to_string())?;
            Node::field_link(lower_reference(field)?)
        }
    };

    for (name, value) in &decl.properties {
        node = node.property(name, value.clone());
    }
    for (name, reference) in &decl.refs {
        if decl.kind == ObjectKind::FieldLink && name == FIELD_PROPERTY {
            continue;
        }
        let resolver = lower_reference(reference)?;
        node = if reference.optional {
            node.property_optional(name, resolver)
        } else {
            node.property(name, resolver)
        };
    }
    node = node.with_defaults(decl.defaults.clone());

    let handle = tree.add(node);
    for child in &decl.children {
        let child = lower_node(tree, child)?;
        tree.add_child(handle, child)?;
    }
    Ok(handle)
}
