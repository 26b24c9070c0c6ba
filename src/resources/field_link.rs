//! Field link handler. Attaches a site field to the enclosing content type.

use super::{ResolvedProperties, ResolvedValue, Target};
use crate::core::context::{ContextStack, ParentObject};
use crate::core::error::ProvisionError;
use crate::core::types::{ObjectKind, Properties, RemoteRef};

/// The link is keyed by the linked field and owned by the enclosing content
/// type.
pub fn target(
    property: &str,
    resolved: &ResolvedProperties,
    stack: &ContextStack,
) -> Result<Target, ProvisionError> {
    let field = linked_field(property, resolved)?;
    let parent = match stack.try_get::<ParentObject>() {
        Some(ParentObject(obj)) if obj.kind == ObjectKind::ContentType => obj.key.clone(),
        _ => {
            return Err(ProvisionError::Invalid(
                "field link must be declared inside a content type".to_string(),
            ))
        }
    };
    Ok(Target {
        kind: ObjectKind::FieldLink,
        key: field.key.clone(),
        parent: Some(parent),
        content_type_id: None,
    })
}

fn linked_field<'a>(
    property: &str,
    resolved: &'a ResolvedProperties,
) -> Result<&'a RemoteRef, ProvisionError> {
    match resolved.get(property) {
        Some(ResolvedValue::Object(obj)) if obj.kind == ObjectKind::Field => Ok(obj),
        Some(ResolvedValue::Object(obj)) => Err(ProvisionError::Invalid(format!(
            "field link property '{}' resolved to a {}, expected a field",
            property, obj.kind
        ))),
        _ => Err(ProvisionError::Invalid(format!(
            "field link property '{}' did not resolve to a field",
            property
        ))),
    }
}

/// The link takes the field's internal name unless one is declared.
/// `property` is the same keying property [`target`] was given.
pub fn complete(
    property: &str,
    mut properties: Properties,
    resolved: &ResolvedProperties,
) -> Result<Properties, ProvisionError> {
    let field = linked_field(property, resolved)?;
    if !properties.contains_key("name") {
        if let Some(name) = field.property_str("internal_name") {
            properties.insert(
                "name".to_string(),
                serde_yaml_ng::Value::String(name.to_string()),
            );
        }
    }
    Ok(properties)
}
