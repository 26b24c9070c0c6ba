//! Site field handler.

use super::{fill_default, require_str, Target};
use crate::core::context::{ContextStack, DefaultFieldGroup};
use crate::core::error::ProvisionError;
use crate::core::types::{ObjectKind, Properties};
use uuid::Uuid;

/// Field types the store accepts.
pub const FIELD_TYPES: &[&str] = &[
    "text", "note", "number", "boolean", "datetime", "choice", "lookup", "user", "url",
];

pub fn target(id: &Uuid) -> Target {
    Target {
        kind: ObjectKind::Field,
        key: id.hyphenated().to_string(),
        parent: None,
        content_type_id: None,
    }
}

/// Fields need an internal name and a known type. The display name defaults
/// to the internal name and the group to the ambient default.
pub fn complete(
    mut properties: Properties,
    stack: &ContextStack,
) -> Result<Properties, ProvisionError> {
    let internal_name = require_str(&properties, ObjectKind::Field, "internal_name")?.to_string();
    let field_type = require_str(&properties, ObjectKind::Field, "field_type")?;
    if !FIELD_TYPES.contains(&field_type.to_ascii_lowercase().as_str()) {
        return Err(ProvisionError::Invalid(format!(
            "unknown field type '{}'",
            field_type
        )));
    }
    fill_default(&mut properties, "display_name", Some(&internal_name));
    let group = stack.try_get::<DefaultFieldGroup>().map(|g| g.0.as_str());
    fill_default(&mut properties, "group", group);
    Ok(properties)
}
