//! Content type handler.

use super::{fill_default, require_str, Target};
use crate::core::context::{ContextStack, DefaultContentTypeGroup, ParentContentTypeId};
use crate::core::error::ProvisionError;
use crate::core::id::ContentTypeId;
use crate::core::types::{ObjectKind, Properties};

/// Resolve the full id, appending a relative id to the enclosing content
/// type's id.
pub fn target(id: &ContentTypeId, stack: &ContextStack) -> Result<Target, ProvisionError> {
    let full = if id.is_absolute() {
        id.clone()
    } else {
        match stack.try_get::<ParentContentTypeId>() {
            Some(ParentContentTypeId(parent)) => parent.append(id)?,
            None => {
                return Err(ProvisionError::Invalid(format!(
                    "relative content type id {} has no enclosing content type",
                    id
                )))
            }
        }
    };
    Ok(Target {
        kind: ObjectKind::ContentType,
        key: full.to_string(),
        parent: None,
        content_type_id: Some(full),
    })
}

/// Content types need a name; the group falls back to the ambient default.
pub fn complete(
    mut properties: Properties,
    stack: &ContextStack,
) -> Result<Properties, ProvisionError> {
    require_str(&properties, ObjectKind::ContentType, "name")?;
    let group = stack
        .try_get::<DefaultContentTypeGroup>()
        .map(|g| g.0.as_str());
    fill_default(&mut properties, "group", group);
    Ok(properties)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ContentTypeId {
        ContentTypeId::parse(s).unwrap()
    }

    #[test]
    fn test_content_type_absolute_target() {
        let stack = ContextStack::new();
        let t = target(&id("0x0101"), &stack).unwrap();
        assert_eq!(t.key, "0x0101");
        assert_eq!(t.parent, None);
        assert_eq!(t.content_type_id, Some(id("0x0101")));
    }

    #[test]
    fn test_content_type_relative_target_appends_parent() {
        let mut stack = ContextStack::new();
        let _m = stack.push(ParentContentTypeId(id("0x0101")));
        let t = target(&id("02"), &stack).unwrap();
        assert_eq!(t.key, "0x010102");
    }

    #[test]
    fn test_content_type_relative_without_parent_fails() {
        let stack = ContextStack::new();
        let err = target(&id("02"), &stack).unwrap_err();
        assert!(err.to_string().contains("no enclosing content type"));
    }

    #[test]
    fn test_content_type_overlong_relative_target_is_format_error() {
        let guids = "00A33D9AD9805788419BDAAC2CCB37509F".repeat(16);
        let mut stack = ContextStack::new();
        let _m = stack.push(ParentContentTypeId(id(&format!("0x01{}", guids))));
        let err = target(&id(&guids), &stack).unwrap_err();
        assert!(matches!(err, ProvisionError::Format(_)), "{:?}", err);
    }

    #[test]
    fn test_content_type_complete_uses_default_group() {
        let mut stack = ContextStack::new();
        let _m = stack.push(DefaultContentTypeGroup("Unit Tests".into()));
        let mut props = Properties::new();
        props.insert("name".into(), serde_yaml_ng::Value::String("N".into()));
        let props = complete(props, &stack).unwrap();
        assert_eq!(
            props["group"],
            serde_yaml_ng::Value::String("Unit Tests".into())
        );
    }

    #[test]
    fn test_content_type_complete_requires_name() {
        let stack = ContextStack::new();
        let err = complete(Properties::new(), &stack).unwrap_err();
        assert!(err.to_string().contains("requires property 'name'"));
    }
}
