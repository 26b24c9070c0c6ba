//! Run-scoped context stack.
//!
//! Ancestors push typed values (default groups, the resolved parent object)
//! and descendants read the most recent value of a type. Every push is
//! undone by releasing a [`StackMark`] taken before it, which pops the entry
//! together with everything pushed after it.

use super::id::ContentTypeId;
use super::types::{AmbientDefaults, RemoteRef};
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// Group given to content types that do not declare one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultContentTypeGroup(pub String);

/// Group given to fields that do not declare one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultFieldGroup(pub String);

/// Remote object provisioned by the nearest ancestor node.
#[derive(Debug, Clone, PartialEq)]
pub struct ParentObject(pub RemoteRef);

/// Id of the nearest ancestor content type; relative ids are appended to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentContentTypeId(pub ContentTypeId);

struct Entry {
    tag: TypeId,
    name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

/// Depth of the stack at the time the mark was taken.
#[must_use = "an unreleased mark leaks its entries into sibling subtrees"]
#[derive(Debug, PartialEq, Eq)]
pub struct StackMark {
    depth: usize,
}

/// LIFO stack of typed values.
#[derive(Default)]
pub struct ContextStack {
    entries: Vec<Entry>,
}

impl ContextStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the current depth without pushing.
    pub fn mark(&self) -> StackMark {
        StackMark {
            depth: self.entries.len(),
        }
    }

    /// Push a value. The returned mark releases this value and anything
    /// pushed after it.
    pub fn push<T: Any + Send + Sync>(&mut self, value: T) -> StackMark {
        let mark = self.mark();
        self.entries.push(Entry {
            tag: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            value: Arc::new(value),
        });
        mark
    }

    /// Most recently pushed value of type `T`.
    pub fn try_get<T: Any + Send + Sync>(&self) -> Option<&T> {
        let tag = TypeId::of::<T>();
        self.entries
            .iter()
            .rev()
            .find(|e| e.tag == tag)
            .and_then(|e| e.value.downcast_ref::<T>())
    }

    /// Pop everything pushed at or after `mark`. A mark already covered by
    /// an earlier release is a no-op.
    pub fn release_all(&mut self, mark: StackMark) {
        self.entries.truncate(mark.depth);
    }

    /// Push every group default that is set.
    pub fn push_defaults(&mut self, defaults: &AmbientDefaults) -> StackMark {
        let mark = self.mark();
        if let Some(ref group) = defaults.content_type_group {
            let _ = self.push(DefaultContentTypeGroup(group.clone()));
        }
        if let Some(ref group) = defaults.field_group {
            let _ = self.push(DefaultFieldGroup(group.clone()));
        }
        mark
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ContextStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| e.name))
            .finish()
    }
}
