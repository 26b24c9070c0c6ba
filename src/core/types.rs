//! Shared types: object kinds, remote references, policy, manifest schema and
//! provisioning events.
//!
//! Manifest types derive Serialize/Deserialize for YAML roundtripping.

use super::resolve::Step;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Property bag of a remote object or create request.
pub type Properties = IndexMap<String, serde_yaml_ng::Value>;

// ============================================================================
// Remote objects
// ============================================================================

/// Kind of remote object the store knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    ContentType,
    Field,
    FieldLink,
}

impl ObjectKind {
    /// Property that carries the human-facing name for this kind.
    pub fn name_property(self) -> &'static str {
        match self {
            Self::ContentType => "name",
            Self::Field => "internal_name",
            Self::FieldLink => "name",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContentType => write!(f, "content_type"),
            Self::Field => write!(f, "field"),
            Self::FieldLink => write!(f, "field_link"),
        }
    }
}

/// Snapshot of a remote object, as returned by a query or a create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRef {
    pub kind: ObjectKind,

    /// Natural key: canonical content type id, field GUID, or linked field GUID
    pub key: String,

    /// Key of the owning object (field links belong to a content type)
    #[serde(default)]
    pub parent: Option<String>,

    #[serde(default)]
    pub properties: Properties,
}

impl RemoteRef {
    pub fn new(kind: ObjectKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
            parent: None,
            properties: Properties::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_property(mut self, name: &str, value: impl Into<String>) -> Self {
        self.properties
            .insert(name.to_string(), serde_yaml_ng::Value::String(value.into()));
        self
    }

    /// String value of a property, if present and a scalar.
    pub fn property_str(&self, name: &str) -> Option<&str> {
        match self.properties.get(name) {
            Some(serde_yaml_ng::Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }
}

// ============================================================================
// Policy
// ============================================================================

/// Execution policy for a provisioning run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Failure handling
    #[serde(default)]
    pub failure: FailurePolicy,

    /// What to do when a create races with an external create
    #[serde(default)]
    pub conflict: ConflictPolicy,

    /// Append provisioning events to the JSONL log
    #[serde(default = "default_true")]
    pub event_log: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            failure: FailurePolicy::default(),
            conflict: ConflictPolicy::default(),
            event_log: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Failure handling strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    StopOnFirst,
    /// Skip the failed subtree and keep provisioning its siblings.
    ContinueIndependent,
}

/// Handling of an object that appeared between the existence check and the
/// flush of its create.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    #[default]
    Fail,
    /// Query once more and report the object as found.
    Recheck,
}

// ============================================================================
// Manifest (YAML)
// ============================================================================

/// Root manifest: the desired state of a site's content types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Schema version (must be "1.0")
    pub version: String,

    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Ambient defaults pushed before any node runs
    #[serde(default)]
    pub defaults: AmbientDefaults,

    #[serde(default)]
    pub policy: Policy,

    /// Top-level declarations, provisioned in order
    #[serde(default)]
    pub nodes: Vec<NodeDecl>,
}

/// Group defaults a manifest or a node hands down to its descendants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmbientDefaults {
    #[serde(default)]
    pub content_type_group: Option<String>,

    #[serde(default)]
    pub field_group: Option<String>,
}

impl AmbientDefaults {
    pub fn is_empty(&self) -> bool {
        self.content_type_group.is_none() && self.field_group.is_none()
    }
}

/// One declared object in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDecl {
    #[serde(rename = "type")]
    pub kind: ObjectKind,

    /// Content type id (absolute or relative) or field GUID
    #[serde(default)]
    pub id: Option<String>,

    /// Deferred references, keyed by property name
    #[serde(default)]
    pub refs: IndexMap<String, ReferenceDecl>,

    #[serde(default)]
    pub defaults: AmbientDefaults,

    #[serde(default)]
    pub children: Vec<NodeDecl>,

    /// Every other key is a literal property
    #[serde(flatten)]
    pub properties: IndexMap<String, serde_yaml_ng::Value>,
}

/// A deferred reference as written in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceDecl {
    pub kind: ObjectKind,

    #[serde(default)]
    pub id: Option<String>,

    /// Match on the kind's name property instead of the key
    #[serde(default)]
    pub name: Option<String>,

    /// Written as single-key maps, e.g. `- children: field_link`
    #[serde(default, with = "serde_yaml_ng::with::singleton_map_recursive")]
    pub then: Vec<Step>,

    /// Zero matches leaves the property unset instead of failing
    #[serde(default)]
    pub optional: bool,
}

// ============================================================================
// Provisioning events
// ============================================================================

/// Event written to the JSONL provisioning log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvisionEvent {
    RunStarted {
        run_id: String,
        roots: usize,
        ctforge_version: String,
    },
    NodeFound {
        run_id: String,
        kind: ObjectKind,
        key: String,
    },
    NodeCreated {
        run_id: String,
        kind: ObjectKind,
        key: String,
        duration_seconds: f64,
    },
    NodeFailed {
        run_id: String,
        kind: ObjectKind,
        node: String,
        error: String,
    },
    RunCompleted {
        run_id: String,
        created: u32,
        found: u32,
        failed: u32,
        total_seconds: f64,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvisionEvent,
}

/// Render a YAML scalar as a plain string.
pub fn yaml_value_to_string(val: &serde_yaml_ng::Value) -> String {
    match val {
        serde_yaml_ng::Value::String(s) => s.clone(),
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        serde_yaml_ng::Value::Null => String::new(),
        other => format!("{:?}", other),
    }
}
