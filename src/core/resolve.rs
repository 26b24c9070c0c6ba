//! Deferred references.
//!
//! A [`Resolver`] is an inert description of "the object matching this query
//! at provisioning time". It is interpreted against a live connection by
//! [`Resolver::evaluate`]: the chain is compiled into query stages, `Where`
//! steps fold into the current stage's predicate and each `Children` step
//! opens a new stage keyed on the parents found so far. One round trip per
//! stage.

use super::error::{ProvisionError, ResolutionError};
use super::types::{ObjectKind, RemoteRef};
use crate::transport::Connection;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Filter over remote objects of one kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    KeyEq(String),
    ParentEq(String),
    ParentIn(Vec<String>),
    PropertyEq {
        name: String,
        value: serde_yaml_ng::Value,
    },
    All(Vec<Predicate>),
}

impl Predicate {
    pub fn matches(&self, obj: &RemoteRef) -> bool {
        match self {
            Self::KeyEq(key) => obj.key.eq_ignore_ascii_case(key),
            Self::ParentEq(parent) => obj
                .parent
                .as_deref()
                .is_some_and(|p| p.eq_ignore_ascii_case(parent)),
            Self::ParentIn(parents) => obj
                .parent
                .as_deref()
                .is_some_and(|p| parents.iter().any(|x| x.eq_ignore_ascii_case(p))),
            Self::PropertyEq { name, value } => obj.properties.get(name) == Some(value),
            Self::All(preds) => preds.iter().all(|p| p.matches(obj)),
        }
    }

    /// Conjunction, flattening nested `All`s.
    pub fn and(self, other: Predicate) -> Predicate {
        let mut parts = match self {
            Self::All(parts) => parts,
            p => vec![p],
        };
        match other {
            Self::All(more) => parts.extend(more),
            p => parts.push(p),
        }
        Self::All(parts)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyEq(key) => write!(f, "key = {}", key),
            Self::ParentEq(parent) => write!(f, "parent = {}", parent),
            Self::ParentIn(parents) => write!(f, "parent in [{}]", parents.join(", ")),
            Self::PropertyEq { name, value } => {
                write!(f, "{} = {}", name, super::types::yaml_value_to_string(value))
            }
            Self::All(preds) => {
                let parts: Vec<String> = preds.iter().map(|p| p.to_string()).collect();
                write!(f, "{}", parts.join(" and "))
            }
        }
    }
}

/// Refinement applied to the current result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Keep only objects matching the predicate.
    Where(Predicate),
    /// Move to the objects of a kind owned by the current set.
    Children(ObjectKind),
}

/// Unevaluated query for exactly one remote object.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolver {
    ById { kind: ObjectKind, id: String },
    ByPredicate { kind: ObjectKind, predicate: Predicate },
    Chained { base: Box<Resolver>, step: Step },
}

/// One query round trip.
#[derive(Debug, Clone, PartialEq)]
struct Stage {
    kind: ObjectKind,
    predicate: Predicate,
}

impl Resolver {
    pub fn by_id(kind: ObjectKind, id: impl Into<String>) -> Self {
        Self::ById {
            kind,
            id: id.into(),
        }
    }

    pub fn by_predicate(kind: ObjectKind, predicate: Predicate) -> Self {
        Self::ByPredicate { kind, predicate }
    }

    /// Site field by GUID.
    pub fn field(id: Uuid) -> Self {
        Self::by_id(ObjectKind::Field, id.hyphenated().to_string())
    }

    /// New resolver that applies `step` to this one's result.
    pub fn chain(&self, step: Step) -> Self {
        Self::Chained {
            base: Box::new(self.clone()),
            step,
        }
    }

    /// Kind of object the resolver finally yields.
    pub fn target_kind(&self) -> ObjectKind {
        match self {
            Self::ById { kind, .. } | Self::ByPredicate { kind, .. } => *kind,
            Self::Chained { base, step } => match step {
                Step::Where(_) => base.target_kind(),
                Step::Children(kind) => *kind,
            },
        }
    }

    fn stages(&self) -> Vec<Stage> {
        match self {
            Self::ById { kind, id } => vec![Stage {
                kind: *kind,
                predicate: Predicate::KeyEq(id.clone()),
            }],
            Self::ByPredicate { kind, predicate } => vec![Stage {
                kind: *kind,
                predicate: predicate.clone(),
            }],
            Self::Chained { base, step } => {
                let mut stages = base.stages();
                match step {
                    Step::Where(pred) => {
                        if let Some(last) = stages.pop() {
                            stages.push(Stage {
                                kind: last.kind,
                                predicate: last.predicate.and(pred.clone()),
                            });
                        }
                    }
                    Step::Children(kind) => stages.push(Stage {
                        kind: *kind,
                        // filled with the previous stage's keys at evaluation
                        predicate: Predicate::All(Vec::new()),
                    }),
                }
                stages
            }
        }
    }

    /// Every object the resolver currently matches.
    pub async fn evaluate_all(
        &self,
        conn: &dyn Connection,
    ) -> Result<Vec<RemoteRef>, ProvisionError> {
        let mut current: Vec<RemoteRef> = Vec::new();
        for (i, stage) in self.stages().into_iter().enumerate() {
            let predicate = if i == 0 {
                stage.predicate
            } else {
                if current.is_empty() {
                    return Ok(current);
                }
                let parents = current.iter().map(|o| o.key.clone()).collect();
                Predicate::ParentIn(parents).and(stage.predicate)
            };
            current = conn.query(stage.kind, &predicate).await?;
        }
        Ok(current)
    }

    /// The single matching object. Zero or several matches is an error.
    pub async fn evaluate(&self, conn: &dyn Connection) -> Result<RemoteRef, ProvisionError> {
        match self.evaluate_optional(conn).await? {
            Some(obj) => Ok(obj),
            None => Err(ResolutionError::NotFound {
                resolver: self.to_string(),
            }
            .into()),
        }
    }

    /// Like [`evaluate`](Self::evaluate) but zero matches yields `None`.
    pub async fn evaluate_optional(
        &self,
        conn: &dyn Connection,
    ) -> Result<Option<RemoteRef>, ProvisionError> {
        let mut found = self.evaluate_all(conn).await?;
        match found.len() {
            0 => Ok(None),
            1 => Ok(found.pop()),
            count => Err(ResolutionError::Ambiguous {
                resolver: self.to_string(),
                count,
            }
            .into()),
        }
    }
}

impl fmt::Display for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ById { kind, id } => write!(f, "{}[key = {}]", kind, id),
            Self::ByPredicate { kind, predicate } => write!(f, "{}[{}]", kind, predicate),
            Self::Chained { base, step } => match step {
                Step::Where(pred) => write!(f, "{} where {}", base, pred),
                Step::Children(kind) => write!(f, "{} / {}", base, kind),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryStore;

    fn field(key: &str, name: &str) -> RemoteRef {
        RemoteRef::new(ObjectKind::Field, key).with_property("internal_name", name)
    }

    #[tokio::test]
    async fn test_resolve_by_id_single_match() {
        let store = MemoryStore::with_objects(vec![field("f1", "Title"), field("f2", "Body")]);
        let r = Resolver::by_id(ObjectKind::Field, "f2");
        let obj = r.evaluate(&store).await.unwrap();
        assert_eq!(obj.key, "f2");
        // evaluating again is safe and yields the same object
        assert_eq!(r.evaluate(&store).await.unwrap(), obj);
    }

    #[tokio::test]
    async fn test_resolve_not_found() {
        let store = MemoryStore::with_objects(vec![field("f1", "Title")]);
        let err = Resolver::by_id(ObjectKind::Field, "nope")
            .evaluate(&store)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Resolution(ResolutionError::NotFound { .. })
        ));
        assert!(err.to_string().contains("field[key = nope]"));
    }

    #[tokio::test]
    async fn test_resolve_ambiguous_never_guesses() {
        let store = MemoryStore::with_objects(vec![field("f1", "Dup"), field("f2", "Dup")]);
        let r = Resolver::by_predicate(
            ObjectKind::Field,
            Predicate::PropertyEq {
                name: "internal_name".into(),
                value: serde_yaml_ng::Value::String("Dup".into()),
            },
        );
        let err = r.evaluate(&store).await.unwrap_err();
        assert_eq!(
            err,
            ProvisionError::Resolution(ResolutionError::Ambiguous {
                resolver: r.to_string(),
                count: 2,
            })
        );
    }

    #[tokio::test]
    async fn test_resolve_optional_zero_is_none() {
        let store = MemoryStore::new();
        let r = Resolver::by_id(ObjectKind::Field, "f1");
        assert_eq!(r.evaluate_optional(&store).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_resolve_chain_children_then_where() {
        let store = MemoryStore::with_objects(vec![
            RemoteRef::new(ObjectKind::ContentType, "0x0101"),
            RemoteRef::new(ObjectKind::FieldLink, "f1")
                .with_parent("0x0101")
                .with_property("name", "Title"),
            RemoteRef::new(ObjectKind::FieldLink, "f2")
                .with_parent("0x0101")
                .with_property("name", "Body"),
            RemoteRef::new(ObjectKind::FieldLink, "f1")
                .with_parent("0x0102")
                .with_property("name", "Title"),
        ]);
        let r = Resolver::by_id(ObjectKind::ContentType, "0x0101")
            .chain(Step::Children(ObjectKind::FieldLink))
            .chain(Step::Where(Predicate::KeyEq("f1".into())));
        assert_eq!(r.target_kind(), ObjectKind::FieldLink);

        let obj = r.evaluate(&store).await.unwrap();
        assert_eq!(obj.parent.as_deref(), Some("0x0101"));
        assert_eq!(obj.property_str("name"), Some("Title"));
        // one query for the content type, one for its links
        assert_eq!(store.stats().await.queries, 2);
    }

    #[tokio::test]
    async fn test_resolve_chain_stops_on_empty_stage() {
        let store = MemoryStore::new();
        let r = Resolver::by_id(ObjectKind::ContentType, "0x0101")
            .chain(Step::Children(ObjectKind::FieldLink));
        assert!(r.evaluate_all(&store).await.unwrap().is_empty());
        assert_eq!(store.stats().await.queries, 1);
    }

    #[test]
    fn test_resolve_chain_is_immutable() {
        let base = Resolver::by_id(ObjectKind::ContentType, "0x01");
        let chained = base.chain(Step::Children(ObjectKind::FieldLink));
        assert_eq!(base, Resolver::by_id(ObjectKind::ContentType, "0x01"));
        assert_eq!(base.target_kind(), ObjectKind::ContentType);
        assert_eq!(chained.to_string(), "content_type[key = 0x01] / field_link");
    }

    #[test]
    fn test_resolve_where_folds_into_stage() {
        let r = Resolver::by_id(ObjectKind::Field, "f1").chain(Step::Where(
            Predicate::ParentEq("x".into()),
        ));
        let stages = r.stages();
        assert_eq!(stages.len(), 1);
        assert_eq!(
            stages[0].predicate,
            Predicate::All(vec![
                Predicate::KeyEq("f1".into()),
                Predicate::ParentEq("x".into())
            ])
        );
    }

    #[test]
    fn test_resolve_predicate_matches() {
        let obj = RemoteRef::new(ObjectKind::FieldLink, "ABC")
            .with_parent("0x01")
            .with_property("name", "Title");
        assert!(Predicate::KeyEq("abc".into()).matches(&obj));
        assert!(Predicate::ParentIn(vec!["0x02".into(), "0x01".into()]).matches(&obj));
        assert!(!Predicate::ParentEq("0x02".into()).matches(&obj));
        assert!(Predicate::All(vec![]).matches(&obj));
    }

    #[test]
    fn test_resolve_step_yaml() {
        let yaml = r#"
- children: field_link
- where: { key_eq: abc }
"#;
        let steps: Vec<Step> = serde_yaml_ng::with::singleton_map_recursive::deserialize(
            serde_yaml_ng::Deserializer::from_str(yaml),
        )
        .unwrap();
        assert_eq!(steps[0], Step::Children(ObjectKind::FieldLink));
        assert_eq!(steps[1], Step::Where(Predicate::KeyEq("abc".into())));
    }
}
