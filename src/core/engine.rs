//! Provisioning engine. Walks a node tree against a connection.
//!
//! For every node: evaluate deferred properties, compute the lookup target,
//! query existence, create on a miss, bind the result into the context stack
//! and recurse into children. Everything a node pushes is released before
//! the engine returns from it, on success and on failure.

use super::context::{ContextStack, ParentContentTypeId, ParentObject};
use super::error::{NodeError, ProvisionError, RemoteError, ResolutionError};
use super::eventlog;
use super::id::ContentTypeId;
use super::node::{Node, NodeHandle, NodeTree, PropertyValue};
use super::types::{ConflictPolicy, FailurePolicy, ObjectKind, Policy, ProvisionEvent, RemoteRef};
use crate::resources::{self, ResolvedProperties, ResolvedValue, Target};
use crate::transport::{CancelSignal, Cancellable, Connection};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Instant;
use thiserror::Error;

/// Outcome of one provisioned node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeResult {
    pub handle: NodeHandle,
    pub object: RemoteRef,
    pub created: bool,
}

/// Per-node results in completion order, plus recorded failures.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProvisionReport {
    pub results: Vec<NodeResult>,
    pub failures: Vec<NodeError>,
}

impl ProvisionReport {
    /// Most recent result of the given kind.
    pub fn last_of(&self, kind: ObjectKind) -> Option<&NodeResult> {
        self.results.iter().rev().find(|r| r.object.kind == kind)
    }

    /// Most recent result for `handle`. A node shared by several parents has
    /// one result per visit.
    pub fn for_node(&self, handle: NodeHandle) -> Option<&NodeResult> {
        self.results.iter().rev().find(|r| r.handle == handle)
    }

    pub fn created_count(&self) -> usize {
        self.results.iter().filter(|r| r.created).count()
    }

    pub fn found_count(&self) -> usize {
        self.results.iter().filter(|r| !r.created).count()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run aborted by a node failure; carries what was done before it.
#[derive(Debug, Clone, Error)]
#[error("provisioning aborted: {error}")]
pub struct RunFailure {
    #[source]
    pub error: NodeError,
    pub report: ProvisionReport,
}

/// Lifecycle of a single node within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unresolved,
    Resolving,
    Found,
    Creating,
    Created,
    ChildrenInProgress,
    Done,
    Failed,
}

impl NodeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn can_transition(self, next: NodeState) -> bool {
        use NodeState::*;
        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Unresolved, Resolving)
                | (Resolving, Found)
                | (Resolving, Creating)
                | (Creating, Created)
                | (Creating, Found)
                | (Found, ChildrenInProgress)
                | (Created, ChildrenInProgress)
                | (ChildrenInProgress, Done)
        )
    }
}

/// State and label of the node being provisioned.
struct NodeRun {
    kind: ObjectKind,
    label: String,
    state: NodeState,
}

impl NodeRun {
    fn new(node: &Node) -> Self {
        Self {
            kind: node.kind(),
            label: node.label(),
            state: NodeState::Unresolved,
        }
    }

    fn advance(&mut self, next: NodeState) -> Result<(), ProvisionError> {
        if !self.state.can_transition(next) {
            return Err(ProvisionError::Invalid(format!(
                "illegal state transition {:?} -> {:?}",
                self.state, next
            )));
        }
        tracing::trace!(kind = %self.kind, node = %self.label, from = ?self.state, to = ?next, "node state");
        self.state = next;
        Ok(())
    }

    /// A descendant failed and the run stops here.
    fn abandon(&mut self) {
        tracing::trace!(kind = %self.kind, node = %self.label, "subtree failed");
        self.state = NodeState::Failed;
    }

    fn fail(&mut self, source: ProvisionError) -> NodeError {
        tracing::trace!(kind = %self.kind, node = %self.label, from = ?self.state, "node failed");
        self.state = NodeState::Failed;
        NodeError {
            kind: self.kind,
            node: self.label.clone(),
            source,
        }
    }
}

/// What the existence check and create produced for a node.
struct Reconciled {
    object: RemoteRef,
    created: bool,
    content_type_id: Option<ContentTypeId>,
}

type VisitFuture<'s> = Pin<Box<dyn Future<Output = Result<(), NodeError>> + Send + 's>>;

/// Provisioning engine bound to one connection.
pub struct Engine<'a> {
    conn: &'a dyn Connection,
    policy: Policy,
    cancel: CancelSignal,
    event_dir: Option<PathBuf>,
    run_id: String,
}

impl<'a> Engine<'a> {
    pub fn new(conn: &'a dyn Connection) -> Self {
        Self {
            conn,
            policy: Policy::default(),
            cancel: CancelSignal::never(),
            event_dir: None,
            run_id: eventlog::generate_run_id(),
        }
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cancel(mut self, signal: CancelSignal) -> Self {
        self.cancel = signal;
        self
    }

    /// Append run events to `dir/events.jsonl` when the policy allows it.
    pub fn with_event_log(mut self, dir: &Path) -> Self {
        self.event_dir = Some(dir.to_path_buf());
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Provision `root` and its subtree.
    pub async fn provision(
        &self,
        tree: &NodeTree,
        root: NodeHandle,
        stack: &mut ContextStack,
    ) -> Result<ProvisionReport, RunFailure> {
        self.provision_all(tree, &[root], stack).await
    }

    /// Provision several roots in order, as one run. Handles that are not in
    /// `tree` are skipped.
    pub async fn provision_all(
        &self,
        tree: &NodeTree,
        roots: &[NodeHandle],
        stack: &mut ContextStack,
    ) -> Result<ProvisionReport, RunFailure> {
        let start = Instant::now();
        let conn = Cancellable::new(self.conn, &self.cancel);
        let mut report = ProvisionReport::default();

        tracing::info!(run_id = %self.run_id, roots = roots.len(), "provisioning started");
        self.record(ProvisionEvent::RunStarted {
            run_id: self.run_id.clone(),
            roots: roots.len(),
            ctforge_version: env!("CARGO_PKG_VERSION").to_string(),
        });

        let mut aborted = None;
        for &root in roots {
            let Some(node) = tree.get(root) else {
                tracing::warn!(handle = root.index(), "skipping unknown root handle");
                continue;
            };
            if let Err(err) = self.visit(&conn, tree, root, node, stack, &mut report).await {
                if self.stops_on(&err) {
                    aborted = Some(err);
                    break;
                }
            }
        }

        let total = start.elapsed().as_secs_f64();
        self.record(ProvisionEvent::RunCompleted {
            run_id: self.run_id.clone(),
            created: report.created_count() as u32,
            found: report.found_count() as u32,
            failed: report.failures.len() as u32,
            total_seconds: total,
        });

        match aborted {
            Some(error) => {
                tracing::warn!(run_id = %self.run_id, %error, "provisioning aborted");
                Err(RunFailure { error, report })
            }
            None => {
                tracing::info!(
                    run_id = %self.run_id,
                    created = report.created_count(),
                    found = report.found_count(),
                    failed = report.failures.len(),
                    seconds = total,
                    "provisioning finished"
                );
                Ok(report)
            }
        }
    }

    fn stops_on(&self, err: &NodeError) -> bool {
        err.is_cancelled() || self.policy.failure == FailurePolicy::StopOnFirst
    }

    fn visit<'s>(
        &'s self,
        conn: &'s dyn Connection,
        tree: &'s NodeTree,
        handle: NodeHandle,
        node: &'s Node,
        stack: &'s mut ContextStack,
        report: &'s mut ProvisionReport,
    ) -> VisitFuture<'s> {
        Box::pin(async move {
            let mark = stack.mark();
            let outcome = async {
                let started = Instant::now();
                let mut run = NodeRun::new(node);

                let done = match self.reconcile(conn, node, stack, &mut run).await {
                    Ok(done) => done,
                    Err(source) => {
                        let err = run.fail(source);
                        self.record_failure(&err);
                        report.failures.push(err.clone());
                        return Err(err);
                    }
                };
                self.record_result(&done, started);
                report.results.push(NodeResult {
                    handle,
                    object: done.object.clone(),
                    created: done.created,
                });

                let _ = stack.push(ParentObject(done.object));
                if let Some(id) = done.content_type_id {
                    let _ = stack.push(ParentContentTypeId(id));
                }
                let _ = stack.push_defaults(node.defaults());

                if let Err(source) = run.advance(NodeState::ChildrenInProgress) {
                    return Err(run.fail(source));
                }
                for &child in tree.children(handle) {
                    let Some(child_node) = tree.get(child) else {
                        continue;
                    };
                    if let Err(err) = self
                        .visit(conn, tree, child, child_node, stack, report)
                        .await
                    {
                        if self.stops_on(&err) {
                            run.abandon();
                            return Err(err);
                        }
                    }
                }
                run.advance(NodeState::Done).map_err(|source| run.fail(source))
            }
            .await;
            stack.release_all(mark);
            outcome
        })
    }

    /// Resolve, look up and create a single node.
    async fn reconcile(
        &self,
        conn: &dyn Connection,
        node: &Node,
        stack: &ContextStack,
        run: &mut NodeRun,
    ) -> Result<Reconciled, ProvisionError> {
        run.advance(NodeState::Resolving)?;
        let resolved = resolve_properties(conn, node).await?;
        let target = resources::target(node, &resolved, stack)?;
        run.label = target.key.clone();

        if let Some(object) = lookup(conn, &target).await? {
            run.advance(NodeState::Found)?;
            tracing::debug!(kind = %target.kind, key = %target.key, "found");
            return Ok(Reconciled {
                object,
                created: false,
                content_type_id: target.content_type_id,
            });
        }

        run.advance(NodeState::Creating)?;
        let request = resources::create_request(node, &target, &resolved, stack)?;
        let flushed = match conn.create(target.kind, request).await {
            Ok(object) => conn.execute_batch().await.map(|()| object),
            Err(err) => Err(err),
        };
        if flushed.is_err() {
            // nothing from a failed node may be committed by a later flush
            if let Err(err) = conn.discard_batch().await {
                tracing::warn!(kind = %target.kind, key = %target.key, error = %err, "could not discard queued create");
            }
        }
        match flushed {
            Ok(object) => {
                run.advance(NodeState::Created)?;
                tracing::info!(kind = %target.kind, key = %target.key, "created");
                Ok(Reconciled {
                    object,
                    created: true,
                    content_type_id: target.content_type_id,
                })
            }
            Err(RemoteError::AlreadyExists { .. }) => {
                let existing = match self.policy.conflict {
                    ConflictPolicy::Fail => None,
                    ConflictPolicy::Recheck => lookup(conn, &target).await?,
                };
                let Some(object) = existing else {
                    return Err(ProvisionError::AlreadyExistsConflict {
                        kind: target.kind,
                        key: target.key,
                    });
                };
                tracing::warn!(kind = %target.kind, key = %target.key, "created concurrently, using existing object");
                run.advance(NodeState::Found)?;
                Ok(Reconciled {
                    object,
                    created: false,
                    content_type_id: target.content_type_id,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    fn record_result(&self, done: &Reconciled, started: Instant) {
        let event = if done.created {
            ProvisionEvent::NodeCreated {
                run_id: self.run_id.clone(),
                kind: done.object.kind,
                key: done.object.key.clone(),
                duration_seconds: started.elapsed().as_secs_f64(),
            }
        } else {
            ProvisionEvent::NodeFound {
                run_id: self.run_id.clone(),
                kind: done.object.kind,
                key: done.object.key.clone(),
            }
        };
        self.record(event);
    }

    fn record_failure(&self, err: &NodeError) {
        tracing::warn!(kind = %err.kind, node = %err.node, error = %err.source, "node failed");
        self.record(ProvisionEvent::NodeFailed {
            run_id: self.run_id.clone(),
            kind: err.kind,
            node: err.node.clone(),
            error: err.source.to_string(),
        });
    }

    fn record(&self, event: ProvisionEvent) {
        if !self.policy.event_log {
            return;
        }
        if let Some(ref dir) = self.event_dir {
            if let Err(e) = eventlog::append_event(dir, event) {
                tracing::warn!(error = %e, "cannot write event log");
            }
        }
    }
}

/// Evaluate every deferred property of `node`, in declaration order.
async fn resolve_properties(
    conn: &dyn Connection,
    node: &Node,
) -> Result<ResolvedProperties, ProvisionError> {
    let mut resolved = ResolvedProperties::new();
    for (name, value) in node.properties() {
        let value = match value {
            PropertyValue::Literal(v) => ResolvedValue::Literal(v.clone()),
            PropertyValue::Deferred {
                resolver,
                optional: false,
            } => ResolvedValue::Object(resolver.evaluate(conn).await?),
            PropertyValue::Deferred {
                resolver,
                optional: true,
            } => match resolver.evaluate_optional(conn).await? {
                Some(obj) => ResolvedValue::Object(obj),
                None => ResolvedValue::Unset,
            },
        };
        resolved.insert(name.clone(), value);
    }
    Ok(resolved)
}

/// The object at `target`, if any. Several matches is an error.
async fn lookup(conn: &dyn Connection, target: &Target) -> Result<Option<RemoteRef>, ProvisionError> {
    let predicate = target.existence_predicate();
    let mut found = conn.query(target.kind, &predicate).await?;
    match found.len() {
        0 | 1 => Ok(found.pop()),
        count => Err(ResolutionError::Ambiguous {
            resolver: format!("{}[{}]", target.kind, predicate),
            count,
        }
        .into()),
    }
}
