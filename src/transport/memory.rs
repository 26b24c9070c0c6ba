//! In-process remote store.
//!
//! Holds objects in insertion order and interprets predicates directly.
//! Creates are queued and applied atomically by `execute_batch`. Counters and
//! a couple of fault hooks make it usable as a test double.

use super::{Connection, CreateRequest};
use crate::core::error::RemoteError;
use crate::core::resolve::Predicate;
use crate::core::types::{ObjectKind, RemoteRef};
use async_trait::async_trait;
use tokio::sync::Mutex;

/// Call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub queries: u32,
    pub creates: u32,
    pub batches: u32,
}

#[derive(Debug, Default)]
struct Inner {
    objects: Vec<RemoteRef>,
    pending: Vec<RemoteRef>,
    hidden: Vec<(ObjectKind, String)>,
    fail_next: Option<RemoteError>,
    stats: StoreStats,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

fn same_object(a: &RemoteRef, b: &RemoteRef) -> bool {
    a.kind == b.kind
        && a.key.eq_ignore_ascii_case(&b.key)
        && match (&a.parent, &b.parent) {
            (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
            (None, None) => true,
            _ => false,
        }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_objects(objects: Vec<RemoteRef>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                objects,
                ..Inner::default()
            }),
        }
    }

    /// Insert an object directly, as if someone else created it.
    pub async fn insert(&self, obj: RemoteRef) {
        self.inner.lock().await.objects.push(obj);
    }

    /// Committed objects, in creation order.
    pub async fn objects(&self) -> Vec<RemoteRef> {
        self.inner.lock().await.objects.clone()
    }

    pub async fn find(&self, kind: ObjectKind, key: &str) -> Option<RemoteRef> {
        self.inner
            .lock()
            .await
            .objects
            .iter()
            .find(|o| o.kind == kind && o.key.eq_ignore_ascii_case(key))
            .cloned()
    }

    /// Creates queued since the last flush.
    pub async fn pending(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    pub async fn stats(&self) -> StoreStats {
        self.inner.lock().await.stats
    }

    /// Leave the object out of the next query that would match it. Simulates
    /// a create racing with the existence check.
    pub async fn hide_from_next_query(&self, kind: ObjectKind, key: &str) {
        self.inner
            .lock()
            .await
            .hidden
            .push((kind, key.to_string()));
    }

    /// Fail the next call of any kind with `err`.
    pub async fn fail_next_call(&self, err: RemoteError) {
        self.inner.lock().await.fail_next = Some(err);
    }
}

#[async_trait]
impl Connection for MemoryStore {
    async fn query(
        &self,
        kind: ObjectKind,
        predicate: &Predicate,
    ) -> Result<Vec<RemoteRef>, RemoteError> {
        let mut inner = self.inner.lock().await;
        inner.stats.queries += 1;
        if let Some(err) = inner.fail_next.take() {
            return Err(err);
        }

        let mut found: Vec<RemoteRef> = inner
            .objects
            .iter()
            .filter(|o| o.kind == kind && predicate.matches(o))
            .cloned()
            .collect();

        let Inner { hidden, .. } = &mut *inner;
        found.retain(|o| {
            match hidden
                .iter()
                .position(|(k, key)| *k == o.kind && key.eq_ignore_ascii_case(&o.key))
            {
                Some(pos) => {
                    hidden.remove(pos);
                    false
                }
                None => true,
            }
        });

        tracing::trace!(%kind, %predicate, matches = found.len(), "memory query");
        Ok(found)
    }

    async fn create(
        &self,
        kind: ObjectKind,
        request: CreateRequest,
    ) -> Result<RemoteRef, RemoteError> {
        let mut inner = self.inner.lock().await;
        inner.stats.creates += 1;
        if let Some(err) = inner.fail_next.take() {
            return Err(err);
        }
        let obj = RemoteRef {
            kind,
            key: request.key,
            parent: request.parent,
            properties: request.properties,
        };
        inner.pending.push(obj.clone());
        Ok(obj)
    }

    async fn execute_batch(&self) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock().await;
        inner.stats.batches += 1;
        let pending = std::mem::take(&mut inner.pending);
        if let Some(err) = inner.fail_next.take() {
            return Err(err);
        }

        for (i, obj) in pending.iter().enumerate() {
            let clash = inner.objects.iter().any(|o| same_object(o, obj))
                || pending[..i].iter().any(|o| same_object(o, obj));
            if clash {
                return Err(RemoteError::AlreadyExists {
                    kind: obj.kind,
                    key: obj.key.clone(),
                });
            }
        }

        tracing::trace!(applied = pending.len(), "memory batch");
        inner.objects.extend(pending);
        Ok(())
    }

    async fn discard_batch(&self) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock().await;
        let dropped = std::mem::take(&mut inner.pending);
        tracing::trace!(dropped = dropped.len(), "memory batch discarded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Properties;

    fn request(key: &str) -> CreateRequest {
        CreateRequest {
            key: key.to_string(),
            parent: None,
            properties: Properties::new(),
        }
    }

    #[tokio::test]
    async fn test_memory_create_invisible_until_flush() {
        let store = MemoryStore::new();
        let created = store
            .create(ObjectKind::Field, request("f1"))
            .await
            .unwrap();
        assert_eq!(created.key, "f1");
        let q = Predicate::KeyEq("f1".into());
        assert!(store.query(ObjectKind::Field, &q).await.unwrap().is_empty());

        store.execute_batch().await.unwrap();
        assert_eq!(store.query(ObjectKind::Field, &q).await.unwrap().len(), 1);
        assert_eq!(
            store.stats().await,
            StoreStats {
                queries: 2,
                creates: 1,
                batches: 1
            }
        );
    }

    #[tokio::test]
    async fn test_memory_discard_drops_queue() {
        let store = MemoryStore::new();
        store.create(ObjectKind::Field, request("f1")).await.unwrap();
        assert_eq!(store.pending().await, 1);
        store.discard_batch().await.unwrap();
        assert_eq!(store.pending().await, 0);
        store.execute_batch().await.unwrap();
        assert!(store.objects().await.is_empty());
    }

    #[tokio::test]
    async fn test_memory_batch_rejects_existing_key() {
        let store = MemoryStore::with_objects(vec![RemoteRef::new(ObjectKind::Field, "F1")]);
        store.create(ObjectKind::Field, request("f1")).await.unwrap();
        let err = store.execute_batch().await.unwrap_err();
        assert_eq!(
            err,
            RemoteError::AlreadyExists {
                kind: ObjectKind::Field,
                key: "f1".into()
            }
        );
        // the failed batch is discarded as a whole
        assert_eq!(store.objects().await.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_same_key_under_other_parent_is_distinct() {
        let store = MemoryStore::with_objects(vec![
            RemoteRef::new(ObjectKind::FieldLink, "f1").with_parent("0x0101"),
        ]);
        let mut req = request("f1");
        req.parent = Some("0x0102".into());
        store.create(ObjectKind::FieldLink, req).await.unwrap();
        store.execute_batch().await.unwrap();
        assert_eq!(store.objects().await.len(), 2);
    }

    #[tokio::test]
    async fn test_memory_hide_from_next_query() {
        let store = MemoryStore::with_objects(vec![RemoteRef::new(ObjectKind::ContentType, "0x01")]);
        store.hide_from_next_query(ObjectKind::ContentType, "0x01").await;
        let q = Predicate::KeyEq("0x01".into());
        assert!(store.query(ObjectKind::ContentType, &q).await.unwrap().is_empty());
        assert_eq!(store.query(ObjectKind::ContentType, &q).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_fail_next_call() {
        let store = MemoryStore::new();
        store
            .fail_next_call(RemoteError::Unavailable("503".into()))
            .await;
        let err = store
            .query(ObjectKind::Field, &Predicate::All(vec![]))
            .await
            .unwrap_err();
        assert_eq!(err, RemoteError::Unavailable("503".into()));
        assert!(store
            .query(ObjectKind::Field, &Predicate::All(vec![]))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_memory_find() {
        let store = MemoryStore::with_objects(vec![
            RemoteRef::new(ObjectKind::ContentType, "0x0101").with_property("name", "Document"),
        ]);
        let found = store.find(ObjectKind::ContentType, "0x0101").await.unwrap();
        assert_eq!(found.property_str("name"), Some("Document"));
        assert!(store.find(ObjectKind::Field, "0x0101").await.is_none());
    }
}
