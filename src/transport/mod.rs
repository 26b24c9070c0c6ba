//! Transport abstraction: the query/create/execute-batch capability the
//! engine needs from a remote store, plus in-process implementations.

pub mod file;
pub mod memory;

use crate::core::error::RemoteError;
use crate::core::resolve::Predicate;
use crate::core::types::{ObjectKind, Properties, RemoteRef};
use async_trait::async_trait;
use std::future::Future;
use tokio::sync::watch;

/// Object to create, fully resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateRequest {
    pub key: String,
    pub parent: Option<String>,
    pub properties: Properties,
}

/// Connection to a remote store.
///
/// `create` only queues; nothing is visible to `query` until
/// `execute_batch` flushes the queue. `discard_batch` drops whatever is
/// still queued.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn query(
        &self,
        kind: ObjectKind,
        predicate: &Predicate,
    ) -> Result<Vec<RemoteRef>, RemoteError>;

    async fn create(
        &self,
        kind: ObjectKind,
        request: CreateRequest,
    ) -> Result<RemoteRef, RemoteError>;

    async fn execute_batch(&self) -> Result<(), RemoteError>;

    async fn discard_batch(&self) -> Result<(), RemoteError>;
}

/// Run-scoped cancellation flag, observed before every remote call.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

/// Trigger side of a [`CancelSignal`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CancelSignal {
    pub fn pair() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelSignal { rx })
    }

    /// A signal nobody can trigger.
    pub fn never() -> Self {
        Self::pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Completes once the signal fires. Pends forever if the handle is
    /// dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::never()
    }
}

/// Connection wrapper that fails every call once the run is cancelled.
///
/// Queries and creates still in flight when the signal fires are dropped.
/// A flush that has started runs to completion, since abandoning it would
/// leave the remote state unknown. Discarding is always passed through.
pub struct Cancellable<'a> {
    inner: &'a dyn Connection,
    signal: &'a CancelSignal,
}

impl<'a> Cancellable<'a> {
    pub fn new(inner: &'a dyn Connection, signal: &'a CancelSignal) -> Self {
        Self { inner, signal }
    }

    fn check(&self) -> Result<(), RemoteError> {
        if self.signal.is_cancelled() {
            Err(RemoteError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn interruptible<T>(
        &self,
        call: impl Future<Output = Result<T, RemoteError>> + Send,
    ) -> Result<T, RemoteError> {
        self.check()?;
        tokio::select! {
            biased;
            () = self.signal.cancelled() => Err(RemoteError::Cancelled),
            result = call => result,
        }
    }
}

#[async_trait]
impl Connection for Cancellable<'_> {
    async fn query(
        &self,
        kind: ObjectKind,
        predicate: &Predicate,
    ) -> Result<Vec<RemoteRef>, RemoteError> {
        self.interruptible(self.inner.query(kind, predicate)).await
    }

    async fn create(
        &self,
        kind: ObjectKind,
        request: CreateRequest,
    ) -> Result<RemoteRef, RemoteError> {
        self.interruptible(self.inner.create(kind, request)).await
    }

    async fn execute_batch(&self) -> Result<(), RemoteError> {
        self.check()?;
        self.inner.execute_batch().await
    }

    async fn discard_batch(&self) -> Result<(), RemoteError> {
        self.inner.discard_batch().await
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryStore;
    use super::*;

    #[test]
    fn test_transport_cancel_signal() {
        let (handle, signal) = CancelSignal::pair();
        let copy = signal.clone();
        assert!(!signal.is_cancelled());
        handle.cancel();
        assert!(signal.is_cancelled());
        assert!(copy.is_cancelled());
        assert!(!CancelSignal::never().is_cancelled());
    }

    #[tokio::test]
    async fn test_transport_cancellable_blocks_calls() {
        let store = MemoryStore::with_objects(vec![RemoteRef::new(ObjectKind::ContentType, "0x01")]);
        let (handle, signal) = CancelSignal::pair();
        let conn = Cancellable::new(&store, &signal);

        let found = conn
            .query(ObjectKind::ContentType, &Predicate::KeyEq("0x01".into()))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        handle.cancel();
        let err = conn
            .query(ObjectKind::ContentType, &Predicate::KeyEq("0x01".into()))
            .await
            .unwrap_err();
        assert_eq!(err, RemoteError::Cancelled);
        assert_eq!(conn.execute_batch().await.unwrap_err(), RemoteError::Cancelled);
        // the cancelled calls never reached the store
        assert_eq!(store.stats().await.queries, 1);
        assert_eq!(store.stats().await.batches, 0);
    }

    /// Never answers; only cancellation can end a call.
    struct Stalled;

    #[async_trait]
    impl Connection for Stalled {
        async fn query(
            &self,
            _kind: ObjectKind,
            _predicate: &Predicate,
        ) -> Result<Vec<RemoteRef>, RemoteError> {
            std::future::pending::<Result<Vec<RemoteRef>, RemoteError>>().await
        }

        async fn create(
            &self,
            _kind: ObjectKind,
            _request: CreateRequest,
        ) -> Result<RemoteRef, RemoteError> {
            std::future::pending::<Result<RemoteRef, RemoteError>>().await
        }

        async fn execute_batch(&self) -> Result<(), RemoteError> {
            Ok(())
        }

        async fn discard_batch(&self) -> Result<(), RemoteError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_transport_cancel_interrupts_inflight_call() {
        let (handle, signal) = CancelSignal::pair();
        let conn = Cancellable::new(&Stalled, &signal);
        let predicate = Predicate::KeyEq("f1".into());
        let query = conn.query(ObjectKind::Field, &predicate);
        let cancel = async {
            tokio::task::yield_now().await;
            handle.cancel();
        };
        let (result, ()) = tokio::join!(query, cancel);
        assert_eq!(result.unwrap_err(), RemoteError::Cancelled);
    }

    #[tokio::test]
    async fn test_transport_cancelled_signal_pends_without_trigger() {
        let signal = CancelSignal::never();
        let fired = tokio::select! {
            biased;
            () = signal.cancelled() => true,
            () = tokio::task::yield_now() => false,
        };
        assert!(!fired);
    }

    #[tokio::test]
    async fn test_transport_discard_passes_through_cancel() {
        let store = MemoryStore::new();
        let (handle, signal) = CancelSignal::pair();
        let conn = Cancellable::new(&store, &signal);
        conn.create(
            ObjectKind::Field,
            CreateRequest {
                key: "f1".into(),
                parent: None,
                properties: Properties::new(),
            },
        )
        .await
        .unwrap();
        handle.cancel();
        conn.discard_batch().await.unwrap();
        store.execute_batch().await.unwrap();
        assert!(store.objects().await.is_empty());
    }
}
