use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::{Result, RpcError, TransactionCounter, TransactionId};

/// Value delivered to a waiting `invoke()`.
pub(super) type Outcome = Result<Value>;

/// Tracks outstanding transactions of one connection.
///
/// Maps transaction ids to single-use result slots. A slot is removed when
/// its reply arrives, when its caller gives up (timeout or failed send), or
/// when the connection goes away, in which case every remaining slot is
/// settled with [`RpcError::ConnectionLost`].
///
/// The id counter lives here too so ids are scoped to the connection.
pub(super) struct TransactionRegistry {
    // ---
    counter: TransactionCounter,
    slots: HashMap<TransactionId, oneshot::Sender<Outcome>>,
    closed: bool,
}

impl TransactionRegistry {
    // ---

    pub fn new() -> Self {
        // ---
        Self {
            counter: TransactionCounter::new(),
            slots: HashMap::new(),
            closed: false,
        }
    }

    /// Allocate the next id and register its slot.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::ConnectionLost`] once the registry has been
    /// settled; no id is consumed in that case.
    pub fn open(&mut self) -> Result<(TransactionId, oneshot::Receiver<Outcome>)> {
        // ---
        if self.closed {
            return Err(RpcError::ConnectionLost);
        }

        let id = self.counter.next_id();
        let (tx, rx) = oneshot::channel();
        self.slots.insert(id, tx);
        Ok((id, rx))
    }

    /// Deliver the outcome for `id` and remove its slot.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::UnknownTransaction`] if no slot is registered,
    /// e.g. for a duplicate or late reply.
    pub fn resolve(&mut self, id: TransactionId, outcome: Outcome) -> Result<()> {
        // ---
        match self.slots.remove(&id) {
            Some(tx) => {
                // Receiver may already be gone if the caller dropped its future
                let _ = tx.send(outcome);
                Ok(())
            }
            None => Err(RpcError::UnknownTransaction(id)),
        }
    }

    /// Remove a slot without delivering anything.
    pub fn abandon(&mut self, id: TransactionId) -> bool {
        // ---
        self.slots.remove(&id).is_some()
    }

    /// Settle every outstanding slot with `ConnectionLost` and refuse new ones.
    ///
    /// Returns how many transactions were settled.
    pub fn settle_all(&mut self) -> usize {
        // ---
        self.closed = true;

        let count = self.slots.len();
        for (_, tx) in self.slots.drain() {
            let _ = tx.send(Err(RpcError::ConnectionLost));
        }
        count
    }

    pub fn len(&self) -> usize {
        // ---
        self.slots.len()
    }

    pub fn is_closed(&self) -> bool {
        // ---
        self.closed
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    #[test]
    fn test_open_and_resolve() {
        // ---
        let mut registry = TransactionRegistry::new();

        let (id, rx) = registry.open().unwrap();
        assert_eq!(id.get(), 1);
        assert_eq!(registry.len(), 1);

        registry.resolve(id, Ok(json!("done"))).unwrap();

        // Should be removed after completion
        assert_eq!(registry.len(), 0);

        let received = rx.blocking_recv().unwrap().unwrap();
        assert_eq!(received, json!("done"));
    }

    #[test]
    fn test_resolve_twice_is_unknown() {
        // ---
        let mut registry = TransactionRegistry::new();
        let (id, _rx) = registry.open().unwrap();

        registry.resolve(id, Ok(Value::Null)).unwrap();

        let err = registry.resolve(id, Ok(Value::Null)).unwrap_err();
        assert!(matches!(err, RpcError::UnknownTransaction(t) if t == id));
    }

    #[test]
    fn test_resolve_never_registered() {
        // ---
        let mut registry = TransactionRegistry::new();
        let err = registry
            .resolve(TransactionId::from(42), Ok(Value::Null))
            .unwrap_err();
        assert!(matches!(err, RpcError::UnknownTransaction(_)));
    }

    #[test]
    fn test_abandon() {
        // ---
        let mut registry = TransactionRegistry::new();
        let (id, _rx) = registry.open().unwrap();

        assert!(registry.abandon(id));
        assert_eq!(registry.len(), 0);

        // Second abandon should return false
        assert!(!registry.abandon(id));
    }

    #[test]
    fn test_ids_not_reused_after_resolve() {
        // ---
        let mut registry = TransactionRegistry::new();
        let (first, _a) = registry.open().unwrap();
        registry.resolve(first, Ok(Value::Null)).unwrap();

        let (second, _b) = registry.open().unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_settle_all_rejects_everything() {
        // ---
        let mut registry = TransactionRegistry::new();
        let receivers: Vec<_> = (0..3).map(|_| registry.open().unwrap().1).collect();

        assert_eq!(registry.settle_all(), 3);
        assert_eq!(registry.len(), 0);
        assert!(registry.is_closed());

        for rx in receivers {
            let outcome = rx.blocking_recv().unwrap();
            assert!(matches!(outcome, Err(RpcError::ConnectionLost)));
        }

        assert!(matches!(registry.open(), Err(RpcError::ConnectionLost)));
    }
}
