//! The pending-operation table correlating requests with inbound messages.
//!
//! Every async operation registers a single-shot completion under a
//! structured key derived from its identifying data. Inbound messages
//! resolve or reject the matching entry; teardown rejects everything at
//! once. Removal is atomic with first resolution, so an entry can never
//! fire twice and the winner of a race (say, block-complete against
//! `notfound`) implicitly deregisters the loser.

use crate::chain::{BlockHeader, Hash256};
use crate::peer::error::PeerError;
use crate::peer::events::BlockSummary;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

/// Key identifying one outstanding logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum OpKey {
    /// A ping awaiting the pong carrying this nonce.
    Pong([u8; 8]),
    /// The single permitted outstanding header fetch.
    Headers,
    /// A block fetch awaiting this hash.
    Block(Hash256),
    /// A broadcast transaction awaiting the peer's `getdata` for it.
    TransactionRequest(Hash256),
}

/// Successful outcome delivered to an operation's waiter.
#[derive(Debug)]
pub(crate) enum OpOutcome {
    Pong,
    Headers(Vec<BlockHeader>),
    Block(BlockSummary),
    TransactionSent,
}

pub(crate) type OpResult = Result<OpOutcome, PeerError>;

/// Completion handle for a pending operation.
///
/// Broadcast batches share one completion across every transaction in the
/// batch; the first `getdata` to arrive wins it, matching the reference
/// client's behavior.
#[derive(Debug)]
pub(crate) enum OpResponder {
    Exclusive(oneshot::Sender<OpResult>),
    Shared(Arc<Mutex<Option<oneshot::Sender<OpResult>>>>),
}

impl OpResponder {
    /// Deliver the result. At most one delivery ever happens per waiter.
    pub async fn resolve(self, result: OpResult) {
        match self {
            OpResponder::Exclusive(sender) => {
                let _ = sender.send(result);
            }
            OpResponder::Shared(slot) => {
                if let Some(sender) = slot.lock().await.take() {
                    let _ = sender.send(result);
                }
            }
        }
    }
}

/// One entry in the pending-operation table.
#[derive(Debug)]
pub(crate) struct PendingOperation {
    pub responder: OpResponder,
    /// Raw transaction to relay when the peer requests it (broadcast
    /// entries only).
    pub relay: Option<Vec<u8>>,
}

/// Per-connection table of outstanding requests.
#[derive(Debug, Default)]
pub(crate) struct PendingOperations {
    connect_waiters: Vec<oneshot::Sender<Result<(), PeerError>>>,
    operations: HashMap<OpKey, PendingOperation>,
}

impl PendingOperations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation; fails if the key is already outstanding.
    pub fn insert(
        &mut self,
        key: OpKey,
        operation: PendingOperation,
    ) -> Result<(), PendingOperation> {
        match self.operations.entry(key) {
            Entry::Occupied(_) => Err(operation),
            Entry::Vacant(slot) => {
                slot.insert(operation);
                Ok(())
            }
        }
    }

    /// Register an operation, displacing any previous entry for the key.
    pub fn replace(&mut self, key: OpKey, operation: PendingOperation) {
        self.operations.insert(key, operation);
    }

    /// Remove and return the entry for `key`, if outstanding.
    pub fn remove(&mut self, key: &OpKey) -> Option<PendingOperation> {
        self.operations.remove(key)
    }

    /// Register a waiter for handshake completion.
    pub fn push_connect_waiter(&mut self, waiter: oneshot::Sender<Result<(), PeerError>>) {
        self.connect_waiters.push(waiter);
    }

    /// Take every connect waiter for resolution.
    pub fn take_connect_waiters(&mut self) -> Vec<oneshot::Sender<Result<(), PeerError>>> {
        std::mem::take(&mut self.connect_waiters)
    }

    /// Empty the whole table for teardown.
    pub fn drain(
        &mut self,
    ) -> (
        Vec<oneshot::Sender<Result<(), PeerError>>>,
        Vec<(OpKey, PendingOperation)>,
    ) {
        let waiters = std::mem::take(&mut self.connect_waiters);
        let operations = std::mem::take(&mut self.operations).into_iter().collect();
        (waiters, operations)
    }

    /// Number of outstanding operations (connect waiters excluded).
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty() && self.connect_waiters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_key_rejected() {
        let mut pending = PendingOperations::new();
        let (first, _rx1) = oneshot::channel();
        let (second, _rx2) = oneshot::channel();

        pending
            .insert(
                OpKey::Headers,
                PendingOperation {
                    responder: OpResponder::Exclusive(first),
                    relay: None,
                },
            )
            .expect("first insert succeeds");
        assert!(pending
            .insert(
                OpKey::Headers,
                PendingOperation {
                    responder: OpResponder::Exclusive(second),
                    relay: None,
                },
            )
            .is_err());
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_drain_rejects_everything_once() {
        let mut pending = PendingOperations::new();
        let (ping, mut ping_rx) = oneshot::channel();
        let (block, mut block_rx) = oneshot::channel();
        pending
            .insert(
                OpKey::Pong([1; 8]),
                PendingOperation {
                    responder: OpResponder::Exclusive(ping),
                    relay: None,
                },
            )
            .expect("insert");
        pending
            .insert(
                OpKey::Block(Hash256::from_display_bytes([2; 32])),
                PendingOperation {
                    responder: OpResponder::Exclusive(block),
                    relay: None,
                },
            )
            .expect("insert");

        let (waiters, operations) = pending.drain();
        assert!(waiters.is_empty());
        assert_eq!(operations.len(), 2);
        for (_, operation) in operations {
            operation.responder.resolve(Err(PeerError::Disconnected)).await;
        }
        assert!(matches!(ping_rx.try_recv(), Ok(Err(PeerError::Disconnected))));
        assert!(matches!(block_rx.try_recv(), Ok(Err(PeerError::Disconnected))));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_shared_responder_fires_once() {
        let (sender, mut receiver) = oneshot::channel();
        let slot = Arc::new(Mutex::new(Some(sender)));
        let first = OpResponder::Shared(slot.clone());
        let second = OpResponder::Shared(slot);

        first.resolve(Ok(OpOutcome::TransactionSent)).await;
        second.resolve(Ok(OpOutcome::TransactionSent)).await;
        assert!(matches!(receiver.try_recv(), Ok(Ok(OpOutcome::TransactionSent))));
    }
}
