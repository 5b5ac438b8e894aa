//! Pending geofence operations buffered while no backend is connected
//!
//! Operations are keyed by target identity. A later operation for the same
//! identity replaces the earlier one in place, so identities keep the slot
//! they were first queued in and distinct identities keep their relative
//! order. Replay applies every `Add` before any `Remove`, each group in
//! queue order.
//!
//! # Example
//!
//! ```
//! use locus_core_failover::pending::{PendingOperation, PendingOperationQueue};
//! use locus_core_failover::GeoFence;
//!
//! let mut queue = PendingOperationQueue::new();
//! queue.enqueue(PendingOperation::Add(GeoFence::new("home", 51.5, -0.12, 100.0)));
//! queue.enqueue(PendingOperation::Remove("home".to_string()));
//! assert_eq!(queue.len(), 1);
//!
//! let mut seen = Vec::new();
//! let result = queue.drain(|op| {
//!     seen.push(op.clone());
//!     Ok::<_, std::convert::Infallible>(())
//! });
//! assert_eq!(result.applied, 1);
//! assert_eq!(seen, vec![PendingOperation::Remove("home".to_string())]);
//! ```

use crate::types::GeoFence;
use indexmap::IndexMap;
use std::collections::HashSet;

/// A buffered geofence command
#[derive(Debug, Clone, PartialEq)]
pub enum PendingOperation {
    /// Register (or replace) a fence
    Add(GeoFence),
    /// Unregister a fence by id
    Remove(String),
}

impl PendingOperation {
    /// Identity of the target this operation refers to
    pub fn id(&self) -> &str {
        match self {
            PendingOperation::Add(fence) => &fence.id,
            PendingOperation::Remove(id) => id,
        }
    }

    pub fn is_add(&self) -> bool {
        matches!(self, PendingOperation::Add(_))
    }

    pub fn is_remove(&self) -> bool {
        matches!(self, PendingOperation::Remove(_))
    }
}

/// Outcome of a drain
#[derive(Debug)]
pub struct DrainResult<E> {
    /// Operations accepted and removed from the queue
    pub applied: usize,
    /// Operations still queued
    pub remaining: usize,
    /// The error that stopped the drain, if any
    pub error: Option<E>,
}

impl<E> DrainResult<E> {
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.remaining == 0
    }
}

/// Identity-collapsing FIFO of pending operations
#[derive(Debug, Default)]
pub struct PendingOperationQueue {
    ops: IndexMap<String, PendingOperation>,
    total_enqueued: u64,
    total_superseded: u64,
}

impl PendingOperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an operation. A queued operation with the same identity is
    /// superseded; this never fails.
    pub fn enqueue(&mut self, op: PendingOperation) {
        self.total_enqueued += 1;
        if self.ops.insert(op.id().to_string(), op).is_some() {
            self.total_superseded += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Queued operation for an identity, if any
    pub fn get(&self, id: &str) -> Option<&PendingOperation> {
        self.ops.get(id)
    }

    /// Operations in the order a drain would apply them
    pub fn replay_order(&self) -> Vec<&PendingOperation> {
        let adds = self.ops.values().filter(|op| op.is_add());
        let removes = self.ops.values().filter(|op| op.is_remove());
        adds.chain(removes).collect()
    }

    /// Apply every queued operation in replay order.
    ///
    /// An operation leaves the queue only once `apply` accepted it. The first
    /// error stops the drain and everything not yet applied stays queued.
    /// Draining an empty queue is a no-op.
    pub fn drain<F, E>(&mut self, mut apply: F) -> DrainResult<E>
    where
        F: FnMut(&PendingOperation) -> Result<(), E>,
    {
        if self.ops.is_empty() {
            return DrainResult {
                applied: 0,
                remaining: 0,
                error: None,
            };
        }

        let mut accepted: HashSet<String> = HashSet::with_capacity(self.ops.len());
        let mut error = None;
        for op in self.replay_order() {
            match apply(op) {
                Ok(()) => {
                    accepted.insert(op.id().to_string());
                }
                Err(e) => {
                    error = Some(e);
                    break;
                }
            }
        }

        let applied = accepted.len();
        if applied > 0 {
            self.ops.retain(|id, _| !accepted.contains(id));
        }

        DrainResult {
            applied,
            remaining: self.ops.len(),
            error,
        }
    }

    /// Drop everything without applying it
    pub fn clear(&mut self) {
        self.ops.clear();
    }

    pub fn stats(&self) -> PendingStats {
        PendingStats {
            queued: self.ops.len(),
            total_enqueued: self.total_enqueued,
            total_superseded: self.total_superseded,
        }
    }
}

/// Counters for the pending queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingStats {
    pub queued: usize,
    pub total_enqueued: u64,
    pub total_superseded: u64,
}
