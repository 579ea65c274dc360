//! Session-scoped cancellation registry.
//!
//! Every cancellable operation registers itself and receives an RAII handle
//! wrapping a `CancellationToken`; dropping the handle unregisters it.
//! `cancel_all` fires every live token and flips the registry into a
//! cancelled state, so operations that register afterwards observe an
//! already-cancelled handle instead of racing the sweep.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::info;

// ─────────────────────────────────────────────────────────────────────────────
// CancellationRegistry
// ─────────────────────────────────────────────────────────────────────────────

struct RegistryInner {
    /// Set once by `cancel_all`; never cleared for the registry's lifetime.
    cancelled: bool,
    /// Tokens for operations currently in flight, by registration id.
    live: HashMap<u64, CancellationToken>,
    next_id: u64,
}

/// Tracks the cancellable operations of one ingestion session.
///
/// Clones share state, so any holder can cancel the whole session.
#[derive(Clone)]
pub struct CancellationRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl Default for CancellationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                cancelled: false,
                live: HashMap::new(),
                next_id: 0,
            })),
        }
    }

    /// Registers a new operation and returns its handle.
    ///
    /// When the registry is already cancelled the handle comes back
    /// pre-cancelled, so late registrations cannot start work the user
    /// has already stopped.
    pub fn register(&self) -> OperationHandle {
        let token = CancellationToken::new();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if inner.cancelled {
            token.cancel();
            return OperationHandle {
                id: None,
                token,
                inner: Arc::clone(&self.inner),
            };
        }

        let id = inner.next_id;
        inner.next_id += 1;
        inner.live.insert(id, token.clone());

        OperationHandle {
            id: Some(id),
            token,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Cancels every live operation and marks the registry cancelled.
    ///
    /// Safe to call repeatedly or from multiple tasks at once; later calls
    /// find nothing left to cancel.
    pub fn cancel_all(&self) {
        let drained: Vec<CancellationToken> = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.cancelled = true;
            inner.live.drain().map(|(_, token)| token).collect()
        };

        if !drained.is_empty() {
            info!(operations = drained.len(), "cancelling live operations");
        }
        for token in drained {
            token.cancel();
        }
    }

    /// True once `cancel_all` has run.
    pub fn is_cancelled(&self) -> bool {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).cancelled
    }

    /// Number of operations currently registered.
    pub fn live_handles(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).live.len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OperationHandle
// ─────────────────────────────────────────────────────────────────────────────

/// RAII registration of one cancellable operation.
///
/// Dropping the handle unregisters the operation. Cancellation of the
/// handle's token is one-way.
pub struct OperationHandle {
    /// `None` for handles issued after `cancel_all` (never in the live map).
    id: Option<u64>,
    token: CancellationToken,
    inner: Arc<Mutex<RegistryInner>>,
}

impl OperationHandle {
    /// True once this operation has been told to stop.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when this operation is cancelled. Suitable for `select!`.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}

impl Drop for OperationHandle {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.live.remove(&id);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
