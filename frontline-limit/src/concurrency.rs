use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio::sync::OwnedSemaphorePermit;
use tokio::sync::Semaphore;

/// Returned by [`ConcurrencyGate::acquire`] once the gate has been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("concurrency gate is closed")]
pub struct GateClosed;

/// A counting semaphore bounding the number of requests in flight.
///
/// Clones share the same permits. Waiters are not promised FIFO order.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    max_permits: usize,
}

/// One slot in a [`ConcurrencyGate`]. Dropping it returns the slot.
#[derive(Debug)]
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct Permit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
    pub fn new(max_permits: NonZeroUsize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_permits.get())),
            max_permits: max_permits.get(),
        }
    }

    /// Waits, without a timeout, until a slot is free.
    pub async fn acquire(&self) -> Result<Permit, GateClosed> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| GateClosed)?;
        Ok(Permit { _permit: permit })
    }

    /// Takes a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<Permit> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| Permit { _permit: permit })
    }

    /// Fails all current and future waiters. Permits already held stay valid.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn max_permits(&self) -> usize {
        self.max_permits
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held.
    pub fn held(&self) -> usize {
        self.max_permits.saturating_sub(self.available())
    }
}
