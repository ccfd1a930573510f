//! Bounded worker-slot pool for incoming connections.
//!
//! Admission is two-phase: the accept loop first waits for a permit
//! ([`SlotPool::admit`]) and only then accepts a connection, so clients beyond
//! the pool size wait in the listen backlog. Once a connection is accepted the
//! permit is bound to the lowest free slot index ([`Admission::bind`]).
//!
//! Dropping the [`SlotGuard`] returns the index to the free set and then
//! releases the permit, so an index is never handed out twice.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::ChannelError;

/// Fixed set of worker slots guarded by a counting semaphore.
#[derive(Clone)]
pub struct SlotPool {
    permits: Arc<Semaphore>,
    free: Arc<Mutex<BTreeSet<usize>>>,
    size: usize,
}

impl SlotPool {
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size)),
            free: Arc::new(Mutex::new((0..size).collect())),
            size,
        }
    }

    /// Total number of slots.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Slots currently bound to a connection.
    pub fn bound(&self) -> usize {
        self.size - lock(&self.free).len()
    }

    /// Waits until a slot can be reserved.
    pub async fn admit(&self) -> Result<Admission, ChannelError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ChannelError::Cancelled)?;
        Ok(Admission {
            permit,
            free: Arc::clone(&self.free),
        })
    }

    /// Fails every pending and future [`admit`](Self::admit).
    pub fn close(&self) {
        self.permits.close();
    }
}

/// A reserved permit not yet bound to a slot index.
///
/// Dropping it releases the permit.
pub struct Admission {
    permit: OwnedSemaphorePermit,
    free: Arc<Mutex<BTreeSet<usize>>>,
}

impl Admission {
    /// Binds the permit to the lowest free slot index.
    pub fn bind(self) -> Result<SlotGuard, ChannelError> {
        let id = lock(&self.free)
            .pop_first()
            .ok_or(ChannelError::SlotsExhausted)?;
        Ok(SlotGuard {
            id,
            free: self.free,
            _permit: self.permit,
        })
    }
}

/// Exclusive ownership of one slot for the lifetime of a connection.
pub struct SlotGuard {
    id: usize,
    free: Arc<Mutex<BTreeSet<usize>>>,
    // Declared last: released only after `drop` has returned the index.
    _permit: OwnedSemaphorePermit,
}

impl SlotGuard {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        lock(&self.free).insert(self.id);
    }
}

fn lock(free: &Mutex<BTreeSet<usize>>) -> MutexGuard<'_, BTreeSet<usize>> {
    free.lock().unwrap_or_else(PoisonError::into_inner)
}
