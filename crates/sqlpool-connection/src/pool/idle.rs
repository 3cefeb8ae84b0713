//! Bounded FIFO of idle connections
//!
//! Pushing never blocks: a full queue hands the item back so the caller can
//! dispose of it. Popping can wait for an item with a deadline.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;

pub(crate) struct IdleQueue<T> {
    items: Mutex<VecDeque<T>>,
    /// One permit per queued item
    ready: Semaphore,
    capacity: usize,
}

impl<T> IdleQueue<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            ready: Semaphore::new(0),
            capacity,
        }
    }

    /// Append an item, or hand it back if the queue is full
    pub(crate) fn try_push(&self, item: T) -> Result<(), T> {
        {
            let mut items = self.items.lock();
            if items.len() >= self.capacity {
                return Err(item);
            }
            items.push_back(item);
        }
        self.ready.add_permits(1);
        Ok(())
    }

    /// Take the oldest item if one is ready
    pub(crate) fn try_pop(&self) -> Option<T> {
        let permit = self.ready.try_acquire().ok()?;
        permit.forget();
        self.items.lock().pop_front()
    }

    /// Wait for an item
    pub(crate) async fn pop(&self) -> Option<T> {
        let permit = self.ready.acquire().await.ok()?;
        permit.forget();
        self.items.lock().pop_front()
    }

    /// Wait for an item for at most `timeout`
    ///
    /// A zero timeout still takes an item that is already queued.
    pub(crate) async fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        tokio::time::timeout(timeout, self.pop())
            .await
            .ok()
            .flatten()
    }

    /// Remove every ready item
    pub(crate) fn drain(&self) -> Vec<T> {
        std::iter::from_fn(|| self.try_pop()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.lock().len()
    }
}
