//! Deferred delivery of evicted cache items.
//!
//! A cache sweep or capacity eviction happens while the cache mutex is
//! held, but the flush callback it feeds belongs to the user and may
//! re-enter the cache (a flush commonly triggers a transport call whose
//! completion calls `cache_response`). Invoking it under the lock would
//! deadlock.
//!
//! The pattern used by every cache operation here:
//!
//! 1. allocate an [`EvictionBuffer`] on the stack,
//! 2. take the cache mutex and perform the mutation, materializing each
//!    evicted entry into an outbound request pushed into the buffer,
//! 3. release the mutex,
//! 4. drain the buffer through the [`FlushOutlet`], which invokes the
//!    user callback with no cache lock held.
//!
//! The callback itself lives behind its own mutex so that shutdown can
//! swap it out without racing ongoing emissions.

use std::sync::Arc;

use parking_lot::Mutex;

/// The user-supplied callback receiving flushed requests.
pub type FlushCallback<R> = Arc<dyn Fn(R) + Send + Sync>;

/// Holds the flush callback for one cache.
pub(crate) struct FlushOutlet<R> {
    callback: Mutex<Option<FlushCallback<R>>>,
}

impl<R> FlushOutlet<R> {
    pub(crate) fn new() -> Self {
        Self { callback: Mutex::new(None) }
    }

    /// Installs the callback, replacing any previous one.
    pub(crate) fn set_callback(&self, callback: FlushCallback<R>) {
        *self.callback.lock() = Some(callback);
    }

    /// Removes the callback; subsequent emissions are dropped.
    pub(crate) fn clear_callback(&self) {
        *self.callback.lock() = None;
    }

    /// Delivers one item to the callback, if one is installed.
    ///
    /// The callback handle is cloned out of the lock before the call:
    /// the pointer mutex is held only for the swap, so a callback may
    /// re-enter its cache and trigger further emissions without
    /// deadlocking. A swap performed mid-drain takes effect from the
    /// next item on.
    fn emit(&self, item: R) {
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback(item);
        }
    }
}

/// A stack-owned buffer of items evicted during one cache operation.
///
/// `push` offers each new item to the tail through the supplied merge
/// predicate before appending, so adjacent evictions can coalesce into
/// one outbound request (the report cache batches up to its operation
/// cap this way; the check cache never merges).
pub(crate) struct EvictionBuffer<R> {
    items: Vec<R>,
}

impl<R> EvictionBuffer<R> {
    pub(crate) fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Appends `item`, first offering it to the tail via `merge`.
    ///
    /// `merge(tail, item)` returns `true` when it absorbed the item
    /// into the tail; otherwise the item is appended as-is. Insertion
    /// order is preserved apart from tail absorption.
    pub(crate) fn push(&mut self, item: R, merge: impl FnOnce(&mut R, &R) -> bool) {
        let merged = match self.items.last_mut() {
            Some(tail) => merge(tail, &item),
            None => false,
        };
        if !merged {
            self.items.push(item);
        }
    }

    /// Drains the buffer through the outlet, in insertion order.
    ///
    /// Must be called after the cache mutex has been released.
    pub(crate) fn flush_through(self, outlet: &FlushOutlet<R>) {
        for item in self.items {
            outlet.emit(item);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    const NEVER: fn(&mut u32, &u32) -> bool = |_, _| false;

    #[test]
    fn emits_in_insertion_order() {
        let outlet = FlushOutlet::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        outlet.set_callback(Arc::new(move |item: u32| sink.lock().push(item)));

        let mut buffer = EvictionBuffer::new();
        buffer.push(1, NEVER);
        buffer.push(2, NEVER);
        buffer.push(3, NEVER);
        buffer.flush_through(&outlet);

        assert_eq!(*seen.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn merge_absorbs_into_the_tail() {
        let outlet = FlushOutlet::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        outlet.set_callback(Arc::new(move |item: u32| sink.lock().push(item)));

        let mut buffer = EvictionBuffer::new();
        let cap_10 = |tail: &mut u32, item: &u32| {
            if *tail + *item <= 10 {
                *tail += *item;
                true
            } else {
                false
            }
        };
        buffer.push(4, cap_10);
        buffer.push(5, cap_10); // merged into 9
        buffer.push(3, cap_10); // would exceed the cap: appended
        buffer.flush_through(&outlet);

        assert_eq!(*seen.lock(), vec![9, 3]);
    }

    #[test]
    fn cleared_callback_drops_emissions() {
        let outlet = FlushOutlet::new();
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);
        outlet.set_callback(Arc::new(move |_: u32| {
            sink.fetch_add(1, Ordering::Relaxed);
        }));
        outlet.clear_callback();

        let mut buffer = EvictionBuffer::new();
        buffer.push(1, NEVER);
        buffer.flush_through(&outlet);

        assert_eq!(count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn empty_buffer_flushes_nothing() {
        let outlet: FlushOutlet<u32> = FlushOutlet::new();
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);
        outlet.set_callback(Arc::new(move |_: u32| {
            sink.fetch_add(1, Ordering::Relaxed);
        }));
        EvictionBuffer::new().flush_through(&outlet);
        assert_eq!(count.load(Ordering::Relaxed), 0);
    }
}
