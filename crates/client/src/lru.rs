//! Bounded LRU map with an eviction hook.
//!
//! `LruCache` is a `HashMap` index into a slot arena whose slots carry
//! intrusive prev/next links forming the recency list (MRU at the head,
//! LRU at the tail). All operations are O(1) except the sweeps, and no
//! unsafe code is involved: links are arena indices, not pointers.
//!
//! Every removal path (capacity overflow, overwrite, explicit removal,
//! expiry sweep, `remove_all`) surrenders the removed value to the
//! caller-supplied `on_evict` hook exactly once. The hook is a plain
//! `FnMut` parameter rather than stored state: the caller owns the
//! buffer evicted values land in, which is what keeps user flush
//! callbacks out of the cache lock (see [`crate::outlet`]).
//!
//! Two expiry policies are supported:
//!
//! - `max_idle`: entries not **accessed** within the window are swept.
//!   Used by the check cache, where every hit refreshes the entry.
//! - `max_age`: entries **inserted** longer ago than the window are
//!   swept, regardless of access. Used by the report cache so that a
//!   steady stream of merges cannot postpone a flush indefinitely.
//!
//! Sweeps visit entries in LRU→MRU order, so the oldest entries leave
//! first.

use std::{
    collections::HashMap,
    hash::Hash,
    time::{Duration, Instant},
};

/// A bounded key→value map with LRU eviction and a removal hook.
pub(crate) struct LruCache<K, V> {
    index: HashMap<K, usize>,
    slots: Vec<Option<Slot<K, V>>>,
    free: Vec<usize>,
    /// Most recently used slot.
    head: Option<usize>,
    /// Least recently used slot.
    tail: Option<usize>,
    capacity: usize,
    max_idle: Option<Duration>,
    max_age: Option<Duration>,
}

struct Slot<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
    last_access: Instant,
    inserted_at: Instant,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    /// Creates a cache holding at most `capacity` entries.
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            index: HashMap::with_capacity(capacity.min(1024)),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            capacity,
            max_idle: None,
            max_age: None,
        }
    }

    /// Enables idle-based expiry: `remove_expired` evicts entries not
    /// accessed within `window`.
    pub(crate) fn with_max_idle(mut self, window: Duration) -> Self {
        self.max_idle = Some(window);
        self
    }

    /// Enables age-based expiry: `remove_expired` evicts entries
    /// inserted longer than `window` ago, whether or not they were
    /// accessed since.
    pub(crate) fn with_max_age(mut self, window: Duration) -> Self {
        self.max_age = Some(window);
        self
    }

    /// Current number of entries.
    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    /// Inserts a key/value pair.
    ///
    /// An existing value under the same key is surrendered to
    /// `on_evict`, as are any entries evicted to restore the capacity
    /// bound.
    pub(crate) fn insert(&mut self, key: K, value: V, on_evict: &mut dyn FnMut(V)) {
        if let Some(&slot_id) = self.index.get(&key) {
            let now = Instant::now();
            let slot = self.slots[slot_id].as_mut().expect("indexed slot is occupied");
            let old = std::mem::replace(&mut slot.value, value);
            slot.last_access = now;
            slot.inserted_at = now;
            self.move_to_head(slot_id);
            on_evict(old);
            return;
        }

        let now = Instant::now();
        let slot_id = self.allocate(Slot {
            key: key.clone(),
            value,
            prev: None,
            next: None,
            last_access: now,
            inserted_at: now,
        });
        self.index.insert(key, slot_id);
        self.push_front(slot_id);

        while self.index.len() > self.capacity {
            if let Some(victim) = self.tail {
                let value = self.detach_and_free(victim);
                on_evict(value);
            } else {
                break;
            }
        }
    }

    /// Looks up a value, refreshing its recency and access time.
    pub(crate) fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let slot_id = *self.index.get(key)?;
        self.move_to_head(slot_id);
        let slot = self.slots[slot_id].as_mut().expect("indexed slot is occupied");
        slot.last_access = Instant::now();
        Some(&mut slot.value)
    }

    /// Removes one entry, surrendering its value to `on_evict`.
    pub(crate) fn remove(&mut self, key: &K, on_evict: &mut dyn FnMut(V)) -> bool {
        match self.index.get(key) {
            Some(&slot_id) => {
                let value = self.detach_and_free(slot_id);
                on_evict(value);
                true
            },
            None => false,
        }
    }

    /// Sweeps expired entries per the configured policy, oldest first.
    ///
    /// With `max_idle`, expiry is measured against the last access; with
    /// `max_age`, against the insertion time. Without either policy the
    /// sweep is a no-op.
    pub(crate) fn remove_expired(&mut self, on_evict: &mut dyn FnMut(V)) {
        let now = Instant::now();
        let mut victims = Vec::new();

        let mut cursor = self.tail;
        while let Some(slot_id) = cursor {
            let slot = self.slots[slot_id].as_ref().expect("listed slot is occupied");
            cursor = slot.prev;

            let idle_expired =
                self.max_idle.is_some_and(|window| now.duration_since(slot.last_access) >= window);
            let age_expired =
                self.max_age.is_some_and(|window| now.duration_since(slot.inserted_at) >= window);
            if idle_expired || age_expired {
                victims.push(slot_id);
            }
        }

        for slot_id in victims {
            let value = self.detach_and_free(slot_id);
            on_evict(value);
        }
    }

    /// Removes every entry in LRU→MRU order.
    pub(crate) fn remove_all(&mut self, on_evict: &mut dyn FnMut(V)) {
        while let Some(slot_id) = self.tail {
            let value = self.detach_and_free(slot_id);
            on_evict(value);
        }
    }

    fn allocate(&mut self, slot: Slot<K, V>) -> usize {
        if let Some(slot_id) = self.free.pop() {
            self.slots[slot_id] = Some(slot);
            slot_id
        } else {
            self.slots.push(Some(slot));
            self.slots.len() - 1
        }
    }

    /// Unlinks a slot from the recency list, removes its index entry,
    /// and returns its value.
    fn detach_and_free(&mut self, slot_id: usize) -> V {
        self.unlink(slot_id);
        let slot = self.slots[slot_id].take().expect("detached slot is occupied");
        self.index.remove(&slot.key);
        self.free.push(slot_id);
        slot.value
    }

    fn unlink(&mut self, slot_id: usize) {
        let (prev, next) = {
            let slot = self.slots[slot_id].as_ref().expect("linked slot is occupied");
            (slot.prev, slot.next)
        };
        match prev {
            Some(p) => {
                self.slots[p].as_mut().expect("prev slot is occupied").next = next;
            },
            None => self.head = next,
        }
        match next {
            Some(n) => {
                self.slots[n].as_mut().expect("next slot is occupied").prev = prev;
            },
            None => self.tail = prev,
        }
        let slot = self.slots[slot_id].as_mut().expect("linked slot is occupied");
        slot.prev = None;
        slot.next = None;
    }

    fn push_front(&mut self, slot_id: usize) {
        let old_head = self.head;
        {
            let slot = self.slots[slot_id].as_mut().expect("pushed slot is occupied");
            slot.prev = None;
            slot.next = old_head;
        }
        if let Some(h) = old_head {
            self.slots[h].as_mut().expect("head slot is occupied").prev = Some(slot_id);
        }
        self.head = Some(slot_id);
        if self.tail.is_none() {
            self.tail = Some(slot_id);
        }
    }

    fn move_to_head(&mut self, slot_id: usize) {
        if self.head == Some(slot_id) {
            return;
        }
        self.unlink(slot_id);
        self.push_front(slot_id);
    }
}
