//! Thread-safe doubly linked list
//!
//! Nodes live in an arena of slots guarded by a single mutex. Callers hold
//! [`NodeHandle`]s instead of references, so removal is O(1) and a handle can
//! be sent across threads without borrowing the list.
//!
//! # Architecture
//!
//! ```text
//! slots: [ A | free | B | C ]      head -> A <-> B <-> C <- tail
//!           ^gen 0    ^gen 3
//! ```
//!
//! Each slot carries a generation counter that bumps when its node is removed.
//! A handle records the list it came from plus the slot's generation at
//! insertion time, so a stale handle (or one from another list) is detected
//! instead of silently unlinking someone else's node.

use crate::utils::lock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

static NEXT_LIST_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque reference to a node inside a [`ThreadSafeList`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    list_id: u64,
    index: usize,
    generation: u64,
}

struct Entry<T> {
    value: T,
    prev: Option<usize>,
    next: Option<usize>,
}

struct Slot<T> {
    generation: u64,
    entry: Option<Entry<T>>,
}

struct ListState<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl<T> ListState<T> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    fn is_live(&self, list_id: u64, handle: &NodeHandle) -> bool {
        handle.list_id == list_id
            && self
                .slots
                .get(handle.index)
                .map(|slot| slot.generation == handle.generation && slot.entry.is_some())
                .unwrap_or(false)
    }

    fn entry(&self, index: usize) -> Option<&Entry<T>> {
        self.slots.get(index).and_then(|slot| slot.entry.as_ref())
    }

    fn entry_mut(&mut self, index: usize) -> Option<&mut Entry<T>> {
        self.slots.get_mut(index).and_then(|slot| slot.entry.as_mut())
    }

    fn allocate(&mut self, entry: Entry<T>) -> (usize, u64) {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.entry = Some(entry);
                (index, slot.generation)
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                (self.slots.len() - 1, 0)
            }
        }
    }

    fn unlink(&mut self, index: usize) -> T {
        let slot = &mut self.slots[index];
        let entry = match slot.entry.take() {
            Some(entry) => entry,
            None => unreachable!("unlink of a vacant slot"),
        };
        slot.generation += 1;

        match entry.prev {
            Some(prev) => {
                if let Some(p) = self.entry_mut(prev) {
                    p.next = entry.next;
                }
            }
            None => self.head = entry.next,
        }
        match entry.next {
            Some(next) => {
                if let Some(n) = self.entry_mut(next) {
                    n.prev = entry.prev;
                }
            }
            None => self.tail = entry.prev,
        }

        self.free.push(index);
        self.len -= 1;
        entry.value
    }
}

/// Doubly linked list safe for concurrent insert, remove and traversal
///
/// # Examples
///
/// ```rust
/// use storykeep_core::utils::ThreadSafeList;
///
/// let list = ThreadSafeList::new();
/// let a = list.add_to_tail("a");
/// list.add_to_tail("b");
/// list.add_to_head("z");
/// assert_eq!(list.convert_to_array(), vec!["z", "a", "b"]);
///
/// assert_eq!(list.remove(a), "a");
/// assert_eq!(list.len(), 2);
/// ```
pub struct ThreadSafeList<T> {
    id: u64,
    state: Mutex<ListState<T>>,
}

impl<T> ThreadSafeList<T> {
    pub fn new() -> Self {
        Self {
            id: NEXT_LIST_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(ListState::new()),
        }
    }

    /// Insert a value in front of the current head
    pub fn add_to_head(&self, value: T) -> NodeHandle {
        let mut state = lock(&self.state);
        let old_head = state.head;
        let (index, generation) = state.allocate(Entry {
            value,
            prev: None,
            next: old_head,
        });

        match old_head {
            Some(h) => {
                if let Some(entry) = state.entry_mut(h) {
                    entry.prev = Some(index);
                }
            }
            None => state.tail = Some(index),
        }
        state.head = Some(index);
        state.len += 1;

        self.handle(index, generation)
    }

    /// Insert a value after the current tail
    pub fn add_to_tail(&self, value: T) -> NodeHandle {
        let mut state = lock(&self.state);
        let old_tail = state.tail;
        let (index, generation) = state.allocate(Entry {
            value,
            prev: old_tail,
            next: None,
        });

        match old_tail {
            Some(t) => {
                if let Some(entry) = state.entry_mut(t) {
                    entry.next = Some(index);
                }
            }
            None => state.head = Some(index),
        }
        state.tail = Some(index);
        state.len += 1;

        self.handle(index, generation)
    }

    /// Unlink a node and hand back its value
    ///
    /// # Panics
    ///
    /// Panics if `handle` does not refer to a node currently in this list.
    /// Removing a node twice, or through the wrong list, is a caller bug.
    pub fn remove(&self, handle: NodeHandle) -> T {
        let mut state = lock(&self.state);
        if !state.is_live(self.id, &handle) {
            panic!(
                "ThreadSafeList::remove called with a node that is not in this list ({:?})",
                handle
            );
        }
        state.unlink(handle.index)
    }

    /// Unlink every node, returning the values in list order
    pub fn remove_all(&self) -> Vec<T> {
        let mut state = lock(&self.state);
        let mut values = Vec::with_capacity(state.len);
        while let Some(head) = state.head {
            values.push(state.unlink(head));
        }
        values
    }

    pub fn head(&self) -> Option<NodeHandle> {
        let state = lock(&self.state);
        state
            .head
            .map(|index| self.handle(index, state.slots[index].generation))
    }

    pub fn tail(&self) -> Option<NodeHandle> {
        let state = lock(&self.state);
        state
            .tail
            .map(|index| self.handle(index, state.slots[index].generation))
    }

    /// Handle of the node after `handle`
    ///
    /// # Panics
    ///
    /// Panics if `handle` is not in this list.
    pub fn next(&self, handle: NodeHandle) -> Option<NodeHandle> {
        let state = lock(&self.state);
        self.expect_live(&state, &handle, "next");
        state
            .entry(handle.index)
            .and_then(|e| e.next)
            .map(|index| self.handle(index, state.slots[index].generation))
    }

    /// Handle of the node before `handle`
    ///
    /// # Panics
    ///
    /// Panics if `handle` is not in this list.
    pub fn prev(&self, handle: NodeHandle) -> Option<NodeHandle> {
        let state = lock(&self.state);
        self.expect_live(&state, &handle, "prev");
        state
            .entry(handle.index)
            .and_then(|e| e.prev)
            .map(|index| self.handle(index, state.slots[index].generation))
    }

    /// Whether `handle` refers to a node still linked into this list
    pub fn contains(&self, handle: NodeHandle) -> bool {
        lock(&self.state).is_live(self.id, &handle)
    }

    pub fn len(&self) -> usize {
        lock(&self.state).len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn handle(&self, index: usize, generation: u64) -> NodeHandle {
        NodeHandle {
            list_id: self.id,
            index,
            generation,
        }
    }

    fn expect_live(&self, state: &ListState<T>, handle: &NodeHandle, op: &str) {
        if !state.is_live(self.id, handle) {
            panic!(
                "ThreadSafeList::{} called with a node that is not in this list ({:?})",
                op, handle
            );
        }
    }
}

impl<T: Clone> ThreadSafeList<T> {
    /// Point-in-time copy of the values, head to tail
    pub fn convert_to_array(&self) -> Vec<T> {
        let state = lock(&self.state);
        let mut values = Vec::with_capacity(state.len);
        let mut cursor = state.head;
        while let Some(index) = cursor {
            let Some(entry) = state.entry(index) else {
                break;
            };
            values.push(entry.value.clone());
            cursor = entry.next;
        }
        values
    }

    /// Point-in-time copy of handles and values, head to tail
    pub fn entries(&self) -> Vec<(NodeHandle, T)> {
        let state = lock(&self.state);
        let mut values = Vec::with_capacity(state.len);
        let mut cursor = state.head;
        while let Some(index) = cursor {
            let Some(entry) = state.entry(index) else {
                break;
            };
            values.push((
                self.handle(index, state.slots[index].generation),
                entry.value.clone(),
            ));
            cursor = entry.next;
        }
        values
    }

    /// Clone of the value behind `handle`, if it is still in the list
    pub fn get(&self, handle: NodeHandle) -> Option<T> {
        let state = lock(&self.state);
        if !state.is_live(self.id, &handle) {
            return None;
        }
        state.entry(handle.index).map(|e| e.value.clone())
    }
}

impl<T> Default for ThreadSafeList<T> {
    fn default() -> Self {
        Self::new()
    }
}
