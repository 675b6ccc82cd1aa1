//! The versioned free-slot list backing entity and component storage.
//!
//! Slots are doubly linked through indexes, so an `(index, version)` pair is
//! a stable handle: the slot keeps its index for as long as anyone may still
//! hold a handle to it. Removal is two-phase. First the slot is *orphaned* —
//! it stays linked and addressable but traversal skips it — and only a later
//! [`FreeList::collect`] pass physically unlinks it and pushes it onto the
//! free chain, bumping its version so stale handles stop resolving.
//!
//! Every mutation bumps the list-wide version. Snapshot readers capture it,
//! collect, and re-validate their handles before trusting them.

const NIL: usize = usize::MAX;

/// Stable handle to one slot: index plus the version the slot had when the
/// handle was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
  pub index: usize,
  pub version: u64,
}

#[derive(Debug)]
struct Slot<T> {
  value: Option<T>,
  version: u64,
  prev: usize,
  next: usize,
  orphan: bool,
}

/// Doubly-linked list over a slab of versioned slots with a free chain.
#[derive(Debug)]
pub struct FreeList<T> {
  slots: Vec<Slot<T>>,
  head: usize,
  tail: usize,
  free_head: usize,
  len: usize,
  orphans: usize,
  version: u64,
}

impl<T> FreeList<T> {
  pub fn new() -> Self {
    FreeList {
      slots: Vec::new(),
      head: NIL,
      tail: NIL,
      free_head: NIL,
      len: 0,
      orphans: 0,
      version: 0,
    }
  }

  /// The list-wide mutation version.
  pub fn version(&self) -> u64 {
    self.version
  }

  /// Linked slots, orphans included.
  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.live_len() == 0
  }

  /// Linked slots that have not been orphaned.
  pub fn live_len(&self) -> usize {
    self.len - self.orphans
  }

  pub fn orphan_count(&self) -> usize {
    self.orphans
  }

  fn alloc_slot(&mut self) -> usize {
    match self.free_head {
      NIL => {
        self.slots.push(Slot {
          value: None,
          version: 0,
          prev: NIL,
          next: NIL,
          orphan: false,
        });
        self.slots.len() - 1
      }
      idx => {
        self.free_head = self.slots[idx].next;
        idx
      }
    }
  }

  fn link(&mut self, idx: usize, after: usize) {
    self.version += 1;

    let next = if after == NIL {
      let old_head = self.head;
      self.head = idx;
      old_head
    } else {
      let n = self.slots[after].next;
      self.slots[after].next = idx;
      n
    };

    if next == NIL {
      self.tail = idx;
    } else {
      self.slots[next].prev = idx;
    }

    let slot = &mut self.slots[idx];
    slot.prev = after;
    slot.next = next;
    slot.version = self.version;
    slot.orphan = false;
    self.len += 1;
  }

  /// Append at the tail.
  pub fn push_back(&mut self, value: T) -> SlotKey {
    let idx = self.alloc_slot();
    let after = self.tail;
    self.slots[idx].value = Some(value);
    self.link(idx, after);
    SlotKey {
      index: idx,
      version: self.slots[idx].version,
    }
  }

  /// Insert right after a linked slot. Returns `None` if `after` is not a
  /// linked slot.
  pub fn insert_after(&mut self, after: usize, value: T) -> Option<SlotKey> {
    if !self.is_linked(after) {
      return None;
    }
    let idx = self.alloc_slot();
    self.slots[idx].value = Some(value);
    self.link(idx, after);
    Some(SlotKey {
      index: idx,
      version: self.slots[idx].version,
    })
  }

  fn is_linked(&self, idx: usize) -> bool {
    idx < self.slots.len() && self.slots[idx].value.is_some()
  }

  /// The value at `idx`, orphaned or not.
  pub fn peek(&self, idx: usize) -> Option<&T> {
    self.slots.get(idx).and_then(|s| s.value.as_ref())
  }

  /// The value a handle points at, if the slot still carries that version
  /// and has not been orphaned.
  pub fn value(&self, key: SlotKey) -> Option<&T> {
    let slot = self.slots.get(key.index)?;
    if slot.orphan || slot.version != key.version {
      return None;
    }
    slot.value.as_ref()
  }

  /// Whether a handle still resolves to a live slot.
  pub fn contains(&self, key: SlotKey) -> bool {
    self.value(key).is_some()
  }

  pub fn is_orphan(&self, idx: usize) -> bool {
    self.slots.get(idx).map(|s| s.orphan).unwrap_or(false)
  }

  pub fn slot_version(&self, idx: usize) -> Option<u64> {
    self.slots.get(idx).map(|s| s.version)
  }

  /// First live slot.
  pub fn head(&self) -> Option<usize> {
    match self.head {
      NIL => None,
      idx if self.slots[idx].orphan => self.next(idx),
      idx => Some(idx),
    }
  }

  /// Last live slot.
  pub fn tail(&self) -> Option<usize> {
    match self.tail {
      NIL => None,
      idx if self.slots[idx].orphan => self.prev(idx),
      idx => Some(idx),
    }
  }

  /// Next live slot after `idx`, skipping orphans.
  pub fn next(&self, idx: usize) -> Option<usize> {
    let mut cur = self.slots.get(idx)?.next;
    while cur != NIL {
      if !self.slots[cur].orphan {
        return Some(cur);
      }
      cur = self.slots[cur].next;
    }
    None
  }

  /// Previous live slot before `idx`, skipping orphans.
  pub fn prev(&self, idx: usize) -> Option<usize> {
    let mut cur = self.slots.get(idx)?.prev;
    while cur != NIL {
      if !self.slots[cur].orphan {
        return Some(cur);
      }
      cur = self.slots[cur].prev;
    }
    None
  }

  /// Mark a linked slot as removed without unlinking it. Traversal skips it
  /// from now on; the slot is reclaimed by the next [`collect`](Self::collect).
  pub fn orphan(&mut self, idx: usize) -> bool {
    if !self.is_linked(idx) || self.slots[idx].orphan {
      return false;
    }
    self.version += 1;
    self.slots[idx].orphan = true;
    self.orphans += 1;
    true
  }

  /// Orphan only if the handle still matches the slot.
  pub fn orphan_if(&mut self, key: SlotKey) -> bool {
    match self.slots.get(key.index) {
      Some(s) if s.version == key.version && !s.orphan => self.orphan(key.index),
      _ => false,
    }
  }

  /// Physically unlink every orphaned slot and push it onto the free chain.
  /// Returns the values that were reclaimed.
  pub fn collect(&mut self) -> Vec<T> {
    if self.orphans == 0 {
      return Vec::new();
    }

    let mut freed = Vec::with_capacity(self.orphans);
    let mut cur = self.head;
    while cur != NIL {
      let next = self.slots[cur].next;
      if self.slots[cur].orphan {
        self.unlink(cur);
        if let Some(v) = self.slots[cur].value.take() {
          freed.push(v);
        }
        self.version += 1;
        let slot = &mut self.slots[cur];
        slot.version = self.version;
        slot.orphan = false;
        slot.next = self.free_head;
        slot.prev = NIL;
        self.free_head = cur;
      }
      cur = next;
    }
    self.orphans = 0;
    freed
  }

  fn unlink(&mut self, idx: usize) {
    let (prev, next) = {
      let s = &self.slots[idx];
      (s.prev, s.next)
    };
    if prev == NIL {
      self.head = next;
    } else {
      self.slots[prev].next = next;
    }
    if next == NIL {
      self.tail = prev;
    } else {
      self.slots[next].prev = prev;
    }
    self.len -= 1;
  }

  /// Whether any slot is waiting for a collect pass.
  pub fn needs_collect(&self) -> bool {
    self.orphans > 0
  }

  /// Iterate live slots in list order. The borrow makes this unsuitable for
  /// re-entrant visitors; those step through [`head`](Self::head) /
  /// [`next`](Self::next) by hand instead.
  pub fn iter(&self) -> FreeListIter<'_, T> {
    FreeListIter {
      list: self,
      cur: self.head(),
    }
  }

  /// Snapshot of every live `(index, version)` handle in order.
  pub fn keys(&self) -> Vec<SlotKey> {
    self
      .iter()
      .map(|(idx, _)| SlotKey {
        index: idx,
        version: self.slots[idx].version,
      })
      .collect()
  }
}

impl<T> Default for FreeList<T> {
  fn default() -> Self {
    Self::new()
  }
}

pub struct FreeListIter<'a, T> {
  list: &'a FreeList<T>,
  cur: Option<usize>,
}

impl<'a, T> Iterator for FreeListIter<'a, T> {
  type Item = (usize, &'a T);

  fn next(&mut self) -> Option<Self::Item> {
    let idx = self.cur?;
    self.cur = self.list.next(idx);
    let value = self.list.slots[idx].value.as_ref()?;
    Some((idx, value))
  }
}
