//! Process-unique identifiers for entities and components.

use std::cell::Cell;
use std::fmt;

/// An identifier issued by a [`Context`](crate::context::Context)'s
/// monotonic counter. Unique within the process for the lifetime of that
/// context; never reused.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Id(u64);

impl Id {
  /// The nil id. Doubles as the synthetic root of the entity forest: every
  /// true root's parent slot points here.
  pub const NIL: Id = Id(0);

  pub const fn from_raw(raw: u64) -> Self {
    Id(raw)
  }

  pub const fn as_u64(self) -> u64 {
    self.0
  }

  pub const fn is_nil(self) -> bool {
    self.0 == 0
  }
}

impl fmt::Debug for Id {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Id({})", self.0)
  }
}

impl fmt::Display for Id {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// The per-context counter behind [`Context::next_id`].
///
/// Lives on the worker and is never shared, so a plain `Cell` suffices.
pub(crate) struct IdGenerator {
  next: Cell<u64>,
}

impl IdGenerator {
  pub fn new() -> Self {
    IdGenerator { next: Cell::new(1) }
  }

  pub fn next_id(&self) -> Id {
    let id = self.next.get();
    self.next.set(id + 1);
    Id(id)
  }

  /// Bump the counter past an externally supplied id so later generated ids
  /// stay unique.
  pub fn reserve(&self, id: Id) {
    if id.0 >= self.next.get() {
      self.next.set(id.0 + 1);
    }
  }
}
