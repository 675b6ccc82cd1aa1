//! Typed multicast events with re-entrancy policies.
//!
//! An [`Event<A>`] delivers `&A` to every bound handler in insertion order
//! (or priority order, see [`Event::bind_with_priority`]). Handlers may bind
//! and unbind subscribers — including themselves — *during* emission: a
//! handler bound mid-emit is not seen by the running emit, and an unbound
//! slot is skipped but not reclaimed until the next sweep, so no iterator is
//! ever invalidated.
//!
//! What happens when an emit re-enters the same event on the same worker is
//! governed by the [`EventRecursion`] policy the event was opened with.

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use crossbeam::channel::Sender;

use crate::errors::{panic_message, PanicReport};

/// How a nested emit of an already-emitting event is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventRecursion {
  /// Re-enter normally; the inner emit completes before the outer resumes.
  #[default]
  Allow,
  /// Fail loudly: the inner emit is aborted and an error is reported.
  Disallow,
  /// The inner emit silently delivers to nobody.
  Discard,
  /// The inner emit delivers, then the enclosing emit stops early.
  Truncate,
  /// Only the deepest emit delivers; every enclosing emit stops early.
  Deepest,
}

/// Settings an event is opened with. Subsystems get theirs from
/// [`Context::event_options`](crate::context::Context::event_options) so the
/// whole runtime shares one recovery configuration.
#[derive(Clone, Default)]
pub struct EventOptions {
  pub auto_recover: bool,
  pub report: Option<Sender<PanicReport>>,
  pub recursion: EventRecursion,
}

impl EventOptions {
  pub fn with_recursion(recursion: EventRecursion) -> Self {
    EventOptions {
      recursion,
      ..Default::default()
    }
  }
}

struct HookSlot<A> {
  seq: u64,
  priority: i32,
  handler: Option<Rc<dyn Fn(&A)>>,
}

struct EventCore<A> {
  slots: RefCell<Vec<HookSlot<A>>>,
  seq: Cell<u64>,
  depth: Cell<u32>,
  /// How many enclosing emit frames still have to stop early.
  cut: Cell<u32>,
  /// Unbound slots waiting for a sweep.
  holes: Cell<usize>,
  open: Cell<bool>,
  opts: EventOptions,
}

trait HookTarget {
  fn unbind_slot(&self, seq: u64);
  fn slot_bound(&self, seq: u64) -> bool;
}

impl<A: 'static> HookTarget for EventCore<A> {
  fn unbind_slot(&self, seq: u64) {
    let mut slots = self.slots.borrow_mut();
    if let Some(slot) = slots.iter_mut().find(|s| s.seq == seq) {
      if slot.handler.take().is_some() {
        self.holes.set(self.holes.get() + 1);
      }
    }
  }

  fn slot_bound(&self, seq: u64) -> bool {
    self
      .slots
      .borrow()
      .iter()
      .any(|s| s.seq == seq && s.handler.is_some())
  }
}

/// A subscription token: one handler bound to one event.
///
/// Unbinding is idempotent, and a hook may outlive its event — unbinding
/// then is a no-op.
pub struct Hook {
  target: Weak<dyn HookTarget>,
  seq: u64,
}

impl Hook {
  /// A hook bound to nothing. Returned by binds on closed events.
  pub fn dead() -> Hook {
    Hook {
      target: Weak::<EventCore<()>>::new(),
      seq: 0,
    }
  }

  pub fn unbind(&self) {
    if let Some(target) = self.target.upgrade() {
      target.unbind_slot(self.seq);
    }
  }

  pub fn is_bound(&self) -> bool {
    self
      .target
      .upgrade()
      .map(|t| t.slot_bound(self.seq))
      .unwrap_or(false)
  }
}

impl std::fmt::Debug for Hook {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Hook")
      .field("seq", &self.seq)
      .field("bound", &self.is_bound())
      .finish()
  }
}

/// A typed multicast event.
///
/// Cloning is shallow: clones share the subscriber list, like the event
/// handle it is.
pub struct Event<A> {
  core: Rc<EventCore<A>>,
}

impl<A> Clone for Event<A> {
  fn clone(&self) -> Self {
    Event {
      core: self.core.clone(),
    }
  }
}

impl<A: 'static> Event<A> {
  pub fn new(opts: EventOptions) -> Self {
    Event {
      core: Rc::new(EventCore {
        slots: RefCell::new(Vec::new()),
        seq: Cell::new(0),
        depth: Cell::new(0),
        cut: Cell::new(0),
        holes: Cell::new(0),
        open: Cell::new(true),
        opts,
      }),
    }
  }

  pub fn is_open(&self) -> bool {
    self.core.open.get()
  }

  /// Append a handler at the end of the subscriber list.
  pub fn bind(&self, handler: impl Fn(&A) + 'static) -> Hook {
    self.bind_slot(handler, None)
  }

  /// Insert a handler by priority. Slots are kept ascending by priority;
  /// equal priorities keep their insertion order.
  pub fn bind_with_priority(
    &self,
    handler: impl Fn(&A) + 'static,
    priority: i32,
  ) -> Hook {
    self.bind_slot(handler, Some(priority))
  }

  fn bind_slot(
    &self,
    handler: impl Fn(&A) + 'static,
    priority: Option<i32>,
  ) -> Hook {
    if !self.core.open.get() {
      return Hook::dead();
    }

    let seq = self.core.seq.get() + 1;
    self.core.seq.set(seq);

    let mut slots = self.core.slots.borrow_mut();
    let slot = HookSlot {
      seq,
      priority: priority.unwrap_or(0),
      handler: Some(Rc::new(handler)),
    };
    match priority {
      None => slots.push(slot),
      Some(p) => {
        let at = slots.partition_point(|s| s.priority <= p);
        slots.insert(at, slot);
      }
    }
    drop(slots);

    Hook {
      target: Rc::downgrade(&self.core) as Weak<dyn HookTarget>,
      seq,
    }
  }

  /// Deliver `args` to every bound handler in order.
  pub fn emit(&self, args: &A) {
    self.emit_inner(args, None);
  }

  /// Like [`emit`](Self::emit), but `stop` is evaluated after every handler;
  /// once it returns true the remaining handlers are skipped.
  pub fn emit_with_stop(&self, args: &A, stop: impl Fn(&A) -> bool) {
    self.emit_inner(args, Some(&stop));
  }

  fn emit_inner(&self, args: &A, stop: Option<&dyn Fn(&A) -> bool>) {
    let core = &*self.core;
    if !core.open.get() {
      return;
    }

    let reentered = core.depth.get() > 0;
    if reentered {
      match core.opts.recursion {
        EventRecursion::Allow => {}
        EventRecursion::Disallow => {
          tracing::warn!("re-entrant emit aborted by Disallow policy");
          if let Some(report) = &core.opts.report {
            let _ = report.send(PanicReport::new(
              "event emit",
              "re-entrant emit disallowed".to_owned(),
            ));
          }
          return;
        }
        EventRecursion::Discard => return,
        EventRecursion::Truncate | EventRecursion::Deepest => {}
      }
    }

    core.depth.set(core.depth.get() + 1);

    // Snapshot the subscriber order by seq. Handlers bound during this emit
    // are not in the snapshot and are only seen by the next one; handlers
    // unbound during it stop resolving. Resolving by seq keeps the walk
    // stable even when a priority bind shifts the slot vector mid-emit.
    let mut cut_short = false;
    let order: Vec<u64> =
      core.slots.borrow().iter().map(|s| s.seq).collect();
    for seq in order {
      let handler = {
        let slots = core.slots.borrow();
        slots
          .iter()
          .find(|s| s.seq == seq)
          .and_then(|s| s.handler.clone())
      };

      let Some(handler) = handler else { continue };
      self.invoke(&handler, args);

      if core.cut.get() > 0 {
        core.cut.set(core.cut.get() - 1);
        cut_short = true;
        break;
      }
      if let Some(stop) = stop {
        if stop(args) {
          break;
        }
      }
    }

    core.depth.set(core.depth.get() - 1);

    if reentered {
      match core.opts.recursion {
        // One-shot: only the frame that directly enclosed the re-entry
        // consumes this. A frame that was itself cut short must not re-arm
        // it, or the cut would cascade all the way out like Deepest.
        EventRecursion::Truncate if !cut_short => {
          core.cut.set(core.cut.get().max(1));
        }
        EventRecursion::Deepest => core.cut.set(core.depth.get()),
        _ => {}
      }
    }
    if core.depth.get() == 0 {
      core.cut.set(0);
    }
  }

  fn invoke(&self, handler: &Rc<dyn Fn(&A)>, args: &A) {
    if !self.core.opts.auto_recover {
      handler(args);
      return;
    }

    if let Err(payload) =
      panic::catch_unwind(AssertUnwindSafe(|| handler(args)))
    {
      let message = panic_message(payload.as_ref());
      tracing::warn!(%message, "recovered panic in event handler");
      if let Some(report) = &self.core.opts.report {
        let _ = report.send(PanicReport::new("event handler", message));
      }
    }
  }

  /// Refuse new binds and unbind every subscriber.
  pub fn close(&self) {
    if !self.core.open.replace(false) {
      return;
    }
    let mut holes = 0;
    for slot in self.core.slots.borrow_mut().iter_mut() {
      if slot.handler.take().is_some() {
        holes += 1;
      }
    }
    self.core.holes.set(self.core.holes.get() + holes);
    self.sweep();
  }

  /// Unbound slots waiting to be reclaimed. Sweeping is deferred while an
  /// emit is on the stack.
  pub fn needs_sweep(&self) -> bool {
    self.core.holes.get() > 0 && self.core.depth.get() == 0
  }

  /// Reclaim unbound slots. No-op while an emit is on the stack.
  pub fn sweep(&self) {
    if self.core.depth.get() > 0 || self.core.holes.get() == 0 {
      return;
    }
    self.core.slots.borrow_mut().retain(|s| s.handler.is_some());
    self.core.holes.set(0);
  }

  /// Bound subscriber count.
  pub fn len(&self) -> usize {
    self
      .core
      .slots
      .borrow()
      .iter()
      .filter(|s| s.handler.is_some())
      .count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl<A: 'static> Default for Event<A> {
  fn default() -> Self {
    Event::new(EventOptions::default())
  }
}

/// A bag of hooks whose owner unbinds them all at the end of its life.
#[derive(Default)]
pub struct ManagedHooks {
  hooks: RefCell<Vec<Hook>>,
}

impl ManagedHooks {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn manage(&self, hook: Hook) {
    self.hooks.borrow_mut().push(hook);
  }

  /// Unbind and forget every managed hook.
  pub fn unbind_all(&self) {
    let hooks = std::mem::take(&mut *self.hooks.borrow_mut());
    for hook in &hooks {
      hook.unbind();
    }
  }

  /// Drop hooks that are no longer bound anywhere.
  pub fn compact(&self) {
    self.hooks.borrow_mut().retain(|h| h.is_bound());
  }

  pub fn len(&self) -> usize {
    self.hooks.borrow().len()
  }

  pub fn is_empty(&self) -> bool {
    self.hooks.borrow().is_empty()
  }
}
