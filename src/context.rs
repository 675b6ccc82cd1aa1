//! The per-runtime shared root.
//!
//! A [`Context`] owns everything a runtime's worker touches: the entity
//! manager, the prototype libraries, the add-in manager, the id generator,
//! the managed pools, the GC list, the running-event stream and the frame.
//! One context pairs with exactly one [`Runtime`](crate::runtime::Runtime).

use std::cell::{Cell, Ref, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender};
use smol_str::SmolStr;

use crate::addin::AddInManager;
use crate::call::{make_call, CallRet, Task, TerminatedWait, Terminator};
use crate::entity::Entity;
use crate::errors::{CallError, PanicReport};
use crate::event::{Event, EventOptions, EventRecursion};
use crate::frame::Frame;
use crate::id::{Id, IdGenerator};
use crate::manager::EntityManager;
use crate::pool::{ManagedPool, Pooled};
use crate::pt::EntityLib;

/// Milestones of a running runtime, emitted on the context's running-event
/// stream. Add-ins and embedders subscribe to observe the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunningEvent {
  /// The context paired with a runtime.
  Birth,
  Starting,
  Started,
  FrameLoopBegin,
  FrameUpdateBegin,
  FrameUpdateEnd,
  FrameLoopEnd,
  RunCallBegin,
  RunCallEnd,
  RunGCBegin,
  RunGCEnd,
  Terminating,
  Terminated,
  EntityPTDeclared(SmolStr),
  ComponentPTDeclared(SmolStr),
  AddInActivating(SmolStr),
  AddInActivatingDone(SmolStr),
  AddInActivatingAborted(SmolStr),
  AddInDeactivating(SmolStr),
  AddInDeactivatingDone(SmolStr),
}

/// Anything the scheduler's GC phase can sweep.
pub trait Gc {
  /// Whether a sweep would reclaim anything.
  fn need_gc(&self) -> bool;
  /// Reclaim.
  fn gc(&self);
}

impl Gc for Entity {
  fn need_gc(&self) -> bool {
    self.comps.borrow().needs_collect()
  }

  fn gc(&self) {
    self.run_gc();
  }
}

/// Structural mutations requested mid-callback, applied at the next safe
/// point (never while the requesting callback is on the stack).
pub(crate) enum Deferred {
  Despawn(Id),
  RemoveComponent { entity: Id, comp: Id },
}

/// Construction options for [`Context::new`].
#[derive(Clone, Default)]
pub struct ContextOptions {
  /// Recover panics thrown by user callbacks instead of letting them abort
  /// the worker.
  pub auto_recover: bool,
  /// Sink for recovered panics.
  pub report_error: Option<Sender<PanicReport>>,
}

/// The per-runtime shared state.
pub struct Context {
  auto_recover: bool,
  report: Option<Sender<PanicReport>>,
  ids: IdGenerator,
  manager: EntityManager,
  entity_lib: EntityLib,
  addins: AddInManager,
  id_buffers: ManagedPool<Vec<Id>>,
  gc_list: RefCell<Vec<Rc<dyn Gc>>>,
  running: Event<RunningEvent>,
  frame: RefCell<Option<Frame>>,
  callee: RefCell<Option<Sender<Task>>>,
  lazy_tx: Sender<Deferred>,
  lazy_rx: Receiver<Deferred>,
  terminator: RefCell<Option<Arc<Terminator>>>,
  paired: Cell<bool>,
}

impl Context {
  pub fn new(opts: ContextOptions) -> Rc<Context> {
    let event_opts = EventOptions {
      auto_recover: opts.auto_recover,
      report: opts.report_error.clone(),
      recursion: EventRecursion::Allow,
    };
    let (lazy_tx, lazy_rx) = channel::unbounded();

    let ctx = Rc::new(Context {
      auto_recover: opts.auto_recover,
      report: opts.report_error,
      ids: IdGenerator::new(),
      manager: EntityManager::new(&event_opts),
      entity_lib: EntityLib::new(&event_opts),
      addins: AddInManager::new(&event_opts),
      id_buffers: ManagedPool::new(),
      gc_list: RefCell::new(Vec::new()),
      running: Event::new(event_opts),
      frame: RefCell::new(None),
      callee: RefCell::new(None),
      lazy_tx,
      lazy_rx,
      terminator: RefCell::new(None),
      paired: Cell::new(false),
    });
    ctx.manager.set_context(&ctx);
    ctx
  }

  pub fn auto_recover(&self) -> bool {
    self.auto_recover
  }

  pub fn report_error(&self) -> Option<&Sender<PanicReport>> {
    self.report.as_ref()
  }

  /// The canonical event settings for subsystems of this context.
  pub fn event_options(&self, recursion: EventRecursion) -> EventOptions {
    EventOptions {
      auto_recover: self.auto_recover,
      report: self.report.clone(),
      recursion,
    }
  }

  pub fn next_id(&self) -> Id {
    self.ids.next_id()
  }

  pub(crate) fn reserve_id(&self, id: Id) {
    self.ids.reserve(id);
  }

  pub fn entity_manager(&self) -> &EntityManager {
    &self.manager
  }

  pub fn entity_lib(&self) -> &EntityLib {
    &self.entity_lib
  }

  pub fn add_in_manager(&self) -> &AddInManager {
    &self.addins
  }

  /// The running-event stream; see [`RunningEvent`].
  pub fn running_event(&self) -> &Event<RunningEvent> {
    &self.running
  }

  pub(crate) fn emit_running(&self, ev: RunningEvent) {
    self.running.emit(&ev);
  }

  /// The frame installed by the paired runtime, if it runs one.
  pub fn frame(&self) -> Ref<'_, Option<Frame>> {
    self.frame.borrow()
  }

  pub(crate) fn set_frame(&self, frame: Option<Frame>) {
    *self.frame.borrow_mut() = frame;
  }

  /// Register an object for the next GC sweep. The list is drained once per
  /// sweep; producers re-register when they get dirty again.
  pub fn collect_gc(&self, obj: Rc<dyn Gc>) {
    self.gc_list.borrow_mut().push(obj);
  }

  pub(crate) fn drain_gc_list(&self) -> Vec<Rc<dyn Gc>> {
    std::mem::take(&mut *self.gc_list.borrow_mut())
  }

  /// Pooled scratch buffer for id snapshots.
  pub(crate) fn id_buffer(&self) -> Pooled<Vec<Id>> {
    self.id_buffers.get()
  }

  pub(crate) fn id_buffer_pool(&self) -> &ManagedPool<Vec<Id>> {
    &self.id_buffers
  }

  // ---- deferred structural mutation ----

  pub(crate) fn defer_despawn(&self, id: Id) {
    let _ = self.lazy_tx.send(Deferred::Despawn(id));
  }

  pub(crate) fn defer_remove_component(&self, entity: Id, comp: Id) {
    let _ = self.lazy_tx.send(Deferred::RemoveComponent { entity, comp });
  }

  /// Apply every deferred destroy-self request. The scheduler calls this
  /// after each user callback; embedders driving a context without a
  /// runtime call it by hand.
  pub fn finalize(&self) {
    while let Ok(op) = self.lazy_rx.try_recv() {
      match op {
        Deferred::Despawn(id) => self.manager.remove_entity(id),
        Deferred::RemoveComponent { entity, comp } => {
          if let Some(entity) = self.manager.get_entity(entity) {
            entity.remove_component_by_id(comp);
          }
        }
      }
    }
  }

  // ---- the cooperative-call seam ----

  pub(crate) fn set_callee(&self, callee: Option<Sender<Task>>) {
    *self.callee.borrow_mut() = callee;
  }

  /// Queue a closure onto the paired runtime's task pipeline and get a
  /// future for its return value. Usable from inside the worker; external
  /// threads use [`RuntimeHandle::call`](crate::runtime::RuntimeHandle::call).
  pub fn call<R, F>(&self, f: F) -> CallRet<R>
  where
    R: Send + 'static,
    F: FnOnce(&Rc<Context>) -> R + Send + 'static,
  {
    let callee = self.callee.borrow().clone();
    match callee {
      None => CallRet::failed(CallError::Terminated),
      Some(tx) => {
        let (task, ret) = make_call(f);
        // Never block here: this path runs on the worker itself, and a
        // blocking send on a full queue would deadlock the only consumer.
        match tx.try_send(task) {
          Ok(()) => ret,
          Err(channel::TrySendError::Full(_)) => {
            CallRet::failed(CallError::QueueFull)
          }
          Err(channel::TrySendError::Disconnected(_)) => {
            CallRet::failed(CallError::Terminated)
          }
        }
      }
    }
  }

  /// [`call`](Self::call) without a return value.
  pub fn call_void<F>(&self, f: F) -> CallRet<()>
  where
    F: FnOnce(&Rc<Context>) + Send + 'static,
  {
    self.call(f)
  }

  // ---- termination ----

  pub(crate) fn set_terminator(&self, term: Arc<Terminator>) {
    *self.terminator.borrow_mut() = Some(term);
  }

  /// Request graceful termination of the paired runtime. Returns a handle
  /// resolving once the worker has fully wound down, or `None` when no
  /// runtime is paired yet.
  pub fn terminate(&self) -> Option<TerminatedWait> {
    let term = self.terminator.borrow().clone()?;
    term.request();
    Some(term.wait_handle())
  }

  pub fn is_terminating(&self) -> bool {
    self
      .terminator
      .borrow()
      .as_ref()
      .map(|t| t.is_requested())
      .unwrap_or(false)
  }

  pub(crate) fn pair(&self) -> bool {
    !self.paired.replace(true)
  }
}
