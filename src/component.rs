//! Components: named sub-behaviors attached to entities.
//!
//! User types implement [`Component`] and override whichever lifecycle
//! callbacks they care about; the scheduler invokes the overridden ones at
//! the right points of the owning entity's life. The framework-side state of
//! an attached component — id, name, prototype, state machine, enabled and
//! fixed flags — lives in a [`ComponentCell`] wrapping the user payload.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use downcast::{downcast, Any};
use smol_str::SmolStr;

use crate::context::Context;
use crate::entity::Entity;
use crate::event::{Hook, ManagedHooks};
use crate::id::Id;
use crate::list::SlotKey;

/// The state machine of an attached component. Transitions only move
/// forward; an attempt to set an earlier state is silently dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ComponentState {
  /// Freshly constructed, not yet on an entity.
  Birth,
  /// On an entity's component list, not yet woken.
  Attach,
  Awake,
  Start,
  Alive,
  /// Removal has begun; the slot is still addressable.
  Detach,
  Shut,
  Death,
}

impl fmt::Display for ComponentState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      ComponentState::Birth => "birth",
      ComponentState::Attach => "attach",
      ComponentState::Awake => "awake",
      ComponentState::Start => "start",
      ComponentState::Alive => "alive",
      ComponentState::Detach => "detach",
      ComponentState::Shut => "shut",
      ComponentState::Death => "death",
    };
    f.write_str(s)
  }
}

/// What a lifecycle callback can reach: the runtime context, the owning
/// entity, and (for component callbacks) the component's own cell.
pub struct Access<'a> {
  ctx: &'a Rc<Context>,
  entity: &'a Rc<Entity>,
  cell: Option<&'a Rc<ComponentCell>>,
}

impl<'a> Access<'a> {
  pub(crate) fn new(
    ctx: &'a Rc<Context>,
    entity: &'a Rc<Entity>,
    cell: Option<&'a Rc<ComponentCell>>,
  ) -> Self {
    Access { ctx, entity, cell }
  }

  pub fn context(&self) -> &Rc<Context> {
    self.ctx
  }

  /// The entity the callback is running under.
  pub fn entity(&self) -> &Rc<Entity> {
    self.entity
  }

  /// The cell of the component the callback is running on. `None` for
  /// entity-level callbacks.
  pub fn this(&self) -> Option<&Rc<ComponentCell>> {
    self.cell
  }

  /// Request removal of the component this callback runs on (or of the
  /// entity, for entity-level callbacks). Applied at the next safe point,
  /// never mid-callback.
  pub fn destroy_self(&self) {
    match self.cell {
      Some(cell) => cell.destroy_self(),
      None => self.entity.destroy_self(),
    }
  }
}

/// A user-defined component behavior.
///
/// Every callback has a default empty body; implement the ones the
/// component needs. All of them run on the runtime's single worker.
pub trait Component: Any {
  fn awake(&mut self, access: &Access<'_>) {
    let _ = access;
  }

  fn start(&mut self, access: &Access<'_>) {
    let _ = access;
  }

  /// Called once per frame, in component insertion order within the entity.
  fn update(&mut self, access: &Access<'_>) {
    let _ = access;
  }

  /// Called once per frame after *every* component's `update` has run.
  fn late_update(&mut self, access: &Access<'_>) {
    let _ = access;
  }

  fn shut(&mut self, access: &Access<'_>) {
    let _ = access;
  }

  fn dispose(&mut self, access: &Access<'_>) {
    let _ = access;
  }

  fn on_enable(&mut self, access: &Access<'_>) {
    let _ = access;
  }

  fn on_disable(&mut self, access: &Access<'_>) {
    let _ = access;
  }
}

downcast!(dyn Component);

/// Framework-side state of one attached component.
pub struct ComponentCell {
  id: Cell<Id>,
  name: RefCell<SmolStr>,
  prototype: SmolStr,
  state: Cell<ComponentState>,
  /// Whether the state machine ever reached `awake`; decides if shut and
  /// dispose callbacks are owed.
  woken: Cell<bool>,
  enabled: Cell<bool>,
  fixed: Cell<bool>,
  payload: RefCell<Box<dyn Component>>,
  owner: RefCell<Weak<Entity>>,
  attached: Cell<SlotKey>,
  hooks: ManagedHooks,
}

impl ComponentCell {
  /// Wrap a user component under a name. The cell starts in `birth` with no
  /// owner; attach it with
  /// [`Entity::add_component`](crate::entity::Entity::add_component).
  pub fn new(
    name: impl Into<SmolStr>,
    prototype: impl Into<SmolStr>,
    payload: Box<dyn Component>,
  ) -> Rc<ComponentCell> {
    Rc::new(ComponentCell {
      id: Cell::new(Id::NIL),
      name: RefCell::new(name.into()),
      prototype: prototype.into(),
      state: Cell::new(ComponentState::Birth),
      woken: Cell::new(false),
      enabled: Cell::new(true),
      fixed: Cell::new(false),
      payload: RefCell::new(payload),
      owner: RefCell::new(Weak::new()),
      attached: Cell::new(SlotKey {
        index: usize::MAX,
        version: 0,
      }),
      hooks: ManagedHooks::new(),
    })
  }

  /// Shorthand for wrapping a concrete component type, naming it after the
  /// type unless a name is given.
  pub fn wrap<C: Component>(
    component: C,
    name: Option<&str>,
  ) -> Rc<ComponentCell> {
    let prototype = std::any::type_name::<C>();
    let short = prototype.rsplit("::").next().unwrap_or(prototype);
    ComponentCell::new(
      name.unwrap_or(short),
      prototype,
      Box::new(component),
    )
  }

  pub fn id(&self) -> Id {
    self.id.get()
  }

  /// The user-given name. Multiple components on one entity may share a
  /// name; they form one contiguous run in the component list.
  pub fn name(&self) -> SmolStr {
    self.name.borrow().clone()
  }

  pub fn prototype(&self) -> &SmolStr {
    &self.prototype
  }

  pub fn state(&self) -> ComponentState {
    self.state.get()
  }

  pub fn is_fixed(&self) -> bool {
    self.fixed.get()
  }

  pub fn is_enabled(&self) -> bool {
    self.enabled.get()
  }

  /// The entity this component is attached to, if it is attached and the
  /// entity is still alive somewhere.
  pub fn owner(&self) -> Option<Rc<Entity>> {
    self.owner.borrow().upgrade()
  }

  /// Toggle the enabled flag. Setting the current value again is a no-op:
  /// no event fires and no callback runs.
  pub fn set_enabled(self: &Rc<Self>, enabled: bool) {
    if self.enabled.get() == enabled {
      return;
    }
    if self.state.get() > ComponentState::Alive {
      return;
    }
    self.enabled.set(enabled);
    if let Some(owner) = self.owner() {
      owner.on_component_enable_changed(self);
    }
  }

  /// Request removal of this component from its owner. Only acts while the
  /// component is in awake, start or alive; the removal is deferred to the
  /// next safe point.
  pub fn destroy_self(&self) {
    match self.state.get() {
      ComponentState::Awake | ComponentState::Start | ComponentState::Alive => {}
      _ => return,
    }
    if let Some(owner) = self.owner() {
      if let Some(ctx) = owner.context() {
        ctx.defer_remove_component(owner.id(), self.id());
      }
    }
  }

  /// Run a closure over the payload downcast to its concrete type.
  pub fn with<C: Component, R>(&self, f: impl FnOnce(&C) -> R) -> Option<R> {
    let payload = self.payload.try_borrow().ok()?;
    let concrete = payload.downcast_ref::<C>().ok()?;
    Some(f(concrete))
  }

  /// Like [`with`](Self::with), with mutable access.
  pub fn with_mut<C: Component, R>(
    &self,
    f: impl FnOnce(&mut C) -> R,
  ) -> Option<R> {
    let mut payload = self.payload.try_borrow_mut().ok()?;
    let concrete = payload.downcast_mut::<C>().ok()?;
    Some(f(concrete))
  }

  pub fn is<C: Component>(&self) -> bool {
    self
      .payload
      .try_borrow()
      .map(|p| p.downcast_ref::<C>().is_ok())
      .unwrap_or(false)
  }

  /// Keep a hook alive for as long as this component is; all managed hooks
  /// are unbound when the component reaches `death`.
  pub fn manage_hook(&self, hook: Hook) {
    self.hooks.manage(hook);
  }

  // Crate-side accessors used by the component manager and the scheduler.

  pub(crate) fn set_id(&self, id: Id) {
    self.id.set(id);
  }

  pub(crate) fn set_name(&self, name: SmolStr) {
    *self.name.borrow_mut() = name;
  }

  pub(crate) fn set_fixed(&self, fixed: bool) {
    self.fixed.set(fixed);
  }

  /// Advance the state machine. Downgrades are silently dropped.
  pub(crate) fn set_state(&self, state: ComponentState) {
    if state <= self.state.get() {
      return;
    }
    self.state.set(state);
    if state == ComponentState::Awake {
      self.woken.set(true);
    }
    if state == ComponentState::Death {
      self.hooks.unbind_all();
    }
  }

  pub(crate) fn has_woken(&self) -> bool {
    self.woken.get()
  }

  pub(crate) fn set_owner(&self, owner: &Rc<Entity>) {
    *self.owner.borrow_mut() = Rc::downgrade(owner);
  }

  pub(crate) fn attached_key(&self) -> SlotKey {
    self.attached.get()
  }

  pub(crate) fn set_attached_key(&self, key: SlotKey) {
    self.attached.set(key);
  }

  pub(crate) fn compact_hooks(&self) {
    self.hooks.compact();
  }

  /// Borrow the payload mutably for a lifecycle callback. Fails when the
  /// payload is already borrowed, i.e. a callback on this same component is
  /// on the stack.
  pub(crate) fn payload_mut(
    &self,
  ) -> Result<std::cell::RefMut<'_, Box<dyn Component>>, ()> {
    self.payload.try_borrow_mut().map_err(|_| ())
  }
}

impl fmt::Debug for ComponentCell {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ComponentCell")
      .field("id", &self.id.get())
      .field("name", &*self.name.borrow())
      .field("prototype", &self.prototype)
      .field("state", &self.state.get())
      .field("enabled", &self.enabled.get())
      .field("fixed", &self.fixed.get())
      .finish()
  }
}
