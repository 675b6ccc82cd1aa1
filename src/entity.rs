//! Entities: stateful containers of ordered, named components.
//!
//! An [`Entity`] owns its component list (see [`crate::compmgr`] for the
//! list operations), carries a forward-only state machine, and has an
//! orthogonal tree-node state used by the entity forest in
//! [`crate::manager`].

use std::any::Any as StdAny;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use downcast::{downcast, Any};
use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::component::{Access, ComponentCell};
use crate::context::Context;
use crate::event::{Event, EventOptions, EventRecursion, Hook, ManagedHooks};
use crate::id::Id;
use crate::list::FreeList;

/// The entity state machine. Transitions only move forward; setting an
/// earlier state is silently dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntityState {
  /// Constructed, not yet added to a context.
  Birth,
  /// Accepted by the entity manager, lifecycle not yet driven.
  Enter,
  Awake,
  Start,
  Alive,
  /// Removal has begun.
  Leave,
  Shut,
  Death,
}

impl fmt::Display for EntityState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      EntityState::Birth => "birth",
      EntityState::Enter => "enter",
      EntityState::Awake => "awake",
      EntityState::Start => "start",
      EntityState::Alive => "alive",
      EntityState::Leave => "leave",
      EntityState::Shut => "shut",
      EntityState::Death => "death",
    };
    f.write_str(s)
  }
}

/// Where an entity stands relative to the forest. Orthogonal to
/// [`EntityState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeNodeState {
  Detached,
  Attaching,
  Attached,
  Detaching,
}

/// Optional user extension of an entity: the polymorphic face behind the
/// generic [`Entity`] container. Same callback contract as
/// [`Component`](crate::component::Component).
pub trait EntityBehavior: Any {
  fn awake(&mut self, access: &Access<'_>) {
    let _ = access;
  }

  fn start(&mut self, access: &Access<'_>) {
    let _ = access;
  }

  fn update(&mut self, access: &Access<'_>) {
    let _ = access;
  }

  fn late_update(&mut self, access: &Access<'_>) {
    let _ = access;
  }

  fn shut(&mut self, access: &Access<'_>) {
    let _ = access;
  }

  fn dispose(&mut self, access: &Access<'_>) {
    let _ = access;
  }
}

downcast!(dyn EntityBehavior);

/// Arbitrary key/value metadata carried by an entity or prototype.
#[derive(Default, Clone)]
pub struct Meta {
  map: RefCell<IndexMap<SmolStr, Rc<dyn StdAny>>>,
}

impl Meta {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert<V: StdAny>(&self, key: impl Into<SmolStr>, value: V) {
    self.map.borrow_mut().insert(key.into(), Rc::new(value));
  }

  pub fn get<V: StdAny>(&self, key: &str) -> Option<Rc<V>> {
    let v = self.map.borrow().get(key)?.clone();
    v.downcast::<V>().ok()
  }

  pub fn contains(&self, key: &str) -> bool {
    self.map.borrow().contains_key(key)
  }

  pub fn len(&self) -> usize {
    self.map.borrow().len()
  }

  pub fn is_empty(&self) -> bool {
    self.map.borrow().is_empty()
  }

  pub fn keys(&self) -> Vec<SmolStr> {
    self.map.borrow().keys().cloned().collect()
  }

  pub(crate) fn merge_from(&self, other: &Meta) {
    let mut map = self.map.borrow_mut();
    for (k, v) in other.map.borrow().iter() {
      map.entry(k.clone()).or_insert_with(|| v.clone());
    }
  }
}

impl fmt::Debug for Meta {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Meta").field("len", &self.len()).finish()
  }
}

/// Construction options for [`Entity::new`].
#[derive(Default)]
pub struct EntityOptions {
  pub prototype: SmolStr,
  /// Pre-assigned id; `None` lets the context's generator issue one.
  pub persist_id: Option<Id>,
  /// Delay waking each component until it is first accessed.
  pub awake_on_first_touch: bool,
  pub meta: Meta,
  /// The polymorphic face, usually built from the prototype's instance
  /// constructor.
  pub behavior: Option<Box<dyn EntityBehavior>>,
}

/// Args of the add-components event: the entity and the batch just added.
pub type AddComponentsArgs = (Rc<Entity>, Vec<Rc<ComponentCell>>);
/// Args of single-component events (remove, first touch).
pub type ComponentArgs = (Rc<Entity>, Rc<ComponentCell>);
/// Args of the enable-changed event; the bool is the new flag.
pub type EnableChangedArgs = (Rc<Entity>, Rc<ComponentCell>, bool);

/// A named, stateful container of components; the unit of lifecycle and
/// tree placement.
pub struct Entity {
  pub(crate) id: Cell<Id>,
  prototype: SmolStr,
  pub(crate) state: Cell<EntityState>,
  pub(crate) node_state: Cell<TreeNodeState>,
  pub(crate) parent: Cell<Option<Id>>,
  pub(crate) children: RefCell<Vec<Id>>,
  awake_on_first_touch: bool,
  meta: Meta,
  pub(crate) behavior: RefCell<Option<Box<dyn EntityBehavior>>>,
  pub(crate) comps: RefCell<FreeList<Rc<ComponentCell>>>,
  /// Name of each run of same-named components -> index of the run's first
  /// slot.
  pub(crate) name_index: RefCell<IndexMap<SmolStr, usize>>,
  /// Names claimed by fixed components.
  pub(crate) fixed_names: RefCell<Vec<SmolStr>>,
  pub(crate) ctx: RefCell<Weak<Context>>,
  pub(crate) hooks: ManagedHooks,

  // Emitted by the component manager; the entity manager relays them so the
  // scheduler can subscribe in one place.
  pub(crate) ev_add_components: Event<AddComponentsArgs>,
  pub(crate) ev_remove_component: Event<ComponentArgs>,
  pub(crate) ev_first_touch: Event<ComponentArgs>,
  pub(crate) ev_enable_changed: Event<EnableChangedArgs>,
}

impl Entity {
  pub fn new(opts: EntityOptions) -> Rc<Entity> {
    Rc::new(Entity {
      id: Cell::new(opts.persist_id.unwrap_or(Id::NIL)),
      prototype: opts.prototype,
      state: Cell::new(EntityState::Birth),
      node_state: Cell::new(TreeNodeState::Detached),
      parent: Cell::new(None),
      children: RefCell::new(Vec::new()),
      awake_on_first_touch: opts.awake_on_first_touch,
      meta: opts.meta,
      behavior: RefCell::new(opts.behavior),
      comps: RefCell::new(FreeList::new()),
      name_index: RefCell::new(IndexMap::new()),
      fixed_names: RefCell::new(Vec::new()),
      ctx: RefCell::new(Weak::new()),
      hooks: ManagedHooks::new(),
      ev_add_components: Event::new(EventOptions::with_recursion(
        EventRecursion::Allow,
      )),
      ev_remove_component: Event::new(EventOptions::with_recursion(
        EventRecursion::Allow,
      )),
      ev_first_touch: Event::new(EventOptions::with_recursion(
        EventRecursion::Allow,
      )),
      ev_enable_changed: Event::new(EventOptions::with_recursion(
        EventRecursion::Allow,
      )),
    })
  }

  pub fn id(&self) -> Id {
    self.id.get()
  }

  pub fn prototype(&self) -> &SmolStr {
    &self.prototype
  }

  pub fn state(&self) -> EntityState {
    self.state.get()
  }

  pub fn tree_node_state(&self) -> TreeNodeState {
    self.node_state.get()
  }

  /// Id of the parent entity, if attached under one.
  pub fn parent_id(&self) -> Option<Id> {
    self.parent.get()
  }

  /// Ids of the children in attach order.
  pub fn children_ids(&self) -> Vec<Id> {
    self.children.borrow().clone()
  }

  pub fn meta(&self) -> &Meta {
    &self.meta
  }

  pub fn awake_on_first_touch(&self) -> bool {
    self.awake_on_first_touch
  }

  /// The context this entity was added to, while it is still around.
  pub fn context(&self) -> Option<Rc<Context>> {
    self.ctx.borrow().upgrade()
  }

  /// Request removal of this entity (and its subtree). Only acts while the
  /// entity is in awake, start or alive; the removal is deferred to the
  /// next safe point.
  pub fn destroy_self(&self) {
    match self.state.get() {
      EntityState::Awake | EntityState::Start | EntityState::Alive => {}
      _ => return,
    }
    if let Some(ctx) = self.context() {
      ctx.defer_despawn(self.id());
    }
  }

  /// Keep a hook alive for as long as this entity is; all managed hooks are
  /// unbound when the entity reaches `death`.
  pub fn manage_hook(&self, hook: Hook) {
    self.hooks.manage(hook);
  }

  /// Run a closure over the behavior face downcast to its concrete type.
  pub fn with_behavior<B: EntityBehavior, R>(
    &self,
    f: impl FnOnce(&mut B) -> R,
  ) -> Option<R> {
    let mut face = self.behavior.try_borrow_mut().ok()?;
    let concrete = face.as_mut()?.downcast_mut::<B>().ok()?;
    Some(f(concrete))
  }

  /// Advance the state machine. Downgrades are silently dropped.
  pub(crate) fn set_state(&self, state: EntityState) {
    if state <= self.state.get() {
      return;
    }
    self.state.set(state);
    if state == EntityState::Death {
      self.hooks.unbind_all();
    }
  }

  pub(crate) fn set_id(&self, id: Id) {
    self.id.set(id);
  }

  pub(crate) fn set_context(&self, ctx: &Rc<Context>) {
    *self.ctx.borrow_mut() = Rc::downgrade(ctx);
  }

  /// Sweep escaped component slots and unbound event hooks. Runs during the
  /// scheduler's GC phase.
  pub(crate) fn run_gc(&self) {
    self.comps.borrow_mut().collect();
    let comps: Vec<_> =
      self.comps.borrow().iter().map(|(_, c)| c.clone()).collect();
    for comp in comps {
      comp.compact_hooks();
    }
    self.ev_add_components.sweep();
    self.ev_remove_component.sweep();
    self.ev_first_touch.sweep();
    self.ev_enable_changed.sweep();
    self.hooks.compact();
  }

  pub(crate) fn close_events(&self) {
    self.ev_add_components.close();
    self.ev_remove_component.close();
    self.ev_first_touch.close();
    self.ev_enable_changed.close();
  }
}

impl fmt::Debug for Entity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Entity")
      .field("id", &self.id.get())
      .field("prototype", &self.prototype)
      .field("state", &self.state.get())
      .field("node_state", &self.node_state.get())
      .field("parent", &self.parent.get())
      .finish()
  }
}
