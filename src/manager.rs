//! The entity manager: the global entity list and the entity forest.
//!
//! Owns every entity added to a context, keyed by id, ordered by insertion.
//! Tree edges (parent/child) live on the entities themselves; the manager
//! arbitrates the transitions and emits the structural events the scheduler
//! turns into lifecycle callbacks.
//!
//! Per-entity component events are *relayed*: when an entity is added, the
//! manager binds its component-manager events and re-emits them on its own,
//! so the scheduler subscribes in exactly one place.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use ahash::AHashMap;

use crate::context::Context;
use crate::entity::{
  AddComponentsArgs, ComponentArgs, EnableChangedArgs, Entity, EntityState,
  TreeNodeState,
};
use crate::errors::EcError;
use crate::event::{Event, EventOptions, Hook};
use crate::id::Id;
use crate::list::{FreeList, SlotKey};

/// Args of the tree events: `(parent, child)`.
pub type TreeArgs = (Rc<Entity>, Rc<Entity>);

/// The per-context entity store and forest.
pub struct EntityManager {
  list: RefCell<FreeList<Rc<Entity>>>,
  index: RefCell<AHashMap<Id, SlotKey>>,
  roots: RefCell<Vec<Id>>,
  ctx: RefCell<Weak<Context>>,
  relay_hooks: RefCell<AHashMap<Id, Vec<Hook>>>,

  pub(crate) ev_add_entity: Event<Rc<Entity>>,
  pub(crate) ev_remove_entity: Event<Rc<Entity>>,
  pub(crate) ev_add_components: Event<AddComponentsArgs>,
  pub(crate) ev_remove_component: Event<ComponentArgs>,
  pub(crate) ev_first_touch: Event<ComponentArgs>,
  pub(crate) ev_enable_changed: Event<EnableChangedArgs>,
  pub(crate) ev_attach_child: Event<TreeArgs>,
  pub(crate) ev_detach_child: Event<TreeArgs>,
}

impl EntityManager {
  pub(crate) fn new(opts: &EventOptions) -> Self {
    EntityManager {
      list: RefCell::new(FreeList::new()),
      index: RefCell::new(AHashMap::new()),
      roots: RefCell::new(Vec::new()),
      ctx: RefCell::new(Weak::new()),
      relay_hooks: RefCell::new(AHashMap::new()),
      ev_add_entity: Event::new(opts.clone()),
      ev_remove_entity: Event::new(opts.clone()),
      ev_add_components: Event::new(opts.clone()),
      ev_remove_component: Event::new(opts.clone()),
      ev_first_touch: Event::new(opts.clone()),
      ev_enable_changed: Event::new(opts.clone()),
      ev_attach_child: Event::new(opts.clone()),
      ev_detach_child: Event::new(opts.clone()),
    }
  }

  pub(crate) fn set_context(&self, ctx: &Rc<Context>) {
    *self.ctx.borrow_mut() = Rc::downgrade(ctx);
  }

  fn context(&self) -> Rc<Context> {
    self
      .ctx
      .borrow()
      .upgrade()
      .expect("entity manager outlived its context")
  }

  /// Add a birth-state entity to the context, optionally attaching it under
  /// a parent. Returns the id the entity now carries.
  pub fn add_entity(
    &self,
    entity: &Rc<Entity>,
    parent: Option<Id>,
  ) -> Result<Id, EcError> {
    if entity.state() != EntityState::Birth {
      return Err(EcError::EntityNotBirth(entity.state()));
    }

    let ctx = self.context();
    let id = if entity.id().is_nil() {
      ctx.next_id()
    } else {
      ctx.reserve_id(entity.id());
      entity.id()
    };
    if self.index.borrow().contains_key(&id) {
      return Err(EcError::DuplicateId(id));
    }

    let parent_rc = match parent {
      None => None,
      Some(pid) => {
        if pid == id {
          return Err(EcError::SelfParent(id));
        }
        let p = self
          .get_entity(pid)
          .ok_or(EcError::ParentNotFound(pid))?;
        if p.state() > EntityState::Alive {
          return Err(EcError::ParentNotLive {
            id: pid,
            state: p.state(),
          });
        }
        Some(p)
      }
    };

    entity.set_id(id);
    entity.set_context(&ctx);

    // Components attached while the entity was in birth have no ids yet.
    for (_, comp) in entity.comps.borrow().iter() {
      if comp.id().is_nil() {
        comp.set_id(ctx.next_id());
      }
    }

    entity.set_state(EntityState::Enter);
    let key = self.list.borrow_mut().push_back(entity.clone());
    self.index.borrow_mut().insert(id, key);
    self.bind_relays(entity);

    tracing::debug!(%id, prototype = %entity.prototype(), "add entity");
    self
      .ev_add_entity
      .emit_with_stop(entity, |e| e.state() > EntityState::Alive);

    if let Some(parent_rc) = parent_rc {
      self.attach(&parent_rc, entity);
    }

    Ok(id)
  }

  /// Remove an entity and its whole subtree. Idempotent: removing a dead or
  /// unknown id does nothing.
  pub fn remove_entity(&self, id: Id) {
    let Some(entity) = self.get_entity(id) else {
      return;
    };
    if entity.state() >= EntityState::Leave {
      return;
    }
    entity.set_state(EntityState::Leave);

    // Children go first, depth-first in attach order, so the observable
    // removal order of a subtree is grandchildren, their parent, the next
    // child, and the subtree root last.
    for child in entity.children_ids() {
      self.remove_entity(child);
    }

    self.detach_inner(&entity);

    tracing::debug!(%id, "remove entity");
    self.ev_remove_entity.emit(&entity);

    // Terminal state regardless of whether a scheduler drove the shut walk;
    // this also unbinds the entity's managed hooks.
    entity.set_state(EntityState::Death);
    entity.close_events();

    if let Some(hooks) = self.relay_hooks.borrow_mut().remove(&id) {
      for hook in &hooks {
        hook.unbind();
      }
    }

    if let Some(key) = self.index.borrow_mut().remove(&id) {
      self.list.borrow_mut().orphan_if(key);
    }
    self.roots.borrow_mut().retain(|r| *r != id);
  }

  pub fn get_entity(&self, id: Id) -> Option<Rc<Entity>> {
    let key = *self.index.borrow().get(&id)?;
    self.list.borrow().value(key).cloned()
  }

  pub fn contains_entity(&self, id: Id) -> bool {
    self.index.borrow().contains_key(&id)
  }

  pub fn count_entities(&self) -> usize {
    self.list.borrow().live_len()
  }

  /// Ids of every live entity in insertion order.
  pub fn entity_ids(&self) -> Vec<Id> {
    self
      .list
      .borrow()
      .iter()
      .map(|(_, e)| e.id())
      .collect()
  }

  /// Walk live entities in insertion order until the visitor returns false.
  /// The visitor may add and remove entities.
  pub fn range_entities(&self, mut visit: impl FnMut(&Rc<Entity>) -> bool) {
    let mut cur = self.list.borrow().head();
    while let Some(idx) = cur {
      let entity = {
        let list = self.list.borrow();
        if list.is_orphan(idx) {
          None
        } else {
          list.peek(idx).cloned()
        }
      };
      if let Some(entity) = entity {
        if !visit(&entity) {
          return;
        }
      }
      cur = self.list.borrow().next(idx);
    }
  }

  // ---- the forest ----

  /// Promote a detached entity to a forest root: its parent becomes the
  /// synthetic root id.
  pub fn make_root(&self, id: Id) -> Result<(), EcError> {
    let entity = self.get_entity(id).ok_or(EcError::EntityNotFound(id))?;
    if entity.tree_node_state() != TreeNodeState::Detached
      || entity.parent_id().is_some()
    {
      return Err(EcError::NotDetached(id));
    }
    entity.node_state.set(TreeNodeState::Attached);
    self.roots.borrow_mut().push(id);
    Ok(())
  }

  /// Detach an entity from its parent (or from the forest roots). Its
  /// children stay attached under it.
  pub fn detach_node(&self, id: Id) -> Result<(), EcError> {
    let entity = self.get_entity(id).ok_or(EcError::EntityNotFound(id))?;
    if entity.state() > EntityState::Alive {
      return Err(EcError::EntityNotLive {
        id,
        state: entity.state(),
      });
    }
    self.detach_inner(&entity);
    Ok(())
  }

  /// Remove an entity from the tree entirely: it is detached, and its
  /// children are spliced up to its former parent (or become detached
  /// themselves when there is none).
  pub fn remove_node(&self, id: Id) -> Result<(), EcError> {
    let entity = self.get_entity(id).ok_or(EcError::EntityNotFound(id))?;
    if entity.state() > EntityState::Alive {
      return Err(EcError::EntityNotLive {
        id,
        state: entity.state(),
      });
    }

    let grandparent = entity.parent_id().and_then(|p| self.get_entity(p));
    self.detach_inner(&entity);

    for child_id in entity.children_ids() {
      let Some(child) = self.get_entity(child_id) else {
        continue;
      };
      self.detach_inner(&child);
      if let Some(gp) = &grandparent {
        self.attach(gp, &child);
      }
    }
    Ok(())
  }

  /// Re-parent an entity. Rejects self-parenting and any move that would
  /// create a cycle.
  pub fn move_node(&self, child: Id, new_parent: Id) -> Result<(), EcError> {
    if child == new_parent {
      return Err(EcError::SelfParent(child));
    }
    let child_rc = self.get_entity(child).ok_or(EcError::EntityNotFound(child))?;
    let parent_rc = self
      .get_entity(new_parent)
      .ok_or(EcError::ParentNotFound(new_parent))?;
    if parent_rc.state() > EntityState::Alive {
      return Err(EcError::ParentNotLive {
        id: new_parent,
        state: parent_rc.state(),
      });
    }
    if child_rc.state() > EntityState::Alive {
      return Err(EcError::EntityNotLive {
        id: child,
        state: child_rc.state(),
      });
    }

    // Attaching walks only downward, so a cycle can only come from hanging
    // an entity under its own descendant. Walk the new parent's ancestry.
    let mut cursor = parent_rc.parent_id();
    while let Some(ancestor) = cursor {
      if ancestor == child {
        return Err(EcError::TreeCycle {
          child,
          parent: new_parent,
        });
      }
      cursor = self.get_entity(ancestor).and_then(|e| e.parent_id());
    }

    self.detach_inner(&child_rc);
    self.attach(&parent_rc, &child_rc);
    Ok(())
  }

  /// Visit the children of an entity in attach order.
  pub fn each_children(&self, parent: Id, mut visit: impl FnMut(&Rc<Entity>)) {
    let Some(parent) = self.get_entity(parent) else {
      return;
    };
    for child_id in parent.children_ids() {
      if let Some(child) = self.get_entity(child_id) {
        visit(&child);
      }
    }
  }

  pub fn is_root(&self, id: Id) -> bool {
    self.roots.borrow().contains(&id)
  }

  pub fn is_leaf(&self, id: Id) -> bool {
    self
      .get_entity(id)
      .map(|e| e.children.borrow().is_empty())
      .unwrap_or(false)
  }

  /// Detached from the forest: no parent and not a root.
  pub fn is_freedom(&self, id: Id) -> bool {
    self
      .get_entity(id)
      .map(|e| {
        e.tree_node_state() == TreeNodeState::Detached
          && e.parent_id().is_none()
      })
      .unwrap_or(false)
  }

  pub fn root_ids(&self) -> Vec<Id> {
    self.roots.borrow().clone()
  }

  /// Attach `child` under `parent`, honoring the attaching-state protocol:
  /// while the attach event runs the child is `attaching`, and if a handler
  /// detaches, removes or destroys the child the `attached` transition is
  /// skipped.
  fn attach(&self, parent: &Rc<Entity>, child: &Rc<Entity>) {
    // An add-event handler may have already torn the child down.
    if child.state() > EntityState::Alive {
      return;
    }
    let pid = parent.id();
    child.node_state.set(TreeNodeState::Attaching);
    child.parent.set(Some(pid));
    parent.children.borrow_mut().push(child.id());

    self.ev_attach_child.emit(&(parent.clone(), child.clone()));

    if child.tree_node_state() == TreeNodeState::Attaching
      && child.parent_id() == Some(pid)
      && child.state() <= EntityState::Alive
    {
      child.node_state.set(TreeNodeState::Attached);
    }
  }

  /// Unhook an entity from its parent or from the roots. Symmetric to
  /// [`attach`](Self::attach): the child is `detaching` while the detach
  /// event runs.
  fn detach_inner(&self, entity: &Rc<Entity>) {
    let id = entity.id();
    match entity.parent_id() {
      Some(pid) => {
        entity.node_state.set(TreeNodeState::Detaching);
        if let Some(parent) = self.get_entity(pid) {
          self.ev_detach_child.emit(&(parent.clone(), entity.clone()));
          parent.children.borrow_mut().retain(|c| *c != id);
        }
        entity.parent.set(None);
        entity.node_state.set(TreeNodeState::Detached);
      }
      None => {
        let was_root = self.is_root(id);
        if was_root {
          self.roots.borrow_mut().retain(|r| *r != id);
        }
        if entity.tree_node_state() != TreeNodeState::Detached {
          entity.node_state.set(TreeNodeState::Detached);
        }
      }
    }
  }

  fn bind_relays(&self, entity: &Rc<Entity>) {
    let mut hooks = Vec::with_capacity(4);

    let relay = self.ev_add_components.clone();
    hooks.push(entity.ev_add_components.bind(move |args| relay.emit(args)));

    let relay = self.ev_remove_component.clone();
    hooks.push(entity.ev_remove_component.bind(move |args| relay.emit(args)));

    let relay = self.ev_first_touch.clone();
    hooks.push(entity.ev_first_touch.bind(move |args| relay.emit(args)));

    let relay = self.ev_enable_changed.clone();
    hooks.push(entity.ev_enable_changed.bind(move |args| relay.emit(args)));

    self.relay_hooks.borrow_mut().insert(entity.id(), hooks);
  }

  // ---- event accessors (the embedder's bind surface) ----

  /// Fired after an entity joined the global list, before tree attach.
  pub fn add_entity_event(&self) -> &Event<Rc<Entity>> {
    &self.ev_add_entity
  }

  /// Fired while an entity is in `leave`, after its subtree is gone.
  pub fn remove_entity_event(&self) -> &Event<Rc<Entity>> {
    &self.ev_remove_entity
  }

  /// Relay of every entity's add-components event.
  pub fn add_components_event(&self) -> &Event<AddComponentsArgs> {
    &self.ev_add_components
  }

  /// Relay of every entity's remove-component event; the component is in
  /// `detach` while this fires.
  pub fn remove_component_event(&self) -> &Event<ComponentArgs> {
    &self.ev_remove_component
  }

  /// Relay of first-touch accesses on awake-on-first-touch entities.
  pub fn first_touch_event(&self) -> &Event<ComponentArgs> {
    &self.ev_first_touch
  }

  /// Relay of component enabled-flag changes.
  pub fn enable_changed_event(&self) -> &Event<EnableChangedArgs> {
    &self.ev_enable_changed
  }

  /// Fired while a child is `attaching` under a parent.
  pub fn attach_child_event(&self) -> &Event<TreeArgs> {
    &self.ev_attach_child
  }

  /// Fired while a child is `detaching` from a parent.
  pub fn detach_child_event(&self) -> &Event<TreeArgs> {
    &self.ev_detach_child
  }

  /// Sweep escaped slots and unbound hooks; runs during the scheduler's GC
  /// phase.
  pub(crate) fn run_gc(&self) {
    self.list.borrow_mut().collect();
    self.ev_add_entity.sweep();
    self.ev_remove_entity.sweep();
    self.ev_add_components.sweep();
    self.ev_remove_component.sweep();
    self.ev_first_touch.sweep();
    self.ev_enable_changed.sweep();
    self.ev_attach_child.sweep();
    self.ev_detach_child.sweep();
  }

  pub(crate) fn close_events(&self) {
    self.ev_add_entity.close();
    self.ev_remove_entity.close();
    self.ev_add_components.close();
    self.ev_remove_component.close();
    self.ev_first_touch.close();
    self.ev_enable_changed.close();
    self.ev_attach_child.close();
    self.ev_detach_child.close();
  }
}
