//! The per-entity component manager.
//!
//! Components live in the entity's versioned free-list. Same-named
//! components form one contiguous run; the name index records the first
//! slot of each run, and a same-named insert lands right after the run's
//! last slot. Removal orphans slots in place, so handles and traversals
//! held across a removal stay valid until the next GC pass.
//!
//! Every operation here runs on the owning worker. Traversals step slot by
//! slot, re-reading links after each visitor call, which lets visitors add
//! and remove components mid-walk.

use std::rc::Rc;

use smol_str::SmolStr;

use crate::component::{ComponentCell, ComponentState};
use crate::entity::{Entity, EntityState};
use crate::errors::EcError;
use crate::id::Id;
use crate::list::SlotKey;

impl Entity {
  /// Attach components under a shared name, after the last same-named slot
  /// if the name is already present.
  ///
  /// Every component must still be in `birth`; nothing is mutated when any
  /// of them is not.
  pub fn add_component(
    self: &Rc<Self>,
    name: &str,
    comps: Vec<Rc<ComponentCell>>,
  ) -> Result<(), EcError> {
    self.add_components_inner(name, comps, false)
  }

  /// Like [`add_component`](Self::add_component), but the name becomes
  /// *fixed*: no further component may be added under it and the components
  /// cannot be removed (they die with the entity).
  pub fn add_fixed_component(
    self: &Rc<Self>,
    name: &str,
    comps: Vec<Rc<ComponentCell>>,
  ) -> Result<(), EcError> {
    self.add_components_inner(name, comps, true)
  }

  fn add_components_inner(
    self: &Rc<Self>,
    name: &str,
    comps: Vec<Rc<ComponentCell>>,
    fixed: bool,
  ) -> Result<(), EcError> {
    if comps.is_empty() {
      return Err(EcError::EmptyComponents);
    }
    let name = SmolStr::new(name);
    for comp in &comps {
      if comp.state() != ComponentState::Birth {
        return Err(EcError::ComponentNotBirth {
          name: comp.name(),
          state: comp.state(),
        });
      }
    }
    if self.fixed_names.borrow().contains(&name) {
      return Err(EcError::DuplicateFixedName(name));
    }
    if fixed && self.name_index.borrow().contains_key(&name) {
      return Err(EcError::DuplicateFixedName(name));
    }

    for comp in &comps {
      comp.set_owner(self);
      comp.set_name(name.clone());
      comp.set_fixed(fixed);
      if comp.id().is_nil() {
        if let Some(ctx) = self.context() {
          comp.set_id(ctx.next_id());
        }
      }

      let key = self.attach_slot(&name, comp);
      comp.set_attached_key(key);
      comp.set_state(ComponentState::Attach);
    }
    if fixed {
      self.fixed_names.borrow_mut().push(name);
    }

    // A subscriber may destroy the entity mid-handling; once it passes
    // alive there is nothing left to notify.
    self
      .ev_add_components
      .emit_with_stop(&(self.clone(), comps), |(e, _)| {
        e.state() > EntityState::Alive
      });
    Ok(())
  }

  /// Link one component into the list, keeping same-named runs contiguous.
  fn attach_slot(&self, name: &SmolStr, comp: &Rc<ComponentCell>) -> SlotKey {
    let mut comps = self.comps.borrow_mut();
    let first = self.name_index.borrow().get(name).copied();
    match first {
      Some(first) => {
        let mut last = first;
        let mut cur = comps.next(first);
        while let Some(idx) = cur {
          match comps.peek(idx) {
            Some(c) if c.name() == *name => {
              last = idx;
              cur = comps.next(idx);
            }
            _ => break,
          }
        }
        comps
          .insert_after(last, comp.clone())
          .expect("name index pointed at an unlinked slot")
      }
      None => {
        let key = comps.push_back(comp.clone());
        self.name_index.borrow_mut().insert(name.clone(), key.index);
        key
      }
    }
  }

  /// Remove every component under a name, first run slot onward. Fixed
  /// components are skipped.
  pub fn remove_component(self: &Rc<Self>, name: &str) {
    let Some(first) = self.name_index.borrow().get(name).copied() else {
      return;
    };

    // Snapshot the run before removing anything; removal rewrites the name
    // index under our feet.
    let mut run = Vec::new();
    {
      let comps = self.comps.borrow();
      let mut cur = Some(first);
      while let Some(idx) = cur {
        match comps.peek(idx) {
          Some(c) if c.name() == name => {
            if let Some(ver) = comps.slot_version(idx) {
              run.push(SlotKey { index: idx, version: ver });
            }
            cur = comps.next(idx);
          }
          _ => break,
        }
      }
    }

    for key in run {
      self.remove_component_slot(key);
    }
  }

  /// Point-remove by component id, same discipline as
  /// [`remove_component`](Self::remove_component).
  pub fn remove_component_by_id(self: &Rc<Self>, id: Id) {
    if let Some(key) = self.find_slot(|c| c.id() == id) {
      self.remove_component_slot(key);
    }
  }

  /// Remove every component built from a prototype. Fixed components are
  /// skipped.
  pub fn remove_component_by_pt(self: &Rc<Self>, prototype: &str) {
    let keys = self.matching_slots(|c| c.prototype() == prototype);
    for key in keys {
      self.remove_component_slot(key);
    }
  }

  /// The removal discipline for one slot: advance to `detach`, let the
  /// scheduler shut it through the remove event, fix the name index, orphan
  /// the slot.
  pub(crate) fn remove_component_slot(self: &Rc<Self>, key: SlotKey) {
    let comp = {
      let comps = self.comps.borrow();
      match comps.value(key) {
        Some(c) => c.clone(),
        None => return,
      }
    };
    if comp.is_fixed() || comp.state() > ComponentState::Alive {
      return;
    }

    comp.set_state(ComponentState::Detach);
    self.ev_remove_component.emit(&(self.clone(), comp.clone()));

    // Without a scheduler bound, nothing advanced the state during the
    // emit; force the terminal state either way (monotonic, so a no-op when
    // the scheduler already got there).
    comp.set_state(ComponentState::Death);

    self.fix_name_index(&comp.name(), key.index);
    self.comps.borrow_mut().orphan_if(key);
    if let Some(ctx) = self.context() {
      ctx.collect_gc(self.clone());
    }
  }

  /// If `removed` was the first slot of its run, repoint the name index at
  /// the next same-named slot or drop the entry.
  fn fix_name_index(&self, name: &SmolStr, removed: usize) {
    let mut index = self.name_index.borrow_mut();
    match index.get(name) {
      Some(&first) if first == removed => {}
      _ => return,
    }

    // Runs are contiguous, so the candidate is simply the next live slot —
    // same name means the run continues, anything else means it ended.
    let comps = self.comps.borrow();
    if let Some(idx) = comps.next(removed) {
      if let Some(c) = comps.peek(idx) {
        if c.name() == *name {
          index.insert(name.clone(), idx);
          return;
        }
      }
    }
    index.shift_remove(name);
  }

  /// First component under a name, or `None`. Triggers the first-touch
  /// awake when the entity delays waking.
  pub fn get_component(self: &Rc<Self>, name: &str) -> Option<Rc<ComponentCell>> {
    let first = self.name_index.borrow().get(name).copied()?;
    let comp = self.comps.borrow().peek(first).cloned()?;
    self.touch(comp)
  }

  /// Component by id, or `None`.
  pub fn get_component_by_id(self: &Rc<Self>, id: Id) -> Option<Rc<ComponentCell>> {
    let key = self.find_slot(|c| c.id() == id)?;
    let comp = self.comps.borrow().value(key).cloned()?;
    self.touch(comp)
  }

  /// First component built from a prototype, or `None`.
  pub fn get_component_by_pt(
    self: &Rc<Self>,
    prototype: &str,
  ) -> Option<Rc<ComponentCell>> {
    let key = self.find_slot(|c| c.prototype() == prototype)?;
    let comp = self.comps.borrow().value(key).cloned()?;
    self.touch(comp)
  }

  /// Every live component under a name, in insertion order.
  pub fn get_components(self: &Rc<Self>, name: &str) -> Vec<Rc<ComponentCell>> {
    let Some(first) = self.name_index.borrow().get(name).copied() else {
      return Vec::new();
    };

    let mut out = Vec::new();
    let mut cur = Some(first);
    while let Some(idx) = cur {
      let comp = {
        let comps = self.comps.borrow();
        match comps.peek(idx) {
          Some(c) if c.name() == name => Some(c.clone()),
          _ => None,
        }
      };
      let Some(comp) = comp else { break };
      if let Some(comp) = self.touch(comp) {
        out.push(comp);
      }
      cur = self.comps.borrow().next(idx);
    }
    out
  }

  /// Every live component built from a prototype, in insertion order.
  pub fn get_components_by_pt(
    self: &Rc<Self>,
    prototype: &str,
  ) -> Vec<Rc<ComponentCell>> {
    let mut out = Vec::new();
    self.range_components(|c| {
      if c.prototype() == prototype {
        out.push(c.clone());
      }
      true
    });
    out
  }

  /// Walk live components in insertion order until the visitor returns
  /// false. The visitor may add and remove components.
  pub fn range_components(
    self: &Rc<Self>,
    mut visit: impl FnMut(&Rc<ComponentCell>) -> bool,
  ) {
    let mut cur = self.comps.borrow().head();
    while let Some(idx) = cur {
      let comp = {
        let comps = self.comps.borrow();
        if comps.is_orphan(idx) {
          None
        } else {
          comps.peek(idx).cloned()
        }
      };
      if let Some(comp) = comp {
        if let Some(comp) = self.touch(comp) {
          if !visit(&comp) {
            return;
          }
        }
      }
      cur = self.comps.borrow().next(idx);
    }
  }

  /// Walk every live component in insertion order.
  pub fn each_components(
    self: &Rc<Self>,
    mut visit: impl FnMut(&Rc<ComponentCell>),
  ) {
    self.range_components(|c| {
      visit(c);
      true
    });
  }

  /// [`range_components`](Self::range_components), back to front.
  pub fn reversed_range_components(
    self: &Rc<Self>,
    mut visit: impl FnMut(&Rc<ComponentCell>) -> bool,
  ) {
    let mut cur = self.comps.borrow().tail();
    while let Some(idx) = cur {
      let comp = {
        let comps = self.comps.borrow();
        if comps.is_orphan(idx) {
          None
        } else {
          comps.peek(idx).cloned()
        }
      };
      if let Some(comp) = comp {
        if let Some(comp) = self.touch(comp) {
          if !visit(&comp) {
            return;
          }
        }
      }
      cur = self.comps.borrow().prev(idx);
    }
  }

  /// Walk every live component, back to front.
  pub fn reversed_each_components(
    self: &Rc<Self>,
    mut visit: impl FnMut(&Rc<ComponentCell>),
  ) {
    self.reversed_range_components(|c| {
      visit(c);
      true
    });
  }

  /// Collect live components matching a predicate. The collection runs over
  /// a version snapshot and drops anything whose slot was orphaned or
  /// reused while the predicate (or a first-touch awake) mutated the list.
  pub fn filter_components(
    self: &Rc<Self>,
    mut pred: impl FnMut(&Rc<ComponentCell>) -> bool,
  ) -> Vec<Rc<ComponentCell>> {
    let keys = self.comps.borrow().keys();
    let mut picked: Vec<Rc<ComponentCell>> = Vec::new();
    for key in keys {
      let comp = {
        let comps = self.comps.borrow();
        comps.value(key).cloned()
      };
      let Some(comp) = comp else { continue };
      if pred(&comp) {
        picked.push(comp);
      }
    }

    for comp in &picked {
      let _ = self.touch(comp.clone());
    }
    // The attached handle is the component's (index, version) pair; a slot
    // orphaned or reused during collection fails this check.
    picked.retain(|c| self.comps.borrow().contains(c.attached_key()));
    picked
  }

  /// Version-checked snapshot of every live component.
  pub fn list_components(self: &Rc<Self>) -> Vec<Rc<ComponentCell>> {
    self.filter_components(|_| true)
  }

  pub fn contains_component(&self, name: &str) -> bool {
    self.name_index.borrow().contains_key(name)
  }

  pub fn contains_component_id(&self, id: Id) -> bool {
    self.find_slot(|c| c.id() == id).is_some()
  }

  pub fn count_components(&self) -> usize {
    self.comps.borrow().live_len()
  }

  pub(crate) fn on_component_enable_changed(
    self: &Rc<Self>,
    comp: &Rc<ComponentCell>,
  ) {
    self
      .ev_enable_changed
      .emit(&(self.clone(), comp.clone(), comp.is_enabled()));
  }

  /// First-touch discipline: accessing a still-attached component of an
  /// entity that delays waking fires the first-touch event, which the
  /// scheduler answers by running awake/start. Returns `None` when the
  /// component did not survive the touch.
  fn touch(
    self: &Rc<Self>,
    comp: Rc<ComponentCell>,
  ) -> Option<Rc<ComponentCell>> {
    if self.awake_on_first_touch()
      && comp.state() == ComponentState::Attach
    {
      self.ev_first_touch.emit(&(self.clone(), comp.clone()));
    }
    if comp.state() > ComponentState::Alive {
      return None;
    }
    Some(comp)
  }

  fn find_slot(&self, pred: impl Fn(&Rc<ComponentCell>) -> bool) -> Option<SlotKey> {
    let comps = self.comps.borrow();
    for (idx, comp) in comps.iter() {
      if pred(comp) {
        return Some(SlotKey {
          index: idx,
          version: comps.slot_version(idx)?,
        });
      }
    }
    None
  }

  fn matching_slots(
    &self,
    pred: impl Fn(&Rc<ComponentCell>) -> bool,
  ) -> Vec<SlotKey> {
    let comps = self.comps.borrow();
    comps
      .iter()
      .filter(|(_, c)| pred(c))
      .filter_map(|(idx, _)| {
        Some(SlotKey {
          index: idx,
          version: comps.slot_version(idx)?,
        })
      })
      .collect()
  }
}
