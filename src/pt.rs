//! Prototype libraries: declared entity and component layouts.
//!
//! A [`ComponentPT`] binds a fully-qualified prototype name to a
//! constructor for the component type. An [`EntityPT`] names an entity
//! kind: an optional instance (behavior) constructor, an ordered list of
//! component prototypes, and default meta. Declarations are events, so the
//! scheduler can surface them on the running-event stream.

use std::any::Any as StdAny;
use std::fmt;
use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::component::{Component, ComponentCell};
use crate::context::Context;
use crate::entity::{Entity, EntityBehavior, EntityOptions, Meta};
use crate::errors::EcError;
use crate::event::{Event, EventOptions};
use crate::id::Id;

/// A declared component prototype: name plus constructor.
#[derive(Clone)]
pub struct ComponentPT {
  prototype: SmolStr,
  construct: Rc<dyn Fn() -> Box<dyn Component>>,
}

impl ComponentPT {
  /// The fully-qualified prototype name.
  pub fn prototype(&self) -> &SmolStr {
    &self.prototype
  }

  /// The trailing path segment, used as the default component name.
  pub fn short_name(&self) -> &str {
    self.prototype.rsplit("::").next().unwrap_or(&self.prototype)
  }

  /// Build a fresh payload in `birth` state.
  pub fn construct(&self) -> Box<dyn Component> {
    (self.construct)()
  }
}

impl fmt::Debug for ComponentPT {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ComponentPT")
      .field("prototype", &self.prototype)
      .finish()
  }
}

/// The component prototype registry of one context.
pub struct ComponentLib {
  map: RefCell<IndexMap<SmolStr, ComponentPT>>,
  pub(crate) ev_declare: Event<ComponentPT>,
}

impl ComponentLib {
  pub(crate) fn new(opts: &EventOptions) -> Self {
    ComponentLib {
      map: RefCell::new(IndexMap::new()),
      ev_declare: Event::new(opts.clone()),
    }
  }

  /// Declare a component type under its type name. Re-declaring returns the
  /// existing descriptor.
  pub fn declare<C: Component + Default>(&self) -> ComponentPT {
    self.declare_with(std::any::type_name::<C>(), || {
      Box::new(C::default()) as Box<dyn Component>
    })
  }

  /// Declare under an explicit prototype name with a custom constructor.
  pub fn declare_with(
    &self,
    prototype: &str,
    construct: impl Fn() -> Box<dyn Component> + 'static,
  ) -> ComponentPT {
    if let Some(existing) = self.map.borrow().get(prototype) {
      return existing.clone();
    }

    let pt = ComponentPT {
      prototype: SmolStr::new(prototype),
      construct: Rc::new(construct),
    };
    self
      .map
      .borrow_mut()
      .insert(pt.prototype.clone(), pt.clone());
    tracing::debug!(prototype, "declare component prototype");
    self.ev_declare.emit(&pt);
    pt
  }

  pub fn get(&self, prototype: &str) -> Option<ComponentPT> {
    self.map.borrow().get(prototype).cloned()
  }

  /// Every declared prototype, in declaration order.
  pub fn list(&self) -> Vec<ComponentPT> {
    self.map.borrow().values().cloned().collect()
  }

  /// Fired once per new declaration.
  pub fn declare_event(&self) -> &Event<ComponentPT> {
    &self.ev_declare
  }

  pub(crate) fn close_events(&self) {
    self.ev_declare.close();
  }
}

/// A declared entity prototype.
#[derive(Clone)]
pub struct EntityPT {
  prototype: SmolStr,
  instance: Option<Rc<dyn Fn() -> Box<dyn EntityBehavior>>>,
  comps: Vec<(ComponentPT, Option<SmolStr>)>,
  meta: Meta,
}

impl EntityPT {
  pub fn prototype(&self) -> &SmolStr {
    &self.prototype
  }

  /// Component prototypes in attach order, each with its optional explicit
  /// name.
  pub fn components(&self) -> &[(ComponentPT, Option<SmolStr>)] {
    &self.comps
  }

  pub fn meta(&self) -> &Meta {
    &self.meta
  }

  pub(crate) fn construct_behavior(&self) -> Option<Box<dyn EntityBehavior>> {
    self.instance.as_ref().map(|ctor| ctor())
  }
}

impl fmt::Debug for EntityPT {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EntityPT")
      .field("prototype", &self.prototype)
      .field("components", &self.comps.len())
      .field("has_instance", &self.instance.is_some())
      .finish()
  }
}

/// The entity prototype registry of one context. Owns the component
/// registry as well.
pub struct EntityLib {
  map: RefCell<IndexMap<SmolStr, EntityPT>>,
  component_lib: ComponentLib,
  pub(crate) ev_declare: Event<EntityPT>,
}

impl EntityLib {
  pub(crate) fn new(opts: &EventOptions) -> Self {
    EntityLib {
      map: RefCell::new(IndexMap::new()),
      component_lib: ComponentLib::new(opts),
      ev_declare: Event::new(opts.clone()),
    }
  }

  pub fn component_lib(&self) -> &ComponentLib {
    &self.component_lib
  }

  pub fn get(&self, prototype: &str) -> Option<EntityPT> {
    self.map.borrow().get(prototype).cloned()
  }

  pub fn contains(&self, prototype: &str) -> bool {
    self.map.borrow().contains_key(prototype)
  }

  /// Every declared prototype, in declaration order.
  pub fn list(&self) -> Vec<EntityPT> {
    self.map.borrow().values().cloned().collect()
  }

  /// Fired once per declaration (re-declarations included).
  pub fn declare_event(&self) -> &Event<EntityPT> {
    &self.ev_declare
  }

  pub(crate) fn close_events(&self) {
    self.ev_declare.close();
    self.component_lib.close_events();
  }

  fn declare(&self, pt: EntityPT) -> EntityPT {
    // Re-declaring a name replaces the layout; late declarations win.
    self.map.borrow_mut().insert(pt.prototype.clone(), pt.clone());
    tracing::debug!(prototype = %pt.prototype, "declare entity prototype");
    self.ev_declare.emit(&pt);
    pt
  }
}

/// Start declaring an entity prototype into a context's library.
pub fn build_entity_pt(ctx: &Rc<Context>, prototype: &str) -> EntityPTBuilder {
  EntityPTBuilder {
    ctx: ctx.clone(),
    prototype: SmolStr::new(prototype),
    instance: None,
    comps: Vec::new(),
    meta: Meta::new(),
  }
}

/// Builder returned by [`build_entity_pt`].
#[must_use = "does nothing until .declare() is called"]
pub struct EntityPTBuilder {
  ctx: Rc<Context>,
  prototype: SmolStr,
  instance: Option<Rc<dyn Fn() -> Box<dyn EntityBehavior>>>,
  comps: Vec<(ComponentPT, Option<SmolStr>)>,
  meta: Meta,
}

impl EntityPTBuilder {
  /// Instantiate entities of this prototype with a concrete behavior face.
  pub fn set_instance<B: EntityBehavior + Default>(mut self) -> Self {
    self.instance =
      Some(Rc::new(|| Box::new(B::default()) as Box<dyn EntityBehavior>));
    self
  }

  pub fn set_instance_with(
    mut self,
    construct: impl Fn() -> Box<dyn EntityBehavior> + 'static,
  ) -> Self {
    self.instance = Some(Rc::new(construct));
    self
  }

  /// Append a component type, declaring it in the component library if it
  /// is new. `name` defaults to the type's short name.
  pub fn add_component<C: Component + Default>(
    mut self,
    name: Option<&str>,
  ) -> Self {
    let pt = self.ctx.entity_lib().component_lib().declare::<C>();
    self.comps.push((pt, name.map(SmolStr::new)));
    self
  }

  /// Append an already-declared component prototype.
  pub fn add_component_pt(
    mut self,
    pt: ComponentPT,
    name: Option<&str>,
  ) -> Self {
    self.comps.push((pt, name.map(SmolStr::new)));
    self
  }

  pub fn meta<V: StdAny>(self, key: &str, value: V) -> Self {
    self.meta.insert(key, value);
    self
  }

  /// Install the prototype into the library and emit the declaration event.
  pub fn declare(self) -> EntityPT {
    let pt = EntityPT {
      prototype: self.prototype,
      instance: self.instance,
      comps: self.comps,
      meta: self.meta,
    };
    self.ctx.entity_lib().declare(pt)
  }
}

/// Instantiate an entity from a declared prototype: behavior face, meta and
/// components all come from the descriptor.
pub(crate) fn instantiate(
  ctx: &Rc<Context>,
  prototype: &str,
  persist_id: Option<Id>,
  awake_on_first_touch: bool,
  meta: Meta,
) -> Result<Rc<Entity>, EcError> {
  let pt = ctx
    .entity_lib()
    .get(prototype)
    .ok_or_else(|| EcError::UnknownPrototype(SmolStr::new(prototype)))?;

  meta.merge_from(pt.meta());
  let entity = Entity::new(EntityOptions {
    prototype: pt.prototype().clone(),
    persist_id,
    awake_on_first_touch,
    meta,
    behavior: pt.construct_behavior(),
  });

  for (cpt, name) in pt.components() {
    let name = name
      .as_ref()
      .map(|n| n.as_str())
      .unwrap_or_else(|| cpt.short_name());
    let cell =
      ComponentCell::new(name, cpt.prototype().clone(), cpt.construct());
    entity.add_component(name, vec![cell])?;
  }

  Ok(entity)
}
