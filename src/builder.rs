//! The consumer-facing entity builder.

use std::any::Any as StdAny;
use std::rc::Rc;

use crate::context::Context;
use crate::entity::{Entity, Meta};
use crate::errors::EcError;
use crate::id::Id;
use crate::pt;

/// Start building an entity of a declared prototype.
///
/// ```ignore
/// let e = build_entity(&ctx, "soldier").set_parent_id(squad).build()?;
/// ```
pub fn build_entity(ctx: &Rc<Context>, prototype: &str) -> EntityBuilder {
  EntityBuilder {
    ctx: ctx.clone(),
    prototype: prototype.to_owned(),
    parent: None,
    persist_id: None,
    awake_on_first_touch: false,
    meta: Meta::new(),
  }
}

/// Builder returned by [`build_entity`].
#[must_use = "does nothing until .build() is called"]
pub struct EntityBuilder {
  ctx: Rc<Context>,
  prototype: String,
  parent: Option<Id>,
  persist_id: Option<Id>,
  awake_on_first_touch: bool,
  meta: Meta,
}

impl EntityBuilder {
  /// Attach the new entity under an existing parent.
  pub fn set_parent_id(mut self, parent: Id) -> Self {
    self.parent = Some(parent);
    self
  }

  /// Use a pre-assigned id instead of the context's generator.
  pub fn set_persist_id(mut self, id: Id) -> Self {
    self.persist_id = Some(id);
    self
  }

  /// Delay each component's awake until it is first accessed.
  pub fn set_awake_on_first_touch(mut self, on: bool) -> Self {
    self.awake_on_first_touch = on;
    self
  }

  /// Add a meta entry on top of the prototype's defaults.
  pub fn set_meta<V: StdAny>(self, key: &str, value: V) -> Self {
    self.meta.insert(key, value);
    self
  }

  /// Instantiate, add to the entity manager, and (if a parent was given)
  /// attach to the tree. The returned entity has been through its add
  /// events; with a runtime attached it is already alive.
  pub fn build(self) -> Result<Rc<Entity>, EcError> {
    let entity = pt::instantiate(
      &self.ctx,
      &self.prototype,
      self.persist_id,
      self.awake_on_first_touch,
      self.meta,
    )?;
    self.ctx.entity_manager().add_entity(&entity, self.parent)?;
    Ok(entity)
  }
}
