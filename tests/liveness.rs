//! State-machine monotonicity, id uniqueness, idempotence, meta.

use std::collections::HashSet;
use std::rc::Rc;

use cadre::prelude::*;

#[derive(Default)]
struct Noop;
impl Component for Noop {}

fn world() -> Rc<Context> {
  Context::new(ContextOptions::default())
}

#[test]
fn entity_states_only_move_forward() {
  let ctx = world();
  let e = Entity::new(EntityOptions::default());
  assert_eq!(e.state(), EntityState::Birth);

  ctx.entity_manager().add_entity(&e, None).unwrap();
  // No scheduler bound: the entity rests at enter.
  assert_eq!(e.state(), EntityState::Enter);

  ctx.entity_manager().remove_entity(e.id());
  assert_eq!(e.state(), EntityState::Death);

  // A second removal cannot drag it anywhere.
  ctx.entity_manager().remove_entity(e.id());
  assert_eq!(e.state(), EntityState::Death);
}

#[test]
fn component_states_follow_the_attach_detach_arc() {
  let ctx = world();
  let e = Entity::new(EntityOptions::default());
  ctx.entity_manager().add_entity(&e, None).unwrap();

  let c = ComponentCell::wrap(Noop, Some("n"));
  assert_eq!(c.state(), ComponentState::Birth);

  e.add_component("n", vec![c.clone()]).unwrap();
  assert_eq!(c.state(), ComponentState::Attach);

  e.remove_component("n");
  assert_eq!(c.state(), ComponentState::Death);
}

#[test]
fn destroy_self_is_inert_outside_its_window() {
  let ctx = world();
  let e = Entity::new(EntityOptions::default());

  // Not added yet: nothing to do.
  e.destroy_self();
  assert_eq!(e.state(), EntityState::Birth);

  ctx.entity_manager().add_entity(&e, None).unwrap();
  // Enter is before the awake..alive window; still inert.
  e.destroy_self();
  ctx.finalize();
  assert!(ctx.entity_manager().contains_entity(e.id()));
}

#[test]
fn ids_are_unique_across_entities_and_components() {
  let ctx = world();
  let mut seen = HashSet::new();

  for _ in 0..10 {
    let e = Entity::new(EntityOptions::default());
    ctx.entity_manager().add_entity(&e, None).unwrap();
    assert!(seen.insert(e.id()));
    for i in 0..3 {
      let c = ComponentCell::wrap(Noop, None);
      e.add_component(&format!("c{i}"), vec![c.clone()]).unwrap();
      assert!(seen.insert(c.id()));
    }
  }
}

#[test]
fn persist_ids_reserve_the_generator_past_them() {
  let ctx = world();
  let chosen = Id::from_raw(500);
  let e = Entity::new(EntityOptions {
    persist_id: Some(chosen),
    ..Default::default()
  });
  ctx.entity_manager().add_entity(&e, None).unwrap();
  assert_eq!(e.id(), chosen);

  let next = Entity::new(EntityOptions::default());
  ctx.entity_manager().add_entity(&next, None).unwrap();
  assert!(next.id().as_u64() > 500);
}

#[test]
fn meta_is_typed_and_prototype_meta_merges_under_overrides() {
  let ctx = world();
  build_entity_pt(&ctx, "npc")
    .meta("faction", "wild")
    .meta("hp", 30u32)
    .declare();

  let e = build_entity(&ctx, "npc")
    .set_meta("faction", "tame")
    .build()
    .unwrap();

  // The builder's value wins; prototype defaults fill the rest.
  assert_eq!(*e.meta().get::<&str>("faction").unwrap(), "tame");
  assert_eq!(*e.meta().get::<u32>("hp").unwrap(), 30);
  assert!(e.meta().get::<u32>("faction").is_none());
  assert!(!e.meta().contains("missing"));
}

#[test]
fn building_an_undeclared_prototype_fails() {
  let ctx = world();
  let err = build_entity(&ctx, "ghost").build().unwrap_err();
  assert!(matches!(err, EcError::UnknownPrototype(_)));
}

#[test]
fn component_lib_redeclare_returns_the_existing_descriptor() {
  let ctx = world();
  let lib = ctx.entity_lib().component_lib();

  let first = lib.declare::<Noop>();

  let fired = Rc::new(std::cell::Cell::new(0));
  let fc = fired.clone();
  let _hook = lib.declare_event().bind(move |_| fc.set(fc.get() + 1));

  let second = lib.declare::<Noop>();
  assert_eq!(first.prototype(), second.prototype());
  assert_eq!(fired.get(), 0, "re-declaration must not emit");
}
