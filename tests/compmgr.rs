use std::cell::RefCell;
use std::rc::Rc;

use cadre::prelude::*;

#[derive(Default)]
struct Hp(u32);
impl Component for Hp {}

#[derive(Default)]
struct Armor;
impl Component for Armor {}

fn world() -> (Rc<Context>, Rc<Entity>) {
  let ctx = Context::new(ContextOptions::default());
  let entity = Entity::new(EntityOptions::default());
  ctx.entity_manager().add_entity(&entity, None).unwrap();
  (ctx, entity)
}

fn hp(v: u32) -> Rc<ComponentCell> {
  ComponentCell::wrap(Hp(v), None)
}

#[test]
fn same_named_components_stay_contiguous() {
  let (_ctx, e) = world();

  let hp1 = hp(1);
  let armor = ComponentCell::wrap(Armor, None);
  let hp2 = hp(2);

  e.add_component("hp", vec![hp1.clone()]).unwrap();
  e.add_component("armor", vec![armor]).unwrap();
  e.add_component("hp", vec![hp2.clone()]).unwrap();

  let order: Vec<String> = {
    let mut names = Vec::new();
    e.each_components(|c| names.push(c.name().to_string()));
    names
  };
  assert_eq!(order, vec!["hp", "hp", "armor"]);

  // First same-named wins lookups.
  let first = e.get_component("hp").unwrap();
  assert_eq!(first.id(), hp1.id());

  let run = e.get_components("hp");
  assert_eq!(run.len(), 2);
  assert_eq!(run[0].id(), hp1.id());
  assert_eq!(run[1].id(), hp2.id());
}

#[test]
fn removing_the_first_of_a_run_repoints_the_name_index() {
  let (_ctx, e) = world();
  let hp1 = hp(1);
  let hp2 = hp(2);
  e.add_component("hp", vec![hp1.clone(), hp2.clone()]).unwrap();

  e.remove_component_by_id(hp1.id());
  assert_eq!(hp1.state(), ComponentState::Death);

  let first = e.get_component("hp").unwrap();
  assert_eq!(first.id(), hp2.id());

  e.remove_component_by_id(hp2.id());
  assert!(e.get_component("hp").is_none());
  assert!(!e.contains_component("hp"));
  assert_eq!(e.count_components(), 0);
}

#[test]
fn remove_by_name_takes_the_whole_run() {
  let (_ctx, e) = world();
  e.add_component("hp", vec![hp(1), hp(2)]).unwrap();
  e.add_component("armor", vec![ComponentCell::wrap(Armor, None)])
    .unwrap();

  e.remove_component("hp");
  assert_eq!(e.count_components(), 1);
  assert!(e.contains_component("armor"));
  assert!(!e.contains_component("hp"));
}

#[test]
fn add_rejects_non_birth_components_without_mutating() {
  let (_ctx, e) = world();
  let c = hp(1);
  e.add_component("hp", vec![c.clone()]).unwrap();

  // Attached once already.
  let err = e.add_component("hp2", vec![c]).unwrap_err();
  assert!(matches!(err, EcError::ComponentNotBirth { .. }));
  assert!(!e.contains_component("hp2"));

  let err = e.add_component("x", vec![]).unwrap_err();
  assert!(matches!(err, EcError::EmptyComponents));
}

#[test]
fn fixed_names_reject_second_adds_and_survive_removal() {
  let (_ctx, e) = world();
  let core = hp(9);
  e.add_fixed_component("core", vec![core.clone()]).unwrap();

  let err = e.add_component("core", vec![hp(1)]).unwrap_err();
  assert!(matches!(err, EcError::DuplicateFixedName(_)));
  let err = e.add_fixed_component("core", vec![hp(1)]).unwrap_err();
  assert!(matches!(err, EcError::DuplicateFixedName(_)));

  // Neither name nor id removal touches a fixed component.
  e.remove_component("core");
  e.remove_component_by_id(core.id());
  assert!(e.contains_component("core"));
  assert_eq!(core.state(), ComponentState::Attach);
}

#[test]
fn add_fixed_rejects_a_name_already_in_use() {
  let (_ctx, e) = world();
  e.add_component("hp", vec![hp(1)]).unwrap();
  let err = e.add_fixed_component("hp", vec![hp(2)]).unwrap_err();
  assert!(matches!(err, EcError::DuplicateFixedName(_)));
}

#[test]
fn lookups_by_id_and_prototype() {
  let (_ctx, e) = world();
  let a = hp(1);
  e.add_component("hp", vec![a.clone()]).unwrap();
  e.add_component("armor", vec![ComponentCell::wrap(Armor, None)])
    .unwrap();

  assert_eq!(e.get_component_by_id(a.id()).unwrap().id(), a.id());
  assert!(e.contains_component_id(a.id()));

  let proto = a.prototype().clone();
  let by_pt = e.get_component_by_pt(&proto).unwrap();
  assert_eq!(by_pt.id(), a.id());
  assert_eq!(e.get_components_by_pt(&proto).len(), 1);

  e.remove_component_by_pt(&proto);
  assert!(e.get_component_by_pt(&proto).is_none());
}

#[test]
fn traversal_tolerates_removal_mid_walk() {
  let (_ctx, e) = world();
  for i in 0..4 {
    e.add_component("hp", vec![hp(i)]).unwrap();
  }

  let visited = Rc::new(RefCell::new(0));
  let vc = visited.clone();
  let ec = e.clone();
  e.range_components(move |c| {
    *vc.borrow_mut() += 1;
    // Removing the current component mid-walk must not derail traversal.
    ec.remove_component_by_id(c.id());
    true
  });

  assert_eq!(*visited.borrow(), 4);
  assert_eq!(e.count_components(), 0);
}

#[test]
fn reversed_traversal_walks_back_to_front() {
  let (_ctx, e) = world();
  for (name, v) in [("a", 1), ("b", 2), ("c", 3)] {
    e.add_component(name, vec![hp(v)]).unwrap();
  }
  let mut names = Vec::new();
  e.reversed_each_components(|c| names.push(c.name().to_string()));
  assert_eq!(names, vec!["c", "b", "a"]);
}

#[test]
fn filter_components_post_checks_its_snapshot() {
  let (_ctx, e) = world();
  let keep = hp(1);
  e.add_component("keep", vec![keep.clone()]).unwrap();
  e.add_component("drop", vec![hp(2)]).unwrap();

  let ec = e.clone();
  let picked = e.filter_components(move |c| {
    // Mutate the list while the filter is collecting.
    if c.name() == "drop" {
      ec.remove_component("drop");
    }
    true
  });

  // The removed component fails the version post-check.
  assert_eq!(picked.len(), 1);
  assert_eq!(picked[0].id(), keep.id());
  assert_eq!(e.list_components().len(), 1);
}

#[test]
fn set_enabled_fires_only_on_change() {
  let (ctx, e) = world();
  let c = hp(1);
  e.add_component("hp", vec![c.clone()]).unwrap();

  let fired = Rc::new(RefCell::new(Vec::new()));
  let fc = fired.clone();
  let _hook = ctx
    .entity_manager()
    .enable_changed_event()
    .bind(move |(_, _, enabled)| fc.borrow_mut().push(*enabled));

  c.set_enabled(true); // already true, no event
  c.set_enabled(false);
  c.set_enabled(false); // unchanged, no event
  c.set_enabled(true);

  assert_eq!(*fired.borrow(), vec![false, true]);
  assert!(c.is_enabled());
}

#[test]
fn payload_access_is_typed() {
  let (_ctx, e) = world();
  let c = hp(7);
  e.add_component("hp", vec![c.clone()]).unwrap();

  assert!(c.is::<Hp>());
  assert_eq!(c.with(|h: &Hp| h.0), Some(7));
  c.with_mut(|h: &mut Hp| h.0 = 8);
  assert_eq!(c.with(|h: &Hp| h.0), Some(8));
  assert_eq!(c.with(|_a: &Armor| ()), None);
}
