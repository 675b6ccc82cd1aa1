use std::cell::RefCell;
use std::rc::Rc;

use cadre::prelude::*;

fn ctx() -> Rc<Context> {
  Context::new(ContextOptions::default())
}

fn spawn(ctx: &Rc<Context>, parent: Option<Id>) -> Rc<Entity> {
  let e = Entity::new(EntityOptions::default());
  ctx.entity_manager().add_entity(&e, parent).unwrap();
  e
}

#[test]
fn subtree_removal_order_is_depth_first_in_attach_order() {
  let ctx = ctx();
  let mgr = ctx.entity_manager();

  let r = spawn(&ctx, None);
  let c1 = spawn(&ctx, Some(r.id()));
  let g1 = spawn(&ctx, Some(c1.id()));
  let c2 = spawn(&ctx, Some(r.id()));

  let removed = Rc::new(RefCell::new(Vec::new()));
  let rc = removed.clone();
  let _hook = mgr
    .remove_entity_event()
    .bind(move |e| rc.borrow_mut().push(e.id()));

  mgr.remove_entity(r.id());

  assert_eq!(*removed.borrow(), vec![g1.id(), c1.id(), c2.id(), r.id()]);
  for e in [&r, &c1, &g1, &c2] {
    assert_eq!(e.state(), EntityState::Death);
  }
}

#[test]
fn remove_entity_is_idempotent() {
  let ctx = ctx();
  let mgr = ctx.entity_manager();
  let e = spawn(&ctx, None);

  let count = Rc::new(RefCell::new(0));
  let cc = count.clone();
  let _hook = mgr.remove_entity_event().bind(move |_| *cc.borrow_mut() += 1);

  mgr.remove_entity(e.id());
  mgr.remove_entity(e.id());
  assert_eq!(*count.borrow(), 1);
}

#[test]
fn add_entity_validates_parents() {
  let ctx = ctx();
  let mgr = ctx.entity_manager();

  let e = Entity::new(EntityOptions::default());
  let err = mgr.add_entity(&e, Some(Id::from_raw(999))).unwrap_err();
  assert!(matches!(err, EcError::ParentNotFound(_)));
  // Nothing was mutated.
  assert_eq!(e.state(), EntityState::Birth);
  assert_eq!(mgr.count_entities(), 0);

  let parent = spawn(&ctx, None);
  mgr.remove_entity(parent.id());
  let err = mgr.add_entity(&e, Some(parent.id())).unwrap_err();
  assert!(matches!(err, EcError::ParentNotFound(_)));
}

#[test]
fn duplicate_persist_ids_are_rejected() {
  let ctx = ctx();
  let mgr = ctx.entity_manager();
  let a = spawn(&ctx, None);

  let b = Entity::new(EntityOptions {
    persist_id: Some(a.id()),
    ..Default::default()
  });
  let err = mgr.add_entity(&b, None).unwrap_err();
  assert!(matches!(err, EcError::DuplicateId(_)));
}

#[test]
fn attach_and_detach_fire_tree_events() {
  let ctx = ctx();
  let mgr = ctx.entity_manager();
  let parent = spawn(&ctx, None);

  let log = Rc::new(RefCell::new(Vec::new()));
  let lc = log.clone();
  let _a = mgr.attach_child_event().bind(move |(p, c)| {
    lc.borrow_mut().push(("attach", p.id(), c.id()));
    assert_eq!(c.tree_node_state(), TreeNodeState::Attaching);
  });
  let lc = log.clone();
  let _d = mgr.detach_child_event().bind(move |(p, c)| {
    lc.borrow_mut().push(("detach", p.id(), c.id()));
    assert_eq!(c.tree_node_state(), TreeNodeState::Detaching);
  });

  let child = spawn(&ctx, Some(parent.id()));
  assert_eq!(child.tree_node_state(), TreeNodeState::Attached);
  assert_eq!(child.parent_id(), Some(parent.id()));
  assert!(!mgr.is_leaf(parent.id()));

  mgr.detach_node(child.id()).unwrap();
  assert_eq!(child.tree_node_state(), TreeNodeState::Detached);
  assert!(child.parent_id().is_none());
  assert!(mgr.is_freedom(child.id()));
  assert!(mgr.is_leaf(parent.id()));

  assert_eq!(
    *log.borrow(),
    vec![
      ("attach", parent.id(), child.id()),
      ("detach", parent.id(), child.id()),
    ]
  );
}

#[test]
fn detaching_mid_attach_event_skips_the_attached_transition() {
  let ctx = ctx();
  let mgr = ctx.entity_manager();
  let parent = spawn(&ctx, None);

  let ctx2 = ctx.clone();
  let _hook = mgr.attach_child_event().bind(move |(_, c)| {
    ctx2.entity_manager().detach_node(c.id()).unwrap();
  });

  let child = spawn(&ctx, Some(parent.id()));
  assert_eq!(child.tree_node_state(), TreeNodeState::Detached);
  assert!(child.parent_id().is_none());
  assert!(mgr.is_leaf(parent.id()));
}

#[test]
fn move_node_reparents_and_rejects_cycles() {
  let ctx = ctx();
  let mgr = ctx.entity_manager();

  let a = spawn(&ctx, None);
  let b = spawn(&ctx, Some(a.id()));
  let c = spawn(&ctx, Some(b.id()));
  let other = spawn(&ctx, None);

  mgr.move_node(c.id(), other.id()).unwrap();
  assert_eq!(c.parent_id(), Some(other.id()));
  assert!(mgr.is_leaf(b.id()));

  let err = mgr.move_node(a.id(), b.id()).unwrap_err();
  assert!(matches!(err, EcError::TreeCycle { .. }));

  let err = mgr.move_node(a.id(), a.id()).unwrap_err();
  assert!(matches!(err, EcError::SelfParent(_)));
}

#[test]
fn remove_node_splices_children_to_the_grandparent() {
  let ctx = ctx();
  let mgr = ctx.entity_manager();

  let root = spawn(&ctx, None);
  let mid = spawn(&ctx, Some(root.id()));
  let leaf = spawn(&ctx, Some(mid.id()));

  mgr.remove_node(mid.id()).unwrap();
  assert!(mid.parent_id().is_none());
  assert_eq!(leaf.parent_id(), Some(root.id()));

  let mut children = Vec::new();
  mgr.each_children(root.id(), |c| children.push(c.id()));
  assert_eq!(children, vec![leaf.id()]);
}

#[test]
fn make_root_promotes_only_detached_entities() {
  let ctx = ctx();
  let mgr = ctx.entity_manager();

  let free = spawn(&ctx, None);
  assert!(mgr.is_freedom(free.id()));
  assert!(!mgr.is_root(free.id()));

  mgr.make_root(free.id()).unwrap();
  assert!(mgr.is_root(free.id()));
  assert!(!mgr.is_freedom(free.id()));
  assert_eq!(mgr.root_ids(), vec![free.id()]);

  let parent = spawn(&ctx, None);
  let attached = spawn(&ctx, Some(parent.id()));
  let err = mgr.make_root(attached.id()).unwrap_err();
  assert!(matches!(err, EcError::NotDetached(_)));

  mgr.remove_entity(free.id());
  assert!(mgr.root_ids().is_empty());
}
