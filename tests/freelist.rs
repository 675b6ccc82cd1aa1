use cadre::list::FreeList;

#[test]
fn push_back_keeps_order() {
  let mut list = FreeList::new();
  for i in 0..5 {
    list.push_back(i);
  }
  let values: Vec<i32> = list.iter().map(|(_, v)| *v).collect();
  assert_eq!(values, vec![0, 1, 2, 3, 4]);
  assert_eq!(list.live_len(), 5);
}

#[test]
fn insert_after_lands_right_after() {
  let mut list = FreeList::new();
  let a = list.push_back("a");
  list.push_back("c");
  list.insert_after(a.index, "b").unwrap();

  let values: Vec<&str> = list.iter().map(|(_, v)| *v).collect();
  assert_eq!(values, vec!["a", "b", "c"]);
}

#[test]
fn orphan_is_skipped_but_still_addressable() {
  let mut list = FreeList::new();
  list.push_back("a");
  let b = list.push_back("b");
  list.push_back("c");

  assert!(list.orphan(b.index));
  let values: Vec<&str> = list.iter().map(|(_, v)| *v).collect();
  assert_eq!(values, vec!["a", "c"]);

  // Still physically present until collect.
  assert_eq!(list.peek(b.index), Some(&"b"));
  assert_eq!(list.orphan_count(), 1);
  assert_eq!(list.live_len(), 2);

  // The handle no longer resolves.
  assert!(list.value(b).is_none());
}

#[test]
fn orphan_twice_is_a_no_op() {
  let mut list = FreeList::new();
  let a = list.push_back(1);
  assert!(list.orphan(a.index));
  assert!(!list.orphan(a.index));
  assert_eq!(list.orphan_count(), 1);
}

#[test]
fn collect_frees_and_reuses_slots_with_new_versions() {
  let mut list = FreeList::new();
  let a = list.push_back("a");
  list.push_back("b");

  list.orphan(a.index);
  let freed = list.collect();
  assert_eq!(freed, vec!["a"]);
  assert!(!list.needs_collect());

  // The freed slot is reused, but the old handle stays dead.
  let c = list.push_back("c");
  assert_eq!(c.index, a.index);
  assert_ne!(c.version, a.version);
  assert!(list.value(a).is_none());
  assert_eq!(list.value(c), Some(&"c"));

  let values: Vec<&str> = list.iter().map(|(_, v)| *v).collect();
  assert_eq!(values, vec!["b", "c"]);
}

#[test]
fn version_bumps_on_every_mutation() {
  let mut list = FreeList::new();
  let v0 = list.version();
  let a = list.push_back(1);
  let v1 = list.version();
  assert!(v1 > v0);
  list.orphan(a.index);
  let v2 = list.version();
  assert!(v2 > v1);
  list.collect();
  assert!(list.version() > v2);
}

#[test]
fn traversal_by_index_survives_mid_walk_orphaning() {
  let mut list = FreeList::new();
  let keys: Vec<_> = (0..6).map(|i| list.push_back(i)).collect();

  // Walk by hand, orphaning the next element as we visit each one.
  let mut seen = Vec::new();
  let mut cur = list.head();
  while let Some(idx) = cur {
    seen.push(*list.peek(idx).unwrap());
    if let Some(next) = list.next(idx) {
      list.orphan(next);
    }
    cur = list.next(idx);
  }

  assert_eq!(seen, vec![0, 2, 4]);
  let _ = keys;
}

#[test]
fn random_ops_match_a_vec_model() {
  let mut rng = fastrand::Rng::with_seed(0x5eed);
  let mut list = FreeList::new();
  let mut model: Vec<(usize, u32)> = Vec::new(); // (slot index, value)
  let mut next_val = 0u32;

  for _ in 0..2000 {
    match rng.u32(0..10) {
      0..=5 => {
        let key = list.push_back(next_val);
        model.push((key.index, next_val));
        next_val += 1;
      }
      6..=7 if !model.is_empty() => {
        let at = rng.usize(0..model.len());
        let (idx, _) = model.remove(at);
        assert!(list.orphan(idx));
      }
      8 => {
        list.collect();
      }
      _ => {}
    }

    let got: Vec<u32> = list.iter().map(|(_, v)| *v).collect();
    let want: Vec<u32> = model.iter().map(|(_, v)| *v).collect();
    assert_eq!(got, want);
    assert_eq!(list.live_len(), model.len());
  }
}
