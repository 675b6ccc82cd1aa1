//! End-to-end lifecycle ordering through a manually stepped runtime.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cadre::prelude::*;

type Log = Arc<Mutex<Vec<String>>>;

struct Probe {
  tag: &'static str,
  log: Log,
}

impl Probe {
  fn push(&self, what: &str) {
    self.log.lock().unwrap().push(format!("{}.{}", self.tag, what));
  }
}

impl Component for Probe {
  fn awake(&mut self, _access: &Access<'_>) {
    self.push("Awake");
  }

  fn start(&mut self, _access: &Access<'_>) {
    self.push("Start");
  }

  fn update(&mut self, _access: &Access<'_>) {
    self.push("Update");
  }

  fn late_update(&mut self, _access: &Access<'_>) {
    self.push("LateUpdate");
  }

  fn shut(&mut self, _access: &Access<'_>) {
    self.push("Shut");
  }

  fn dispose(&mut self, _access: &Access<'_>) {
    self.push("Dispose");
  }
}

fn declare_probe(ctx: &std::rc::Rc<Context>, tag: &'static str, log: &Log) -> ComponentPT {
  let log = log.clone();
  ctx
    .entity_lib()
    .component_lib()
    .declare_with(&format!("probe::{tag}"), move || {
      Box::new(Probe {
        tag,
        log: log.clone(),
      })
    })
}

fn wait_for_frames(handle: &RuntimeHandle, frames: u64) {
  loop {
    let cur = handle
      .call(|ctx| ctx.frame().as_ref().map(|f| f.cur_frames()).unwrap_or(0))
      .wait()
      .unwrap();
    if cur >= frames {
      return;
    }
    std::thread::sleep(Duration::from_millis(5));
  }
}

#[test]
fn awake_start_update_shut_dispose_ordering() {
  let log: Log = Arc::new(Mutex::new(Vec::new()));
  let setup_log = log.clone();

  let (handle, join) = Runtime::spawn(
    ContextOptions::default(),
    RuntimeOptions {
      frame: Some(Frame::manual(10.0)),
      ..Default::default()
    },
    move |ctx| {
      let a = declare_probe(ctx, "A", &setup_log);
      let b = declare_probe(ctx, "B", &setup_log);
      let c = declare_probe(ctx, "C", &setup_log);

      build_entity_pt(ctx, "P")
        .add_component_pt(a, Some("A"))
        .add_component_pt(b, Some("B"))
        .add_component_pt(c, Some("C"))
        .declare();

      build_entity(ctx, "P").build().unwrap();
    },
  );

  handle.play_frames(3).unwrap();
  wait_for_frames(&handle, 3);
  handle.terminate().wait();
  join.join().unwrap().unwrap();

  let mut expected: Vec<String> = Vec::new();
  for tag in ["A", "B", "C"] {
    expected.push(format!("{tag}.Awake"));
  }
  for tag in ["A", "B", "C"] {
    expected.push(format!("{tag}.Start"));
  }
  for _ in 0..3 {
    for tag in ["A", "B", "C"] {
      expected.push(format!("{tag}.Update"));
    }
    for tag in ["A", "B", "C"] {
      expected.push(format!("{tag}.LateUpdate"));
    }
  }
  for tag in ["C", "B", "A"] {
    expected.push(format!("{tag}.Shut"));
  }
  for tag in ["C", "B", "A"] {
    expected.push(format!("{tag}.Dispose"));
  }

  assert_eq!(*log.lock().unwrap(), expected);
}

#[test]
fn components_added_after_start_wake_immediately() {
  let log: Log = Arc::new(Mutex::new(Vec::new()));
  let setup_log = log.clone();

  let (handle, join) = Runtime::spawn(
    ContextOptions::default(),
    RuntimeOptions {
      frame: Some(Frame::manual(10.0)),
      ..Default::default()
    },
    move |ctx| {
      let a = declare_probe(ctx, "A", &setup_log);
      build_entity_pt(ctx, "P").add_component_pt(a, Some("A")).declare();
      build_entity(ctx, "P").build().unwrap();
    },
  );

  let late_log = log.clone();
  handle
    .call_void(move |ctx| {
      let id = ctx.entity_manager().entity_ids()[0];
      let e = ctx.entity_manager().get_entity(id).unwrap();
      let cell = ComponentCell::new(
        "D",
        "probe::D",
        Box::new(Probe {
          tag: "D",
          log: late_log.clone(),
        }),
      );
      e.add_component("D", vec![cell]).unwrap();
    })
    .wait()
    .unwrap();

  handle.terminate().wait();
  join.join().unwrap().unwrap();

  let entries = log.lock().unwrap().clone();
  let d_awake = entries.iter().position(|s| s == "D.Awake");
  let d_start = entries.iter().position(|s| s == "D.Start");
  let a_start = entries.iter().position(|s| s == "A.Start");
  assert!(d_awake.is_some() && d_start.is_some());
  assert!(a_start.unwrap() < d_awake.unwrap());
  assert!(d_awake.unwrap() < d_start.unwrap());
}

#[test]
fn entities_update_in_insertion_order_and_lates_follow_all_updates() {
  let log: Log = Arc::new(Mutex::new(Vec::new()));
  let setup_log = log.clone();

  let (handle, join) = Runtime::spawn(
    ContextOptions::default(),
    RuntimeOptions {
      frame: Some(Frame::manual(10.0)),
      ..Default::default()
    },
    move |ctx| {
      let e1 = declare_probe(ctx, "E1", &setup_log);
      let e2 = declare_probe(ctx, "E2", &setup_log);
      build_entity_pt(ctx, "first").add_component_pt(e1, None).declare();
      build_entity_pt(ctx, "second").add_component_pt(e2, None).declare();
      build_entity(ctx, "first").build().unwrap();
      build_entity(ctx, "second").build().unwrap();
    },
  );

  handle.play_frames(2).unwrap();
  wait_for_frames(&handle, 2);
  handle.terminate().wait();
  join.join().unwrap().unwrap();

  let entries = log.lock().unwrap().clone();
  let frame: Vec<&String> = entries
    .iter()
    .filter(|s| s.ends_with("Update") || s.ends_with("LateUpdate"))
    .collect();
  // Per frame: every update in insertion order, then every late-update.
  assert_eq!(
    frame,
    vec![
      "E1.Update",
      "E2.Update",
      "E1.LateUpdate",
      "E2.LateUpdate",
      "E1.Update",
      "E2.Update",
      "E1.LateUpdate",
      "E2.LateUpdate",
    ]
  );
}

#[test]
fn destroy_self_mid_update_is_honored_at_the_next_safe_point() {
  let log: Log = Arc::new(Mutex::new(Vec::new()));
  let setup_log = log.clone();

  struct SelfDestruct {
    log: Log,
  }
  impl Component for SelfDestruct {
    fn update(&mut self, access: &Access<'_>) {
      self.log.lock().unwrap().push("update".into());
      access.destroy_self();
    }
    fn shut(&mut self, _access: &Access<'_>) {
      self.log.lock().unwrap().push("shut".into());
    }
  }

  let (handle, join) = Runtime::spawn(
    ContextOptions::default(),
    RuntimeOptions {
      frame: Some(Frame::manual(10.0)),
      ..Default::default()
    },
    move |ctx| {
      let log = setup_log.clone();
      let pt = ctx
        .entity_lib()
        .component_lib()
        .declare_with("self_destruct", move || {
          Box::new(SelfDestruct { log: log.clone() })
        });
      build_entity_pt(ctx, "P").add_component_pt(pt, None).declare();
      build_entity(ctx, "P").build().unwrap();
    },
  );

  handle.play_frames(3).unwrap();
  wait_for_frames(&handle, 3);
  handle.terminate().wait();
  join.join().unwrap().unwrap();

  // One update, then the deferred removal ran shut; later frames see no
  // live component.
  assert_eq!(*log.lock().unwrap(), vec!["update", "shut"]);
}
