//! Frame accounting across the three modes.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use cadre::prelude::*;

#[derive(Default)]
struct Ticker {
  updates: Rc<Cell<u32>>,
  lates: Rc<Cell<u32>>,
}

impl Component for Ticker {
  fn update(&mut self, _access: &Access<'_>) {
    self.updates.set(self.updates.get() + 1);
  }

  fn late_update(&mut self, _access: &Access<'_>) {
    self.lates.set(self.lates.get() + 1);
  }
}

#[test]
fn simulate_at_one_fps_advances_the_clock_one_second_per_loop() {
  let ctx = Context::new(ContextOptions::default());
  let updates = Rc::new(Cell::new(0));
  let lates = Rc::new(Cell::new(0));

  {
    let updates = updates.clone();
    let lates = lates.clone();
    let pt = ctx
      .entity_lib()
      .component_lib()
      .declare_with("ticker", move || {
        Box::new(Ticker {
          updates: updates.clone(),
          lates: lates.clone(),
        })
      });
    build_entity_pt(&ctx, "P").add_component_pt(pt, None).declare();
    build_entity(&ctx, "P").build().unwrap();
  }

  let runtime = Runtime::new(
    ctx.clone(),
    RuntimeOptions {
      frame: Some(Frame::simulate(1.0, 3)),
      ..Default::default()
    },
  )
  .unwrap();

  // Simulate caps at total_frames and returns.
  runtime.run().unwrap();

  let frame = ctx.frame();
  let frame = frame.as_ref().unwrap();
  assert_eq!(frame.cur_frames(), 3);
  assert_eq!(frame.running_elapse(), Duration::from_secs(3));
  assert_eq!(frame.last_loop_elapse(), Duration::from_secs(1));

  assert_eq!(updates.get(), 3);
  assert_eq!(lates.get(), 3);
}

#[test]
fn simulate_ignores_wall_clock_entirely() {
  let ctx = Context::new(ContextOptions::default());
  let runtime = Runtime::new(
    ctx.clone(),
    RuntimeOptions {
      frame: Some(Frame::simulate(1000.0, 5000)),
      ..Default::default()
    },
  )
  .unwrap();

  let wall = std::time::Instant::now();
  runtime.run().unwrap();
  // Five virtual seconds in well under one wall second.
  assert!(wall.elapsed() < Duration::from_secs(2));

  let frame = ctx.frame();
  let frame = frame.as_ref().unwrap();
  assert_eq!(frame.cur_frames(), 5000);
  assert_eq!(frame.running_elapse(), Duration::from_secs(5));
}

#[test]
fn real_time_mode_actually_ticks() {
  let (handle, join) = Runtime::spawn(
    ContextOptions::default(),
    RuntimeOptions {
      frame: Some(Frame::real_time(200.0)),
      ..Default::default()
    },
    |_ctx| {},
  );

  std::thread::sleep(Duration::from_millis(100));
  let frames = handle
    .call(|ctx| ctx.frame().as_ref().map(|f| f.cur_frames()).unwrap_or(0))
    .wait()
    .unwrap();
  assert!(frames > 0, "no frames after 100ms at 200fps");

  handle.terminate().wait();
  join.join().unwrap().unwrap();
}

#[test]
fn double_run_is_rejected() {
  let ctx = Context::new(ContextOptions::default());
  let runtime = Runtime::new(
    ctx,
    RuntimeOptions {
      frame: Some(Frame::simulate(10.0, 1)),
      ..Default::default()
    },
  )
  .unwrap();

  runtime.run().unwrap();
  assert!(matches!(runtime.run(), Err(RunError::AlreadyRunning)));
}

#[test]
fn pairing_a_context_twice_is_rejected() {
  let ctx = Context::new(ContextOptions::default());
  let _first = Runtime::new(ctx.clone(), RuntimeOptions::default()).unwrap();
  let second = Runtime::new(ctx, RuntimeOptions::default());
  assert!(matches!(second, Err(RunError::AlreadyPaired)));
}

#[test]
fn frame_rejects_a_non_positive_fps() {
  let bad = std::panic::catch_unwind(|| Frame::real_time(0.0));
  assert!(bad.is_err());
}
