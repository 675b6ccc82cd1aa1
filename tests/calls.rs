//! The cooperative-call seam between external threads and the worker.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cadre::errors::CallError;
use cadre::prelude::*;

#[test]
fn calls_resolve_with_their_return_value() {
  let (handle, join) = Runtime::spawn(
    ContextOptions::default(),
    RuntimeOptions::default(),
    |_ctx| {},
  );

  let got = handle.call(|_ctx| 21 * 2).wait().unwrap();
  assert_eq!(got, 42);

  let got = handle
    .call(|ctx| ctx.entity_manager().count_entities())
    .wait()
    .unwrap();
  assert_eq!(got, 0);

  handle.terminate().wait();
  join.join().unwrap().unwrap();
}

#[test]
fn single_producer_tasks_run_in_submission_order() {
  let (handle, join) = Runtime::spawn(
    ContextOptions::default(),
    RuntimeOptions::default(),
    |_ctx| {},
  );

  let seen = Arc::new(Mutex::new(Vec::new()));
  let mut rets = Vec::new();
  for i in 0..20 {
    let seen = seen.clone();
    rets.push(handle.call_void(move |_| seen.lock().unwrap().push(i)));
  }
  for ret in rets {
    ret.wait().unwrap();
  }

  assert_eq!(*seen.lock().unwrap(), (0..20).collect::<Vec<_>>());

  handle.terminate().wait();
  join.join().unwrap().unwrap();
}

#[test]
fn worker_side_calls_queue_onto_the_same_pipeline() {
  let (handle, join) = Runtime::spawn(
    ContextOptions::default(),
    RuntimeOptions::default(),
    |_ctx| {},
  );

  let flag = Arc::new(Mutex::new(false));
  let inner_flag = flag.clone();
  handle
    .call_void(move |ctx| {
      // Queue a follow-up from inside the worker; it runs on a later task
      // round, never inline.
      let check_flag = inner_flag.clone();
      let _ = ctx.call_void(move |_| *check_flag.lock().unwrap() = true);
      assert!(!*inner_flag.lock().unwrap());
    })
    .wait()
    .unwrap();

  // The follow-up is consumed before termination completes.
  handle.terminate().wait();
  assert!(*flag.lock().unwrap());
  join.join().unwrap().unwrap();
}

#[test]
fn producers_block_on_a_full_queue_until_timeout() {
  let (handle, join) = Runtime::spawn(
    ContextOptions::default(),
    RuntimeOptions {
      process_queue_capacity: 1,
      process_queue_timeout: Some(Duration::from_millis(50)),
      ..Default::default()
    },
    |_ctx| {},
  );

  // Occupy the worker long enough for the queue to back up.
  let _busy = handle.call_void(|_| std::thread::sleep(Duration::from_millis(300)));
  std::thread::sleep(Duration::from_millis(30));

  // Fills the single queue slot.
  let queued = handle.call(|_| 1);
  // No room left: this one times out.
  let overflow = handle.call(|_| 2);
  assert_eq!(overflow.wait(), Err(CallError::QueueFull));

  assert_eq!(queued.wait(), Ok(1));

  handle.terminate().wait();
  join.join().unwrap().unwrap();
}

#[test]
fn calls_after_termination_fail_fast() {
  let (handle, join) = Runtime::spawn(
    ContextOptions::default(),
    RuntimeOptions::default(),
    |_ctx| {},
  );
  handle.terminate().wait();
  join.join().unwrap().unwrap();

  let ret = handle.call(|_| ());
  assert_eq!(ret.wait(), Err(CallError::Terminated));
}

#[test]
fn dropping_the_future_discards_the_result() {
  let (handle, join) = Runtime::spawn(
    ContextOptions::default(),
    RuntimeOptions::default(),
    |_ctx| {},
  );

  let ran = Arc::new(Mutex::new(false));
  let rc = ran.clone();
  let ret = handle.call(move |_| {
    *rc.lock().unwrap() = true;
    "ignored"
  });
  drop(ret);

  // The task still runs; only the result has nowhere to go.
  handle.call_void(|_| ()).wait().unwrap();
  assert!(*ran.lock().unwrap());

  handle.terminate().wait();
  join.join().unwrap().unwrap();
}

#[test]
fn recovered_task_panics_reach_the_report_sink() {
  let (report_tx, report_rx) = crossbeam::channel::unbounded();
  let (handle, join) = Runtime::spawn(
    ContextOptions {
      auto_recover: true,
      report_error: Some(report_tx),
    },
    RuntimeOptions::default(),
    |_ctx| {},
  );

  let ret = handle.call(|_| -> u32 { panic!("task went sideways") });
  assert_eq!(ret.wait(), Err(CallError::Aborted));

  let report = report_rx
    .recv_timeout(Duration::from_secs(1))
    .expect("panic must be reported");
  assert!(report.message.contains("task went sideways"));

  // The worker survived the panic.
  assert_eq!(handle.call(|_| 7).wait(), Ok(7));

  handle.terminate().wait();
  join.join().unwrap().unwrap();
}
