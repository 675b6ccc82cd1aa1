//! The runtime: one cooperative worker driving one context.
//!
//! [`Runtime::run`] blocks the calling thread — that thread *is* the
//! worker. Everything else talks to it through a [`RuntimeHandle`], which
//! is `Send + Clone`: cooperative calls go over the bounded task queue,
//! `Play…` directives over the control channel, and termination through a
//! shared flag the loops poll.
//!
//! [`Runtime::spawn`] is the convenience path: it builds the context and
//! runtime on a fresh thread, runs a caller-supplied setup closure there,
//! and hands back the handle.

mod ctrl;
mod looping;
mod running;

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};

use crate::call::{make_call, CallRet, Task, TerminatedWait, Terminator};
use crate::context::{Context, ContextOptions, RunningEvent};
use crate::errors::{CallError, RunError};
use crate::frame::FrameMode;

use self::ctrl::Ctrl;
use self::running::Worker;

/// Configuration of a runtime.
pub struct RuntimeOptions {
  /// The frame driving the main loop; `None` means no frame loop, only the
  /// task pump.
  pub frame: Option<crate::frame::Frame>,
  /// Capacity of the cooperative task queue. Producers that overflow it
  /// block (see `process_queue_timeout`).
  pub process_queue_capacity: usize,
  /// How long an external producer may block on a full queue before the
  /// call fails. `None` blocks indefinitely.
  pub process_queue_timeout: Option<Duration>,
  /// How often registered GC producers are swept.
  pub gc_interval: Duration,
  /// Run on birth: consulted by [`Runtime::spawn`]. The blocking
  /// [`Runtime::run`] path ignores it, since there the embedder's call *is*
  /// the run.
  pub auto_run: bool,
  /// Extra GC step appended to every sweep.
  pub custom_gc: Option<Box<dyn FnMut(&Rc<Context>) + Send>>,
}

impl Default for RuntimeOptions {
  fn default() -> Self {
    RuntimeOptions {
      frame: None,
      process_queue_capacity: 128,
      process_queue_timeout: None,
      gc_interval: Duration::from_secs(10),
      auto_run: true,
      custom_gc: None,
    }
  }
}

/// A runtime paired with its context.
pub struct Runtime {
  ctx: Rc<Context>,
  task_tx: Sender<Task>,
  task_rx: RefCell<Option<Receiver<Task>>>,
  ctrl_tx: Sender<Ctrl>,
  ctrl_rx: RefCell<Option<Receiver<Ctrl>>>,
  term: Arc<Terminator>,
  running: Cell<bool>,
  gc_interval: Duration,
  queue_timeout: Option<Duration>,
  custom_gc: RefCell<Option<Box<dyn FnMut(&Rc<Context>) + Send>>>,
  target_fps: f64,
  manual: bool,
}

impl Runtime {
  /// Pair a runtime with a context. Fails if the context already has one.
  pub fn new(
    ctx: Rc<Context>,
    mut opts: RuntimeOptions,
  ) -> Result<Runtime, RunError> {
    if !ctx.pair() {
      return Err(RunError::AlreadyPaired);
    }

    assert!(
      opts.process_queue_capacity > 0,
      "process_queue_capacity must be positive"
    );
    assert!(
      opts.gc_interval > Duration::ZERO,
      "gc_interval must be positive"
    );

    let (task_tx, task_rx) = channel::bounded(opts.process_queue_capacity);
    // Rendezvous: a accepted Play directive is one the worker has seen.
    let (ctrl_tx, ctrl_rx) = channel::bounded(0);
    let term = Terminator::new();

    let (target_fps, manual) = match &opts.frame {
      Some(f) => (f.target_fps(), f.mode() == FrameMode::Manual),
      None => (0.0, false),
    };

    ctx.set_frame(opts.frame.take());
    ctx.set_callee(Some(task_tx.clone()));
    ctx.set_terminator(term.clone());
    ctx.emit_running(RunningEvent::Birth);

    Ok(Runtime {
      ctx,
      task_tx,
      task_rx: RefCell::new(Some(task_rx)),
      ctrl_tx,
      ctrl_rx: RefCell::new(Some(ctrl_rx)),
      term,
      running: Cell::new(false),
      gc_interval: opts.gc_interval,
      queue_timeout: opts.process_queue_timeout,
      custom_gc: RefCell::new(opts.custom_gc.take()),
      target_fps,
      manual,
    })
  }

  pub fn context(&self) -> &Rc<Context> {
    &self.ctx
  }

  /// A `Send + Clone` handle for other threads.
  pub fn handle(&self) -> RuntimeHandle {
    RuntimeHandle {
      task_tx: self.task_tx.clone(),
      ctrl_tx: self.ctrl_tx.clone(),
      term: self.term.clone(),
      target_fps: self.target_fps,
      manual: self.manual,
      queue_timeout: self.queue_timeout,
    }
  }

  /// Become the worker: run the main loop on the calling thread until
  /// terminated. Returns after the `Terminated` milestone.
  pub fn run(&self) -> Result<(), RunError> {
    if self.term.is_requested() {
      return Err(RunError::Terminated);
    }
    if self.running.replace(true) {
      return Err(RunError::AlreadyRunning);
    }

    let task_rx = self
      .task_rx
      .borrow_mut()
      .take()
      .expect("task queue already consumed");
    let ctrl_rx = self
      .ctrl_rx
      .borrow_mut()
      .take()
      .expect("ctrl queue already consumed");

    let worker = Worker::new(
      self.ctx.clone(),
      task_rx,
      ctrl_rx,
      self.term.clone(),
      self.gc_interval,
      self.custom_gc.borrow_mut().take(),
    );
    worker.running();
    Ok(())
  }

  /// Request graceful termination.
  pub fn terminate(&self) -> TerminatedWait {
    self.term.request();
    self.term.wait_handle()
  }

  /// A handle resolving once the worker has fully wound down.
  pub fn terminated(&self) -> TerminatedWait {
    self.term.wait_handle()
  }

  /// Build context and runtime on a dedicated worker thread.
  ///
  /// `setup` runs on that thread with the fresh context — declare
  /// prototypes, install add-ins, spawn initial entities there. When
  /// `opts.auto_run` is set (the default) the thread then enters the main
  /// loop; the join handle resolves when the runtime terminates.
  pub fn spawn(
    ctx_opts: ContextOptions,
    opts: RuntimeOptions,
    setup: impl FnOnce(&Rc<Context>) + Send + 'static,
  ) -> (RuntimeHandle, thread::JoinHandle<Result<(), RunError>>) {
    let auto_run = opts.auto_run;
    let (handle_tx, handle_rx) = channel::bounded(1);

    let join = thread::Builder::new()
      .name("cadre-worker".to_owned())
      .spawn(move || {
        let ctx = Context::new(ctx_opts);
        let runtime = Runtime::new(ctx.clone(), opts)?;
        setup(&ctx);
        let _ = handle_tx.send(runtime.handle());
        if auto_run {
          runtime.run()
        } else {
          Ok(())
        }
      })
      .expect("failed to spawn worker thread");

    let handle = handle_rx
      .recv()
      .expect("worker thread died before handing out its handle");
    (handle, join)
  }
}

/// The thread-safe face of a runtime.
#[derive(Clone)]
pub struct RuntimeHandle {
  task_tx: Sender<Task>,
  ctrl_tx: Sender<Ctrl>,
  term: Arc<Terminator>,
  target_fps: f64,
  manual: bool,
  queue_timeout: Option<Duration>,
}

impl RuntimeHandle {
  /// Queue a closure for the worker and get a future for its return value.
  /// Never blocks the worker; blocks the *caller* when the queue is full,
  /// bounded by the configured queue timeout.
  pub fn call<R, F>(&self, f: F) -> CallRet<R>
  where
    R: Send + 'static,
    F: FnOnce(&Rc<Context>) -> R + Send + 'static,
  {
    if self.term.is_done() {
      return CallRet::failed(CallError::Terminated);
    }
    let (task, ret) = make_call(f);
    let sent = match self.queue_timeout {
      None => self.task_tx.send(task).map_err(|_| CallError::Terminated),
      Some(timeout) => {
        self
          .task_tx
          .send_timeout(task, timeout)
          .map_err(|err| match err {
            channel::SendTimeoutError::Timeout(_) => CallError::QueueFull,
            channel::SendTimeoutError::Disconnected(_) => CallError::Terminated,
          })
      }
    };
    match sent {
      Ok(()) => ret,
      Err(err) => CallRet::failed(err),
    }
  }

  /// [`call`](Self::call) without a return value.
  pub fn call_void<F>(&self, f: F) -> CallRet<()>
  where
    F: FnOnce(&Rc<Context>) + Send + 'static,
  {
    self.call(f)
  }

  /// Request graceful termination: the current tick finishes, every entity
  /// is shut and disposed, then the worker exits.
  pub fn terminate(&self) -> TerminatedWait {
    self.term.request();
    self.term.wait_handle()
  }

  pub fn terminated(&self) -> TerminatedWait {
    self.term.wait_handle()
  }

  pub fn is_terminated(&self) -> bool {
    self.term.is_done()
  }

  pub(crate) fn target_fps(&self) -> f64 {
    self.target_fps
  }

  pub(crate) fn is_manual(&self) -> bool {
    self.manual
  }

  pub(crate) fn terminated_flag(&self) -> bool {
    self.term.is_done()
  }

  pub(crate) fn ctrl_tx(&self) -> &Sender<Ctrl> {
    &self.ctrl_tx
  }
}
