//! Cooperative calls: work submitted from any thread, executed on the
//! worker.
//!
//! A call is a boxed closure pushed onto the runtime's bounded task queue.
//! The worker runs it between frames and resolves the caller's [`CallRet`]
//! future through a one-shot channel. Dropping the future "poisons" the
//! call: the worker's send fails and the result is discarded, which is the
//! whole cancellation story.

use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};

use crate::context::Context;
use crate::errors::CallError;

/// One unit of cooperative work.
pub(crate) struct Task {
  f: Box<dyn FnOnce(&Rc<Context>) + Send>,
}

impl Task {
  pub fn run(self, ctx: &Rc<Context>) {
    (self.f)(ctx);
  }
}

/// Package a closure and the future resolved with its return value.
pub(crate) fn make_call<R, F>(f: F) -> (Task, CallRet<R>)
where
  R: Send + 'static,
  F: FnOnce(&Rc<Context>) -> R + Send + 'static,
{
  let (tx, rx) = channel::bounded(1);
  let task = Task {
    f: Box::new(move |ctx| {
      let result = f(ctx);
      // A failed send means the caller dropped the future; discard.
      let _ = tx.send(Ok(result));
    }),
  };
  (task, CallRet { rx })
}

/// The future half of a cooperative call.
///
/// If the worker consumes the task but never produces a result (a recovered
/// panic, or termination mid-queue), waiting yields
/// [`CallError::Aborted`].
pub struct CallRet<R> {
  rx: Receiver<Result<R, CallError>>,
}

impl<R> CallRet<R> {
  /// A future that is already failed; used when the call was never queued.
  pub(crate) fn failed(err: CallError) -> CallRet<R> {
    let (tx, rx) = channel::bounded(1);
    let _ = tx.send(Err(err));
    CallRet { rx }
  }

  /// Block until the worker resolves the call.
  pub fn wait(self) -> Result<R, CallError> {
    match self.rx.recv() {
      Ok(res) => res,
      Err(_) => Err(CallError::Aborted),
    }
  }

  /// Non-blocking probe.
  pub fn try_wait(&self) -> Result<R, CallError> {
    match self.rx.try_recv() {
      Ok(res) => res,
      Err(channel::TryRecvError::Empty) => Err(CallError::NotReady),
      Err(channel::TryRecvError::Disconnected) => Err(CallError::Aborted),
    }
  }

  pub fn wait_timeout(&self, timeout: Duration) -> Result<R, CallError> {
    match self.rx.recv_timeout(timeout) {
      Ok(res) => res,
      Err(channel::RecvTimeoutError::Timeout) => Err(CallError::NotReady),
      Err(channel::RecvTimeoutError::Disconnected) => Err(CallError::Aborted),
    }
  }
}

/// Shared termination state between a runtime, its context and every
/// handle.
pub(crate) struct Terminator {
  requested: AtomicBool,
  done: AtomicBool,
  wake_tx: Sender<()>,
  wake_rx: Receiver<()>,
  done_tx: Mutex<Option<Sender<()>>>,
  done_rx: Receiver<()>,
}

impl Terminator {
  pub fn new() -> Arc<Terminator> {
    let (wake_tx, wake_rx) = channel::bounded(1);
    let (done_tx, done_rx) = channel::bounded::<()>(1);
    Arc::new(Terminator {
      requested: AtomicBool::new(false),
      done: AtomicBool::new(false),
      wake_tx,
      wake_rx,
      done_tx: Mutex::new(Some(done_tx)),
      done_rx,
    })
  }

  /// Ask the worker to wind down after the current tick.
  pub fn request(&self) {
    self.requested.store(true, Ordering::SeqCst);
    let _ = self.wake_tx.try_send(());
  }

  pub fn is_requested(&self) -> bool {
    self.requested.load(Ordering::SeqCst)
  }

  pub fn is_done(&self) -> bool {
    self.done.load(Ordering::SeqCst)
  }

  /// The channel the worker selects on so a terminate request interrupts a
  /// blocking wait.
  pub fn wake_rx(&self) -> &Receiver<()> {
    &self.wake_rx
  }

  /// Called by the worker as its very last act; unblocks every waiter.
  pub fn finish(&self) {
    self.done.store(true, Ordering::SeqCst);
    *self.done_tx.lock().unwrap() = None;
  }

  pub fn wait_handle(&self) -> TerminatedWait {
    TerminatedWait {
      rx: self.done_rx.clone(),
    }
  }
}

/// A handle that resolves when the runtime has fully terminated.
#[derive(Clone)]
pub struct TerminatedWait {
  rx: Receiver<()>,
}

impl TerminatedWait {
  /// Block until the worker has emitted `Terminated` and exited.
  pub fn wait(&self) {
    // Nothing is ever sent; disconnect is the signal.
    while self.rx.recv().is_ok() {}
  }

  /// True if the runtime terminated within the timeout.
  pub fn wait_timeout(&self, timeout: Duration) -> bool {
    matches!(
      self.rx.recv_timeout(timeout),
      Err(channel::RecvTimeoutError::Disconnected)
    )
  }
}
