//! The `Play…` control surface of a manually stepped runtime.
//!
//! Directives travel over a rendezvous channel, so a successful `play`
//! means the worker actually accepted the directive. Every directive
//! extends the permitted-until cursor (or installs a continue predicate);
//! the manual loop then ticks until the cursor is reached and blocks again.

use std::rc::Rc;
use std::time::Duration;

use crossbeam::channel;

use crate::context::Context;
use crate::errors::PlayError;

use super::RuntimeHandle;

/// A single play directive.
pub(crate) enum Ctrl {
  /// Advance the cursor by this many frames.
  FrameDelta(u64),
  /// Move the cursor forward to an absolute frame (never backwards).
  FrameAt(u64),
  /// Tick while the predicate holds, re-evaluated every tick.
  IfContinue(Box<dyn Fn(&Rc<Context>) -> bool + Send>),
}

impl RuntimeHandle {
  /// Permit `delta` worth of frames: `⌊delta · target_fps⌋`.
  pub fn play(&self, delta: Duration) -> Result<(), PlayError> {
    let frames = (delta.as_secs_f64() * self.target_fps()) as u64;
    self.send_ctrl(Ctrl::FrameDelta(frames), None)
  }

  /// Move the cursor to the frame at time `at` from the start.
  pub fn play_at(&self, at: Duration) -> Result<(), PlayError> {
    let frame = (at.as_secs_f64() * self.target_fps()) as u64;
    self.send_ctrl(Ctrl::FrameAt(frame), None)
  }

  /// Permit exactly `frames` more frames. Zero is accepted and has no
  /// effect.
  pub fn play_frames(&self, frames: u64) -> Result<(), PlayError> {
    self.send_ctrl(Ctrl::FrameDelta(frames), None)
  }

  /// Move the cursor to an absolute frame count.
  pub fn play_frames_at(&self, at: u64) -> Result<(), PlayError> {
    self.send_ctrl(Ctrl::FrameAt(at), None)
  }

  /// [`play_frames`](Self::play_frames) with a bounded wait for the worker
  /// to accept the directive.
  pub fn play_frames_timeout(
    &self,
    frames: u64,
    timeout: Duration,
  ) -> Result<(), PlayError> {
    self.send_ctrl(Ctrl::FrameDelta(frames), Some(timeout))
  }

  /// Keep ticking while `pred` returns true; the predicate is re-evaluated
  /// before every tick on the worker.
  pub fn play_if_continue(
    &self,
    pred: impl Fn(&Rc<Context>) -> bool + Send + 'static,
  ) -> Result<(), PlayError> {
    self.send_ctrl(Ctrl::IfContinue(Box::new(pred)), None)
  }

  fn send_ctrl(
    &self,
    ctrl: Ctrl,
    timeout: Option<Duration>,
  ) -> Result<(), PlayError> {
    if !self.is_manual() {
      return Err(PlayError::NotManual);
    }
    if self.terminated_flag() {
      return Err(PlayError::Closed);
    }

    match timeout {
      None => self.ctrl_tx().send(ctrl).map_err(|_| PlayError::Closed),
      Some(timeout) => {
        self
          .ctrl_tx()
          .send_timeout(ctrl, timeout)
          .map_err(|err| match err {
            channel::SendTimeoutError::Timeout(_) => PlayError::Deadline,
            channel::SendTimeoutError::Disconnected(_) => PlayError::Closed,
          })
      }
    }
  }
}
