//! The four inner loops of the worker.
//!
//! Per tick, every mode follows the same logical skeleton: frame events and
//! both update passes (`Worker::frame_tick`), then a bounded drain of the
//! task queue, then GC when the frame counter crosses the sweep cadence.
//! The modes differ only in what paces the ticks: wall clocks, nothing, or
//! `Play…` directives.

use std::rc::Rc;
use std::time::{Duration, Instant};

use crossbeam::channel;
use crossbeam::select;

use crate::context::Context;
use crate::frame::FrameMode;

use super::ctrl::Ctrl;
use super::running::Worker;

/// What gates the next tick in manual mode.
enum Gate {
  /// Tick while `cur_frames` is below the cursor.
  Cursor(u64),
  /// Tick while the predicate holds.
  Predicate(Box<dyn Fn(&Rc<Context>) -> bool + Send>),
}

impl Worker {
  pub(super) fn main_loop(&self) {
    let mode = self.ctx.frame().as_ref().map(|f| f.mode());
    match mode {
      None => self.looping_no_frame(),
      Some(FrameMode::RealTime) => self.looping_real_time(),
      Some(FrameMode::Simulate) => self.looping_simulate(),
      Some(FrameMode::Manual) => self.looping_manual(),
    }
  }

  fn cur_frames(&self) -> u64 {
    self
      .ctx
      .frame()
      .as_ref()
      .map(|f| f.cur_frames())
      .unwrap_or(0)
  }

  fn total_frames(&self) -> u64 {
    self
      .ctx
      .frame()
      .as_ref()
      .map(|f| f.total_frames())
      .unwrap_or(0)
  }

  fn frames_exhausted(&self) -> bool {
    let total = self.total_frames();
    total > 0 && self.cur_frames() >= total
  }

  fn gc_due(&self) -> bool {
    self.gc_frames > 0 && self.cur_frames() % self.gc_frames == 0
  }

  /// No frame: a pure task pump with wall-clock GC.
  fn looping_no_frame(&self) {
    let gc_tick = channel::tick(self.gc_interval);

    while !self.term.is_requested() {
      select! {
        recv(self.task_rx) -> task => match task {
          Ok(task) => self.run_task(task),
          Err(_) => break,
        },
        recv(self.term.wake_rx()) -> _ => {}
        recv(gc_tick) -> _ => self.run_gc(),
      }
    }

    self.drain_tasks();
    self.run_gc();
  }

  /// Wall-clock pacing toward the target FPS: tick, then serve tasks until
  /// the next frame deadline.
  fn looping_real_time(&self) {
    let period = {
      let frame = self.ctx.frame();
      let fps = frame.as_ref().map(|f| f.target_fps()).unwrap_or(1.0);
      Duration::from_secs_f64(1.0 / fps)
    };
    let mut deadline = Instant::now();

    loop {
      if self.term.is_requested() || self.frames_exhausted() {
        break;
      }
      if self.gc_due() {
        self.run_gc();
      }

      self.frame_tick();

      deadline += period;
      let now = Instant::now();
      if deadline < now {
        // The tick overran one or more periods; don't try to catch up.
        deadline = now;
        continue;
      }

      'serving: loop {
        let now = Instant::now();
        if now >= deadline || self.term.is_requested() {
          break 'serving;
        }
        select! {
          recv(self.task_rx) -> task => match task {
            Ok(task) => self.run_task(task),
            Err(_) => break 'serving,
          },
          recv(self.term.wake_rx()) -> _ => break 'serving,
          recv(channel::after(deadline - now)) -> _ => break 'serving,
        }
      }
    }

    self.drain_tasks();
    self.run_gc();
  }

  /// Virtual clock, as fast as the worker can go.
  fn looping_simulate(&self) {
    loop {
      if self.term.is_requested() || self.frames_exhausted() {
        break;
      }
      if self.gc_due() {
        self.run_gc();
      }
      self.frame_tick();
      self.drain_tasks();
    }

    self.drain_tasks();
    self.run_gc();
  }

  /// Virtual clock gated by the `Play…` directives: block until a
  /// directive arrives, tick until it is satisfied, block again.
  fn looping_manual(&self) {
    let mut gate = Gate::Cursor(0);

    loop {
      if self.term.is_requested() || self.frames_exhausted() {
        break;
      }

      let open = match &gate {
        Gate::Cursor(cursor) => self.cur_frames() < *cursor,
        Gate::Predicate(pred) => {
          let open = pred(&self.ctx);
          if !open {
            gate = Gate::Cursor(self.cur_frames());
          }
          open
        }
      };

      if !open {
        // Blocked: serve tasks while waiting for the next directive.
        select! {
          recv(self.ctrl_rx) -> ctrl => match ctrl {
            Ok(ctrl) => self.apply_ctrl(ctrl, &mut gate),
            Err(_) => break,
          },
          recv(self.task_rx) -> task => match task {
            Ok(task) => self.run_task(task),
            Err(_) => break,
          },
          recv(self.term.wake_rx()) -> _ => {}
        }
        continue;
      }

      if self.gc_due() {
        self.run_gc();
      }
      self.frame_tick();
      self.drain_tasks();
    }

    self.drain_tasks();
    self.run_gc();
  }

  fn apply_ctrl(&self, ctrl: Ctrl, gate: &mut Gate) {
    match ctrl {
      Ctrl::FrameDelta(frames) => {
        let cursor = match gate {
          Gate::Cursor(cursor) => cursor.saturating_add(frames),
          Gate::Predicate(_) => self.cur_frames().saturating_add(frames),
        };
        *gate = Gate::Cursor(cursor);
      }
      Ctrl::FrameAt(at) => {
        let cursor = match gate {
          Gate::Cursor(cursor) => at.max(*cursor),
          Gate::Predicate(_) => at.max(self.cur_frames()),
        };
        *gate = Gate::Cursor(cursor);
      }
      Ctrl::IfContinue(pred) => *gate = Gate::Predicate(pred),
    }
  }
}
