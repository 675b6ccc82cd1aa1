//! Frame and tick bookkeeping.
//!
//! A [`Frame`] is pure accounting: the scheduler calls the begin/end
//! markers and the frame derives FPS, elapse and the virtual clock from
//! them. In simulate and manual modes the clock advances by a fixed
//! `1/target_fps` per loop regardless of wall time; in real-time mode wall
//! clocks drive everything and the current FPS is sampled over one-second
//! windows.

use std::cell::Cell;
use std::time::{Duration, Instant};

/// How the scheduler paces its main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameMode {
  /// Wall-clock ticks, sleeping between frames to hit the target FPS.
  #[default]
  RealTime,
  /// Virtual ticks as fast as possible; for batch replays.
  Simulate,
  /// Virtual ticks gated by the `Play…` directives.
  Manual,
}

/// Per-runtime frame state. Worker-local; the cells exist so the scheduler
/// can update counters through a shared reference.
#[derive(Debug)]
pub struct Frame {
  mode: FrameMode,
  target_fps: f64,
  total_frames: u64,
  cur_fps: Cell<f64>,
  cur_frames: Cell<u64>,
  running_begin_time: Cell<Instant>,
  running_elapse: Cell<Duration>,
  loop_begin_time: Cell<Instant>,
  last_loop_elapse: Cell<Duration>,
  update_begin_time: Cell<Instant>,
  last_update_elapse: Cell<Duration>,
  stat_fps_begin_time: Cell<Instant>,
  stat_fps_frames: Cell<u64>,
  fixed_loop_elapse: Cell<Duration>,
}

impl Frame {
  /// Build a frame. `target_fps` must be positive; `total_frames` of zero
  /// means unbounded.
  ///
  /// Panics if `target_fps` is not a positive finite number.
  pub fn new(mode: FrameMode, target_fps: f64, total_frames: u64) -> Frame {
    assert!(
      target_fps.is_finite() && target_fps > 0.0,
      "target_fps must be positive, got {target_fps}"
    );
    let now = Instant::now();
    Frame {
      mode,
      target_fps,
      total_frames,
      cur_fps: Cell::new(0.0),
      cur_frames: Cell::new(0),
      running_begin_time: Cell::new(now),
      running_elapse: Cell::new(Duration::ZERO),
      loop_begin_time: Cell::new(now),
      last_loop_elapse: Cell::new(Duration::ZERO),
      update_begin_time: Cell::new(now),
      last_update_elapse: Cell::new(Duration::ZERO),
      stat_fps_begin_time: Cell::new(now),
      stat_fps_frames: Cell::new(0),
      fixed_loop_elapse: Cell::new(Duration::ZERO),
    }
  }

  pub fn real_time(target_fps: f64) -> Frame {
    Frame::new(FrameMode::RealTime, target_fps, 0)
  }

  pub fn simulate(target_fps: f64, total_frames: u64) -> Frame {
    Frame::new(FrameMode::Simulate, target_fps, total_frames)
  }

  pub fn manual(target_fps: f64) -> Frame {
    Frame::new(FrameMode::Manual, target_fps, 0)
  }

  pub fn mode(&self) -> FrameMode {
    self.mode
  }

  pub fn target_fps(&self) -> f64 {
    self.target_fps
  }

  /// Frame cap; zero means run until terminated.
  pub fn total_frames(&self) -> u64 {
    self.total_frames
  }

  /// Measured FPS (real-time mode only; zero elsewhere).
  pub fn cur_fps(&self) -> f64 {
    self.cur_fps.get()
  }

  pub fn cur_frames(&self) -> u64 {
    self.cur_frames.get()
  }

  pub fn running_begin_time(&self) -> Instant {
    self.running_begin_time.get()
  }

  /// Total (virtual or wall) time the loop has run.
  pub fn running_elapse(&self) -> Duration {
    self.running_elapse.get()
  }

  pub fn loop_begin_time(&self) -> Instant {
    self.loop_begin_time.get()
  }

  pub fn last_loop_elapse(&self) -> Duration {
    self.last_loop_elapse.get()
  }

  pub fn update_begin_time(&self) -> Instant {
    self.update_begin_time.get()
  }

  pub fn last_update_elapse(&self) -> Duration {
    self.last_update_elapse.get()
  }

  fn is_virtual(&self) -> bool {
    matches!(self.mode, FrameMode::Simulate | FrameMode::Manual)
  }

  pub(crate) fn running_begin(&self) {
    let now = Instant::now();
    self.cur_fps.set(0.0);
    self.cur_frames.set(0);
    self.stat_fps_begin_time.set(now);
    self.stat_fps_frames.set(0);
    self.running_begin_time.set(now);
    self.running_elapse.set(Duration::ZERO);
    self.loop_begin_time.set(now);
    self.last_loop_elapse.set(Duration::ZERO);
    self.update_begin_time.set(now);
    self.last_update_elapse.set(Duration::ZERO);
    if self.is_virtual() {
      self
        .fixed_loop_elapse
        .set(Duration::from_secs_f64(1.0 / self.target_fps));
    }
  }

  pub(crate) fn running_end(&self) {}

  fn virtual_clock(&self) -> Instant {
    self.running_begin_time.get()
      + Duration::from_secs_f64(
        self.fixed_loop_elapse.get().as_secs_f64()
          * self.cur_frames.get() as f64,
      )
  }

  pub(crate) fn loop_begin(&self) {
    if self.is_virtual() {
      self.loop_begin_time.set(self.virtual_clock());
      return;
    }

    let now = Instant::now();
    self.loop_begin_time.set(now);

    let stat_interval = now - self.stat_fps_begin_time.get();
    if stat_interval >= Duration::from_secs(1) {
      self
        .cur_fps
        .set(self.stat_fps_frames.get() as f64 / stat_interval.as_secs_f64());
      self.stat_fps_begin_time.set(now);
      self.stat_fps_frames.set(0);
    }
  }

  pub(crate) fn loop_end(&self) {
    if self.is_virtual() {
      let fixed = self.fixed_loop_elapse.get();
      self.last_loop_elapse.set(fixed);
      self.running_elapse.set(self.running_elapse.get() + fixed);
    } else {
      let elapse = Instant::now() - self.loop_begin_time.get();
      self.last_loop_elapse.set(elapse);
      self.running_elapse.set(self.running_elapse.get() + elapse);
      self.stat_fps_frames.set(self.stat_fps_frames.get() + 1);
    }
    self.cur_frames.set(self.cur_frames.get() + 1);
  }

  pub(crate) fn update_begin(&self) {
    if self.is_virtual() {
      self.update_begin_time.set(self.virtual_clock());
    } else {
      self.update_begin_time.set(Instant::now());
    }
  }

  pub(crate) fn update_end(&self) {
    if self.is_virtual() {
      self.last_update_elapse.set(self.fixed_loop_elapse.get());
    } else {
      self
        .last_update_elapse
        .set(Instant::now() - self.update_begin_time.get());
    }
  }
}
