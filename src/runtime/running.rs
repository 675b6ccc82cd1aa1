//! The worker: start/stop sequence and lifecycle orchestration.
//!
//! The worker subscribes to the entity manager's structural events and
//! turns them into ordered lifecycle callbacks: awake/start in two phases
//! on add, shut/dispose in two reverse passes on remove, first-touch wakes,
//! enable toggles. After every user callback it applies the deferred
//! destroy-self queue, and it re-checks the owner's state between phases —
//! an `awake` body is allowed to tear the world down.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::Receiver;

use crate::call::{Task, Terminator};
use crate::component::{Access, Component, ComponentCell, ComponentState};
use crate::context::{Context, RunningEvent};
use crate::entity::{Entity, EntityBehavior, EntityState};
use crate::errors::{panic_message, PanicReport};
use crate::event::Hook;
use crate::frame::Frame;

use super::ctrl::Ctrl;

pub(crate) struct Worker {
  pub(super) ctx: Rc<Context>,
  auto_recover: bool,
  pub(super) task_rx: Receiver<Task>,
  pub(super) ctrl_rx: Receiver<Ctrl>,
  pub(super) term: Arc<Terminator>,
  pub(super) gc_interval: Duration,
  /// Sweep cadence in frames; zero when no frame loop runs.
  pub(super) gc_frames: u64,
  custom_gc: RefCell<Option<Box<dyn FnMut(&Rc<Context>) + Send>>>,
  hooks: RefCell<Vec<Hook>>,
}

impl Worker {
  pub(super) fn new(
    ctx: Rc<Context>,
    task_rx: Receiver<Task>,
    ctrl_rx: Receiver<Ctrl>,
    term: Arc<Terminator>,
    gc_interval: Duration,
    custom_gc: Option<Box<dyn FnMut(&Rc<Context>) + Send>>,
  ) -> Rc<Worker> {
    let gc_frames = ctx
      .frame()
      .as_ref()
      .map(|f| ((gc_interval.as_secs_f64() * f.target_fps()) as u64).max(1))
      .unwrap_or(0);
    Rc::new(Worker {
      auto_recover: ctx.auto_recover(),
      ctx,
      task_rx,
      ctrl_rx,
      term,
      gc_interval,
      gc_frames,
      custom_gc: RefCell::new(custom_gc),
      hooks: RefCell::new(Vec::new()),
    })
  }

  /// The whole life of the worker, from `Starting` to `Terminated`.
  pub(super) fn running(self: &Rc<Self>) {
    let ctx = self.ctx.clone();
    tracing::debug!("runtime starting");
    ctx.emit_running(RunningEvent::Starting);

    self.start_libs();
    self.start_addins();
    self.with_frame(|f| f.running_begin());
    self.bind_manager();

    // Entities added before `run` missed the add event; drive their
    // lifecycle now so pre-run setup behaves like any other add.
    let mgr = ctx.entity_manager();
    for id in mgr.entity_ids() {
      if let Some(e) = mgr.get_entity(id) {
        if e.state() == EntityState::Enter {
          self.on_add_entity(&e);
        }
      }
    }

    ctx.emit_running(RunningEvent::Started);

    self.main_loop();

    tracing::debug!("runtime terminating");
    ctx.emit_running(RunningEvent::Terminating);
    self.shutdown();
    ctx.emit_running(RunningEvent::Terminated);

    ctx.running_event().close();
    self.with_frame(|f| f.running_end());
    ctx.set_callee(None);
    self.term.finish();
    tracing::debug!("runtime terminated");
  }

  pub(super) fn with_frame(&self, f: impl FnOnce(&Frame)) {
    if let Some(frame) = self.ctx.frame().as_ref() {
      f(frame);
    }
  }

  // ---- startup ----

  /// Relay prototype declarations onto the running-event stream, replaying
  /// the ones declared before `Run`.
  fn start_libs(self: &Rc<Self>) {
    let ctx = &self.ctx;
    let lib = ctx.entity_lib();

    let relay = {
      let w = Rc::downgrade(self);
      lib.component_lib().ev_declare.bind(move |pt| {
        if let Some(w) = w.upgrade() {
          w.ctx.emit_running(RunningEvent::ComponentPTDeclared(
            pt.prototype().clone(),
          ));
        }
      })
    };
    self.hooks.borrow_mut().push(relay);
    for pt in lib.component_lib().list() {
      ctx.emit_running(RunningEvent::ComponentPTDeclared(
        pt.prototype().clone(),
      ));
    }

    let relay = {
      let w = Rc::downgrade(self);
      lib.ev_declare.bind(move |pt| {
        if let Some(w) = w.upgrade() {
          w.ctx
            .emit_running(RunningEvent::EntityPTDeclared(pt.prototype().clone()));
        }
      })
    };
    self.hooks.borrow_mut().push(relay);
    for pt in lib.list() {
      ctx.emit_running(RunningEvent::EntityPTDeclared(pt.prototype().clone()));
    }
  }

  fn start_addins(self: &Rc<Self>) {
    let addins = self.ctx.add_in_manager();

    let hook = {
      let w = Rc::downgrade(self);
      addins.ev_install.bind(move |status| {
        if let Some(w) = w.upgrade() {
          w.activate_addin(status);
        }
      })
    };
    self.hooks.borrow_mut().push(hook);

    let hook = {
      let w = Rc::downgrade(self);
      addins.ev_uninstall.bind(move |status| {
        if let Some(w) = w.upgrade() {
          w.deactivate_addin(status);
        }
      })
    };
    self.hooks.borrow_mut().push(hook);

    for status in addins.list() {
      self.activate_addin(&status);
    }
  }

  fn activate_addin(&self, status: &Rc<crate::addin::AddInStatus>) {
    use crate::addin::AddInState;

    if status.state() != AddInState::Loaded {
      return;
    }
    let ctx = &self.ctx;
    let name = status.name().clone();
    ctx.emit_running(RunningEvent::AddInActivating(name.clone()));

    // A subscriber may have uninstalled it mid-activation.
    if status.state() != AddInState::Loaded {
      ctx.emit_running(RunningEvent::AddInActivatingAborted(name));
      return;
    }

    let mut ok = true;
    self.recover("add-in init", || {
      match status.addin.try_borrow_mut() {
        Ok(mut addin) => {
          if let Err(err) = addin.init(ctx) {
            tracing::warn!(name = %status.name(), %err, "add-in init failed");
            ok = false;
          }
        }
        Err(_) => ok = false,
      }
    });
    self.ctx.finalize();

    if !ok || status.state() != AddInState::Loaded {
      status.set_state(AddInState::Unloaded);
      ctx.emit_running(RunningEvent::AddInActivatingAborted(name));
      return;
    }

    status.set_state(AddInState::Running);
    ctx.emit_running(RunningEvent::AddInActivatingDone(name));

    if status.state() != AddInState::Running {
      return;
    }

    // Let it watch the milestones for as long as it runs.
    let hook = {
      let weak_ctx = Rc::downgrade(ctx);
      let status = status.clone();
      ctx.running_event().bind(move |ev| {
        if status.state() != AddInState::Running {
          return;
        }
        let Some(ctx) = weak_ctx.upgrade() else { return };
        if let Ok(mut addin) = status.addin.try_borrow_mut() {
          addin.on_running_event(&ctx, ev);
        }
      })
    };
    status.hooks.manage(hook);
  }

  fn deactivate_addin(&self, status: &Rc<crate::addin::AddInStatus>) {
    use crate::addin::AddInState;

    if status.state() != AddInState::Running {
      return;
    }
    let ctx = &self.ctx;
    let name = status.name().clone();
    ctx.emit_running(RunningEvent::AddInDeactivating(name.clone()));

    self.recover("add-in shut", || {
      if let Ok(mut addin) = status.addin.try_borrow_mut() {
        addin.shut(ctx);
      }
    });
    self.ctx.finalize();

    ctx.emit_running(RunningEvent::AddInDeactivatingDone(name));
    status.hooks.unbind_all();
    status.set_state(AddInState::Unloaded);
  }

  fn bind_manager(self: &Rc<Self>) {
    let mgr = self.ctx.entity_manager();
    let mut hooks = self.hooks.borrow_mut();

    let w = Rc::downgrade(self);
    hooks.push(mgr.ev_add_entity.bind(move |e| {
      if let Some(w) = w.upgrade() {
        w.on_add_entity(e);
      }
    }));

    let w = Rc::downgrade(self);
    hooks.push(mgr.ev_remove_entity.bind(move |e| {
      if let Some(w) = w.upgrade() {
        w.on_remove_entity(e);
      }
    }));

    let w = Rc::downgrade(self);
    hooks.push(mgr.ev_add_components.bind(move |(e, comps)| {
      if let Some(w) = w.upgrade() {
        w.on_add_components(e, comps);
      }
    }));

    let w = Rc::downgrade(self);
    hooks.push(mgr.ev_remove_component.bind(move |(e, comp)| {
      if let Some(w) = w.upgrade() {
        w.on_remove_component(e, comp);
      }
    }));

    let w = Rc::downgrade(self);
    hooks.push(mgr.ev_first_touch.bind(move |(e, comp)| {
      if let Some(w) = w.upgrade() {
        w.on_first_touch(e, comp);
      }
    }));

    let w = Rc::downgrade(self);
    hooks.push(mgr.ev_enable_changed.bind(move |(e, comp, enabled)| {
      if let Some(w) = w.upgrade() {
        w.on_enable_changed(e, comp, *enabled);
      }
    }));
  }

  // ---- lifecycle orchestration ----

  fn entity_waking(e: &Rc<Entity>) -> bool {
    matches!(
      e.state(),
      EntityState::Awake | EntityState::Start | EntityState::Alive
    )
  }

  fn on_add_entity(&self, e: &Rc<Entity>) {
    if e.state() != EntityState::Enter {
      return;
    }

    e.set_state(EntityState::Awake);
    self.invoke_face(e, "entity awake", |face, access| face.awake(access));
    if e.state() > EntityState::Alive {
      return;
    }

    if !e.awake_on_first_touch() {
      let comps = self.snapshot_components(e);
      self.wake_components(e, &comps);
      if e.state() > EntityState::Alive {
        return;
      }
    }

    e.set_state(EntityState::Start);
    self.invoke_face(e, "entity start", |face, access| face.start(access));
    if e.state() > EntityState::Alive {
      return;
    }
    e.set_state(EntityState::Alive);
  }

  fn on_add_components(&self, e: &Rc<Entity>, comps: &[Rc<ComponentCell>]) {
    if !Self::entity_waking(e) {
      return;
    }
    if e.awake_on_first_touch() {
      return;
    }
    self.wake_components(e, comps);
  }

  /// Two-phase wake: every component gets `awake` before any gets `start`.
  /// The owner's state is re-checked after each callback.
  fn wake_components(&self, e: &Rc<Entity>, comps: &[Rc<ComponentCell>]) {
    for comp in comps {
      if e.state() > EntityState::Alive {
        return;
      }
      if comp.state() != ComponentState::Attach {
        continue;
      }
      comp.set_state(ComponentState::Awake);
      self.invoke_comp(e, comp, "component awake", |c, a| c.awake(a));
      comp.set_state(ComponentState::Start);
    }

    for comp in comps {
      if e.state() > EntityState::Alive {
        return;
      }
      if comp.state() != ComponentState::Start {
        continue;
      }
      self.invoke_comp(e, comp, "component start", |c, a| c.start(a));
      comp.set_state(ComponentState::Alive);
    }
  }

  fn on_first_touch(&self, e: &Rc<Entity>, comp: &Rc<ComponentCell>) {
    if e.state() > EntityState::Alive {
      return;
    }
    if comp.state() != ComponentState::Attach {
      return;
    }
    comp.set_state(ComponentState::Awake);
    self.invoke_comp(e, comp, "component awake", |c, a| c.awake(a));

    if e.state() > EntityState::Alive
      || comp.state() != ComponentState::Awake
    {
      comp.set_state(ComponentState::Start);
      return;
    }
    comp.set_state(ComponentState::Start);
    self.invoke_comp(e, comp, "component start", |c, a| c.start(a));
    comp.set_state(ComponentState::Alive);
  }

  fn on_remove_component(&self, e: &Rc<Entity>, comp: &Rc<ComponentCell>) {
    if comp.state() != ComponentState::Detach {
      return;
    }
    let woke = comp.has_woken();
    comp.set_state(ComponentState::Shut);
    if woke {
      self.invoke_comp(e, comp, "component shut", |c, a| c.shut(a));
    }
    comp.set_state(ComponentState::Death);
    if woke {
      self.invoke_comp(e, comp, "component dispose", |c, a| c.dispose(a));
    }
  }

  /// The shut walk of a dying entity: entity shut, components shut in
  /// reverse order, components dispose in reverse order, entity dispose.
  fn on_remove_entity(&self, e: &Rc<Entity>) {
    e.set_state(EntityState::Shut);
    self.invoke_face(e, "entity shut", |face, access| face.shut(access));

    let mut comps = self.snapshot_components(e);
    comps.reverse();

    let mut woke = Vec::with_capacity(comps.len());
    for comp in &comps {
      if comp.state() > ComponentState::Alive {
        woke.push(false);
        continue;
      }
      let w = comp.has_woken();
      woke.push(w);
      comp.set_state(ComponentState::Shut);
      if w {
        self.invoke_comp(e, comp, "component shut", |c, a| c.shut(a));
      }
    }

    for (comp, w) in comps.iter().zip(woke.iter()) {
      if comp.state() != ComponentState::Shut {
        continue;
      }
      comp.set_state(ComponentState::Death);
      if *w {
        self.invoke_comp(e, comp, "component dispose", |c, a| c.dispose(a));
      }
    }

    self.invoke_face(e, "entity dispose", |face, access| face.dispose(access));
  }

  fn on_enable_changed(
    &self,
    e: &Rc<Entity>,
    comp: &Rc<ComponentCell>,
    enabled: bool,
  ) {
    if comp.state() > ComponentState::Alive {
      return;
    }
    if enabled {
      self.invoke_comp(e, comp, "component on_enable", |c, a| c.on_enable(a));
    } else {
      self.invoke_comp(e, comp, "component on_disable", |c, a| {
        c.on_disable(a)
      });
    }
  }

  /// Live components in insertion order, collected without running any
  /// user code.
  fn snapshot_components(&self, e: &Rc<Entity>) -> Vec<Rc<ComponentCell>> {
    let comps = e.comps.borrow();
    comps.iter().map(|(_, c)| c.clone()).collect()
  }

  // ---- the frame ----

  /// One full tick: frame markers, running events, the update and
  /// late-update passes.
  pub(super) fn frame_tick(&self) {
    self.with_frame(|f| f.loop_begin());
    self.ctx.emit_running(RunningEvent::FrameLoopBegin);

    self.with_frame(|f| f.update_begin());
    self.ctx.emit_running(RunningEvent::FrameUpdateBegin);

    self.update_pass(false);
    self.update_pass(true);

    self.with_frame(|f| f.update_end());
    self.ctx.emit_running(RunningEvent::FrameUpdateEnd);

    self.with_frame(|f| f.loop_end());
    self.ctx.emit_running(RunningEvent::FrameLoopEnd);
  }

  /// Walk every alive entity in insertion order and run `update` (or
  /// `late_update`) on its face and its alive, enabled components.
  fn update_pass(&self, late: bool) {
    let mgr = self.ctx.entity_manager();
    let mut ids = self.ctx.id_buffer();
    ids.extend(mgr.entity_ids());

    for &id in ids.iter() {
      let Some(e) = mgr.get_entity(id) else { continue };
      if e.state() != EntityState::Alive {
        continue;
      }

      if late {
        self.invoke_face(&e, "entity late_update", |f, a| f.late_update(a));
      } else {
        self.invoke_face(&e, "entity update", |f, a| f.update(a));
      }

      let mut cur = e.comps.borrow().head();
      while let Some(idx) = cur {
        if e.state() != EntityState::Alive {
          break;
        }
        let comp = {
          let comps = e.comps.borrow();
          if comps.is_orphan(idx) {
            None
          } else {
            comps.peek(idx).cloned()
          }
        };
        if let Some(comp) = comp {
          if comp.state() == ComponentState::Alive && comp.is_enabled() {
            if late {
              self.invoke_comp(&e, &comp, "component late_update", |c, a| {
                c.late_update(a)
              });
            } else {
              self.invoke_comp(&e, &comp, "component update", |c, a| {
                c.update(a)
              });
            }
          }
        }
        cur = e.comps.borrow().next(idx);
      }
    }
  }

  // ---- tasks & gc ----

  pub(super) fn run_task(&self, task: Task) {
    self.ctx.emit_running(RunningEvent::RunCallBegin);
    let ctx = self.ctx.clone();
    self.recover("task", move || task.run(&ctx));
    self.ctx.finalize();
    self.ctx.emit_running(RunningEvent::RunCallEnd);
  }

  pub(super) fn drain_tasks(&self) {
    while let Ok(task) = self.task_rx.try_recv() {
      self.run_task(task);
    }
  }

  pub(super) fn run_gc(&self) {
    self.ctx.emit_running(RunningEvent::RunGCBegin);

    for obj in self.ctx.drain_gc_list() {
      if obj.need_gc() {
        obj.gc();
      }
    }

    let mgr = self.ctx.entity_manager();
    mgr.run_gc();
    for id in mgr.entity_ids() {
      if let Some(e) = mgr.get_entity(id) {
        e.run_gc();
      }
    }
    self.ctx.running_event().sweep();

    if let Some(custom) = self.custom_gc.borrow_mut().as_mut() {
      custom(&self.ctx);
    }

    self.ctx.emit_running(RunningEvent::RunGCEnd);
  }

  // ---- teardown ----

  fn shutdown(&self) {
    // Destroy in reverse insertion order; subtree members already removed
    // by an earlier ancestor come back as no-ops.
    let ids = self.ctx.entity_manager().entity_ids();
    for id in ids.into_iter().rev() {
      self.ctx.entity_manager().remove_entity(id);
    }
    self.ctx.finalize();

    for status in self.ctx.add_in_manager().list().into_iter().rev() {
      self.deactivate_addin(&status);
    }

    for hook in self.hooks.borrow_mut().drain(..) {
      hook.unbind();
    }

    self.run_gc();
    self.ctx.entity_manager().close_events();
    self.ctx.add_in_manager().close_events();
    self.ctx.entity_lib().close_events();

    let outstanding = self.ctx.id_buffer_pool().outstanding();
    if outstanding > 0 {
      tracing::warn!(outstanding, "pooled buffers leaked past terminate");
    }
  }

  // ---- callback plumbing ----

  /// Run a user callback, recovering panics when the context says so.
  fn recover(&self, what: &str, f: impl FnOnce()) {
    if !self.auto_recover {
      f();
      return;
    }
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
      let message = panic_message(payload.as_ref());
      tracing::warn!(what, %message, "recovered panic in callback");
      if let Some(report) = self.ctx.report_error() {
        let _ = report.send(PanicReport::new(what, message));
      }
    }
  }

  /// Invoke one component callback, then apply any destroy-self requests it
  /// queued.
  fn invoke_comp(
    &self,
    e: &Rc<Entity>,
    comp: &Rc<ComponentCell>,
    what: &str,
    f: impl FnOnce(&mut dyn Component, &Access<'_>),
  ) {
    match comp.payload_mut() {
      Ok(mut payload) => {
        let access = Access::new(&self.ctx, e, Some(comp));
        self.recover(what, move || f(&mut **payload, &access));
      }
      Err(()) => {
        let message = format!(
          "component {:?} is already borrowed by a callback on the stack",
          comp.name()
        );
        tracing::warn!(what, %message, "skipped re-entrant callback");
        if let Some(report) = self.ctx.report_error() {
          let _ = report.send(PanicReport::new(what, message));
        }
      }
    }
    self.ctx.finalize();
  }

  /// Invoke one entity-behavior callback, then apply any destroy-self
  /// requests it queued. Entities without a face skip straight to the
  /// flush.
  fn invoke_face(
    &self,
    e: &Rc<Entity>,
    what: &str,
    f: impl FnOnce(&mut dyn EntityBehavior, &Access<'_>),
  ) {
    if let Ok(mut face) = e.behavior.try_borrow_mut() {
      if let Some(face) = face.as_mut() {
        let access = Access::new(&self.ctx, e, None);
        self.recover(what, move || f(&mut **face, &access));
      }
    }
    self.ctx.finalize();
  }
}
