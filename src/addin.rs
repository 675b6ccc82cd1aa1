//! Add-ins: runtime extensions observed at their lifecycle-hook boundary.
//!
//! An add-in is installed into the context's [`AddInManager`] and activated
//! by the scheduler before `Started`, deactivated (in reverse install
//! order) before `Terminated`. Between those points it can watch the
//! running-event stream.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use downcast::{downcast, Any};
use smol_str::SmolStr;

use crate::context::{Context, RunningEvent};
use crate::event::{Event, EventOptions, ManagedHooks};

/// A runtime extension.
pub trait AddIn: Any {
  /// Called during activation, before the runtime emits `Started`.
  /// Returning an error aborts the activation; the add-in stays installed
  /// but never runs.
  fn init(&mut self, ctx: &Rc<Context>) -> eyre::Result<()> {
    let _ = ctx;
    Ok(())
  }

  /// Called during deactivation, before the runtime emits `Terminated`.
  fn shut(&mut self, ctx: &Rc<Context>) {
    let _ = ctx;
  }

  /// Observe runtime milestones. Bound to the running-event stream only
  /// while the add-in is in the running state.
  fn on_running_event(&mut self, ctx: &Rc<Context>, ev: &RunningEvent) {
    let _ = (ctx, ev);
  }
}

downcast!(dyn AddIn);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddInState {
  /// Installed, not yet activated.
  Loaded,
  Running,
  /// Deactivated or aborted.
  Unloaded,
}

/// One installed add-in and its state.
pub struct AddInStatus {
  name: SmolStr,
  state: Cell<AddInState>,
  pub(crate) addin: RefCell<Box<dyn AddIn>>,
  pub(crate) hooks: ManagedHooks,
}

impl AddInStatus {
  pub fn name(&self) -> &SmolStr {
    &self.name
  }

  pub fn state(&self) -> AddInState {
    self.state.get()
  }

  pub(crate) fn set_state(&self, state: AddInState) {
    self.state.set(state);
  }

  /// Run a closure over the add-in downcast to its concrete type.
  pub fn with<A: AddIn, R>(&self, f: impl FnOnce(&mut A) -> R) -> Option<R> {
    let mut addin = self.addin.try_borrow_mut().ok()?;
    let concrete = addin.downcast_mut::<A>().ok()?;
    Some(f(concrete))
  }
}

impl fmt::Debug for AddInStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AddInStatus")
      .field("name", &self.name)
      .field("state", &self.state.get())
      .finish()
  }
}

/// The install registry, in install order.
pub struct AddInManager {
  list: RefCell<Vec<Rc<AddInStatus>>>,
  pub(crate) ev_install: Event<Rc<AddInStatus>>,
  pub(crate) ev_uninstall: Event<Rc<AddInStatus>>,
}

impl AddInManager {
  pub(crate) fn new(opts: &EventOptions) -> Self {
    AddInManager {
      list: RefCell::new(Vec::new()),
      ev_install: Event::new(opts.clone()),
      ev_uninstall: Event::new(opts.clone()),
    }
  }

  /// Install an add-in under a name. Installing before `Run` means the
  /// scheduler activates it during `Starting`; installing into a running
  /// runtime activates it immediately.
  pub fn install(
    &self,
    name: impl Into<SmolStr>,
    addin: impl AddIn,
  ) -> Rc<AddInStatus> {
    let status = Rc::new(AddInStatus {
      name: name.into(),
      state: Cell::new(AddInState::Loaded),
      addin: RefCell::new(Box::new(addin)),
      hooks: ManagedHooks::new(),
    });
    self.list.borrow_mut().push(status.clone());
    tracing::debug!(name = %status.name, "install add-in");
    self.ev_install.emit(&status);
    status
  }

  /// Uninstall by name. A running add-in is deactivated first.
  pub fn uninstall(&self, name: &str) {
    let found = {
      let mut list = self.list.borrow_mut();
      match list.iter().position(|s| s.name == name) {
        Some(pos) => Some(list.remove(pos)),
        None => None,
      }
    };
    if let Some(status) = found {
      tracing::debug!(name = %status.name, "uninstall add-in");
      self.ev_uninstall.emit(&status);
      status.hooks.unbind_all();
      status.set_state(AddInState::Unloaded);
    }
  }

  pub fn get(&self, name: &str) -> Option<Rc<AddInStatus>> {
    self.list.borrow().iter().find(|s| s.name == name).cloned()
  }

  /// Installed add-ins in install order.
  pub fn list(&self) -> Vec<Rc<AddInStatus>> {
    self.list.borrow().clone()
  }

  pub(crate) fn close_events(&self) {
    self.ev_install.close();
    self.ev_uninstall.close();
  }
}
