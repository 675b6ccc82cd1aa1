//! Error types for every public surface of the runtime.

use std::backtrace::Backtrace;
use std::fmt;

use smol_str::SmolStr;
use thiserror::Error;

use crate::component::ComponentState;
use crate::entity::EntityState;
use crate::id::Id;

/// Argument and lifecycle errors from the entity-component core.
#[derive(Debug, Error)]
pub enum EcError {
  #[error("components list is empty")]
  EmptyComponents,
  #[error("component {name:?} is in state {state}, expected birth")]
  ComponentNotBirth { name: SmolStr, state: ComponentState },
  #[error("entity is in state {0}, expected birth")]
  EntityNotBirth(EntityState),
  #[error("component name {0:?} is fixed on this entity")]
  DuplicateFixedName(SmolStr),
  #[error("duplicate entity id {0}")]
  DuplicateId(Id),
  #[error("entity {0} not found")]
  EntityNotFound(Id),
  #[error("parent {0} not found")]
  ParentNotFound(Id),
  #[error("entity {0} cannot be its own parent")]
  SelfParent(Id),
  #[error("parent {id} is in state {state}, cannot take children")]
  ParentNotLive { id: Id, state: EntityState },
  #[error("entity {id} is in state {state}, cannot rearrange its tree node")]
  EntityNotLive { id: Id, state: EntityState },
  #[error("moving {child} under {parent} would create a cycle")]
  TreeCycle { child: Id, parent: Id },
  #[error("entity {0} is not detached")]
  NotDetached(Id),
  #[error("entity prototype {0:?} is not declared")]
  UnknownPrototype(SmolStr),
  #[error("building entity from prototype {0:?}: {1}")]
  Instantiate(SmolStr, eyre::Error),
}

/// Errors from the `Play…` control surface of a manually stepped runtime.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PlayError {
  #[error("ctrl chan is closed")]
  Closed,
  #[error("runtime frame is not in manual mode")]
  NotManual,
  #[error("deadline elapsed while waiting on the ctrl chan")]
  Deadline,
}

/// Errors observed by a cooperative-call future.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CallError {
  #[error("runtime is terminated, call was not accepted")]
  Terminated,
  #[error("call was consumed but produced no result")]
  Aborted,
  #[error("task queue is full")]
  QueueFull,
  #[error("result is not ready yet")]
  NotReady,
}

/// Fatal runtime misuse.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RunError {
  #[error("runtime is already running")]
  AlreadyRunning,
  #[error("runtime context is already terminated")]
  Terminated,
  #[error("runtime context is already paired with another runtime")]
  AlreadyPaired,
}

/// A panic recovered inside a user callback, wrapped for the report sink.
///
/// Only produced when the context runs with `auto_recover`; otherwise the
/// panic propagates up the worker and aborts the runtime.
pub struct PanicReport {
  /// What the worker was doing when the callback panicked.
  pub what: SmolStr,
  /// Best-effort rendering of the panic payload.
  pub message: String,
  pub backtrace: Backtrace,
}

impl PanicReport {
  pub(crate) fn new(what: impl Into<SmolStr>, message: String) -> Self {
    PanicReport {
      what: what.into(),
      message,
      backtrace: Backtrace::capture(),
    }
  }
}

impl fmt::Debug for PanicReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PanicReport")
      .field("what", &self.what)
      .field("message", &self.message)
      .finish_non_exhaustive()
  }
}

impl fmt::Display for PanicReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.what, self.message)
  }
}

/// Render a `catch_unwind` payload the way the panic hook would.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&'static str>() {
    (*s).to_owned()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "non-string panic payload".to_owned()
  }
}
