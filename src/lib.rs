//! A deterministic, single-threaded entity-component runtime.
//!
//! One [`Runtime`](crate::runtime::Runtime) owns one worker, which owns one
//! [`Context`](crate::context::Context). The worker drives every entity and
//! component lifecycle callback across discrete frames, so nothing in the
//! population is ever observed from two threads. External code talks to the
//! worker through a bounded cooperative task queue and gets futures back.
//!
//! The crate splits roughly into the entity-component core (entities,
//! components, the per-entity component manager, the entity tree), the
//! plumbing it stands on (versioned free-lists, typed events with recursion
//! policies, object pools), and the scheduler that ties them to a frame
//! clock (real-time, simulated, or manually stepped).

pub mod addin;
pub mod builder;
pub mod compmgr;
pub mod component;
pub mod context;
pub mod entity;
pub mod errors;
pub mod event;
pub mod frame;
pub mod id;
pub mod list;
pub mod manager;
pub mod pool;
pub mod pt;
pub mod runtime;

mod call;

pub use call::{CallRet, TerminatedWait};

pub mod prelude {
  pub use crate::addin::{AddIn, AddInManager, AddInState, AddInStatus};
  pub use crate::builder::build_entity;
  pub use crate::component::{Access, Component, ComponentCell, ComponentState};
  pub use crate::context::{Context, ContextOptions, Gc, RunningEvent};
  pub use crate::entity::{
    Entity, EntityBehavior, EntityOptions, EntityState, Meta, TreeNodeState,
  };
  pub use crate::errors::{
    CallError, EcError, PanicReport, PlayError, RunError,
  };
  pub use crate::event::{Event, EventOptions, EventRecursion, Hook};
  pub use crate::frame::{Frame, FrameMode};
  pub use crate::id::Id;
  pub use crate::manager::EntityManager;
  pub use crate::pt::{
    build_entity_pt, ComponentLib, ComponentPT, EntityLib, EntityPT,
  };
  pub use crate::runtime::{Runtime, RuntimeHandle, RuntimeOptions};
  pub use crate::{CallRet, TerminatedWait};
}
