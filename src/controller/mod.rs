//! Extension resource lifecycle engine
//!
//! Building blocks used by the component deployers: stamping operations on
//! extension objects, waiting for actuators to converge, deletion, migration
//! and restore, and concurrent fan-out over many objects.

pub mod annotations;
pub mod clock;
pub mod delete;
pub mod finalizers;
pub mod flow;
pub mod merge_patch;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod poll;
pub mod restore;
pub mod trigger;
pub mod wait;

pub use annotations::{Operation, OperationTag, Trigger};
pub use clock::{Clock, FakeClock, SharedClock, SystemClock};
pub use finalizers::EXTENSION_FINALIZER;
pub use flow::{parallel, JoinPolicy};
pub use wait::{check_ready, Readiness, WaitConfig};
