//! Custom Resource Definitions for fleetplane
//!
//! Extension kinds are owned by out-of-process actuators; the orchestrator
//! creates and annotates them and reads back their status.

mod audit_backend;
mod control_plane;
mod extension;
mod object;
mod shoot_state;
pub mod types;
pub mod validation;


pub use audit_backend::{AuditBackend, AuditBackendSpec};
pub use control_plane::{ControlPlane, ControlPlaneSpec};
pub use extension::{Extension, ExtensionSpec};
pub use object::{ExtensionObject, ObjectKey};
pub(crate) use object::identity_meta;
pub use shoot_state::{ExtensionResourceState, ShootState, ShootStateSpec};
pub use types::*;
pub use validation::{validate_object, validate_update, SpecValidationError};
