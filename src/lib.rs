//! fleetplane: lifecycle engine for the extension resources of managed clusters
//!
//! The engine creates, annotates and deletes extension objects on a hosting
//! cluster and waits for out-of-process actuators to converge them. It
//! provides deploy, wait, destroy, wait-cleanup, migrate, wait-migrate and
//! restore for every extension kind, tolerates actuator errors up to a
//! severe threshold and garbage collects extension types that are no longer
//! wanted.

pub mod actuator;
pub mod component;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod pipeline;
pub mod store;

pub use crate::error::{Error, Result};
