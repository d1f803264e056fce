//! Core domain types
//!
//! This module contains the structures that flow between the driver
//! components. They are produced by the scheduler (requirements, mounts),
//! by the capability probe (capability sets) and by the command builder
//! (invocations).

pub mod capability;
pub mod image;
pub mod invocation;
pub mod mount;
