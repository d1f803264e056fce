//! Stowage Core
//!
//! Core types and abstractions for driving an external container engine.
//!
//! This crate contains:
//! - Domain types: image requirements, mounts, engine capabilities, invocations
//! - DTOs: job descriptions exchanged with the scheduler and the CLI
//! - Error: the error type shared by every stowage crate
//!
//! Note: resolution and staging logic lives in `stowage-runner`.

pub mod domain;
pub mod dto;
pub mod error;

pub use error::{Result, StowageError};
