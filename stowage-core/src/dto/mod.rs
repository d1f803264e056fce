//! Data Transfer Objects exchanged with the scheduler
//!
//! The scheduler hands the driver a [`job::JobSpec`] and receives a
//! [`job::PreparedJob`] ready for its process launcher. Both are plain
//! serde types so they can travel as JSON (the CLI reads and prints them).

pub mod job;
