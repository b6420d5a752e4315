//! Scheduler runner -- owns the task table and drives dispatch.
//!
//! Split into focused submodules:
//! - `core`: Scheduler handle, constructor, and the public task operations
//! - `scheduling`: Batch hand-off and task state transitions under the lock
//! - `execution`: Dispatch cycles, per-batch cache/backend work, background loop

mod core;
mod execution;
mod scheduling;

pub use self::core::Scheduler;
