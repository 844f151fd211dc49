//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Memory purge: Unloads the maps of origins whose changes are all durable

mod purge;

pub use purge::spawn_purge_task;
