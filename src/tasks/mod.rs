//! Background Tasks Module
//!
//! Long-lived tasks that run alongside a cache index.
//!
//! # Tasks
//! - Reaper: removes expired and over-capacity objects at the reap interval
//! - Flusher: persists the index at the flush interval when it changed
//! - Worker: performs fire-and-forget backend removals and access-time updates

mod flusher;
mod reaper;
mod worker;

pub(crate) use flusher::spawn_flusher;
pub(crate) use reaper::spawn_reaper;
pub(crate) use worker::{spawn_worker, IndexTask};
