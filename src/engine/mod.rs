//! Core engine: the bootstrap → wait → observe → list loop.

pub mod clock;
pub mod retry;
pub mod scheduler;
pub mod watcher;
