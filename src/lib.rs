//! Batch transaction dispatcher and marketplace activity watcher.
//!
//! The two components share no state; the binary runs either or both.

pub mod config;
pub mod dispatch;
pub mod feed;
