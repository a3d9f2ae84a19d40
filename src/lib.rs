//! podmirror - local TTL mirror of a podcast catalog
//!
//! Shows and episodes fetched from an upstream catalog provider are kept in a
//! SQLite store with per-kind TTLs, served stale when upstream fails, and
//! refreshed eagerly when followed. Search results are cached by normalized
//! parameters, a monotonic invalidation token tells derived views when to
//! recompute, and a refresh request log drives batched refreshes with a
//! one-time owner follow-up.

pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod maintenance;
pub mod output;
pub mod refresh_log;
pub mod signal;
pub mod store;

pub use error::{Error, Result};
