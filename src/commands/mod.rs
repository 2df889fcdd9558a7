//! CLI command implementations.

pub mod classify;
pub mod ipset_sync;
pub mod run;
