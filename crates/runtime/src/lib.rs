//! Process runtime utilities for the pool watcher.

pub mod shutdown;

pub use shutdown::{ShutdownSignal, run_until_shutdown};
