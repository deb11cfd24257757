//! rexecd: a mutual-TLS remote execution and file transfer daemon.

pub mod config;
pub mod daemon;
pub mod executor;
pub mod fetch;
pub mod files;
pub mod logging;
pub mod menu;
pub mod ospath;
pub mod protocol;
pub mod server;
pub mod sweeper;

pub use daemon::{Daemon, DaemonError, DaemonHandle, LifecycleState};
