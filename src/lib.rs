//! addbus library exports for the binary, integration tests and fuzzing.
//!
//! A minimal synchronous request/reply RPC client over D-Bus, plus the
//! companion adder service it talks to.

pub mod client;
pub mod config;
pub mod dbus;
pub mod rpc;

// Re-export commonly used types for convenience
pub use client::{RpcClient, RunOptions, RunSummary, ServiceTarget};
pub use config::Config;
pub use rpc::{BusKind, CallTimeout, RpcError};
