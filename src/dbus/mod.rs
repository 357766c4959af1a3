//! Companion adder service.
//!
//! Serves the `org.addbus.Adder1` interface that the client calls. It is the
//! other end of the RPC contract:
//!
//! ```text
//! ┌─────────────────┐         D-Bus          ┌──────────────┐
//! │  addbus serve   │<───────────────────────│ addbus call  │
//! │ (AdderService)  │   org.addbus.Adder1    │ (RpcClient)  │
//! │                 │───────────────────────>│              │
//! └─────────────────┘  add_numbers(s) -> s   └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let service = AdderService::start(BusKind::Session, &config.service).await?;
//! tokio::signal::ctrl_c().await?;
//! drop(service);
//! ```

mod interface;
mod service;

pub use interface::{add_numbers, AddError, AdderInterface};
pub use service::{
    serve_adder, AdderService, INTERFACE_NAME, METHOD_NAME, OBJECT_PATH, SERVICE_NAME,
};
