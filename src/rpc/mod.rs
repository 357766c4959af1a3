//! Synchronous request/reply RPC over D-Bus.
//!
//! One request cycle walks through every piece of this module in order:
//!
//! ```text
//! ┌──────────┐  acquire   ┌───────────┐  build/append  ┌────────────┐
//! │ ZbusBus  │───────────>│ Registrar │───────────────>│ MethodCall │
//! └──────────┘            └───────────┘                └─────┬──────┘
//!                                                            │ send + flush
//!                         ┌───────────┐  block/steal   ┌─────▼───────┐
//!                         │  extract  │<───────────────│ PendingCall │
//!                         └───────────┘                └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let bus = ZbusBus::connect(BusKind::Session).await?;
//! let mut registrar = NameRegistrar::new("org.addbus.AddClient");
//! registrar.acquire(&bus).await?;
//!
//! let mut call = MethodCall::new(
//!     "org.addbus.AddServer",
//!     "/org/addbus/Adder",
//!     "org.addbus.Adder1",
//!     "add_numbers",
//! )?;
//! call.append_arg("3 4")?;
//!
//! let mut pending = bus.send(call, CallTimeout::Default).await?;
//! bus.flush().await?;
//! pending.block().await?;
//! let sum: String = extract(&pending.steal_reply()?)?;
//!
//! registrar.release(&bus).await?;
//! ```

pub mod bus;
pub mod call;
pub mod codec;
pub mod error;
pub mod pending;
pub mod registrar;

pub use bus::{Bus, BusKind, ZbusBus};
pub use call::{CallTimeout, MethodCall};
pub use codec::{extract, ReplyMessage};
pub use error::{report, BusError, RpcError};
pub use pending::{PendingCall, ReplySender};
pub use registrar::{NameRegistrar, Ownership};
