//! Device and master ends of the bus command protocol.
//!
//! A device runs a [`CommandListener`]: the bus delivers frames to it from the
//! time-critical context, and a poll loop ([`PollDriver`] or the device's own)
//! dispatches them to a [`CommandHandler`]. Work that outlives the bus's
//! answer window is deferred into a [`DeferredRegistry`] and collected later
//! with `CMD_QUERY_RESPONSE`.
//!
//! A master drives devices through a [`BusMaster`].

pub mod config;
pub mod driver;
pub mod error;
pub mod handler;
pub mod listener;
pub mod master;
pub mod registry;
mod slot;
pub mod stats;

pub use config::{DeviceContext, ListenerConfig, MalformedPolicy, UnknownCommandPolicy};
#[cfg(feature = "async")]
pub use driver::spawn_poll_task;
pub use driver::{PollDriver, DEFAULT_POLL_INTERVAL};
pub use error::{ListenerError, Result};
pub use handler::{CommandHandler, DefaultHandler, Disposition, Responder};
pub use listener::{CommandListener, NOT_READY_FRAME};
pub use master::{BusMaster, DeferredTicket, MasterConfig, Reply};
pub use registry::{DeferredHandle, DeferredRegistry, Resolution, MAX_REGISTRY_CAPACITY};
pub use stats::ListenerStats;
