//! Multi-drop bus transport abstraction.
//!
//! Moves raw bytes between one master and many addressed devices:
//! - [`BusTransport`] is what a master calls (send, read, request)
//! - [`BusSlave`] is what a device implements (receive and request callbacks)
//! - [`SimBus`] is an in-memory bus for tests and simulation
//! - [`SocketBusServer`] / [`SocketBus`] bridge a bus over a Unix socket
//!
//! This is the lowest layer of buscmd. It never interprets the bytes it moves.

pub mod error;
pub mod sim;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use sim::{SimBus, SimBusConfig};
pub use traits::{check_address, BusSlave, BusTransport, MAX_ADDRESS, MAX_TRANSFER};

#[cfg(unix)]
pub use uds::{SocketBus, SocketBusServer};
