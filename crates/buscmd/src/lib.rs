//! Command/response protocol engine for a single-master, multi-drop bus.
//!
//! A master sends length-prefixed command frames to addressed devices. Each
//! device captures the frame from its time-critical bus callback, runs it on
//! its own poll loop, and answers at once or defers the answer under a
//! response ID the master re-queries later.
//!
//! # Crate Structure
//!
//! - [`transport`]: bus abstraction, in-memory bus, Unix socket bridge
//! - [`frame`]: wire-exact command and response frames
//! - [`listener`]: device-side listener, deferred registry, master client
//! - [`demo`]: a sample device handler used by the CLI and examples

/// Re-export transport types.
pub mod transport {
    pub use buscmd_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use buscmd_frame::*;
}

/// Re-export listener types.
pub mod listener {
    pub use buscmd_listener::*;
}

pub mod demo;
