//! An epoll-based, single-process HTTP/1.1 static file server.
//!
//! A single reactor thread multiplexes readiness on the listening socket and every
//! accepted connection via [`mux::Multiplexer`]; a fixed [`pool::WorkerPool`] runs the
//! per-connection read/parse/respond/write steps handed off by the reactor. See
//! [`server::Server`] for the event loop and [`connection::Connection`] for the
//! per-connection state machine.

pub mod buffer;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod logging;
pub mod mux;
pub mod pool;
pub mod server;
pub mod timer;

pub use config::ServerConfig;
pub use error::{ConnError, EngineError};
pub use server::Server;
