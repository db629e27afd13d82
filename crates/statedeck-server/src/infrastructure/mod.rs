//! Infrastructure layer for statedeck-server.
//!
//! Everything that touches a socket, a thread, or a file lives here.
//!
//! # Responsibilities
//!
//! - Binding the listener and running the single I/O thread
//! - Negotiating the upgrade and decoding frames as bytes arrive
//! - Tracking live connections and writing broadcasts to them
//! - Reading the TOML configuration file
//!
//! # What does NOT belong here?
//!
//! - Interpreting message contents (that is the application layer)
//! - Deciding what to publish and when

pub mod connection;
pub mod error;
pub(crate) mod event_loop;
pub mod handler;
pub mod registry;
pub mod server;
pub mod storage;

pub use connection::{Connection, ConnectionId};
pub use error::{ConnectionError, ServerError, TransportError};
pub use handler::ServerHandler;
pub use registry::ConnectionRegistry;
pub use server::{ServerState, WebSocketServer};
