//! Domain layer for statedeck-server.
//!
//! Plain configuration values with no dependencies on sockets, threads, or
//! files.  The infrastructure layer fills them in from the TOML file and the
//! command line.

pub mod config;

pub use config::{ServerConfig, DEFAULT_PORTS};
