//! statedeck-server library crate.
//!
//! A WebSocket publisher built directly on non-blocking sockets and a
//! readiness multiplexer.  One I/O thread accepts subscribers, negotiates the
//! upgrade, and decodes their frames; any number of producer threads may call
//! `broadcast` concurrently.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Subscribers (JSON over WebSocket)
//!         ↕
//! [statedeck-server]
//!   ├── domain/            ServerConfig
//!   ├── application/       DeckSession (control messages, payload cache),
//!   │                      FeatureController, port fallback launcher
//!   └── infrastructure/
//!         ├── event_loop   single readiness-driven I/O thread
//!         ├── server       start/stop state machine
//!         ├── connection   one accepted peer
//!         ├── registry     live connections + broadcast
//!         ├── handler      the five lifecycle callbacks
//!         └── storage/     TOML configuration file
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O.
//! - `application` talks to the transport only through [`ServerHandler`] and
//!   [`ConnectionRegistry::broadcast`].
//! - `infrastructure` owns every socket and thread.
//!
//! [`ServerHandler`]: infrastructure::ServerHandler
//! [`ConnectionRegistry::broadcast`]: infrastructure::ConnectionRegistry::broadcast

/// Domain layer: runtime configuration types (no I/O).
pub mod domain;

/// Application layer: control plane and publishing on top of the transport.
pub mod application;

/// Infrastructure layer: sockets, the I/O thread, and configuration storage.
pub mod infrastructure;
