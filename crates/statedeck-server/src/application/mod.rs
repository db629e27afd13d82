//! Application layer for statedeck-server.
//!
//! Knows *what* subscribers may ask for and *what* gets published, but
//! delegates every byte on the wire to the infrastructure layer.
//!
//! # What does NOT belong here?
//!
//! - Sockets, threads, or framing
//! - File access

pub mod features;
pub mod launcher;
pub mod session;

pub use features::{FeatureController, FeatureError, InMemoryFeatures};
pub use launcher::{start_first_available, LaunchError};
pub use session::{ControlError, DeckSession};
