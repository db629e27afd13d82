//! Domain types shared by the server and by subscriber tooling.
//!
//! Nothing in here performs I/O.  The types describe *what* travels inside a
//! text frame; the protocol module describes *how* the frame itself travels.

pub mod cache;
pub mod messages;

pub use cache::PayloadCache;
pub use messages::{ControlMessage, FeatureSummary, OutboundMessage, StatePayload};
