//! `DeckSession`: the composition root between the transport and the
//! embedding application.
//!
//! The session owns the [`PayloadCache`] and implements [`ServerHandler`], so
//! the server's lifecycle events and the subscribers' control messages both
//! end up here.
//!
//! # Cache invalidation
//!
//! A new subscriber has seen nothing, so it must receive every payload kind
//! again even if unchanged.  The cache is therefore cleared whenever the set
//! of subscribers changes (start, open, close, error), on an explicit
//! `clearCache` request, and on [`DeckSession::reset`].

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use statedeck_core::{ControlMessage, FeatureSummary, OutboundMessage, PayloadCache, StatePayload};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::features::{FeatureController, FeatureError};
use crate::infrastructure::{Connection, ConnectionError, ConnectionRegistry, ServerHandler};

/// Why a control message was not acted on.  The connection always stays open.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Not JSON, or a known message type with fields of the wrong shape.
    #[error("malformed control message: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("control message is missing field {0}")]
    MissingField(&'static str),

    #[error(transparent)]
    Feature(#[from] FeatureError),

    /// An outbound message could not be serialized.
    #[error("failed to encode reply: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Publishing and control-plane state for one running server.
pub struct DeckSession {
    registry: Arc<ConnectionRegistry>,
    features: Arc<dyn FeatureController>,
    cache: Mutex<PayloadCache>,
}

impl DeckSession {
    /// `registry` must be the one the server was built with.
    pub fn new(registry: Arc<ConnectionRegistry>, features: Arc<dyn FeatureController>) -> Self {
        Self {
            registry,
            features,
            cache: Mutex::new(PayloadCache::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Broadcasts `payload` unless it equals the last payload of the same
    /// kind.  Returns `true` if it was broadcast.
    pub fn publish(&self, payload: &StatePayload) -> bool {
        let value = payload.to_value();
        if !self.cache.lock().update(payload.kind(), value.clone()) {
            return false;
        }
        let delivered = self.registry.broadcast(&value.to_string());
        debug!("published {} to {delivered} subscriber(s)", payload.kind());
        true
    }

    /// Forgets every cached payload.
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    /// The last published value of `kind`.
    pub fn cached(&self, kind: &str) -> Option<Value> {
        self.cache.lock().get(kind).cloned()
    }

    /// Ends the embedding application's session: clears the cache and tells
    /// every subscriber with a `LOGOUT` payload.
    pub fn reset(&self) -> usize {
        self.clear_cache();
        let delivered = self
            .registry
            .broadcast(&StatePayload::logout().to_value().to_string());
        info!("session reset, notified {delivered} subscriber(s)");
        delivered
    }

    /// Broadcasts the full feature list.
    pub fn broadcast_feature_list(&self) -> Result<usize, ControlError> {
        let message = OutboundMessage::Plugins {
            plugins: self.features.list(),
        };
        self.broadcast_message(&message)
    }

    /// Broadcasts that one feature changed.
    pub fn broadcast_feature_change(&self, plugin: FeatureSummary) -> Result<usize, ControlError> {
        self.broadcast_message(&OutboundMessage::PluginChanged { plugin })
    }

    fn broadcast_message(&self, message: &OutboundMessage) -> Result<usize, ControlError> {
        let text = message.to_json().map_err(ControlError::Encode)?;
        Ok(self.registry.broadcast(&text))
    }

    /// Acts on one control message received from a subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError`] when the message is not understood or the
    /// requested change fails.  Callers log it and carry on.
    pub fn handle_control_message(&self, text: &str) -> Result<(), ControlError> {
        let message = parse_control_message(text)?;
        debug!("control message {}", message.type_name());

        match message {
            ControlMessage::ClearCache => self.clear_cache(),
            ControlMessage::GetPlugins => {
                self.broadcast_feature_list()?;
            }
            ControlMessage::TogglePlugin {
                plugin_id,
                is_active,
            } => {
                let id = plugin_id.ok_or(ControlError::MissingField("pluginId"))?;
                let active = is_active.ok_or(ControlError::MissingField("isActive"))?;
                let summary = self.features.set_active(&id, active)?;
                self.broadcast_feature_change(summary)?;
            }
        }
        Ok(())
    }
}

/// Parses with [`ControlMessage::from_json`]; on failure, re-reads the text
/// to tell "not JSON" and "unknown type" apart from other shape errors.
fn parse_control_message(text: &str) -> Result<ControlMessage, ControlError> {
    let typed_error = match ControlMessage::from_json(text) {
        Ok(message) => return Ok(message),
        Err(e) => e,
    };

    let value: Value = serde_json::from_str(text).map_err(ControlError::Malformed)?;
    let kind = value
        .get("messageType")
        .and_then(Value::as_str)
        .ok_or(ControlError::MissingField("messageType"))?;

    if matches!(kind, "clearCache" | "getPlugins" | "togglePlugin") {
        Err(ControlError::Malformed(typed_error))
    } else {
        Err(ControlError::UnknownType(kind.to_string()))
    }
}

impl ServerHandler for DeckSession {
    fn on_start(&self, local_addr: SocketAddr) {
        info!("publishing on ws://{local_addr}/");
        self.clear_cache();
    }

    fn on_open(&self, conn: &Arc<Connection>) {
        info!("subscriber {} connected from {}", conn.id(), conn.peer_addr());
        self.clear_cache();
    }

    fn on_close(&self, conn: &Arc<Connection>) {
        info!("subscriber {} disconnected", conn.id());
        self.clear_cache();
    }

    fn on_message(&self, conn: &Arc<Connection>, text: &str) {
        if let Err(e) = self.handle_control_message(text) {
            warn!("ignoring message from subscriber {}: {e}", conn.id());
        }
    }

    fn on_error(&self, conn: &Arc<Connection>, error: &ConnectionError) {
        debug!("subscriber {} error: {error}", conn.id());
        self.clear_cache();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
