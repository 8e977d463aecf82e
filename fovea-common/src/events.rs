//! Event types for the session push channel
//!
//! The server emits named SSE events on `/events`. Only two names are
//! recognized by this client; anything else on the stream is ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event name for a full session snapshot
pub const STATE_UPDATE: &str = "state_update";

/// Event name telling an embedded/notebook tab to stop listening
pub const DEACTIVATE_NOTEBOOK_CELL: &str = "deactivate_notebook_cell";

/// Events emitted by the server on the push channel
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Full session snapshot; replaces the current description wholesale
    StateUpdate(StateUpdatePayload),

    /// Embedded/notebook host is deactivating this tab
    Deactivate,
}

impl ServerEvent {
    /// Get event type as string for subscription and logging
    pub fn event_type(&self) -> &str {
        match self {
            ServerEvent::StateUpdate(_) => STATE_UPDATE,
            ServerEvent::Deactivate => DEACTIVATE_NOTEBOOK_CELL,
        }
    }

    /// The event names this client subscribes to on connect
    pub fn subscribed() -> [&'static str; 2] {
        [DEACTIVATE_NOTEBOOK_CELL, STATE_UPDATE]
    }
}

/// Payload of a `state_update` event
///
/// `state` keys follow the server's snake_case convention and are
/// normalized by the reducer, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdatePayload {
    /// Raw session state object
    pub state: Value,

    /// When true, cached query results must be invalidated before the
    /// new state is applied
    #[serde(default)]
    pub refresh: bool,
}
