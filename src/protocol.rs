//! wire format of the chat channel.
//!
//! client -> server: `{"message": "..."}`
//! server -> client: `{"error"?: "...", "chunk"?: "...", "done"?: bool}`

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ClientFrame {
    pub message: String,
}

impl ClientFrame {
    pub fn encode(message: &str) -> Result<String, ChatError> {
        Ok(serde_json::to_string(&ClientFrame { message: message.to_string() })?)
    }
}

/// every field is optional; unknown fields are ignored.
#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct ServerFrame {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub chunk: Option<String>,
    #[serde(default)]
    pub done: Option<bool>,
}

/// normalized channel events, in the order they happened.
///
/// one enum (rather than an event type per kind) so readers see chunks,
/// completions and connection changes interleaved exactly as they arrived.
#[derive(Event, Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    Chunk(String),
    Done,
    Error(String),
}

impl ServerFrame {
    /// at most one event per frame: `error` wins, then `chunk`, then `done: true`.
    /// empty strings count as absent.
    pub fn into_event(self) -> Option<ChannelEvent> {
        if let Some(error) = self.error.filter(|e| !e.is_empty()) {
            return Some(ChannelEvent::Error(error));
        }
        if let Some(chunk) = self.chunk.filter(|c| !c.is_empty()) {
            return Some(ChannelEvent::Chunk(chunk));
        }
        if self.done == Some(true) {
            return Some(ChannelEvent::Done);
        }
        None
    }
}

/// decode one inbound text frame. a frame that isn't valid json becomes an
/// `Error` event instead of taking the channel down.
pub fn decode_frame(text: &str) -> Option<ChannelEvent> {
    match serde_json::from_str::<ServerFrame>(text) {
        Ok(frame) => frame.into_event(),
        Err(err) => {
            let err = ChatError::MalformedFrame(err.to_string());
            warn!(target: "bevy_ws_chat", "{}", err);
            Some(ChannelEvent::Error(err.to_string()))
        }
    }
}
