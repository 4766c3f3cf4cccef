use thiserror::Error;

/// everything that can go wrong on the client side of the chat channel.
///
/// server-reported errors are not in here: they arrive as ordinary
/// `ChannelEvent::Error` values and end up in the transcript.
#[derive(Debug, Error)]
pub enum ChatError {
    /// `send` was called while the channel was not open.
    #[error("channel is not open")]
    NotConnected,

    /// the underlying websocket failed (network, handshake, protocol).
    #[error("transport error: {0}")]
    Transport(String),

    /// an inbound frame could not be decoded.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// the page origin could not be turned into a channel url.
    #[error("invalid page origin: {0}")]
    InvalidOrigin(String),

    #[error("failed to encode outbound frame: {0}")]
    Encode(#[from] serde_json::Error),
}
