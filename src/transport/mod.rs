//! the seam between the connection manager and an actual websocket.
//!
//! a `Transport` opens channels; a `Channel` accepts outbound text. anything
//! the socket reports (open, frames, errors, close) is pushed through an
//! `EventSink` into the manager's inbox, tagged with the generation of the
//! connection attempt it belongs to.

use flume::{Receiver, Sender};

use crate::error::ChatError;

#[cfg(not(target_arch = "wasm32"))]
mod native;
#[cfg(not(target_arch = "wasm32"))]
pub use native::{TokioChannel, TokioRt, TokioTransport};

#[cfg(target_arch = "wasm32")]
mod web;
#[cfg(target_arch = "wasm32")]
pub use web::{BrowserChannel, BrowserTransport};

/// raw, un-normalized things a socket can tell us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Frame(String),
    Error(String),
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMsg {
    pub generation: u64,
    pub event: TransportEvent,
}

/// cross-thread inbox: socket tasks send, the main thread drains.
/// bounded, so a stalled frame pushes back on the socket reader instead of
/// growing without limit.
pub(crate) fn inbox() -> (Sender<TransportMsg>, Receiver<TransportMsg>) {
    flume::bounded(2048)
}

/// handed to a transport when a channel is opened.
#[derive(Clone, Debug)]
pub struct EventSink {
    generation: u64,
    tx: Sender<TransportMsg>,
}

impl EventSink {
    pub fn new(generation: u64, tx: Sender<TransportMsg>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// push without waiting. returns false if the inbox is full or gone.
    pub fn try_push(&self, event: TransportEvent) -> bool {
        self.tx
            .try_send(TransportMsg { generation: self.generation, event })
            .is_ok()
    }

    /// push, waiting for room in the inbox. a dropped manager is ignored.
    pub async fn push(&self, event: TransportEvent) {
        let _ = self
            .tx
            .send_async(TransportMsg { generation: self.generation, event })
            .await;
    }

    pub async fn opened(&self) {
        self.push(TransportEvent::Opened).await;
    }

    pub async fn frame(&self, text: String) {
        self.push(TransportEvent::Frame(text)).await;
    }

    pub async fn error(&self, description: String) {
        self.push(TransportEvent::Error(description)).await;
    }

    pub async fn closed(&self) {
        self.push(TransportEvent::Closed).await;
    }
}

/// opens websocket channels.
pub trait Transport {
    /// start opening `url`. a synchronous `Err` means the attempt never got
    /// off the ground; otherwise the outcome arrives through `sink`.
    fn open(&mut self, url: &str, sink: EventSink) -> Result<Box<dyn Channel>, ChatError>;
}

/// one live (or opening) channel. dropping it closes the socket.
pub trait Channel {
    /// queue one text message for transmission.
    fn send_text(&mut self, text: String) -> Result<(), ChatError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_tags_generation() {
        let (tx, rx) = inbox();
        let sink = EventSink::new(7, tx);
        assert!(sink.try_push(TransportEvent::Opened));
        assert!(sink.try_push(TransportEvent::Frame("{}".into())));
        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            got,
            vec![
                TransportMsg { generation: 7, event: TransportEvent::Opened },
                TransportMsg { generation: 7, event: TransportEvent::Frame("{}".into()) },
            ]
        );
    }

    #[test]
    fn sink_survives_dropped_inbox() {
        let (tx, rx) = inbox();
        let sink = EventSink::new(1, tx);
        drop(rx);
        assert!(!sink.try_push(TransportEvent::Closed));
    }
}
