use std::sync::Arc;

use bevy::prelude::*;
use flume::{Receiver, Sender};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{Channel, EventSink, Transport};
use crate::error::ChatError;

/// on native we keep a tiny tokio runtime to drive the websocket futures.
/// the main thread only ever touches the inbox.
#[derive(Resource, Clone)]
pub struct TokioRt(pub Arc<tokio::runtime::Runtime>);

impl Default for TokioRt {
    fn default() -> Self {
        info!(target: "bevy_ws_chat", "WsChat: initializing Tokio multi-thread runtime (native)");
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("tokio runtime");
        Self(Arc::new(rt))
    }
}

/// `tokio-tungstenite` transport, one task per channel.
pub struct TokioTransport {
    rt: Arc<tokio::runtime::Runtime>,
}

impl TokioTransport {
    pub fn new(rt: &TokioRt) -> Self {
        Self { rt: rt.0.clone() }
    }
}

impl Transport for TokioTransport {
    fn open(&mut self, url: &str, sink: EventSink) -> Result<Box<dyn Channel>, ChatError> {
        let (tx, rx) = flume::unbounded();
        let url = url.to_string();
        self.rt.spawn(run_channel(url, rx, sink));
        Ok(Box::new(TokioChannel { outbound: tx }))
    }
}

/// handle to a channel task. dropping it lets the task close the socket.
pub struct TokioChannel {
    outbound: Sender<String>,
}

impl Channel for TokioChannel {
    fn send_text(&mut self, text: String) -> Result<(), ChatError> {
        self.outbound
            .send(text)
            .map_err(|_| ChatError::Transport("channel task has exited".into()))
    }
}

async fn run_channel(url: String, outbound: Receiver<String>, sink: EventSink) {
    debug!(target: "bevy_ws_chat", "connecting to {} (generation={})", url, sink.generation());
    let ws = match connect_async(url.as_str()).await {
        Ok((ws, _resp)) => ws,
        Err(err) => {
            sink.error(err.to_string()).await;
            sink.closed().await;
            return;
        }
    };
    sink.opened().await;

    let (mut ws_tx, mut ws_rx) = ws.split();
    loop {
        tokio::select! {
            out = outbound.recv_async() => match out {
                Ok(text) => {
                    if let Err(err) = ws_tx.send(Message::Text(text)).await {
                        sink.error(err.to_string()).await;
                        break;
                    }
                }
                // handle dropped: we were told to go away
                Err(_) => {
                    let _ = ws_tx.close().await;
                    break;
                }
            },
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => sink.frame(text).await,
                Some(Ok(Message::Binary(bytes))) => {
                    sink.frame(String::from_utf8_lossy(&bytes).into_owned()).await
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    sink.error(err.to_string()).await;
                    break;
                }
            },
        }
    }
    sink.closed().await;
}
