use std::pin::Pin;

use bevy::prelude::*;
use flume::{Receiver, Sender};
use futures::future::poll_fn;
use futures::{pin_mut, select, FutureExt, Sink, SinkExt, StreamExt};
use gloo_net::websocket::{futures::WebSocket, Message, State, WebSocketError};

use super::{Channel, EventSink, Transport};
use crate::error::ChatError;

/// `gloo-net` transport. tasks run on the browser event loop via
/// `spawn_local`, so nothing here ever blocks the page.
#[derive(Default)]
pub struct BrowserTransport;

impl Transport for BrowserTransport {
    fn open(&mut self, url: &str, sink: EventSink) -> Result<Box<dyn Channel>, ChatError> {
        let ws = WebSocket::open(url).map_err(|e| ChatError::Transport(e.to_string()))?;
        let (tx, rx) = flume::unbounded();
        wasm_bindgen_futures::spawn_local(run_channel(ws, rx, sink));
        Ok(Box::new(BrowserChannel { outbound: tx }))
    }
}

pub struct BrowserChannel {
    outbound: Sender<String>,
}

impl Channel for BrowserChannel {
    fn send_text(&mut self, text: String) -> Result<(), ChatError> {
        self.outbound
            .send(text)
            .map_err(|_| ChatError::Transport("channel task has exited".into()))
    }
}

async fn run_channel(mut ws: WebSocket, outbound: Receiver<String>, sink: EventSink) {
    // the sink side only becomes ready once the socket leaves `Connecting`
    let ready = poll_fn(|cx| Pin::new(&mut ws).poll_ready(cx)).await;
    if let Err(err) = ready {
        sink.error(err.to_string()).await;
        sink.closed().await;
        return;
    }
    if ws.state() != State::Open {
        sink.closed().await;
        return;
    }
    sink.opened().await;

    let (mut ws_tx, mut ws_rx) = ws.split();
    loop {
        let next_out = outbound.recv_async().fuse();
        let next_in = ws_rx.next().fuse();
        pin_mut!(next_out, next_in);

        select! {
            out = next_out => match out {
                Ok(text) => {
                    if let Err(err) = ws_tx.send(Message::Text(text)).await {
                        sink.error(err.to_string()).await;
                        break;
                    }
                }
                Err(_) => {
                    let _ = ws_tx.close().await;
                    break;
                }
            },
            msg = next_in => match msg {
                Some(Ok(Message::Text(text))) => sink.frame(text).await,
                Some(Ok(Message::Bytes(bytes))) => {
                    sink.frame(String::from_utf8_lossy(&bytes).into_owned()).await
                }
                Some(Err(WebSocketError::ConnectionClose(ev))) => {
                    debug!(target: "bevy_ws_chat", "socket closed: code={} clean={}", ev.code, ev.was_clean);
                    break;
                }
                Some(Err(err)) => {
                    sink.error(err.to_string()).await;
                    break;
                }
                None => break,
            },
        }
    }
    sink.closed().await;
}
