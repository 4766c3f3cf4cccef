//! end-to-end over a real socket: local tokio-tungstenite server, real
//! `TokioTransport`, no bevy app.
#![cfg(not(target_arch = "wasm32"))]

use std::time::{Duration, Instant};

use bevy_ws_chat::{
    ChannelEvent, ChatConfig, ConnectionManager, ConnectionState, PageOrigin, Role, Submit, TokioRt,
    TokioTransport, TranscriptController,
};
use futures::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

/// pump until `pred` sees an event it likes, feeding everything to the transcript.
fn pump_until(
    conn: &mut ConnectionManager,
    chat: &mut TranscriptController,
    mut pred: impl FnMut(&ChannelEvent) -> bool,
) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let mut seen = false;
        for ev in conn.pump() {
            chat.handle_event(&ev);
            seen |= pred(&ev);
        }
        if seen {
            return;
        }
        assert!(Instant::now() < deadline, "timed out waiting for channel event");
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn pump_until_state(
    conn: &mut ConnectionManager,
    chat: &mut TranscriptController,
    state: ConnectionState,
) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while conn.state() != state {
        for ev in conn.pump() {
            chat.handle_event(&ev);
        }
        assert!(Instant::now() < deadline, "timed out waiting for {state:?}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn streams_reply_over_websocket() {
    let rt = TokioRt::default();
    let listener = rt.0.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
    let port = listener.local_addr().unwrap().port();

    // one connection: echo the message back as a ping, a binary chunk and a
    // text chunk, finish, then hang up
    rt.0.spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            let v: serde_json::Value = serde_json::from_str(&text).unwrap();
            let message = v["message"].as_str().unwrap_or_default().to_string();
            ws.send(Message::Ping(b"hb".to_vec())).await.unwrap();
            ws.send(Message::Binary(br#"{"chunk":"echo"}"#.to_vec())).await.unwrap();
            let frame = serde_json::json!({ "chunk": format!(": {message}") }).to_string();
            ws.send(Message::Text(frame)).await.unwrap();
            ws.send(Message::Text(r#"{"done":true}"#.to_string())).await.unwrap();
            let _ = ws.close(None).await;
            break;
        }
    });

    let config = ChatConfig::with_origin(PageOrigin::new(false, format!("127.0.0.1:{port}")));
    let mut chat = TranscriptController::new(&config);
    let mut conn = ConnectionManager::new(config, Box::new(TokioTransport::new(&rt)));

    conn.start();
    pump_until(&mut conn, &mut chat, |ev| *ev == ChannelEvent::Connected);
    assert_eq!(conn.state(), ConnectionState::Open);

    assert_eq!(chat.submit("hi", &mut conn), Submit::Sent);
    pump_until(&mut conn, &mut chat, |ev| *ev == ChannelEvent::Done);

    let entries: Vec<_> = chat.entries().iter().map(|e| (e.role, e.text.as_str())).collect();
    assert_eq!(entries, vec![(Role::User, "hi"), (Role::Assistant, "echo: hi")]);
    assert!(chat.input_enabled());

    // the server hangs up after the reply
    pump_until_state(&mut conn, &mut chat, ConnectionState::Closed);
    assert!(conn.reconnect_pending());
    assert!(!chat.channel_open());
    conn.stop();
}

#[test]
fn refused_connection_schedules_reconnect() {
    let rt = TokioRt::default();
    // bind then drop, so the port is (very likely) closed
    let port = {
        let listener = rt.0.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
        listener.local_addr().unwrap().port()
    };

    let config = ChatConfig::with_origin(PageOrigin::new(false, format!("127.0.0.1:{port}")));
    let mut chat = TranscriptController::new(&config);
    let mut conn = ConnectionManager::new(config, Box::new(TokioTransport::new(&rt)));

    conn.start();
    assert_eq!(conn.state(), ConnectionState::Connecting);
    pump_until_state(&mut conn, &mut chat, ConnectionState::Closed);
    assert_eq!(conn.reconnect_remaining(), Some(Duration::from_secs(3)));
    conn.stop();
    assert!(!conn.reconnect_pending());
}
