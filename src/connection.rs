//! the connection manager: exactly one logical channel at a time, reopened
//! forever on loss, delivering normalized `ChannelEvent`s in arrival order.

use std::time::Duration;

use bevy::prelude::*;
use flume::{Receiver, Sender, TryRecvError};

use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::protocol::{decode_frame, ChannelEvent, ClientFrame};
use crate::transport::{inbox, Channel, EventSink, Transport, TransportEvent, TransportMsg};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// owns the channel and its state. constructed once per session and kept
/// as a non-send resource (browser socket handles are `!Send`).
pub struct ConnectionManager {
    config: ChatConfig,
    transport: Box<dyn Transport>,
    state: ConnectionState,
    channel: Option<Box<dyn Channel>>,
    /// bumped on every attempt; events from older attempts are dropped
    generation: u64,
    /// one-shot; at most one pending at any time
    reconnect: Option<Timer>,
    /// false after `stop()`: closes no longer schedule reconnects
    running: bool,
    inbox_tx: Sender<TransportMsg>,
    inbox_rx: Receiver<TransportMsg>,
    /// events produced outside of `pump` (e.g. a refused open), delivered on the next pump
    pending: Vec<ChannelEvent>,
}

impl ConnectionManager {
    pub fn new(config: ChatConfig, transport: Box<dyn Transport>) -> Self {
        let (inbox_tx, inbox_rx) = inbox();
        Self {
            config,
            transport,
            state: ConnectionState::Closed,
            channel: None,
            generation: 0,
            reconnect: None,
            running: false,
            inbox_tx,
            inbox_rx,
            pending: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect.is_some()
    }

    /// time left until the pending reconnect fires, if one is scheduled.
    pub fn reconnect_remaining(&self) -> Option<Duration> {
        self.reconnect.as_ref().map(Timer::remaining)
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// begin the session: open the channel and keep it open.
    pub fn start(&mut self) {
        info!(target: "bevy_ws_chat", "ConnectionManager: start -> {}", self.config.endpoint());
        self.running = true;
        self.connect();
    }

    /// end the session: close the channel and stop reconnecting.
    pub fn stop(&mut self) {
        info!(target: "bevy_ws_chat", "ConnectionManager: stop");
        self.running = false;
        self.reconnect = None;
        self.channel = None;
        self.generation += 1;
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Closed;
            self.pending.push(ChannelEvent::Disconnected);
        }
    }

    /// open a channel unless one is already open or opening.
    pub fn connect(&mut self) {
        if matches!(self.state, ConnectionState::Open | ConnectionState::Connecting) {
            debug!(target: "bevy_ws_chat", "connect: already {:?}, ignoring", self.state);
            return;
        }
        self.running = true;
        // an explicit connect supersedes the scheduled one
        self.reconnect = None;
        self.generation += 1;
        self.state = ConnectionState::Connecting;

        let url = self.config.endpoint();
        info!(target: "bevy_ws_chat", "connecting: url={} generation={}", url, self.generation);
        let sink = EventSink::new(self.generation, self.inbox_tx.clone());
        match self.transport.open(&url, sink) {
            Ok(channel) => self.channel = Some(channel),
            Err(err) => {
                warn!(target: "bevy_ws_chat", "open failed: {}", err);
                self.on_closed();
            }
        }
    }

    /// transmit `payload` as `{"message": payload}`. fails with
    /// `NotConnected` unless the channel is open.
    pub fn send(&mut self, payload: &str) -> Result<(), ChatError> {
        if self.state != ConnectionState::Open {
            return Err(ChatError::NotConnected);
        }
        let frame = ClientFrame::encode(payload)?;
        let channel = self.channel.as_mut().ok_or(ChatError::NotConnected)?;
        channel.send_text(frame)?;
        debug!(target: "bevy_ws_chat", "sent message (len={})", payload.len());
        Ok(())
    }

    /// advance the reconnect timer; reconnects when it fires.
    pub fn tick(&mut self, delta: Duration) {
        let Some(timer) = self.reconnect.as_mut() else {
            return;
        };
        timer.tick(delta);
        if timer.finished() {
            self.reconnect = None;
            info!(target: "bevy_ws_chat", "reconnect timer fired");
            self.connect();
        }
    }

    /// drain the inbox (up to the per-update cap) and return the normalized
    /// events in the order they happened.
    pub fn pump(&mut self) -> Vec<ChannelEvent> {
        for _ in 0..self.config.max_frames_per_update {
            match self.inbox_rx.try_recv() {
                Ok(msg) => self.handle(msg),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        std::mem::take(&mut self.pending)
    }

    fn handle(&mut self, msg: TransportMsg) {
        if msg.generation != self.generation {
            debug!(
                target: "bevy_ws_chat",
                "dropping stale {:?} (generation {} != {})",
                msg.event, msg.generation, self.generation
            );
            return;
        }
        match msg.event {
            TransportEvent::Opened => {
                if self.state == ConnectionState::Connecting {
                    info!(target: "bevy_ws_chat", "connected");
                    self.state = ConnectionState::Open;
                    self.pending.push(ChannelEvent::Connected);
                }
            }
            TransportEvent::Frame(text) => {
                if let Some(ev) = decode_frame(&text) {
                    self.pending.push(ev);
                }
            }
            // the close that follows drives reconnection
            TransportEvent::Error(description) => {
                warn!(target: "bevy_ws_chat", "{}", ChatError::Transport(description));
            }
            TransportEvent::Closed => {
                if self.state != ConnectionState::Closed {
                    self.on_closed();
                }
            }
        }
    }

    fn on_closed(&mut self) {
        self.channel = None;
        self.state = ConnectionState::Closed;
        self.pending.push(ChannelEvent::Disconnected);
        if self.running {
            info!(
                target: "bevy_ws_chat",
                "disconnected, reconnecting in {:?}",
                self.config.reconnect_delay
            );
            self.reconnect = Some(Timer::new(self.config.reconnect_delay, TimerMode::Once));
        }
    }
}
