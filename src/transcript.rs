//! the transcript controller: owns the conversation, assembles streamed
//! replies, gates input while a reply is in flight, and tells the host ui
//! what changed.

use std::time::Duration;

use bevy::prelude::*;

use crate::config::ChatConfig;
use crate::connection::ConnectionManager;
use crate::error::ChatError;
use crate::format::render_text;
use crate::protocol::ChannelEvent;

pub const NOTICE_RECONNECTING: &str = "WebSocket connection is not open. Reconnecting...";
pub const NOTICE_CONNECT_FAILED: &str = "Failed to connect. Please try again later.";
pub const NOTICE_CONNECTION_LOST: &str = "Connection lost.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub role: Role,
    /// raw text; formatting happens at render time
    pub text: String,
}

impl TranscriptEntry {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self { role, text: text.into() }
    }
}

/// at most one entry is ever being assembled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StreamState {
    #[default]
    Idle,
    /// chunks append to `entries[index]`
    Streaming { index: usize },
}

/// what the host ui should do, in order.
#[derive(Event, Clone, Debug, PartialEq, Eq)]
pub enum ViewUpdate {
    EntryAppended { index: usize, role: Role },
    /// (re)formatted markup for an entry
    EntryRendered { index: usize, html: String },
    ScrollToBottom,
    InputEnabled(bool),
    ClearInput,
    FocusInput,
    ShowTyping,
    RemoveTyping,
    Connection(bool),
}

/// result of a user submit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submit {
    /// empty after trimming; nothing happened
    Ignored,
    /// input is disabled, a reply is still in flight
    Busy,
    Sent,
    /// channel was closed; a reconnect was kicked and the send will be retried once
    Retrying,
    /// the send failed outright; the turn is over
    Failed,
}

#[derive(Debug)]
struct PendingSend {
    payload: String,
    timer: Timer,
}

#[derive(Resource, Debug)]
pub struct TranscriptController {
    entries: Vec<TranscriptEntry>,
    stream: StreamState,
    input_enabled: bool,
    /// a user message went out (or is about to) and its reply hasn't ended
    awaiting_reply: bool,
    typing: bool,
    channel_open: bool,
    retry: Option<PendingSend>,
    retry_delay: Duration,
    updates: Vec<ViewUpdate>,
}

impl Default for TranscriptController {
    fn default() -> Self {
        Self::new(&ChatConfig::default())
    }
}

impl TranscriptController {
    pub fn new(config: &ChatConfig) -> Self {
        Self {
            entries: Vec::new(),
            stream: StreamState::Idle,
            input_enabled: true,
            awaiting_reply: false,
            typing: false,
            channel_open: false,
            retry: None,
            retry_delay: config.send_retry_delay,
            updates: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn stream_state(&self) -> StreamState {
        self.stream
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.stream, StreamState::Streaming { .. })
    }

    pub fn input_enabled(&self) -> bool {
        self.input_enabled
    }

    pub fn typing_indicator(&self) -> bool {
        self.typing
    }

    pub fn channel_open(&self) -> bool {
        self.channel_open
    }

    pub fn retry_pending(&self) -> bool {
        self.retry.is_some()
    }

    /// formatted markup for one entry.
    pub fn render(&self, index: usize) -> Option<String> {
        self.entries.get(index).map(|e| render_text(&e.text))
    }

    /// hand over everything the ui needs to apply since the last call.
    pub fn take_updates(&mut self) -> Vec<ViewUpdate> {
        std::mem::take(&mut self.updates)
    }

    /// the user pressed send.
    pub fn submit(&mut self, raw: &str, conn: &mut ConnectionManager) -> Submit {
        let text = raw.trim();
        if text.is_empty() {
            return Submit::Ignored;
        }
        if !self.input_enabled {
            debug!(target: "bevy_ws_chat", "submit while input disabled, ignoring");
            return Submit::Busy;
        }

        info!(target: "bevy_ws_chat", "submit (len={})", text.len());
        self.push_entry(Role::User, text);
        self.updates.push(ViewUpdate::ClearInput);
        self.set_input(false);
        self.awaiting_reply = true;
        self.show_typing();

        match conn.send(text) {
            Ok(()) => Submit::Sent,
            Err(ChatError::NotConnected) => {
                warn!(
                    target: "bevy_ws_chat",
                    "send while {:?}; retrying in {:?}",
                    conn.state(), self.retry_delay
                );
                self.push_entry(Role::System, NOTICE_RECONNECTING);
                conn.connect();
                self.retry = Some(PendingSend {
                    payload: text.to_string(),
                    timer: Timer::new(self.retry_delay, TimerMode::Once),
                });
                Submit::Retrying
            }
            Err(err) => {
                error!(target: "bevy_ws_chat", "send failed: {}", err);
                self.push_entry(Role::System, format!("Error: {err}"));
                self.end_turn();
                Submit::Failed
            }
        }
    }

    /// advance the send-retry timer; on fire, try the send exactly once more.
    pub fn tick(&mut self, delta: Duration, conn: &mut ConnectionManager) {
        let fired = match self.retry.as_mut() {
            Some(pending) => {
                pending.timer.tick(delta);
                pending.timer.finished()
            }
            None => return,
        };
        if !fired {
            return;
        }
        let Some(pending) = self.retry.take() else {
            return;
        };
        match conn.send(&pending.payload) {
            Ok(()) => info!(target: "bevy_ws_chat", "retried send went through"),
            Err(err) => {
                warn!(target: "bevy_ws_chat", "retried send failed: {}", err);
                self.push_entry(Role::System, NOTICE_CONNECT_FAILED);
                self.end_turn();
            }
        }
    }

    /// apply one normalized channel event.
    pub fn handle_event(&mut self, event: &ChannelEvent) {
        match event {
            ChannelEvent::Connected => {
                self.channel_open = true;
                self.updates.push(ViewUpdate::Connection(true));
            }
            ChannelEvent::Disconnected => {
                self.channel_open = false;
                self.updates.push(ViewUpdate::Connection(false));
                if self.is_streaming() || (self.awaiting_reply && self.retry.is_none()) {
                    warn!(target: "bevy_ws_chat", "channel lost mid-reply");
                    self.stream = StreamState::Idle;
                    self.push_entry(Role::System, NOTICE_CONNECTION_LOST);
                    self.end_turn();
                }
            }
            ChannelEvent::Chunk(text) => self.append_chunk(text),
            ChannelEvent::Done => {
                if let StreamState::Streaming { index } = self.stream {
                    self.stream = StreamState::Idle;
                    info!(
                        target: "bevy_ws_chat",
                        "stream completed: final_len={}",
                        self.entries[index].text.len()
                    );
                }
                if self.awaiting_reply && self.retry.is_none() {
                    self.end_turn();
                    self.updates.push(ViewUpdate::FocusInput);
                } else {
                    debug!(target: "bevy_ws_chat", "done with no reply outstanding");
                }
            }
            ChannelEvent::Error(text) => {
                error!(target: "bevy_ws_chat", "server error: {}", text);
                // partial text stays as-is
                self.stream = StreamState::Idle;
                self.retry = None;
                self.push_entry(Role::System, format!("Error: {text}"));
                self.end_turn();
            }
        }
    }

    fn append_chunk(&mut self, text: &str) {
        let index = match self.stream {
            StreamState::Streaming { index } => index,
            StreamState::Idle => {
                self.remove_typing();
                // a stream always gates input, even one we didn't ask for
                self.set_input(false);
                self.awaiting_reply = true;
                let index = self.entries.len();
                self.entries.push(TranscriptEntry::new(Role::Assistant, String::new()));
                self.updates.push(ViewUpdate::EntryAppended { index, role: Role::Assistant });
                self.stream = StreamState::Streaming { index };
                debug!(target: "bevy_ws_chat", "stream started at entry {}", index);
                index
            }
        };
        self.entries[index].text.push_str(text);
        self.rendered(index);
    }

    fn push_entry(&mut self, role: Role, text: impl Into<String>) -> usize {
        let index = self.entries.len();
        self.entries.push(TranscriptEntry::new(role, text));
        self.updates.push(ViewUpdate::EntryAppended { index, role });
        self.rendered(index);
        index
    }

    fn rendered(&mut self, index: usize) {
        let html = render_text(&self.entries[index].text);
        self.updates.push(ViewUpdate::EntryRendered { index, html });
        self.updates.push(ViewUpdate::ScrollToBottom);
    }

    /// the single place input comes back on.
    fn end_turn(&mut self) {
        self.awaiting_reply = false;
        self.remove_typing();
        self.set_input(true);
    }

    fn set_input(&mut self, enabled: bool) {
        if self.input_enabled != enabled {
            self.input_enabled = enabled;
            self.updates.push(ViewUpdate::InputEnabled(enabled));
        }
    }

    fn show_typing(&mut self) {
        if !self.typing {
            self.typing = true;
            self.updates.push(ViewUpdate::ShowTyping);
        }
    }

    fn remove_typing(&mut self) {
        if self.typing {
            self.typing = false;
            self.updates.push(ViewUpdate::RemoveTyping);
        }
    }
}
